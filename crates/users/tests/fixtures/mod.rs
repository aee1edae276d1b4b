// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for integration tests

#![allow(dead_code)]

use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{Router, routing::get};
use tokio::sync::Notify;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{EnvFilter, fmt::MakeWriter};
use users::{LogSinks, Server, ServerConfig, ServerHandle, routes::create_app};

/// In-memory log sink
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().expect("log buffer lock").clone();
        String::from_utf8(bytes).expect("utf-8 log output")
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("log buffer lock")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Route this thread's log output into two buffers until the guard drops
///
/// Tests using this must run on a current-thread runtime so spawned tasks
/// log through the same default subscriber.
pub fn capture_logs() -> (LogBuffer, LogBuffer, DefaultGuard) {
    let info = LogBuffer::default();
    let error = LogBuffer::default();
    let subscriber =
        LogSinks::new(info.clone(), error.clone()).into_subscriber(EnvFilter::new("info"));
    let guard = tracing::subscriber::set_default(subscriber);
    (info, error, guard)
}

/// Router whose `/slow` handler signals `entered` and then sleeps for `delay`
pub fn slow_router(entered: Arc<Notify>, delay: Duration) -> Router {
    Router::new().route(
        "/slow",
        get(move || {
            let entered = Arc::clone(&entered);
            async move {
                entered.notify_one();
                tokio::time::sleep(delay).await;
                "done"
            }
        }),
    )
}

/// Start a server with the liveness probe around `handler`
pub async fn start_server(config: ServerConfig, handler: Router) -> (SocketAddr, ServerHandle) {
    Server::new(config, create_app(handler))
        .run_for_testing()
        .await
        .expect("Failed to start test server")
}
