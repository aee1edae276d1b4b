// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Service lifecycle driver
//!
//! Runs a [`Server`] on its own task and waits for whichever comes first: the
//! serve task failing, or the execution context being cancelled. On
//! cancellation the server is drained within the grace period. Nothing is
//! retried; a supervisor is expected to restart the process.

use std::{fmt, net::SocketAddr};

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    config::ServerConfig,
    error::ServerResult,
    routes::{HEALTH_CHECK_PATH, create_app, create_routes},
    server::{Server, ServerHandle, ShutdownConfig},
    signals,
};

/// Phases of the process lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Building the execution context, router and server
    Initializing,
    /// Serve task running
    Serving,
    /// Cancellation observed, draining connections
    Draining,
    /// Drained cleanly
    Terminated,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Initializing => write!(f, "initializing"),
            LifecyclePhase::Serving => write!(f, "serving"),
            LifecyclePhase::Draining => write!(f, "draining"),
            LifecyclePhase::Terminated => write!(f, "terminated"),
        }
    }
}

/// URL logged once the liveness probe is reachable
pub fn health_check_url(local_addr: SocketAddr) -> String {
    format!("http://{local_addr}{HEALTH_CHECK_PATH}")
}

/// Drives one [`Server`] from start to shutdown
#[derive(Debug)]
pub struct Lifecycle {
    server: Server,
    shutdown_config: ShutdownConfig,
    shutdown_token: CancellationToken,
}

impl Lifecycle {
    /// Create a driver that stops `server` once `shutdown_token` is cancelled
    pub fn new(
        server: Server,
        shutdown_config: ShutdownConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            server,
            shutdown_config,
            shutdown_token,
        }
    }

    /// Handle to the managed server
    pub fn server_handle(&self) -> ServerHandle {
        self.server.handle()
    }

    /// Serve until cancelled, then drain within the grace period
    ///
    /// # Errors
    ///
    /// Returns the serve error if the server fails before cancellation, or the
    /// shutdown error if draining does not finish in time.
    pub async fn run(self) -> ServerResult<()> {
        let Self {
            server,
            shutdown_config,
            shutdown_token,
        } = self;

        let handle = server.handle();
        let mut serving = tokio::spawn(server.serve());
        transition(LifecyclePhase::Serving);

        // the URL is only announced once the listener is actually bound
        tokio::select! {
            biased;

            joined = &mut serving => return serve_outcome(joined),
            () = shutdown_token.cancelled() => {}
            ready = handle.ready() => match ready {
                Some(local_addr) => info!("health check available at {}", health_check_url(local_addr)),
                None => return serve_outcome(serving.await),
            },
        }

        tokio::select! {
            biased;

            joined = &mut serving, if !shutdown_token.is_cancelled() => return serve_outcome(joined),
            () = shutdown_token.cancelled() => {}
        }

        info!("shutdown signal received");
        transition(LifecyclePhase::Draining);

        if let Err(e) = handle.shutdown(shutdown_config.graceful_timeout).await {
            error!(error = %e, "server shutdown failed");
            return Err(e);
        }

        serve_outcome(serving.await)?;
        transition(LifecyclePhase::Terminated);
        Ok(())
    }
}

fn serve_outcome(joined: Result<ServerResult<()>, JoinError>) -> ServerResult<()> {
    joined?
}

fn transition(phase: LifecyclePhase) {
    debug!(%phase, "lifecycle transition");
}

/// Run the service on the fixed address until SIGINT or SIGTERM
///
/// # Errors
///
/// Returns any error from signal registration, serving, or shutdown.
pub async fn run_until_signalled() -> ServerResult<()> {
    transition(LifecyclePhase::Initializing);

    let shutdown_token = signals::shutdown_token(&CancellationToken::new())?;
    let server = Server::new(ServerConfig::default(), create_app(create_routes()));

    Lifecycle::new(server, ShutdownConfig::default(), shutdown_token)
        .run()
        .await
}
