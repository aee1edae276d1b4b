// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! A real termination signal delivered to the process drives a clean shutdown
//!
//! Kept in its own test binary: the signal is raised against the whole process.

#![cfg(unix)]

mod fixtures;

use std::time::Duration;

use fixtures::capture_logs;
use nix::sys::signal::{Signal, raise};
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;
use users::{
    Lifecycle, Server, ServerConfig, ShutdownConfig,
    routes::{create_app, create_routes},
    signals,
};

#[tokio::test]
async fn sigterm_while_serving_exits_cleanly() {
    let (info, errors, _guard) = capture_logs();

    let token = assert_ok!(signals::shutdown_token(&CancellationToken::new()));
    let server = Server::new(ServerConfig::for_testing(), create_app(create_routes()));
    let handle = server.handle();
    let lifecycle = Lifecycle::new(server, ShutdownConfig::default(), token.clone());
    let running = tokio::spawn(lifecycle.run());

    assert!(handle.ready().await.is_some());
    let announced = tokio::time::timeout(Duration::from_secs(5), async {
        while !info.contents().contains("health check available at http://") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_ok!(announced);

    assert_ok!(raise(Signal::SIGTERM));

    let joined = assert_ok!(tokio::time::timeout(Duration::from_secs(5), running).await);
    assert_ok!(assert_ok!(joined));
    assert!(token.is_cancelled());

    // later signals are absorbed by the registered handlers
    assert_ok!(raise(Signal::SIGINT));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let info = info.contents();
    assert!(info.contains("Shutdown signal SIGTERM received"), "{info}");
    assert!(info.contains("shutdown signal received"), "{info}");
    assert!(!info.contains("SIGINT"), "{info}");
    assert_eq!(errors.contents(), "");
}
