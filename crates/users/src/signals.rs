// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! OS signal handling
//!
//! SIGINT and SIGTERM (Ctrl+C on non-unix targets) cancel a
//! [`CancellationToken`]. The token is cancelled at most once; later signals
//! are absorbed without effect.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ServerResult;

/// Create a child of `parent` that is cancelled on the first termination signal
///
/// Handlers are registered before this returns, so a signal delivered right
/// after the call is not lost. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `ServerError::Signal` if a signal handler cannot be registered.
pub fn shutdown_token(parent: &CancellationToken) -> ServerResult<CancellationToken> {
    let token = parent.child_token();
    let signal_received = register()?;

    let cancellation_token = token.clone();
    tokio::spawn(async move {
        // Wait for either a signal or existing cancellation
        tokio::select! {
            signal_name = signal_received => {
                warn!("Shutdown signal {} received, cancelling all operations...", signal_name);
                cancellation_token.cancel();
            },
            () = cancellation_token.cancelled() => {
                debug!("Cancellation token already cancelled, shutdown signal handler exiting");
            }
        }
    });

    Ok(token)
}

#[cfg(unix)]
fn register() -> ServerResult<impl Future<Output = &'static str> + Send + 'static> {
    use tokio::signal::unix::{SignalKind, signal};

    use crate::error::ServerError;

    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| ServerError::Signal {
        message: format!("failed to register SIGTERM handler: {e}"),
    })?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| ServerError::Signal {
        message: format!("failed to register SIGINT handler: {e}"),
    })?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    })
}

#[cfg(not(unix))]
fn register() -> ServerResult<impl Future<Output = &'static str> + Send + 'static> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
        "CTRL+C"
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn token_starts_uncancelled() {
        let parent = CancellationToken::new();
        let token = shutdown_token(&parent).expect("signal handlers register");

        assert!(!token.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let token = shutdown_token(&parent).expect("signal handlers register");

        parent.cancel();
        assert!(token.is_cancelled());
    }
}
