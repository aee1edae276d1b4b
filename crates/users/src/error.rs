// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error handling module
//!
//! Every error in the service lifecycle is terminal for the process; the
//! variants exist so the final log line says what went wrong.

use std::{net::SocketAddr, time::Duration};

use thiserror::Error;

/// Error types for server lifecycle operations
#[derive(Error, Debug)]
pub enum ServerError {
    /// Network binding errors
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Socket address that failed to bind
        address: SocketAddr,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server startup errors
    #[error("Server startup failed: {source}")]
    Startup {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Listener failures other than a single aborted connection
    #[error("Failed to accept connection: {source}")]
    Accept {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Connections were still open when the grace period ran out
    #[error(
        "Graceful shutdown deadline exceeded after {timeout:?}, force-closed {connections} connection(s)"
    )]
    ShutdownTimeout {
        /// Grace period that elapsed
        timeout: Duration,
        /// Connections that had to be force-closed
        connections: usize,
    },

    /// Signal handling errors
    #[error("Signal handling error: {message}")]
    Signal {
        /// Error message
        message: String,
    },

    /// Task join errors for async operations
    #[error("Task join error: {source}")]
    TaskJoin {
        /// Underlying tokio join error
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<tokio::task::JoinError> for ServerError {
    fn from(source: tokio::task::JoinError) -> Self {
        Self::TaskJoin { source }
    }
}
