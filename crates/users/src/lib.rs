// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Users Service Skeleton
//!
//! This crate provides the process skeleton for the users service: an HTTP
//! listener with a liveness probe, driven by a lifecycle that shuts down
//! gracefully on SIGINT/SIGTERM within a fixed grace period.
//!
//! # Module Structure
//!
//! - [`config`]: Fixed bind address and connection timeouts
//! - [`error`]: Lifecycle error types
//! - [`middleware`]: Liveness probe that short-circuits `GET|HEAD /health`
//! - [`routes`]: Request handler mapping the service's API surface
//! - [`server`]: Listener, connection tracking and bounded graceful shutdown
//! - [`signals`]: OS signals mapped onto a `CancellationToken`
//! - [`lifecycle`]: Serve/cancel/drain orchestration
//! - [`logging`]: Info and error log sinks
//!
//! # Lifecycle
//!
//! 1. Subscribe to termination signals and build the router and server
//! 2. Serve on a separate task; log the health-check URL once bound
//! 3. Wait for a serve failure or a signal, whichever comes first
//! 4. On a signal, stop accepting and drain for up to 10 seconds
//! 5. Any failure is returned to `main`, which exits non-zero

pub mod config;
mod connection;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod signals;

pub use config::{ServerConfig, Timeouts};
pub use error::{ServerError, ServerResult};
pub use lifecycle::{Lifecycle, LifecyclePhase, run_until_signalled};
pub use logging::LogSinks;
pub use server::{ServeState, Server, ServerHandle, ShutdownConfig};
