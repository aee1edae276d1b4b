// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server implementation module
//!
//! [`Server`] owns the listening endpoint and the request handler. It is moved
//! into its own task by [`Server::serve`], while the cloneable
//! [`ServerHandle`] stays with the caller to observe state and to request a
//! bounded graceful shutdown.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router, http::HeaderName};
use hyper::Request;
use tokio::{net::TcpListener, sync::watch};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, info_span, warn};

use crate::{
    config::ServerConfig,
    connection::Connection,
    error::{ServerError, ServerResult},
};

// Server constants
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration for server shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight requests before force-closing them
    pub graceful_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

/// Observable lifecycle state of a [`Server`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeState {
    /// Created, not yet listening
    Idle,
    /// Listener bound and accepting connections
    Serving {
        /// Address the listener is bound to
        local_addr: SocketAddr,
    },
    /// Shutdown requested, waiting for connections to drain
    Stopping,
    /// Listener closed and no connections remain
    Stopped,
}

/// Main server struct
#[derive(Debug)]
pub struct Server {
    /// Server configuration
    config: ServerConfig,
    /// Application router wrapped with server middleware
    router: Router,
    /// Shared shutdown and state plumbing
    handle: ServerHandle,
}

impl Server {
    /// Create new server instance around a request handler
    pub fn new(config: ServerConfig, handler: Router) -> Self {
        let router = Self::create_router(handler);

        Self {
            config,
            router,
            handle: ServerHandle::new(),
        }
    }

    /// Wrap the request handler with middleware
    fn create_router(handler: Router) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
            .layer(
                TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                    if let Some(request_id) = req.headers().get(REQUEST_ID_HEADER) {
                        info_span!("http_request", method = %req.method(), uri = %req.uri(), ?request_id)
                    } else {
                        tracing::error!("failed to extract id from request");
                        info_span!("http_request", method = %req.method(), uri = %req.uri(), request_id = "unknown")
                    }
                }),
            )
            .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER));

        Router::new().fallback_service(handler).layer(middleware)
    }

    /// Handle used to observe and stop this server from another task
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve connections until shutdown
    ///
    /// Returns `Ok(())` when the listener was closed by [`ServerHandle::shutdown`],
    /// including when shutdown was requested before serving started.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address,
    /// `ServerError::Startup` if the bound address cannot be read, or
    /// `ServerError::Accept` if the listener fails. Running out of file
    /// descriptors or memory is logged and retried after a short backoff.
    pub async fn serve(self) -> ServerResult<()> {
        let handle = self.handle.clone();
        // keeps `shutdown` waiting until the listener is gone
        let _listening = handle.tracker.token();

        let result = self.accept_loop().await;
        if result.is_err() {
            handle.set_state(ServeState::Stopped);
        }
        result
    }

    async fn accept_loop(self) -> ServerResult<()> {
        let Self {
            config,
            router,
            handle,
        } = self;

        if handle.graceful.is_cancelled() {
            debug!("server closed before serving");
            return Ok(());
        }

        let addr = config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                address: addr,
                source,
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Startup { source })?;

        handle.set_state(ServeState::Serving { local_addr });
        info!(address = %local_addr, "server listening");

        loop {
            let (stream, remote_addr) = tokio::select! {
                biased;

                () = handle.graceful.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => match AcceptFailure::classify(&error) {
                        AcceptFailure::Connection => {
                            debug!(%error, "connection dropped before accept completed");
                            continue;
                        }
                        AcceptFailure::Exhausted => {
                            error!(%error, backoff = ?ACCEPT_BACKOFF, "accept failed, out of resources");
                            tokio::select! {
                                biased;

                                () = handle.graceful.cancelled() => break,
                                () = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                            }
                        }
                        AcceptFailure::Fatal => return Err(ServerError::Accept { source: error }),
                    },
                },
            };

            debug!(%remote_addr, "accepted connection");
            handle.tracker.spawn(
                Connection {
                    stream,
                    remote_addr,
                    router: router.clone(),
                    timeouts: config.timeouts,
                    graceful: handle.graceful.clone(),
                    force: handle.force.clone(),
                }
                .run(),
            );
        }

        drop(listener);
        info!(address = %local_addr, "listener closed");
        Ok(())
    }

    /// Run server for testing, returns the bound address
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address.
    pub async fn run_for_testing(self) -> ServerResult<(SocketAddr, ServerHandle)> {
        let handle = self.handle();
        let mut serving = tokio::spawn(self.serve());

        tokio::select! {
            joined = &mut serving => {
                joined??;
                Err(ServerError::Startup { source: io::Error::other("server stopped before binding") })
            }
            ready = handle.ready() => match ready {
                Some(local_addr) => Ok((local_addr, handle)),
                None => {
                    serving.await??;
                    Err(ServerError::Startup { source: io::Error::other("server stopped before binding") })
                }
            },
        }
    }
}

/// How the accept loop reacts to a failed `accept`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// Only the connection being accepted is affected
    Connection,
    /// The process or system ran out of descriptors or memory; retry later
    Exhausted,
    /// The listener itself is broken
    Fatal,
}

impl AcceptFailure {
    fn classify(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset => Self::Connection,
            io::ErrorKind::OutOfMemory => Self::Exhausted,
            _ if is_resource_exhaustion(error) => Self::Exhausted,
            _ => Self::Fatal,
        }
    }
}

#[cfg(unix)]
fn is_resource_exhaustion(error: &io::Error) -> bool {
    use nix::errno::Errno;

    error.raw_os_error().map(Errno::from_raw).is_some_and(|errno| {
        matches!(
            errno,
            Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM
        )
    })
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_error: &io::Error) -> bool {
    false
}

/// Cloneable control handle for a [`Server`]
#[derive(Debug, Clone)]
pub struct ServerHandle {
    /// Stops the accept loop and drains connections
    graceful: CancellationToken,
    /// Drops connections that outlived the grace period
    force: CancellationToken,
    /// Tracks the accept loop and every connection task
    tracker: TaskTracker,
    state: Arc<watch::Sender<ServeState>>,
}

impl ServerHandle {
    fn new() -> Self {
        let (state, _) = watch::channel(ServeState::Idle);

        Self {
            graceful: CancellationToken::new(),
            force: CancellationToken::new(),
            tracker: TaskTracker::new(),
            state: Arc::new(state),
        }
    }

    fn set_state(&self, state: ServeState) {
        self.state.send_replace(state);
    }

    /// Current server state
    pub fn state(&self) -> ServeState {
        *self.state.borrow()
    }

    /// Bound address while serving
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.state() {
            ServeState::Serving { local_addr } => Some(local_addr),
            _ => None,
        }
    }

    /// Wait until the server is accepting connections
    ///
    /// Resolves to `None` if the server stopped without ever serving.
    pub async fn ready(&self) -> Option<SocketAddr> {
        let mut state = self.state.subscribe();
        let ready = state
            .wait_for(|state| *state != ServeState::Idle)
            .await
            .ok()
            .map(|state| *state);

        match ready {
            Some(ServeState::Serving { local_addr }) => Some(local_addr),
            _ => None,
        }
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.graceful.is_cancelled()
    }

    /// Stop accepting connections and drain the open ones within `timeout`
    ///
    /// Connections still open when the timeout elapses are force-closed.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ShutdownTimeout` if connections had to be
    /// force-closed.
    pub async fn shutdown(&self, timeout: Duration) -> ServerResult<()> {
        info!(?timeout, "graceful shutdown requested");
        self.set_state(ServeState::Stopping);
        self.graceful.cancel();
        self.tracker.close();

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            self.set_state(ServeState::Stopped);
            info!("server drained");
            return Ok(());
        }

        let connections = self.tracker.len();
        warn!(connections, "grace period elapsed, force-closing connections");
        self.force.cancel();
        self.set_state(ServeState::Stopped);

        Err(ServerError::ShutdownTimeout {
            timeout,
            connections,
        })
    }
}
