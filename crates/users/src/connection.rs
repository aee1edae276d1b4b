// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Per-connection HTTP driver
//!
//! Each accepted socket is served by hyper's auto (HTTP/1.1 + HTTP/2)
//! connection builder. The driver enforces the header read timeout through
//! hyper's timer, closes keep-alive connections that stay idle too long, and
//! reacts to the server's graceful and forced shutdown tokens.
//!
//! The write timeout is a deadline on the socket, not on the handler: it is
//! armed when a request is dispatched and any write attempted after it fails,
//! which tears the connection down. The handler itself keeps running.

use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use axum::{Router, body::Body};
use hyper::{Request, body::Incoming};
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto::Builder,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
    sync::Notify,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, trace};

use crate::config::Timeouts;

/// An accepted socket plus everything needed to serve it
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) stream: TcpStream,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) router: Router,
    pub(crate) timeouts: Timeouts,
    pub(crate) graceful: CancellationToken,
    pub(crate) force: CancellationToken,
}

impl Connection {
    /// Serve requests until the client leaves, the connection goes idle, or
    /// the server shuts down
    pub(crate) async fn run(self) {
        let Self {
            stream,
            remote_addr,
            router,
            timeouts,
            graceful,
            force,
        } = self;

        if let Err(error) = stream.set_nodelay(true) {
            trace!(%remote_addr, %error, "failed to set TCP_NODELAY");
        }

        let activity = Arc::new(Activity::new(timeouts.write()));
        let service = {
            let activity = Arc::clone(&activity);
            hyper::service::service_fn(move |request: Request<Incoming>| {
                let in_flight = activity.begin();
                let router = router.clone();
                async move {
                    let response = router.oneshot(request.map(Body::new)).await;
                    drop(in_flight);
                    response
                }
            })
        };

        let mut builder = Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(timeouts.read());

        let stream = DeadlineStream {
            inner: stream,
            activity: Arc::clone(&activity),
        };
        let connection = builder.serve_connection(TokioIo::new(stream), service);
        tokio::pin!(connection);

        let mut draining = false;
        loop {
            tokio::select! {
                biased;

                () = force.cancelled() => {
                    debug!(%remote_addr, "connection force-closed");
                    return;
                }
                result = connection.as_mut() => {
                    if let Err(error) = result {
                        debug!(%remote_addr, %error, "connection closed with error");
                    } else {
                        trace!(%remote_addr, "connection closed");
                    }
                    return;
                }
                () = graceful.cancelled(), if !draining => {
                    trace!(%remote_addr, "draining connection");
                    draining = true;
                    connection.as_mut().graceful_shutdown();
                }
                () = sleep_until(activity.idle_deadline(timeouts.idle())), if !draining => {
                    if activity.is_idle(timeouts.idle()) {
                        debug!(%remote_addr, idle_timeout = ?timeouts.idle(), "closing idle connection");
                        draining = true;
                        connection.as_mut().graceful_shutdown();
                    }
                }
                // re-arm the idle timer from the end of the request
                () = activity.released.notified(), if !draining => {}
            }
        }
    }
}

/// No write deadline armed
const NO_DEADLINE: u64 = u64::MAX;

/// Request bookkeeping for idle detection and the write deadline
#[derive(Debug)]
struct Activity {
    epoch: Instant,
    write_timeout: Duration,
    in_flight: AtomicUsize,
    // milliseconds since `epoch`
    last_active: AtomicU64,
    write_deadline: AtomicU64,
    /// Signalled whenever a request finishes
    released: Notify,
}

impl Activity {
    fn new(write_timeout: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            write_timeout,
            in_flight: AtomicUsize::new(0),
            last_active: AtomicU64::new(0),
            write_deadline: AtomicU64::new(NO_DEADLINE),
            released: Notify::new(),
        }
    }

    /// Start a request and arm the write deadline for its response
    fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let write_timeout = u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX);
        self.write_deadline.store(
            self.elapsed_millis().saturating_add(write_timeout),
            Ordering::Release,
        );
        InFlight(Arc::clone(self))
    }

    fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn touch(&self) {
        self.last_active.store(self.elapsed_millis(), Ordering::Release);
    }

    fn write_expired(&self) -> bool {
        let deadline = self.write_deadline.load(Ordering::Acquire);
        deadline != NO_DEADLINE && self.elapsed_millis() >= deadline
    }

    fn last_active(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_active.load(Ordering::Acquire))
    }

    fn idle_deadline(&self, idle_timeout: Duration) -> Instant {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            Instant::now() + idle_timeout
        } else {
            self.last_active() + idle_timeout
        }
    }

    fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
            && self.last_active().elapsed() >= idle_timeout
    }
}

/// Marks one request in flight until dropped
#[derive(Debug)]
struct InFlight(Arc<Activity>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.0.released.notify_one();
    }
}

/// TCP stream whose writes fail once the write deadline has passed
#[derive(Debug)]
struct DeadlineStream {
    inner: TcpStream,
    activity: Arc<Activity>,
}

impl DeadlineStream {
    fn check_deadline(&self) -> io::Result<()> {
        if self.activity.write_expired() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "response write deadline exceeded",
            ));
        }
        Ok(())
    }
}

impl AsyncRead for DeadlineStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for DeadlineStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.check_deadline()?;
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.check_deadline()?;
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_secs(10);
    const WRITE: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn fresh_connection_becomes_idle_after_timeout() {
        let activity = Activity::new(WRITE);
        assert!(!activity.is_idle(IDLE));

        tokio::time::advance(IDLE).await;
        assert!(activity.is_idle(IDLE));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_request_is_never_idle() {
        let activity = Arc::new(Activity::new(WRITE));
        let in_flight = activity.begin();

        tokio::time::advance(IDLE * 3).await;
        assert!(!activity.is_idle(IDLE));
        assert!(activity.idle_deadline(IDLE) > Instant::now());

        drop(in_flight);
        assert!(!activity.is_idle(IDLE));

        tokio::time::advance(IDLE).await;
        assert!(activity.is_idle(IDLE));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_request_resets_idle_deadline() {
        let activity = Arc::new(Activity::new(WRITE));
        tokio::time::advance(Duration::from_secs(4)).await;

        drop(activity.begin());
        let deadline = activity.idle_deadline(IDLE);
        assert!(deadline >= Instant::now() + IDLE - Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn write_deadline_armed_when_request_starts() {
        let activity = Arc::new(Activity::new(WRITE));
        tokio::time::advance(WRITE * 3).await;
        assert!(!activity.write_expired());

        let in_flight = activity.begin();
        tokio::time::advance(WRITE - Duration::from_millis(10)).await;
        assert!(!activity.write_expired());

        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(activity.write_expired());

        // finishing the handler does not lift the deadline for its response
        drop(in_flight);
        assert!(activity.write_expired());

        drop(activity.begin());
        assert!(!activity.write_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_request_wakes_idle_timer() {
        let activity = Arc::new(Activity::new(WRITE));
        let in_flight = activity.begin();
        tokio::time::advance(IDLE / 2).await;

        drop(in_flight);

        let woken =
            tokio::time::timeout(Duration::from_millis(1), activity.released.notified()).await;
        assert!(woken.is_ok());
        assert!(activity.idle_deadline(IDLE) >= Instant::now() + IDLE - Duration::from_millis(1));
    }
}
