// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server configuration module
//!
//! The service has no external configuration source: the bind address and the
//! connection timeouts are fixed constants. Tests use [`ServerConfig::for_testing`]
//! to bind an ephemeral port on the loopback interface.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

/// Port the service listens on
pub const DEFAULT_PORT: u16 = 8080;

/// Upper bound for a single client session, also used as the idle timeout
pub const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Time allowed for a client to send complete request headers
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection timeouts applied to every accepted connection
///
/// The write timeout is always twice the read timeout and the idle timeout is
/// always the maximum session timeout, so the only constructor takes those two
/// inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    read: Duration,
    write: Duration,
    idle: Duration,
}

impl Timeouts {
    /// Derive the full timeout set from a read timeout and a maximum session timeout
    pub const fn new(read: Duration, max_session: Duration) -> Self {
        Self {
            read,
            write: read.saturating_mul(2),
            idle: max_session,
        }
    }

    /// Time allowed to receive the request headers
    pub fn read(&self) -> Duration {
        self.read
    }

    /// Time allowed to write a response, counted from the start of its request
    pub fn write(&self) -> Duration {
        self.write
    }

    /// Time a keep-alive connection may sit without a request in flight
    pub fn idle(&self) -> Duration {
        self.idle
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new(READ_TIMEOUT, MAX_SESSION_TIMEOUT)
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Server host address
    pub host: IpAddr,
    /// Server port, 0 lets the OS choose
    pub port: u16,
    /// Per-connection timeouts
    pub timeouts: Timeouts,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            timeouts: Timeouts::default(),
        }
    }
}

impl ServerConfig {
    /// Create configuration optimized for testing
    pub fn for_testing() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0, // let OS choose available port
            timeouts: Timeouts::default(),
        }
    }

    /// Replace the connection timeouts
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
