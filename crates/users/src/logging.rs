// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Logging setup
//!
//! Two sinks receive the service's log lines: error-level events go to the
//! error sink, everything else goes to the info sink. The process uses
//! stdout/stderr; tests pass capturing writers instead.

use std::io::IsTerminal;

use tracing::{Level, Subscriber};
use tracing_subscriber::{
    EnvFilter,
    fmt::{
        self,
        time::ChronoLocal,
        writer::{MakeWriter, MakeWriterExt},
    },
    layer::SubscriberExt,
};

/// Date, time and microseconds
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.6f";

/// Default directive when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "info";

/// Info and error destinations for log output
#[derive(Debug, Clone)]
pub struct LogSinks<I, E> {
    info: I,
    error: E,
    ansi: bool,
}

impl LogSinks<fn() -> std::io::Stdout, fn() -> std::io::Stderr> {
    /// Standard output for info, standard error for errors
    pub fn stdio() -> Self {
        Self {
            info: std::io::stdout,
            error: std::io::stderr,
            ansi: std::io::stdout().is_terminal(),
        }
    }
}

impl<I, E> LogSinks<I, E>
where
    I: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    E: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    /// Use custom sinks, without ANSI colouring
    pub fn new(info: I, error: E) -> Self {
        Self {
            info,
            error,
            ansi: false,
        }
    }

    /// Build a subscriber writing through these sinks
    pub fn into_subscriber(self, filter: EnvFilter) -> impl Subscriber + Send + Sync + 'static {
        let writer = self.error.with_max_level(Level::ERROR).or_else(self.info);

        tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .with_writer(writer)
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_ansi(self.ansi),
        )
    }
}

/// Filter from `RUST_LOG`, falling back to [`DEFAULT_FILTER`]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
