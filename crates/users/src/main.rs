// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Users service
//!
//! Serves the liveness probe on `0.0.0.0:8080` until SIGINT or SIGTERM.

use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::error;
use tracing_subscriber::util::SubscriberInitExt;
use users::{LogSinks, logging, run_until_signalled};

#[tokio::main]
async fn main() -> ExitCode {
    LogSinks::stdio()
        .into_subscriber(logging::env_filter())
        .init();

    // NOTE: the `#[tokio::main]` task does not run a worker future, we must spawn
    match tokio::spawn(run()).await.context("service task failed") {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) | Err(e) => {
            error!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    run_until_signalled()
        .await
        .context("users service terminated abnormally")
}
