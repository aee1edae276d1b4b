// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Routes module
//!
//! This is where the API surface of the service gets mapped. The skeleton
//! registers no endpoints of its own; the liveness probe is layered on top.

use axum::{Router, http::StatusCode, response::IntoResponse};

use crate::middleware::with_liveness;

/// Path answered by the liveness probe
pub const HEALTH_CHECK_PATH: &str = "/health";

/// Create the application request handler
pub fn create_routes() -> Router {
    Router::new().fallback(not_found_handler)
}

/// Request handler wrapped with the liveness probe
pub fn create_app(handler: Router) -> Router {
    with_liveness(handler, HEALTH_CHECK_PATH)
}

async fn not_found_handler() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}
