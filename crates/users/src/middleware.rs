// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Liveness middleware
//!
//! Answers the health-check endpoint before any routing happens, so the probe
//! keeps working no matter what the wrapped router does with other paths.

use axum::{
    Router,
    extract::{Request, State},
    http::{Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};

/// Body returned by the liveness probe
pub const LIVENESS_BODY: &str = ".";

/// Path and method matcher for the liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessEndpoint {
    path: &'static str,
}

impl LivenessEndpoint {
    /// Create a matcher for the given path
    pub const fn new(path: &'static str) -> Self {
        Self { path }
    }

    /// Whether a request with this method and path is a liveness probe
    ///
    /// Both method and path compare case-insensitively. The path must match
    /// exactly; the query string is not part of it.
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        let method = method.as_str();
        (method.eq_ignore_ascii_case(Method::GET.as_str())
            || method.eq_ignore_ascii_case(Method::HEAD.as_str()))
            && path.eq_ignore_ascii_case(self.path)
    }
}

/// Short-circuit liveness probes, forward everything else to `next`
pub async fn liveness_middleware(
    State(endpoint): State<LivenessEndpoint>,
    request: Request,
    next: Next,
) -> Response {
    if endpoint.matches(request.method(), request.uri().path()) {
        return liveness_response();
    }

    next.run(request).await
}

fn liveness_response() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        LIVENESS_BODY,
    )
        .into_response()
}

/// Wrap a whole router, fallback included, with the liveness probe
pub fn with_liveness(next: Router, path: &'static str) -> Router {
    Router::new()
        .fallback_service(next)
        .layer(middleware::from_fn_with_state(
            LivenessEndpoint::new(path),
            liveness_middleware,
        ))
}
