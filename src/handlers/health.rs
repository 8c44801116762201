// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Probe state shared with the shutdown task.
#[derive(Clone, Default)]
pub struct HealthState {
    /// Flag indicating if we're shutting down
    pub shutting_down: Arc<AtomicBool>,
}

impl HealthState {
    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

/// Health check response body.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Kubernetes liveness probe endpoint.
///
/// # Endpoint
/// `GET /health/live`
pub async fn health_live() -> Response {
    (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response()
}

/// Kubernetes readiness probe endpoint.
///
/// Returns 503 once shutdown has begun so the load balancer drains us.
///
/// # Endpoint
/// `GET /health/ready`
pub async fn health_ready(State(state): State<HealthState>) -> Response {
    if state.shutting_down.load(Ordering::SeqCst) {
        let response = HealthResponse {
            status: "shutting_down",
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response();
    }
    (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response()
}

/// Kubernetes startup probe endpoint.
///
/// The listener is only bound after the key store and tenants are loaded,
/// so answering at all means startup completed.
///
/// # Endpoint
/// `GET /health/startup`
pub async fn health_startup() -> Response {
    (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response()
}
