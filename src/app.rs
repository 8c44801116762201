// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Application state and router.

use std::sync::Arc;

use axum::{
    extract::FromRef,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::dispatch_auth;
use crate::handlers::{
    health_live, health_ready, health_startup, logout, metrics_handler, saml_acs, service_auth,
    signon, token_info,
};
use crate::metrics::Metrics;
use crate::tenant::TenantAuthRegistry;

pub use crate::handlers::HealthState;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub registry: Arc<TenantAuthRegistry>,
    pub metrics: Metrics,
    pub health: HealthState,
}

impl AppState {
    pub fn new(registry: TenantAuthRegistry, metrics: Metrics) -> Self {
        Self {
            registry: Arc::new(registry),
            metrics,
            health: HealthState::default(),
        }
    }
}

/// Gateway router: probes, metrics and the `/auth/:tenant/...` endpoints.
pub fn build_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/auth/:tenant/token", get(token_info))
        .route_layer(middleware::from_fn_with_state(state.clone(), dispatch_auth));

    Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/health/startup", get(health_startup))
        .route("/metrics", get(metrics_handler))
        .route("/auth/:tenant/signon", get(signon))
        .route("/auth/:tenant/saml", post(saml_acs))
        .route("/auth/:tenant/service", get(service_auth))
        .route("/auth/:tenant/logout", post(logout))
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
