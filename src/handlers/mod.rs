// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
mod auth;
mod health;
mod metrics;

pub use auth::{logout, saml_acs, service_auth, signon, token_info, TokenInfo};
pub use health::{health_live, health_ready, health_startup, HealthState};
pub use metrics::metrics_handler;
