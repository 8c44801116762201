// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! STOA Auth Gateway
//!
//! Multi-tenant authentication in front of a document repository API:
//! SAML2 sign-on, signed session tokens and signed service requests, one
//! uniform per-request decision.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod keystore;
pub mod metrics;
pub mod saml;
pub mod tenant;

pub use app::{build_router, AppState};
pub use config::Config;
pub use error::GatewayError;
