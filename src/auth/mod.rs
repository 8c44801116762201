// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Authentication
//!
//! Session tokens, signed service requests and the per-tenant dispatcher.

pub mod context;
pub mod middleware;
pub mod signed_request;
pub mod token;
pub mod validator;

pub use context::{AuthContext, AuthScheme, RequestProperties, SecurityContext};
pub use middleware::dispatch_auth;
pub use signed_request::{RequestValidationError, SignedRequest, SignedRequestVerifier};
pub use token::{IssuedToken, SameSite, TokenConfig, TokenError, TokenService};
pub use validator::{RequestValidator, SignonInitiator};
