// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Request Validators
//!
//! The closed set of per-tenant validators behind one contract:
//! `validate(request) -> Some(context)` when the request authenticates,
//! `None` when it carries no acceptable credential, and an error only for
//! unreadable input or a broken configuration.

use std::sync::Arc;

use axum::http::{header, request::Parts, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::context::{AuthScheme, SecurityContext};
use super::signed_request::SignedRequestVerifier;
use super::token::{TokenError, TokenService};
use crate::error::GatewayError;

/// Query parameter carrying the encoded signed request.
pub const REQUEST_PARAM: &str = "request";
/// Query parameter carrying the detached signature.
pub const SIGNATURE_PARAM: &str = "signature";

// =============================================================================
// Request Validator
// =============================================================================

#[derive(Clone)]
pub enum RequestValidator {
    /// Session token in a cookie or Bearer header.
    Token(Arc<TokenService>),

    /// Signed `request`/`signature` query parameters, falling back to the
    /// session token issued by the service endpoint.
    SignedRequest {
        verifier: Arc<SignedRequestVerifier>,
        tokens: Arc<TokenService>,
    },

    /// Session token issued after SAML sign-on.
    Federation(Arc<TokenService>),
}

impl RequestValidator {
    pub fn scheme(&self) -> AuthScheme {
        match self {
            RequestValidator::Token(_) => AuthScheme::Token,
            RequestValidator::SignedRequest { .. } => AuthScheme::SignedRequest,
            RequestValidator::Federation(_) => AuthScheme::Federation,
        }
    }

    pub fn validate(&self, parts: &Parts) -> Result<Option<SecurityContext>, GatewayError> {
        match self {
            RequestValidator::Token(tokens) => session_token(tokens, parts, AuthScheme::Token),
            RequestValidator::Federation(tokens) => {
                session_token(tokens, parts, AuthScheme::Federation)
            }
            RequestValidator::SignedRequest { verifier, tokens } => {
                match signed_request_params(parts.uri.query()) {
                    Some((request, signature)) => Ok(verifier
                        .verify(&request, &signature)?
                        .map(|account| SecurityContext::new(account.as_str(), AuthScheme::SignedRequest))),
                    None => session_token(tokens, parts, AuthScheme::SignedRequest),
                }
            }
        }
    }
}

fn session_token(
    tokens: &TokenService,
    parts: &Parts,
    scheme: AuthScheme,
) -> Result<Option<SecurityContext>, GatewayError> {
    let Some(token) = tokens.token_from_headers(&parts.headers) else {
        return Ok(None);
    };
    match tokens.validate(&token) {
        Ok(mut context) => {
            context.scheme = scheme;
            Ok(Some(context))
        }
        Err(TokenError::Invalid(reason)) => {
            debug!(reason = %reason, "session token rejected");
            Ok(None)
        }
        Err(other) => Err(other.into()),
    }
}

/// `request` and `signature` from a query string, when both are present.
pub fn signed_request_params(query: Option<&str>) -> Option<(String, String)> {
    let mut request = None;
    let mut signature = None;
    for (key, value) in url::form_urlencoded::parse(query?.as_bytes()) {
        match key.as_ref() {
            REQUEST_PARAM => request = Some(value.into_owned()),
            SIGNATURE_PARAM => signature = Some(value.into_owned()),
            _ => {}
        }
    }
    Some((request?, signature?))
}

// =============================================================================
// Sign-on Initiator
// =============================================================================

/// Sends unauthenticated browser navigation to the tenant's sign-on endpoint.
#[derive(Debug, Clone)]
pub struct SignonInitiator {
    tenant: String,
    /// Public origin used to make the relay state absolute. May be empty.
    base_url: String,
}

impl SignonInitiator {
    pub fn new(tenant: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Sign-on location for a request to `path_and_query`.
    pub fn signon_location(&self, path_and_query: &str) -> String {
        let relay_state = format!("{}{}", self.base_url, path_and_query);
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("relayState", &relay_state)
            .finish();
        format!("{}/auth/{}/signon?{}", self.base_url, self.tenant, query)
    }

    /// A 303 to sign-on for GET requests; other methods cannot be replayed
    /// after the redirect round-trip.
    pub fn initiate(&self, parts: &Parts) -> Option<Response> {
        if parts.method != Method::GET {
            return None;
        }
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let location = self.signon_location(path_and_query);
        debug!(tenant = %self.tenant, "redirecting to sign-on");
        Some((StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response())
    }
}
