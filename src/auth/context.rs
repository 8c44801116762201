// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Security Context
//!
//! Per-request record of the authenticated principal, attached to the request
//! extensions by the dispatcher and read back by handlers.

use std::collections::{BTreeMap, BTreeSet};

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Property key holding the start of the credential validity window.
pub const VALID_FROM_PROPERTY: &str = "auth.valid_from";
/// Property key holding the end of the credential validity window.
pub const VALID_UNTIL_PROPERTY: &str = "auth.valid_until";

/// Authentication scheme that produced a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    Token,
    SignedRequest,
    Federation,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Token => "token",
            AuthScheme::SignedRequest => "signed_request",
            AuthScheme::Federation => "federation",
        }
    }
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated principal and the window in which its credential is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    pub principal: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub scheme: AuthScheme,
    /// Coarse-grained role flags. Membership is presence only.
    pub roles: BTreeSet<String>,
}

impl SecurityContext {
    pub fn new(principal: impl Into<String>, scheme: AuthScheme) -> Self {
        Self {
            principal: principal.into(),
            valid_from: None,
            valid_until: None,
            scheme,
            roles: BTreeSet::new(),
        }
    }

    pub fn with_validity(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_until = valid_until;
        self
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Roles from `required` that this context lacks.
    pub fn missing_roles<'a>(&self, required: &'a BTreeSet<String>) -> Vec<&'a str> {
        required
            .iter()
            .filter(|role| !self.is_in_role(role))
            .map(String::as_str)
            .collect()
    }
}

// =============================================================================
// Request Properties
// =============================================================================

/// Key-value bag attached to an authenticated request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestProperties(BTreeMap<String, String>);

impl RequestProperties {
    /// Validity window of `context` as RFC 3339 properties.
    pub fn from_context(context: &SecurityContext) -> Self {
        let mut properties = Self::default();
        if let Some(from) = context.valid_from {
            properties.insert(
                VALID_FROM_PROPERTY,
                from.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
        if let Some(until) = context.valid_until {
            properties.insert(
                VALID_UNTIL_PROPERTY,
                until.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
        properties
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// Extractor for the security context set by the dispatcher.
///
/// ```ignore
/// async fn handler(AuthContext(ctx): AuthContext) -> String {
///     ctx.principal
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthContext(pub SecurityContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SecurityContext>()
            .cloned()
            .map(AuthContext)
            .ok_or(GatewayError::NotAuthenticated { service: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_role_membership_is_presence() {
        let mut ctx = SecurityContext::new("alice", AuthScheme::Token);
        ctx.roles.insert("editor".to_string());

        assert!(ctx.is_in_role("editor"));
        assert!(!ctx.is_in_role("admin"));

        let required: BTreeSet<String> = ["editor", "admin"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ctx.missing_roles(&required), vec!["admin"]);
    }

    #[test]
    fn test_properties_from_context() {
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let ctx = SecurityContext::new("alice", AuthScheme::Token).with_validity(Some(from), Some(until));

        let properties = RequestProperties::from_context(&ctx);
        assert_eq!(properties.get(VALID_FROM_PROPERTY), Some("2026-03-01T12:00:00Z"));
        assert_eq!(properties.get(VALID_UNTIL_PROPERTY), Some("2026-03-02T12:00:00Z"));
    }

    #[test]
    fn test_properties_skip_open_window() {
        let ctx = SecurityContext::new("svc", AuthScheme::SignedRequest);
        assert_eq!(RequestProperties::from_context(&ctx).iter().count(), 0);
    }

    #[tokio::test]
    async fn test_extractor_rejects_without_context() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let result = AuthContext::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(GatewayError::NotAuthenticated { .. })));
    }
}
