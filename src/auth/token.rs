// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Session Tokens
//!
//! Signed, time-bounded identity tokens carried in a session cookie.
//!
//! Features:
//! - HS256 compact JWS signed with a key-store secret
//! - `iat`/`nbf`/`exp` window checked without leeway
//! - `aud` bound to the issuing tenant and enforced on validation
//! - Extra claims surfaced as role flags (presence only)
//! - `Set-Cookie` rendering for login and logout
//! - Token lookup in the session cookie or a Bearer header

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::context::{AuthScheme, SecurityContext};
use crate::keystore::{KeyAlias, KeyStore, KeyStoreError, DEFAULT_SIGNING_ALIAS};

/// Default token lifetime.
pub const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "stoa_session";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum TokenError {
    /// Forged, expired, not-yet-valid and unreadable tokens all land here.
    #[error("invalid token")]
    Invalid(String),

    #[error("signing key unavailable: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("token encoding failed: {0}")]
    Encode(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Cookie `SameSite` policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    /// Cross-site embedding. Always rendered with `Secure`.
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

/// Session cookie attributes.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub path: String,
    pub same_site: SameSite,
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            path: "/".to_string(),
            same_site: SameSite::Lax,
            secure: false,
        }
    }
}

/// Token service configuration.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Key-store alias of the HMAC secret.
    pub signing_key: KeyAlias,
    pub ttl: Duration,
    /// Optional `iss` claim, enforced on validation when set.
    pub issuer: Option<String>,
    /// `aud` claim, enforced on validation when set. Tenants set their id.
    pub audience: Option<String>,
    pub cookie: CookieSettings,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_key: KeyAlias::from(DEFAULT_SIGNING_ALIAS),
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            issuer: None,
            audience: None,
            cookie: CookieSettings::default(),
        }
    }
}

// =============================================================================
// Claims
// =============================================================================

/// Claims of an identity token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Role flags. Values are not interpreted.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A freshly signed token and its cookie.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Ready-to-send `Set-Cookie` value.
    pub cookie: String,
}

// =============================================================================
// Token Service
// =============================================================================

/// Issues and validates identity tokens for one tenant.
pub struct TokenService {
    keys: Arc<KeyStore>,
    config: TokenConfig,
}

impl TokenService {
    pub fn new(keys: Arc<KeyStore>, config: TokenConfig) -> Self {
        Self { keys, config }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue a token for `subject`, valid from now for the configured TTL.
    pub fn issue(&self, subject: &str) -> Result<IssuedToken, TokenError> {
        self.issue_at(subject, std::iter::empty::<String>(), Utc::now())
    }

    /// Issue a token carrying `roles` as claims.
    pub fn issue_with_roles<I, R>(&self, subject: &str, roles: I) -> Result<IssuedToken, TokenError>
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.issue_at(subject, roles, Utc::now())
    }

    /// Issue with an explicit clock.
    pub fn issue_at<I, R>(
        &self,
        subject: &str,
        roles: I,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError>
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        let issued_at = truncate_to_seconds(now);
        let expires_at = issued_at + self.config.ttl;

        let extra = roles
            .into_iter()
            .map(|role| (role.into(), serde_json::Value::Bool(true)))
            .filter(|(role, _)| !is_registered_claim(role))
            .collect();

        let claims = IdentityClaims {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            nbf: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            extra,
        };

        let secret = self.keys.secret(&self.config.signing_key)?;
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&secret),
        )
        .map_err(|e| TokenError::Encode(e.to_string()))?;

        debug!(sub = %subject, exp = claims.exp, "identity token issued");

        Ok(IssuedToken {
            cookie: self.session_cookie(&token, expires_at, issued_at),
            token,
            issued_at,
            expires_at,
        })
    }

    /// Validate a token against the current time.
    pub fn validate(&self, token: &str) -> Result<SecurityContext, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Validate with an explicit clock. Valid iff the signature matches, the
    /// audience (when configured) matches and `nbf <= now <= exp`.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<SecurityContext, TokenError> {
        let secret = self.keys.secret(&self.config.signing_key)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string(), "nbf".to_string()]);
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &self.config.audience {
            validation.validate_aud = true;
            validation.set_audience(&[audience]);
            validation.required_spec_claims.insert("aud".to_string());
        }

        let claims = decode::<IdentityClaims>(token, &DecodingKey::from_secret(&secret), &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?
            .claims;

        let now_secs = now.timestamp();
        if now_secs < claims.nbf || now_secs > claims.exp {
            return Err(TokenError::Invalid("outside validity window".to_string()));
        }

        let mut context = SecurityContext::new(claims.sub, AuthScheme::Token).with_validity(
            Utc.timestamp_opt(claims.nbf, 0).single(),
            Utc.timestamp_opt(claims.exp, 0).single(),
        );
        context.roles = claims.extra.into_keys().collect();
        Ok(context)
    }

    // -------------------------------------------------------------------------
    // Cookies
    // -------------------------------------------------------------------------

    /// `Set-Cookie` value carrying `token` until `expires_at`.
    pub fn session_cookie(&self, token: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let max_age = (expires_at - now).num_seconds().max(0);
        self.render_cookie(token, expires_at, max_age)
    }

    /// `Set-Cookie` value that clears the session cookie.
    pub fn logout_cookie(&self) -> String {
        let epoch = Utc.timestamp_opt(0, 0).single().unwrap_or_default();
        self.render_cookie("", epoch, 0)
    }

    fn render_cookie(&self, value: &str, expires_at: DateTime<Utc>, max_age: i64) -> String {
        let cookie = &self.config.cookie;
        let mut rendered = format!(
            "{}={}; Path={}; Expires={}; Max-Age={}; HttpOnly; SameSite={}",
            cookie.name,
            value,
            cookie.path,
            expires_at.format("%a, %d %b %Y %H:%M:%S GMT"),
            max_age,
            cookie.same_site.as_str(),
        );
        if cookie.secure || cookie.same_site == SameSite::None {
            rendered.push_str("; Secure");
        }
        rendered
    }

    /// Token presented on a request: the session cookie first, then an
    /// `Authorization: Bearer` header.
    pub fn token_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|cookies| cookie_value(cookies, &self.config.cookie.name))
            .or_else(|| {
                headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(bearer_token)
            })
    }
}

/// Value of cookie `name` within a `Cookie` header.
pub fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').find_map(|cookie| {
        let (key, value) = cookie.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}

fn bearer_token(value: &str) -> Option<String> {
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn is_registered_claim(name: &str) -> bool {
    matches!(name, "sub" | "iat" | "nbf" | "exp" | "iss" | "aud")
}

fn truncate_to_seconds(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now)
}

// =============================================================================
// Tests
// =============================================================================
