// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Authentication endpoints under `/auth/:tenant`.
//!
//! Features:
//! - Token introspection for the authenticated caller
//! - SAML sign-on initiation and assertion consumer service
//! - Signed service-request login issuing a session cookie
//! - Logout (expired session cookie)

use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth::context::{AuthContext, AuthScheme};
use crate::error::GatewayError;

/// Body of the token and service endpoints.
#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub user: String,
    #[serde(rename = "validFrom", skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(rename = "validTo", skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
}

impl TokenInfo {
    fn new(user: impl Into<String>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        let iso = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
        Self {
            user: user.into(),
            valid_from: from.map(iso),
            valid_to: to.map(iso),
        }
    }
}

// =============================================================================
// Token
// =============================================================================

/// `GET /auth/:tenant/token`, behind the auth dispatcher.
pub async fn token_info(AuthContext(context): AuthContext) -> Json<TokenInfo> {
    Json(TokenInfo::new(
        context.principal,
        context.valid_from,
        context.valid_until,
    ))
}

/// `POST /auth/:tenant/logout`: clears the session cookie.
pub async fn logout(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Response, GatewayError> {
    let config = state.registry.get_config(&tenant)?;
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, config.tokens.logout_cookie())],
    )
        .into_response())
}

// =============================================================================
// Federation
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SignonQuery {
    #[serde(rename = "relayState")]
    pub relay_state: Option<String>,
}

/// `GET /auth/:tenant/signon?relayState=...`
pub async fn signon(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<SignonQuery>,
) -> Result<Response, GatewayError> {
    let config = state.registry.get_config(&tenant)?;
    let federation = config
        .federation
        .as_ref()
        .ok_or_else(|| GatewayError::UnsupportedScheme {
            service: tenant.clone(),
            operation: "sign-on",
        })?;

    let location = federation
        .build_signon_redirect(query.relay_state.as_deref())
        .await?;
    info!(tenant = %tenant, "sign-on initiated");

    Ok((StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response())
}

/// Fields of the form the IdP posts to the assertion consumer service.
#[derive(Debug, Default)]
pub struct AcsForm {
    pub saml_response: Option<String>,
    pub relay_state: Option<String>,
}

impl AcsForm {
    /// Parse an `application/x-www-form-urlencoded` body. Unknown fields
    /// are ignored; the last occurrence of a field wins.
    pub fn parse(body: &[u8]) -> Self {
        let mut form = Self::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "SAMLResponse" => form.saml_response = Some(value.into_owned()),
                "RelayState" => form.relay_state = Some(value.into_owned()),
                _ => {}
            }
        }
        form
    }
}

/// `POST /auth/:tenant/saml`: assertion consumer service.
///
/// A verified response yields a 303 to the relay state (or `/`) with the
/// session cookie set. A rejected one yields 403. The tenant is resolved
/// before the body is read.
pub async fn saml_acs(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let started = Instant::now();
    let config = state.registry.get_config(&tenant)?;
    let federation = config
        .federation
        .as_ref()
        .ok_or_else(|| GatewayError::UnsupportedScheme {
            service: tenant.clone(),
            operation: "SAML sign-on",
        })?;
    let form = AcsForm::parse(&body);
    let encoded = form
        .saml_response
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest("SAMLResponse is required".to_string()))?;

    let target = form
        .relay_state
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "/".to_string());
    if !config.relay_state_allowed(&target) {
        warn!(tenant = %tenant, "RelayState outside the allowed origins");
        return Err(GatewayError::InvalidRequest(
            "RelayState is not an allowed location".to_string(),
        ));
    }
    let location = HeaderValue::from_str(&target)
        .map_err(|_| GatewayError::InvalidRequest("RelayState is not a valid location".to_string()))?;

    let record = |outcome: &str| {
        state.metrics.record_auth(
            &tenant,
            AuthScheme::Federation.as_str(),
            outcome,
            started.elapsed(),
        );
    };

    let principal = match federation.handle_response(&encoded).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            record("rejected");
            return Err(GatewayError::AuthenticationRejected(
                "SAML response rejected".to_string(),
            ));
        }
        Err(e) => {
            record("error");
            return Err(e.into());
        }
    };

    let roles: Vec<String> = match federation.settings().role_attribute {
        Some(attribute) => principal.attribute_values(&attribute).to_vec(),
        None => Vec::new(),
    };
    let issued = config.tokens.issue_with_roles(&principal.name_id, roles)?;
    record("authenticated");
    info!(tenant = %tenant, principal = %principal.name_id, "federated sign-on complete");

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, location),
            (header::SET_COOKIE, cookie_header(&issued.cookie)?),
        ],
    )
        .into_response())
}

// =============================================================================
// Service Requests
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub request: Option<String>,
    pub signature: Option<String>,
}

/// `GET /auth/:tenant/service?request=...&signature=...`
pub async fn service_auth(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<ServiceQuery>,
) -> Result<Response, GatewayError> {
    let started = Instant::now();
    let config = state.registry.get_config(&tenant)?;
    let verifier = config
        .signed_requests
        .as_ref()
        .ok_or_else(|| GatewayError::UnsupportedScheme {
            service: tenant.clone(),
            operation: "service authentication",
        })?;
    let (Some(request), Some(signature)) = (query.request, query.signature) else {
        return Err(GatewayError::InvalidRequest(
            "request and signature parameters are required".to_string(),
        ));
    };

    let record = |outcome: &str| {
        state.metrics.record_auth(
            &tenant,
            AuthScheme::SignedRequest.as_str(),
            outcome,
            started.elapsed(),
        );
    };

    let account = match verifier.verify(&request, &signature) {
        Ok(Some(account)) => account,
        Ok(None) => {
            record("rejected");
            warn!(tenant = %tenant, "signed request rejected");
            return Err(GatewayError::AuthenticationRejected(
                "signed request rejected".to_string(),
            ));
        }
        Err(e) => {
            record("rejected");
            return Err(e.into());
        }
    };

    let issued = config.tokens.issue(account.as_str())?;
    record("authenticated");
    info!(tenant = %tenant, account = %account, "service authenticated");

    let body = TokenInfo::new(account.as_str(), Some(issued.issued_at), Some(issued.expires_at));
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie_header(&issued.cookie)?)],
        Json(body),
    )
        .into_response())
}

fn cookie_header(cookie: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(cookie)
        .map_err(|_| GatewayError::Configuration("session cookie is not a valid header value".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_token_info_shape() {
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let body = serde_json::to_value(TokenInfo::new("alice", Some(from), None)).unwrap();
        assert_eq!(body["user"], "alice");
        assert_eq!(body["validFrom"], "2026-03-01T08:00:00Z");
        assert!(body.get("validTo").is_none());
    }

    #[test]
    fn test_acs_form_parse() {
        let form = AcsForm::parse(b"SAMLResponse=PHg%2B&RelayState=https%3A%2F%2Fapp%2Fx&extra=1");
        assert_eq!(form.saml_response.as_deref(), Some("PHg+"));
        assert_eq!(form.relay_state.as_deref(), Some("https://app/x"));

        let empty = AcsForm::parse(b"");
        assert!(empty.saml_response.is_none() && empty.relay_state.is_none());
    }
}
