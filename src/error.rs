// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Gateway Errors
//!
//! HTTP-facing error taxonomy. Every rejection leaving the gateway is rendered
//! as a JSON object carrying a `type` tag and a human-readable `error`.
//!
//! | type                      | status |
//! |---------------------------|--------|
//! | `INVALID_SERVICE`         | 404    |
//! | `UNSUPPORTED_SCHEME`      | 404    |
//! | `NOT_AUTHENTICATED`       | 401    |
//! | `AUTHENTICATION_ERROR`    | 401    |
//! | `AUTHENTICATION_REJECTED` | 403    |
//! | `AUTHORIZATION_ERROR`     | 403    |
//! | `INVALID_REQUEST`         | 406    |
//! | `CONFIGURATION_ERROR`     | 500    |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::signed_request::RequestValidationError;
use crate::auth::token::TokenError;
use crate::keystore::KeyStoreError;
use crate::saml::FederationError;
use crate::tenant::TenantConfigError;

// =============================================================================
// Gateway Error
// =============================================================================

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Unknown or missing tenant.
    #[error("unknown service")]
    InvalidService { service: Option<String> },

    /// Tenant exists but does not offer the requested flow.
    #[error("{operation} is not enabled for this service")]
    UnsupportedScheme {
        service: String,
        operation: &'static str,
    },

    /// No acceptable credential on the request.
    #[error("authentication required")]
    NotAuthenticated { service: Option<String> },

    /// Caller supplied credential material that could not be read.
    #[error("{0}")]
    Authentication(String),

    /// Well-formed credential that failed verification.
    #[error("{0}")]
    AuthenticationRejected(String),

    /// Authenticated but not allowed.
    #[error("{message}")]
    Authorization {
        message: String,
        acl: Option<String>,
        metadata: Option<serde_json::Value>,
        location: Option<String>,
    },

    /// Malformed request parameters.
    #[error("{0}")]
    InvalidRequest(String),

    /// Server-side misconfiguration. The detail is logged, never returned.
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    acl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl GatewayError {
    /// Stable type tag rendered in the body.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidService { .. } => "INVALID_SERVICE",
            GatewayError::UnsupportedScheme { .. } => "UNSUPPORTED_SCHEME",
            GatewayError::NotAuthenticated { .. } => "NOT_AUTHENTICATED",
            GatewayError::Authentication(_) => "AUTHENTICATION_ERROR",
            GatewayError::AuthenticationRejected(_) => "AUTHENTICATION_REJECTED",
            GatewayError::Authorization { .. } => "AUTHORIZATION_ERROR",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidService { .. } | GatewayError::UnsupportedScheme { .. } => {
                StatusCode::NOT_FOUND
            }
            GatewayError::NotAuthenticated { .. } | GatewayError::Authentication(_) => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::AuthenticationRejected(_) | GatewayError::Authorization { .. } => {
                StatusCode::FORBIDDEN
            }
            GatewayError::InvalidRequest(_) => StatusCode::NOT_ACCEPTABLE,
            GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach the tenant name to errors that echo it.
    pub fn for_service(self, tenant: &str) -> Self {
        match self {
            GatewayError::InvalidService { service: None } => GatewayError::InvalidService {
                service: Some(tenant.to_string()),
            },
            GatewayError::NotAuthenticated { service: None } => GatewayError::NotAuthenticated {
                service: Some(tenant.to_string()),
            },
            other => other,
        }
    }

    fn body(self) -> ErrorBody {
        let kind = self.kind();
        match self {
            GatewayError::InvalidService { service } => ErrorBody {
                kind,
                error: match &service {
                    Some(name) => format!("unknown service '{}'", name),
                    None => "no service addressed".to_string(),
                },
                service,
                acl: None,
                metadata: None,
                location: None,
            },
            GatewayError::UnsupportedScheme { service, operation } => ErrorBody {
                kind,
                error: format!("{} is not enabled for this service", operation),
                service: Some(service),
                acl: None,
                metadata: None,
                location: None,
            },
            GatewayError::NotAuthenticated { service } => ErrorBody {
                kind,
                error: "authentication required".to_string(),
                service,
                acl: None,
                metadata: None,
                location: None,
            },
            GatewayError::Authorization {
                message,
                acl,
                metadata,
                location,
            } => ErrorBody {
                kind,
                error: message,
                service: None,
                acl,
                metadata,
                location,
            },
            GatewayError::Configuration(detail) => {
                error!(error = %detail, "configuration error");
                ErrorBody {
                    kind,
                    error: "the service is misconfigured".to_string(),
                    service: None,
                    acl: None,
                    metadata: None,
                    location: None,
                }
            }
            GatewayError::Authentication(message)
            | GatewayError::AuthenticationRejected(message)
            | GatewayError::InvalidRequest(message) => ErrorBody {
                kind,
                error: message,
                service: None,
                acl: None,
                metadata: None,
                location: None,
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.body())).into_response()
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<TenantConfigError> for GatewayError {
    fn from(e: TenantConfigError) -> Self {
        match e {
            TenantConfigError::UnknownTenant(service) => GatewayError::InvalidService {
                service: Some(service),
            },
            other => GatewayError::Configuration(other.to_string()),
        }
    }
}

impl From<KeyStoreError> for GatewayError {
    fn from(e: KeyStoreError) -> Self {
        GatewayError::Configuration(e.to_string())
    }
}

impl From<TokenError> for GatewayError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid(_) => GatewayError::NotAuthenticated { service: None },
            TokenError::KeyStore(inner) => inner.into(),
            TokenError::Encode(detail) => GatewayError::Configuration(detail),
        }
    }
}

impl From<RequestValidationError> for GatewayError {
    fn from(e: RequestValidationError) -> Self {
        GatewayError::InvalidRequest(e.to_string())
    }
}

impl From<FederationError> for GatewayError {
    fn from(e: FederationError) -> Self {
        match e {
            FederationError::SamlParsing(_) | FederationError::Codec(_) => {
                GatewayError::Authentication(e.to_string())
            }
            FederationError::Metadata(_) | FederationError::MetadataUnavailable(_) => {
                GatewayError::Configuration(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(error: GatewayError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_invalid_service_echoes_tenant() {
        let (status, body) = body_json(GatewayError::InvalidService {
            service: Some("bogus".to_string()),
        })
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "INVALID_SERVICE");
        assert_eq!(body["service"], "bogus");
        assert!(body["error"].as_str().unwrap().contains("bogus"));
    }

    #[tokio::test]
    async fn test_configuration_error_hides_detail() {
        let (status, body) =
            body_json(GatewayError::Configuration("keystore at /secret/path".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["type"], "CONFIGURATION_ERROR");
        assert!(!body.to_string().contains("/secret/path"));
    }

    #[tokio::test]
    async fn test_authorization_error_carries_context() {
        let (status, body) = body_json(GatewayError::Authorization {
            message: "missing role 'editor'".to_string(),
            acl: Some("editor".to_string()),
            metadata: None,
            location: Some("/auth/acme/token".to_string()),
        })
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["acl"], "editor");
        assert_eq!(body["location"], "/auth/acme/token");
        assert!(body.get("metadata").is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::InvalidRequest("x".into()).status(),
            StatusCode::NOT_ACCEPTABLE
        );
        assert_eq!(
            GatewayError::AuthenticationRejected("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::NotAuthenticated { service: None }.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::UnsupportedScheme {
                service: "acme".into(),
                operation: "sign-on"
            }
            .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_for_service_fills_missing_tenant() {
        let e = GatewayError::NotAuthenticated { service: None }.for_service("acme");
        assert!(matches!(e, GatewayError::NotAuthenticated { service: Some(s) } if s == "acme"));
    }
}
