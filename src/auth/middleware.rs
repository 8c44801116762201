// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Request Auth Dispatcher
//!
//! Axum middleware in front of tenant routes (`/.../:tenant/...`).
//!
//! Features:
//! - Tenant lookup from the `tenant` path parameter (404 when unknown)
//! - Validator selection per tenant, single pass, no fallthrough
//! - Required-role check (403)
//! - `SecurityContext` and `RequestProperties` injected into extensions
//! - Sign-on redirect for unauthenticated browser navigation

use std::collections::HashMap;
use std::time::Instant;

use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

use super::context::RequestProperties;
use crate::app::AppState;
use crate::error::GatewayError;

/// Path parameter naming the tenant.
pub const TENANT_PARAM: &str = "tenant";

/// Authentication dispatch middleware.
///
/// ```ignore
/// Router::new()
///     .route("/repo/:tenant/documents", get(list))
///     .route_layer(middleware::from_fn_with_state(state.clone(), dispatch_auth))
/// ```
pub async fn dispatch_auth(
    State(state): State<AppState>,
    params: Option<Path<HashMap<String, String>>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();

    let Some(tenant) = params.and_then(|Path(mut p)| p.remove(TENANT_PARAM)) else {
        warn!(path = %request.uri().path(), "request does not address a tenant");
        return GatewayError::InvalidService { service: None }.into_response();
    };

    let config = match state.registry.get_config(&tenant) {
        Ok(config) => config,
        Err(e) => {
            debug!(tenant = %tenant, "unknown tenant");
            return GatewayError::from(e).into_response();
        }
    };
    let scheme = config.scheme();
    let record = |outcome: &str| {
        state
            .metrics
            .record_auth(&tenant, scheme.as_str(), outcome, started.elapsed());
    };

    let (mut parts, body) = request.into_parts();

    let context = match config.validator.validate(&parts) {
        Ok(Some(context)) => context,
        Ok(None) => {
            if let Some(response) = config.signon.as_ref().and_then(|s| s.initiate(&parts)) {
                record("redirected");
                return response;
            }
            record("unauthenticated");
            debug!(tenant = %tenant, scheme = %scheme, "request not authenticated");
            return GatewayError::NotAuthenticated {
                service: Some(tenant.clone()),
            }
            .into_response();
        }
        Err(e) => {
            record(if matches!(e, GatewayError::Configuration(_)) {
                "error"
            } else {
                "rejected"
            });
            return e.for_service(&tenant).into_response();
        }
    };

    let missing = context.missing_roles(&config.required_roles);
    if !missing.is_empty() {
        record("forbidden");
        warn!(
            tenant = %tenant,
            principal = %context.principal,
            missing = ?missing,
            "principal lacks required roles"
        );
        return GatewayError::Authorization {
            message: format!("missing required role(s): {}", missing.join(", ")),
            acl: Some(missing.join(",")),
            metadata: None,
            location: Some(parts.uri.path().to_string()),
        }
        .into_response();
    }

    info!(
        tenant = %tenant,
        scheme = %context.scheme,
        principal = %context.principal,
        "request authenticated"
    );
    record("authenticated");

    parts.extensions.insert(RequestProperties::from_context(&context));
    parts.extensions.insert(context);
    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{AppState, HealthState};
    use crate::auth::context::{AuthContext, VALID_UNTIL_PROPERTY};
    use crate::keystore::{KeyStore, KeyStoreOptions};
    use crate::metrics::Metrics;
    use crate::tenant::{RegistryContext, TenantAuthRegistry};
    use axum::{
        body::Body,
        http::{header, StatusCode},
        middleware,
        routing::{get, post},
        Extension, Router,
    };
    use http_body_util::BodyExt;
    use secrecy::SecretString;
    use std::sync::Arc;
    use tower::ServiceExt;

    const TENANTS: &str = r#"
tenants:
  docs:
    scheme: token
  staff:
    scheme: token
    required_roles: [staff]
  acme:
    scheme: federation
    federation:
      entity_id: https://gw.example.test/sp/acme
      metadata:
        file: /nonexistent/idp.xml
"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        state: AppState,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let keys = Arc::new(
            KeyStore::open_with_options(
                dir.path().join("ks"),
                &SecretString::new("pw".to_string()),
                KeyStoreOptions { kdf_rounds: 16 },
            )
            .unwrap(),
        );
        let metrics = Metrics::new().unwrap();
        let context = RegistryContext {
            keys,
            public_base_url: String::new(),
            http_client: reqwest::Client::new(),
            metrics: Some(metrics.clone()),
        };
        let registry = TenantAuthRegistry::from_yaml(TENANTS, &context).unwrap();
        Fixture {
            _dir: dir,
            state: AppState {
                registry: Arc::new(registry),
                metrics,
                health: HealthState::default(),
            },
        }
    }

    async fn whoami(AuthContext(context): AuthContext, Extension(props): Extension<RequestProperties>) -> String {
        format!(
            "{}|{}",
            context.principal,
            props.get(VALID_UNTIL_PROPERTY).unwrap_or("-")
        )
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/repo/:tenant/whoami", get(whoami).post(whoami))
            .route("/plain", post(|| async { "unreachable" }))
            .route_layer(middleware::from_fn_with_state(state.clone(), dispatch_auth))
            .with_state(state)
    }

    fn session_cookie(state: &AppState, tenant: &str, roles: &[&str]) -> String {
        let config = state.registry.get_config(tenant).unwrap();
        let issued = config.tokens.issue_with_roles("alice", roles.iter().copied()).unwrap();
        format!("{}={}", config.tokens.config().cookie.name, issued.token)
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_authenticated_request_reaches_handler() {
        let fx = fixture();
        let cookie = session_cookie(&fx.state, "docs", &[]);
        let response = app(fx.state.clone())
            .oneshot(
                axum::http::Request::get("/repo/docs/whoami")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.starts_with("alice|20"), "{}", body);
        assert!(fx
            .state
            .metrics
            .encode()
            .unwrap()
            .contains(r#"outcome="authenticated",scheme="token",tenant="docs""#));
    }

    #[tokio::test]
    async fn test_missing_credential_is_401() {
        let fx = fixture();
        let response = app(fx.state)
            .oneshot(axum::http::Request::get("/repo/docs/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["type"], "NOT_AUTHENTICATED");
        assert_eq!(body["service"], "docs");
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_404() {
        let fx = fixture();
        let response = app(fx.state)
            .oneshot(axum::http::Request::get("/repo/bogus/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["type"], "INVALID_SERVICE");
        assert_eq!(body["service"], "bogus");
    }

    #[tokio::test]
    async fn test_route_without_tenant_is_404() {
        let fx = fixture();
        let response = app(fx.state)
            .oneshot(axum::http::Request::post("/plain").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_required_role_enforced() {
        let fx = fixture();
        let without = session_cookie(&fx.state, "staff", &[]);
        let with = session_cookie(&fx.state, "staff", &["staff"]);

        let response = app(fx.state.clone())
            .oneshot(
                axum::http::Request::get("/repo/staff/whoami")
                    .header(header::COOKIE, without)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["type"], "AUTHORIZATION_ERROR");
        assert_eq!(body["acl"], "staff");

        let response = app(fx.state)
            .oneshot(
                axum::http::Request::get("/repo/staff/whoami")
                    .header(header::COOKIE, with)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_federation_tenant_redirects_get_to_signon() {
        let fx = fixture();
        let response = app(fx.state.clone())
            .oneshot(axum::http::Request::get("/repo/acme/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/auth/acme/signon?relayState=%2Frepo%2Facme%2Fwhoami"
        );

        let response = app(fx.state)
            .oneshot(axum::http::Request::post("/repo/acme/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_forged_cookie_is_401() {
        let fx = fixture();
        let response = app(fx.state)
            .oneshot(
                axum::http::Request::get("/repo/docs/whoami")
                    .header(header::COOKIE, "stoa_session=eyJhbGciOiJIUzI1NiJ9.e30.c2ln")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
