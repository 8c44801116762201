// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Shared fixtures for the HTTP integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use tempfile::TempDir;
use tower::ServiceExt;

use stoa_auth_gateway::keystore::{KeyStore, KeyStoreOptions};
use stoa_auth_gateway::metrics::Metrics;
use stoa_auth_gateway::saml::testutil::TestIdp;
use stoa_auth_gateway::tenant::{RegistryContext, TenantAuthRegistry};
use stoa_auth_gateway::{build_router, AppState};

pub const PUBLIC_BASE_URL: &str = "https://gw.example.test";
pub const ACME_ENTITY_ID: &str = "https://gw.example.test/sp/acme";
pub const ACME_ACS_URL: &str = "https://gw.example.test/auth/acme/saml";

/// Tenant file used by most tests. `{dir}` is replaced by the fixture's
/// temporary directory, which holds the IdP metadata as `idp.xml`.
pub const TENANTS: &str = r#"
tenants:
  acme:
    scheme: federation
    required_roles: [staff]
    federation:
      entity_id: https://gw.example.test/sp/acme
      metadata:
        file: "{dir}/idp.xml"
      role_attribute: groups
  docs:
    scheme: token
  robots:
    scheme: signed_request
    signed_requests:
      window_ms: 60000
"#;

pub struct Gateway {
    pub dir: TempDir,
    pub keys: Arc<KeyStore>,
    pub state: AppState,
    pub idp: TestIdp,
}

impl Gateway {
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }
}

/// A gateway over a fresh key store, with the test IdP's metadata on disk.
pub fn gateway(tenants: &str) -> Gateway {
    gateway_with_metadata(tenants, &TestIdp::new().metadata_xml())
}

pub fn gateway_with_metadata(tenants: &str, metadata_xml: &str) -> Gateway {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("idp.xml"), metadata_xml).unwrap();

    let keys = Arc::new(
        KeyStore::open_with_options(
            dir.path().join("keystore.sagks"),
            &SecretString::new("integration".to_string()),
            KeyStoreOptions { kdf_rounds: 16 },
        )
        .unwrap(),
    );
    let metrics = Metrics::new().unwrap();
    let context = RegistryContext {
        keys: keys.clone(),
        public_base_url: PUBLIC_BASE_URL.to_string(),
        http_client: reqwest::Client::new(),
        metrics: Some(metrics.clone()),
    };
    let yaml = tenants.replace("{dir}", &dir.path().display().to_string());
    let registry = TenantAuthRegistry::from_yaml(&yaml, &context).unwrap();

    Gateway {
        dir,
        keys,
        state: AppState::new(registry, metrics),
        idp: TestIdp::new(),
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

pub fn post_form(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

pub async fn read_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// `name=value` pair of a `Set-Cookie` header, ready for a `Cookie` header.
pub fn cookie_pair(response: &Response<Body>) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("Set-Cookie header")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}
