// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Tenant file schema (YAML).

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::auth::context::AuthScheme;
use crate::auth::signed_request::DEFAULT_WINDOW_MS;
use crate::auth::token::{SameSite, DEFAULT_COOKIE_NAME, DEFAULT_TTL_SECS};
use crate::keystore::DEFAULT_SIGNING_ALIAS;
use crate::saml::MetadataSource;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantsFile {
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantSpec {
    pub scheme: AuthScheme,
    /// Roles every authenticated request must carry.
    #[serde(default)]
    pub required_roles: BTreeSet<String>,
    #[serde(default)]
    pub token: TokenSpec,
    #[serde(default)]
    pub federation: Option<FederationSpec>,
    #[serde(default)]
    pub signed_requests: Option<SignedRequestSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenSpec {
    #[serde(default = "default_signing_key")]
    pub signing_key: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,
    #[serde(default)]
    pub same_site: SameSite,
    #[serde(default)]
    pub secure: bool,
}

impl Default for TokenSpec {
    fn default() -> Self {
        Self {
            signing_key: default_signing_key(),
            ttl_secs: default_ttl_secs(),
            issuer: None,
            cookie_name: default_cookie_name(),
            cookie_path: default_cookie_path(),
            same_site: SameSite::default(),
            secure: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FederationSpec {
    pub entity_id: String,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub metadata: MetadataSource,
    #[serde(default)]
    pub idp_entity_id: Option<String>,
    /// Defaults to `{public_base_url}/auth/{tenant}/saml`.
    #[serde(default)]
    pub acs_url: Option<String>,
    #[serde(default)]
    pub role_attribute: Option<String>,
    #[serde(default = "default_true")]
    pub signon_redirect: bool,
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: i64,
    #[serde(default)]
    pub strict_in_response_to: bool,
    /// Origins an absolute `RelayState` may point to. Empty allows any.
    #[serde(default)]
    pub relay_state_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedRequestSpec {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for SignedRequestSpec {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
        }
    }
}

fn default_signing_key() -> String {
    DEFAULT_SIGNING_ALIAS.to_string()
}

fn default_ttl_secs() -> i64 {
    DEFAULT_TTL_SECS
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_clock_skew_secs() -> i64 {
    60
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_tenant_file() {
        let yaml = r#"
tenants:
  acme:
    scheme: federation
    required_roles: [staff]
    token:
      ttl_secs: 3600
      same_site: none
      secure: true
    federation:
      entity_id: https://gateway.example.test/sp/acme
      metadata:
        url: https://idp.example.test/metadata
      role_attribute: groups
      clock_skew_secs: 30
      relay_state_origins: [https://app.example.test]
  robots:
    scheme: signed_request
    signed_requests:
      window_ms: 30000
"#;
        let file: TenantsFile = serde_yaml::from_str(yaml).unwrap();

        let acme = &file.tenants["acme"];
        assert_eq!(acme.scheme, AuthScheme::Federation);
        assert!(acme.required_roles.contains("staff"));
        assert_eq!(acme.token.ttl_secs, 3600);
        assert_eq!(acme.token.same_site, SameSite::None);
        assert_eq!(acme.token.signing_key, DEFAULT_SIGNING_ALIAS);
        let federation = acme.federation.as_ref().unwrap();
        assert_eq!(
            federation.metadata,
            MetadataSource::Url("https://idp.example.test/metadata".to_string())
        );
        assert!(federation.signon_redirect);
        assert_eq!(federation.clock_skew_secs, 30);
        assert_eq!(federation.relay_state_origins, vec!["https://app.example.test"]);

        let robots = &file.tenants["robots"];
        assert_eq!(robots.scheme, AuthScheme::SignedRequest);
        assert_eq!(robots.signed_requests.as_ref().unwrap().window_ms, 30000);
        assert!(robots.federation.is_none());
    }

    #[test]
    fn test_token_defaults() {
        let file: TenantsFile = serde_yaml::from_str("tenants:\n  t:\n    scheme: token\n").unwrap();
        let token = &file.tenants["t"].token;
        assert_eq!(token.cookie_name, DEFAULT_COOKIE_NAME);
        assert_eq!(token.cookie_path, "/");
        assert_eq!(token.ttl_secs, DEFAULT_TTL_SECS);
        assert_eq!(token.same_site, SameSite::Lax);
        assert!(!token.secure);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = "tenants:\n  t:\n    scheme: token\n    sheme_typo: 1\n";
        assert!(serde_yaml::from_str::<TenantsFile>(yaml).is_err());
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let yaml = "tenants:\n  t:\n    scheme: kerberos\n";
        assert!(serde_yaml::from_str::<TenantsFile>(yaml).is_err());
    }
}
