// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Tenant Auth Registry
//!
//! Maps tenant ids to the services configured for them. Built once at
//! startup, read-only afterwards.

pub mod config;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

use crate::auth::context::AuthScheme;
use crate::auth::signed_request::SignedRequestVerifier;
use crate::auth::token::{CookieSettings, TokenConfig, TokenService};
use crate::auth::validator::{RequestValidator, SignonInitiator};
use crate::keystore::{KeyAlias, KeyStore};
use crate::metrics::Metrics;
use crate::saml::{FederationHandler, FederationSettings};
use config::{FederationSpec, TenantSpec, TenantsFile};

#[derive(Debug, Error)]
pub enum TenantConfigError {
    #[error("unknown tenant '{0}'")]
    UnknownTenant(String),

    #[error("cannot read tenant file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid tenant file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("tenant '{tenant}': {reason}")]
    Invalid { tenant: String, reason: String },
}

fn invalid(tenant: &str, reason: impl Into<String>) -> TenantConfigError {
    TenantConfigError::Invalid {
        tenant: tenant.to_string(),
        reason: reason.into(),
    }
}

// =============================================================================
// Tenant Config
// =============================================================================

/// Services configured for one tenant.
pub struct TenantAuthConfig {
    pub tenant_id: String,
    pub validator: RequestValidator,
    pub signon: Option<SignonInitiator>,
    pub federation: Option<Arc<FederationHandler>>,
    pub signed_requests: Option<Arc<SignedRequestVerifier>>,
    /// Issues the session cookie after sign-on or service authentication.
    pub tokens: Arc<TokenService>,
    pub required_roles: BTreeSet<String>,
    /// ASCII-serialized origins allowed as absolute relay states.
    pub relay_state_origins: Vec<String>,
}

impl TenantAuthConfig {
    pub fn scheme(&self) -> AuthScheme {
        self.validator.scheme()
    }

    /// Whether sign-on may finish with a redirect to `target`. Same-origin
    /// paths are always allowed; absolute URLs must match a configured
    /// origin when any are configured.
    pub fn relay_state_allowed(&self, target: &str) -> bool {
        if self.relay_state_origins.is_empty() {
            return true;
        }
        if target.starts_with('/') && !target.starts_with("//") && !target.starts_with("/\\") {
            return true;
        }
        url::Url::parse(target)
            .map(|url| {
                let origin = url.origin().ascii_serialization();
                self.relay_state_origins.iter().any(|allowed| *allowed == origin)
            })
            .unwrap_or(false)
    }
}

/// Shared inputs for building tenants.
#[derive(Clone)]
pub struct RegistryContext {
    pub keys: Arc<KeyStore>,
    /// External origin of the gateway, e.g. `https://gateway.example.com`.
    pub public_base_url: String,
    /// Client for metadata fetches; carries the fetch timeout.
    pub http_client: Client,
    pub metrics: Option<Metrics>,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
pub struct TenantAuthRegistry {
    tenants: HashMap<String, Arc<TenantAuthConfig>>,
}

impl TenantAuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: TenantAuthConfig) {
        self.tenants.insert(config.tenant_id.clone(), Arc::new(config));
    }

    pub fn get_config(&self, tenant_id: &str) -> Result<Arc<TenantAuthConfig>, TenantConfigError> {
        self.tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| TenantConfigError::UnknownTenant(tenant_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn tenants(&self) -> impl Iterator<Item = &Arc<TenantAuthConfig>> {
        self.tenants.values()
    }

    pub fn from_file(path: impl AsRef<Path>, context: &RegistryContext) -> Result<Self, TenantConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| TenantConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml, context)
    }

    pub fn from_yaml(yaml: &str, context: &RegistryContext) -> Result<Self, TenantConfigError> {
        let file: TenantsFile = serde_yaml::from_str(yaml)?;
        let mut registry = Self::new();
        for (tenant_id, spec) in file.tenants {
            let config = build_tenant(&tenant_id, spec, context)?;
            info!(
                tenant = %tenant_id,
                scheme = %config.scheme(),
                signon = config.signon.is_some(),
                "tenant configured"
            );
            registry.insert(config);
        }
        Ok(registry)
    }
}

fn build_tenant(
    tenant_id: &str,
    spec: TenantSpec,
    context: &RegistryContext,
) -> Result<TenantAuthConfig, TenantConfigError> {
    let valid_id = !tenant_id.is_empty()
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid_id {
        return Err(invalid(tenant_id, "tenant id must be a non-empty URL path segment"));
    }

    let signing_key = KeyAlias::new(spec.token.signing_key.clone());
    context
        .keys
        .secret(&signing_key)
        .map_err(|e| invalid(tenant_id, format!("token signing key: {}", e)))?;
    if spec.token.ttl_secs <= 0 {
        return Err(invalid(tenant_id, "token ttl_secs must be positive"));
    }

    let tokens = Arc::new(TokenService::new(
        context.keys.clone(),
        TokenConfig {
            signing_key,
            ttl: Duration::seconds(spec.token.ttl_secs),
            issuer: spec.token.issuer.clone(),
            audience: Some(tenant_id.to_string()),
            cookie: CookieSettings {
                name: spec.token.cookie_name.clone(),
                path: spec.token.cookie_path.clone(),
                same_site: spec.token.same_site,
                secure: spec.token.secure,
            },
        },
    ));

    let signed_requests = match (&spec.signed_requests, spec.scheme) {
        (Some(section), _) => Some(section.window_ms),
        (None, AuthScheme::SignedRequest) => Some(config::SignedRequestSpec::default().window_ms),
        (None, _) => None,
    }
    .map(|window_ms| Arc::new(SignedRequestVerifier::with_window(context.keys.clone(), window_ms)));

    let federation = spec
        .federation
        .as_ref()
        .map(|section| federation_handler(tenant_id, section, context))
        .transpose()?;
    let relay_state_origins = spec
        .federation
        .as_ref()
        .map(|section| relay_state_origins(tenant_id, &section.relay_state_origins))
        .transpose()?
        .unwrap_or_default();

    let (validator, signon) = match spec.scheme {
        AuthScheme::Token => (RequestValidator::Token(tokens.clone()), None),
        AuthScheme::SignedRequest => {
            let verifier = signed_requests
                .clone()
                .ok_or_else(|| invalid(tenant_id, "signed request verifier missing"))?;
            (
                RequestValidator::SignedRequest {
                    verifier,
                    tokens: tokens.clone(),
                },
                None,
            )
        }
        AuthScheme::Federation => {
            let section = spec
                .federation
                .as_ref()
                .ok_or_else(|| invalid(tenant_id, "scheme federation requires a federation section"))?;
            let signon = section
                .signon_redirect
                .then(|| SignonInitiator::new(tenant_id, context.public_base_url.clone()));
            (RequestValidator::Federation(tokens.clone()), signon)
        }
    };

    Ok(TenantAuthConfig {
        tenant_id: tenant_id.to_string(),
        validator,
        signon,
        federation,
        signed_requests,
        tokens,
        required_roles: spec.required_roles,
        relay_state_origins,
    })
}

fn relay_state_origins(tenant_id: &str, configured: &[String]) -> Result<Vec<String>, TenantConfigError> {
    configured
        .iter()
        .map(|value| {
            let origin = url::Url::parse(value)
                .map_err(|e| invalid(tenant_id, format!("relay state origin '{}': {}", value, e)))?
                .origin();
            if !origin.is_tuple() {
                return Err(invalid(tenant_id, format!("relay state origin '{}' has no host", value)));
            }
            Ok(origin.ascii_serialization())
        })
        .collect()
}

fn federation_handler(
    tenant_id: &str,
    section: &FederationSpec,
    context: &RegistryContext,
) -> Result<Arc<FederationHandler>, TenantConfigError> {
    if section.entity_id.trim().is_empty() {
        return Err(invalid(tenant_id, "federation entity_id is empty"));
    }
    if section.clock_skew_secs < 0 {
        return Err(invalid(tenant_id, "federation clock_skew_secs must not be negative"));
    }

    let acs_url = match &section.acs_url {
        Some(url) => url.clone(),
        None => format!(
            "{}/auth/{}/saml",
            context.public_base_url.trim_end_matches('/'),
            tenant_id
        ),
    };
    url::Url::parse(&acs_url)
        .map_err(|e| invalid(tenant_id, format!("acs_url '{}': {}", acs_url, e)))?;

    let settings = FederationSettings {
        entity_id: section.entity_id.clone(),
        metadata: section.metadata.clone(),
        idp_entity_id: section.idp_entity_id.clone(),
        acs_url,
        clock_skew: Duration::seconds(section.clock_skew_secs),
        strict_in_response_to: section.strict_in_response_to,
        role_attribute: section.role_attribute.clone(),
    };

    let mut handler = FederationHandler::new(settings, context.http_client.clone());
    if let Some(metrics) = &context.metrics {
        handler = handler.with_metrics(metrics.clone());
    }
    Ok(Arc::new(handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeyStoreOptions;
    use secrecy::SecretString;

    struct Fixture {
        _dir: tempfile::TempDir,
        context: RegistryContext,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyStore::open_with_options(
            dir.path().join("ks"),
            &SecretString::new("pw".to_string()),
            KeyStoreOptions { kdf_rounds: 16 },
        )
        .unwrap();
        Fixture {
            _dir: dir,
            context: RegistryContext {
                keys: Arc::new(keys),
                public_base_url: "https://gw.example.test".to_string(),
                http_client: Client::new(),
                metrics: None,
            },
        }
    }

    const TENANTS: &str = r#"
tenants:
  docs:
    scheme: token
  robots:
    scheme: signed_request
  acme:
    scheme: federation
    federation:
      entity_id: https://gw.example.test/sp/acme
      metadata:
        file: /etc/stoa/idp.xml
"#;

    #[test]
    fn test_registry_from_yaml() {
        let fx = fixture();
        let registry = TenantAuthRegistry::from_yaml(TENANTS, &fx.context).unwrap();
        assert_eq!(registry.len(), 3);

        let docs = registry.get_config("docs").unwrap();
        assert_eq!(docs.scheme(), AuthScheme::Token);
        assert!(docs.federation.is_none() && docs.signed_requests.is_none());

        let robots = registry.get_config("robots").unwrap();
        assert_eq!(robots.scheme(), AuthScheme::SignedRequest);
        assert_eq!(robots.signed_requests.as_ref().unwrap().window_ms(), 60_000);

        let acme = registry.get_config("acme").unwrap();
        assert_eq!(acme.scheme(), AuthScheme::Federation);
        assert!(acme.signon.is_some());
        let settings = acme.federation.as_ref().unwrap().settings();
        assert_eq!(settings.acs_url, "https://gw.example.test/auth/acme/saml");
    }

    #[test]
    fn test_tenant_tokens_carry_tenant_audience() {
        let fx = fixture();
        let registry = TenantAuthRegistry::from_yaml(TENANTS, &fx.context).unwrap();
        let docs = registry.get_config("docs").unwrap();
        let robots = registry.get_config("robots").unwrap();
        assert_eq!(docs.tokens.config().audience.as_deref(), Some("docs"));

        let issued = robots.tokens.issue("billing").unwrap();
        assert!(robots.tokens.validate(&issued.token).is_ok());
        assert!(docs.tokens.validate(&issued.token).is_err());
    }

    #[test]
    fn test_relay_state_origins() {
        let fx = fixture();
        let yaml = r#"
tenants:
  acme:
    scheme: federation
    federation:
      entity_id: https://gw.example.test/sp/acme
      metadata:
        file: /etc/stoa/idp.xml
      relay_state_origins: ["https://app.example.test/"]
"#;
        let registry = TenantAuthRegistry::from_yaml(yaml, &fx.context).unwrap();
        let acme = registry.get_config("acme").unwrap();
        assert_eq!(acme.relay_state_origins, vec!["https://app.example.test"]);

        assert!(acme.relay_state_allowed("https://app.example.test/docs?x=1"));
        assert!(acme.relay_state_allowed("/docs"));
        assert!(!acme.relay_state_allowed("https://evil.example.test/"));
        assert!(!acme.relay_state_allowed("//evil.example.test/"));
        assert!(!acme.relay_state_allowed("http://app.example.test/"));
        assert!(!acme.relay_state_allowed("not a url"));

        let open = TenantAuthRegistry::from_yaml(TENANTS, &fx.context).unwrap();
        assert!(open.get_config("acme").unwrap().relay_state_allowed("https://anywhere.test/"));
    }

    #[test]
    fn test_relay_state_origin_must_have_host() {
        let fx = fixture();
        let yaml = "tenants:\n  acme:\n    scheme: federation\n    federation:\n      entity_id: sp\n      metadata:\n        file: /idp.xml\n      relay_state_origins: [\"mailto:a@b\"]\n";
        assert!(matches!(
            TenantAuthRegistry::from_yaml(yaml, &fx.context),
            Err(TenantConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unknown_tenant() {
        let fx = fixture();
        let registry = TenantAuthRegistry::from_yaml(TENANTS, &fx.context).unwrap();
        assert!(matches!(
            registry.get_config("bogus"),
            Err(TenantConfigError::UnknownTenant(name)) if name == "bogus"
        ));
    }

    #[test]
    fn test_federation_scheme_requires_section() {
        let fx = fixture();
        let result = TenantAuthRegistry::from_yaml("tenants:\n  acme:\n    scheme: federation\n", &fx.context);
        assert!(matches!(result, Err(TenantConfigError::Invalid { .. })));
    }

    #[test]
    fn test_unknown_signing_key_fails() {
        let fx = fixture();
        let yaml = "tenants:\n  docs:\n    scheme: token\n    token:\n      signing_key: nope\n";
        let err = TenantAuthRegistry::from_yaml(yaml, &fx.context).err().unwrap();
        assert!(err.to_string().contains("signing key"));
    }

    #[test]
    fn test_tenant_id_must_be_path_segment() {
        let fx = fixture();
        let yaml = "tenants:\n  \"a/b\":\n    scheme: token\n";
        assert!(matches!(
            TenantAuthRegistry::from_yaml(yaml, &fx.context),
            Err(TenantConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let fx = fixture();
        assert!(matches!(
            TenantAuthRegistry::from_file("/nonexistent/tenants.yaml", &fx.context),
            Err(TenantConfigError::Io { .. })
        ));
    }
}
