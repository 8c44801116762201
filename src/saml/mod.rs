// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! SAML 2.0 Service Provider
//!
//! Sign-on runs `REDIRECT_ISSUED -> RESPONSE_RECEIVED -> {VERIFIED, REJECTED}`:
//! [`FederationHandler::build_signon_redirect`] sends the browser to the IdP
//! with a deflated AuthnRequest, and [`FederationHandler::handle_response`]
//! verifies what the IdP posts back.
//!
//! Features:
//! - IdP metadata from URL, file or inline XML, resolved once and cached
//! - Outstanding AuthnRequest tracking (one-time `InResponseTo`)
//! - Assertion replay detection until the assertion expires
//! - Enveloped XML signatures (exclusive C14N, RSA-SHA256/512)
//! - Metadata faults are configuration errors, bad responses are rejections

pub mod c14n;
pub mod codec;
pub mod dsig;
pub mod metadata;
pub mod request;
pub mod response;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
mod xml;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration as StdDuration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use moka::future::Cache;
use moka::Expiry;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use codec::CodecError;
pub use metadata::{IdentityProvider, MetadataError, MetadataSource};
pub use request::AuthnRequest;
pub use response::SamlPrincipal;

use crate::metrics::Metrics;
use response::{Expectations, Verdict};

/// Lifetime of an outstanding AuthnRequest ID.
const OUTSTANDING_REQUEST_TTL: StdDuration = StdDuration::from_secs(600);

const OUTSTANDING_REQUEST_CAPACITY: u64 = 100_000;

/// How long a consumed assertion ID is remembered when the assertion
/// carries no `NotOnOrAfter`.
const CONSUMED_ASSERTION_DEFAULT_TTL: StdDuration = StdDuration::from_secs(3600);

const CONSUMED_ASSERTION_CAPACITY: u64 = 1_000_000;

/// Each consumed assertion ID lives for the TTL stored with it.
struct ConsumedExpiry;

impl Expiry<String, StdDuration> for ConsumedExpiry {
    fn expire_after_create(&self, _id: &String, ttl: &StdDuration, _created_at: Instant) -> Option<StdDuration> {
        Some(*ttl)
    }
}

#[derive(Debug, Error)]
pub enum FederationError {
    #[error("IdP metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("IdP metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("could not parse SAML message: {0}")]
    SamlParsing(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl FederationError {
    /// Rebuild an error shared by the metadata cache.
    fn from_shared(e: &FederationError) -> Self {
        match e {
            FederationError::Metadata(inner) => FederationError::Metadata(inner.clone()),
            other => FederationError::MetadataUnavailable(other.to_string()),
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Service-provider settings of one tenant.
#[derive(Debug, Clone)]
pub struct FederationSettings {
    /// SP entity ID, issuer of AuthnRequests and expected audience.
    pub entity_id: String,
    pub metadata: MetadataSource,
    /// Selects one IdP from an `EntitiesDescriptor`.
    pub idp_entity_id: Option<String>,
    /// Assertion consumer service URL.
    pub acs_url: String,
    pub clock_skew: Duration,
    /// Reject responses answering requests this handler did not issue.
    pub strict_in_response_to: bool,
    /// SAML attribute whose values become role claims on the session token.
    pub role_attribute: Option<String>,
}

type ProviderKey = (String, MetadataSource, Option<String>);

// =============================================================================
// Federation Handler
// =============================================================================

pub struct FederationHandler {
    settings: RwLock<FederationSettings>,
    client: Client,
    providers: Cache<ProviderKey, Arc<IdentityProvider>>,
    outstanding: Cache<String, ()>,
    consumed: Cache<String, StdDuration>,
    metrics: Option<Metrics>,
}

impl FederationHandler {
    /// `client` should carry the metadata fetch timeout.
    pub fn new(settings: FederationSettings, client: Client) -> Self {
        Self {
            settings: RwLock::new(settings),
            client,
            providers: Cache::builder().max_capacity(4).build(),
            outstanding: Cache::builder()
                .time_to_live(OUTSTANDING_REQUEST_TTL)
                .max_capacity(OUTSTANDING_REQUEST_CAPACITY)
                .build(),
            consumed: Cache::builder()
                .max_capacity(CONSUMED_ASSERTION_CAPACITY)
                .expire_after(ConsumedExpiry)
                .build(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> FederationSettings {
        self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_entity_id(&self, entity_id: impl Into<String>) {
        self.settings.write().unwrap_or_else(PoisonError::into_inner).entity_id = entity_id.into();
        self.providers.invalidate_all();
    }

    pub fn set_metadata_source(&self, source: MetadataSource) {
        self.settings.write().unwrap_or_else(PoisonError::into_inner).metadata = source;
        self.providers.invalidate_all();
    }

    /// Resolve the IdP, loading metadata on first use. Concurrent callers
    /// share a single resolution.
    pub async fn identity_provider(&self) -> Result<Arc<IdentityProvider>, FederationError> {
        let settings = self.settings();
        let key: ProviderKey = (
            settings.entity_id.clone(),
            settings.metadata.clone(),
            settings.idp_entity_id.clone(),
        );

        self.providers
            .try_get_with(key, async {
                let resolved = self.resolve(&settings).await;
                let outcome = if resolved.is_ok() { "success" } else { "failure" };
                if let Some(metrics) = &self.metrics {
                    metrics.record_metadata_resolution(outcome);
                }
                resolved.map(Arc::new)
            })
            .await
            .map_err(|e| FederationError::from_shared(&e))
    }

    async fn resolve(&self, settings: &FederationSettings) -> Result<IdentityProvider, FederationError> {
        let xml = metadata::load(&settings.metadata, &self.client).await?;
        let provider = metadata::parse_metadata(&xml, settings.idp_entity_id.as_deref())?;
        info!(
            sp = %settings.entity_id,
            idp = %provider.entity_id,
            source = %settings.metadata,
            "IdP metadata resolved"
        );
        Ok(provider)
    }

    /// IdP sign-on URL carrying a fresh AuthnRequest and `relay_state`.
    pub async fn build_signon_redirect(&self, relay_state: Option<&str>) -> Result<String, FederationError> {
        let idp = self.identity_provider().await?;
        let settings = self.settings();

        let request = AuthnRequest::new(&settings.entity_id, &idp.sso_url, &settings.acs_url, Utc::now());
        let encoded = codec::encode(request.to_xml().as_bytes())?;

        let mut location = url::Url::parse(&idp.sso_url)
            .map_err(|_| MetadataError::NoSsoEndpoint(idp.entity_id.clone()))?;
        {
            let mut query = location.query_pairs_mut();
            query.append_pair("SAMLRequest", &encoded);
            if let Some(relay_state) = relay_state {
                query.append_pair("RelayState", relay_state);
            }
        }

        self.outstanding.insert(request.id.clone(), ()).await;
        debug!(request_id = %request.id, idp = %idp.entity_id, "AuthnRequest issued");

        Ok(location.into())
    }

    /// Verify a posted `SAMLResponse` (plain base64, not deflated).
    ///
    /// `Ok(None)` is a rejection: unsigned, badly signed, expired,
    /// misaddressed or replayed responses. Errors are unreadable input or an unresolvable
    /// IdP.
    pub async fn handle_response(&self, encoded: &str) -> Result<Option<SamlPrincipal>, FederationError> {
        self.handle_response_at(encoded, Utc::now()).await
    }

    pub async fn handle_response_at(
        &self,
        encoded: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SamlPrincipal>, FederationError> {
        let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact)
            .map_err(|e| FederationError::SamlParsing(format!("SAMLResponse is not base64: {}", e)))?;
        let xml = String::from_utf8(bytes)
            .map_err(|_| FederationError::SamlParsing("SAMLResponse is not UTF-8".to_string()))?;

        let idp = self.identity_provider().await?;
        let settings = self.settings();
        let expect = Expectations {
            sp_entity_id: &settings.entity_id,
            idp: &idp,
            acs_url: &settings.acs_url,
            now,
            clock_skew: settings.clock_skew,
        };

        match response::evaluate(&xml, &expect)? {
            Verdict::Rejected(reason) => {
                warn!(idp = %idp.entity_id, reason = %reason, "SAML response rejected");
                Ok(None)
            }
            Verdict::Accepted {
                principal,
                assertion_id,
                in_response_to,
            } => {
                if let Some(request_id) = in_response_to {
                    if self.outstanding.remove(&request_id).await.is_none() {
                        if settings.strict_in_response_to {
                            warn!(request_id = %request_id, "SAML response answers an unknown request");
                            return Ok(None);
                        }
                        debug!(request_id = %request_id, "SAML response answers an untracked request");
                    }
                }

                let ttl = consumed_ttl(principal.valid_until, settings.clock_skew, now);
                let entry = self
                    .consumed
                    .entry(assertion_id.clone())
                    .or_insert_with(async { ttl })
                    .await;
                if !entry.is_fresh() {
                    warn!(idp = %idp.entity_id, assertion_id = %assertion_id, "SAML assertion replayed");
                    return Ok(None);
                }
                info!(idp = %idp.entity_id, "SAML sign-on verified");
                Ok(Some(principal))
            }
        }
    }
}

/// Remember an assertion ID until the assertion could no longer be accepted.
fn consumed_ttl(valid_until: Option<DateTime<Utc>>, clock_skew: Duration, now: DateTime<Utc>) -> StdDuration {
    match valid_until {
        Some(valid_until) => (valid_until + clock_skew - now)
            .to_std()
            .unwrap_or(StdDuration::ZERO)
            .max(StdDuration::from_secs(1)),
        None => CONSUMED_ASSERTION_DEFAULT_TTL,
    }
}

impl std::fmt::Debug for FederationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationHandler")
            .field("settings", &self.settings())
            .finish()
    }
}
