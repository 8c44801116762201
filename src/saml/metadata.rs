// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! IdP Metadata
//!
//! Loads SAML 2.0 metadata from a URL, a file or inline XML and extracts the
//! identity provider's HTTP-Redirect sign-on endpoint and signing keys.

use std::fmt;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use super::xml::{self, DSIG_NS, SAML_METADATA_NS};
use super::FederationError;
use crate::keystore::PublicKey;

pub const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    #[error("unreadable metadata document: {0}")]
    Parse(String),

    #[error("metadata contains no identity provider")]
    NoIdentityProvider,

    #[error("metadata contains {0} identity providers; configure idp_entity_id")]
    Ambiguous(usize),

    #[error("identity provider '{0}' not found in metadata")]
    EntityNotFound(String),

    #[error("identity provider '{0}' has no HTTP-Redirect SingleSignOnService")]
    NoSsoEndpoint(String),

    #[error("identity provider '{0}' publishes no signing key")]
    NoSigningKey(String),

    #[error("invalid signing key for '{entity_id}': {reason}")]
    BadKey { entity_id: String, reason: String },
}

// =============================================================================
// Source
// =============================================================================

/// Where IdP metadata comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSource {
    Url(String),
    File(PathBuf),
    Xml(String),
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataSource::Url(url) => write!(f, "url:{}", url),
            MetadataSource::File(path) => write!(f, "file:{}", path.display()),
            MetadataSource::Xml(_) => f.write_str("inline"),
        }
    }
}

/// Fetch the raw metadata document.
pub(crate) async fn load(source: &MetadataSource, client: &Client) -> Result<String, FederationError> {
    match source {
        MetadataSource::Url(url) => {
            debug!(url = %url, "fetching IdP metadata");
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| FederationError::MetadataUnavailable(format!("{}: {}", url, e)))?;

            if !response.status().is_success() {
                let status = response.status();
                error!(url = %url, status = %status, "IdP metadata fetch failed");
                return Err(FederationError::MetadataUnavailable(format!(
                    "{}: HTTP {}",
                    url, status
                )));
            }

            response
                .text()
                .await
                .map_err(|e| FederationError::MetadataUnavailable(format!("{}: {}", url, e)))
        }
        MetadataSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
            FederationError::MetadataUnavailable(format!("{}: {}", path.display(), e))
        }),
        MetadataSource::Xml(xml) => Ok(xml.clone()),
    }
}

// =============================================================================
// Identity Provider
// =============================================================================

/// Resolved identity provider.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    pub entity_id: String,
    /// HTTP-Redirect SingleSignOnService location.
    pub sso_url: String,
    pub signing_keys: Vec<PublicKey>,
}

/// Parse metadata, selecting `idp_entity_id` when the document lists several
/// entities.
pub fn parse_metadata(xml: &str, idp_entity_id: Option<&str>) -> Result<IdentityProvider, MetadataError> {
    let doc = Document::parse(xml).map_err(|e| MetadataError::Parse(e.to_string()))?;
    let root = doc.root_element();

    let entities: Vec<Node> = if xml::is(&root, SAML_METADATA_NS, "EntityDescriptor") {
        vec![root]
    } else if xml::is(&root, SAML_METADATA_NS, "EntitiesDescriptor") {
        root.descendants()
            .filter(|n| xml::is(n, SAML_METADATA_NS, "EntityDescriptor"))
            .collect()
    } else {
        return Err(MetadataError::Parse("root is not an entity descriptor".to_string()));
    };

    let providers: Vec<(Node, Node)> = entities
        .into_iter()
        .filter_map(|entity| {
            xml::child(entity, SAML_METADATA_NS, "IDPSSODescriptor").map(|idp| (entity, idp))
        })
        .collect();

    let (entity, descriptor) = match idp_entity_id {
        Some(wanted) => providers
            .into_iter()
            .find(|(entity, _)| entity.attribute("entityID") == Some(wanted))
            .ok_or_else(|| MetadataError::EntityNotFound(wanted.to_string()))?,
        None => match providers.len() {
            0 => return Err(MetadataError::NoIdentityProvider),
            1 => providers[0],
            n => return Err(MetadataError::Ambiguous(n)),
        },
    };

    let entity_id = entity
        .attribute("entityID")
        .ok_or_else(|| MetadataError::Parse("EntityDescriptor without entityID".to_string()))?
        .to_string();

    let sso_url = xml::children(descriptor, SAML_METADATA_NS, "SingleSignOnService")
        .find(|s| s.attribute("Binding") == Some(HTTP_REDIRECT_BINDING))
        .and_then(|s| s.attribute("Location"))
        .filter(|location| url::Url::parse(location).is_ok())
        .ok_or_else(|| MetadataError::NoSsoEndpoint(entity_id.clone()))?
        .to_string();

    let mut signing_keys = Vec::new();
    for key_descriptor in xml::children(descriptor, SAML_METADATA_NS, "KeyDescriptor") {
        if !matches!(key_descriptor.attribute("use"), None | Some("signing")) {
            continue;
        }
        let Some(key_info) = xml::child(key_descriptor, DSIG_NS, "KeyInfo") else {
            continue;
        };
        signing_keys.extend(keys_from_key_info(key_info, &entity_id)?);
    }

    if signing_keys.is_empty() {
        return Err(MetadataError::NoSigningKey(entity_id));
    }

    debug!(entity_id = %entity_id, keys = signing_keys.len(), "IdP metadata parsed");

    Ok(IdentityProvider {
        entity_id,
        sso_url,
        signing_keys,
    })
}

fn keys_from_key_info(key_info: Node<'_, '_>, entity_id: &str) -> Result<Vec<PublicKey>, MetadataError> {
    let bad_key = |reason: String| MetadataError::BadKey {
        entity_id: entity_id.to_string(),
        reason,
    };
    let mut keys = Vec::new();

    for x509 in xml::children(key_info, DSIG_NS, "X509Data") {
        for certificate in xml::children(x509, DSIG_NS, "X509Certificate") {
            let der = STANDARD
                .decode(xml::compact_text(certificate))
                .map_err(|e| bad_key(format!("certificate is not base64: {}", e)))?;
            keys.push(PublicKey::from_certificate_der(&der).map_err(bad_key)?);
        }
    }

    for key_value in xml::children(key_info, DSIG_NS, "KeyValue") {
        if let Some(rsa) = xml::child(key_value, DSIG_NS, "RSAKeyValue") {
            let component = |name: &'static str| {
                xml::child(rsa, DSIG_NS, name)
                    .map(xml::compact_text)
                    .ok_or_else(|| bad_key(format!("RSAKeyValue without {}", name)))
                    .and_then(|text| {
                        STANDARD
                            .decode(text)
                            .map_err(|e| bad_key(format!("{} is not base64: {}", name, e)))
                    })
            };
            let modulus = component("Modulus")?;
            let exponent = component("Exponent")?;
            keys.push(PublicKey::rsa_from_components(&modulus, &exponent).map_err(bad_key)?);
        }
    }

    Ok(keys)
}
