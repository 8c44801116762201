// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! XML Signature verification for SAML messages.
//!
//! Accepted profile:
//! - enveloped `ds:Signature`, a direct child of the signed element
//! - exactly one `ds:Reference`, URI `#<ID of the signed element>`
//! - transforms: enveloped-signature and exclusive C14N only
//! - digests SHA-256 / SHA-512, signatures RSA-SHA256 / RSA-SHA512
//! - verification keys come from IdP metadata, never from the message

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use roxmltree::{Document, Node};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use super::c14n::{canonicalize, C14nError, EXC_C14N};
use super::xml::{self, DSIG_NS};
use crate::keystore::{PublicKey, RsaDigest};

pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("element is not signed")]
    Missing,

    #[error("unsupported signature profile: {0}")]
    Profile(String),

    #[error("reference digest does not match")]
    DigestMismatch,

    #[error("signature value rejected")]
    BadSignature,

    #[error("canonicalization failed: {0}")]
    C14n(#[from] C14nError),
}

/// First `ID` attribute value occurring more than once in the document.
pub fn duplicate_id(doc: &Document<'_>) -> Option<String> {
    let mut seen = HashSet::new();
    doc.descendants()
        .filter_map(|n| n.attribute("ID"))
        .find(|id| !seen.insert(*id))
        .map(str::to_string)
}

/// True if `element` carries an enveloped signature child.
pub fn is_signed(element: Node<'_, '_>) -> bool {
    xml::child(element, DSIG_NS, "Signature").is_some()
}

/// Verify the enveloped signature of `element` against any of `keys`.
pub fn verify_enveloped(element: Node<'_, '_>, keys: &[PublicKey]) -> Result<(), SignatureError> {
    let mut signatures = xml::children(element, DSIG_NS, "Signature");
    let signature = signatures.next().ok_or(SignatureError::Missing)?;
    if signatures.next().is_some() {
        return Err(profile("more than one signature on element"));
    }

    let id = element
        .attribute("ID")
        .ok_or_else(|| profile("signed element has no ID"))?;

    let signed_info = xml::child(signature, DSIG_NS, "SignedInfo")
        .ok_or_else(|| profile("missing SignedInfo"))?;

    let c14n_method = xml::child(signed_info, DSIG_NS, "CanonicalizationMethod")
        .ok_or_else(|| profile("missing CanonicalizationMethod"))?;
    if c14n_method.attribute("Algorithm") != Some(EXC_C14N) {
        return Err(profile("canonicalization must be exclusive C14N"));
    }
    let signed_info_prefixes = inclusive_prefixes(c14n_method);

    let signature_digest = match xml::child(signed_info, DSIG_NS, "SignatureMethod")
        .and_then(|m| m.attribute("Algorithm"))
    {
        Some(RSA_SHA256) => RsaDigest::Sha256,
        Some(RSA_SHA512) => RsaDigest::Sha512,
        other => return Err(profile(&format!("signature method {:?}", other))),
    };

    let mut references = xml::children(signed_info, DSIG_NS, "Reference");
    let reference = references
        .next()
        .ok_or_else(|| profile("missing Reference"))?;
    if references.next().is_some() {
        return Err(profile("more than one Reference"));
    }
    if reference.attribute("URI") != Some(format!("#{}", id).as_str()) {
        return Err(profile("Reference does not point at the signed element"));
    }

    let mut enveloped = false;
    let mut reference_prefixes = Vec::new();
    if let Some(transforms) = xml::child(reference, DSIG_NS, "Transforms") {
        for transform in xml::children(transforms, DSIG_NS, "Transform") {
            match transform.attribute("Algorithm") {
                Some(ENVELOPED_SIGNATURE) => enveloped = true,
                Some(EXC_C14N) => reference_prefixes = inclusive_prefixes(transform),
                other => return Err(profile(&format!("transform {:?}", other))),
            }
        }
    }
    if !enveloped {
        return Err(profile("signature is not enveloped"));
    }

    let digest_method = xml::child(reference, DSIG_NS, "DigestMethod")
        .and_then(|m| m.attribute("Algorithm"));
    let expected_digest = xml::child(reference, DSIG_NS, "DigestValue")
        .map(xml::compact_text)
        .ok_or_else(|| profile("missing DigestValue"))?;
    let expected_digest = STANDARD
        .decode(expected_digest)
        .map_err(|_| profile("DigestValue is not base64"))?;

    let prefixes: Vec<&str> = reference_prefixes.iter().map(String::as_str).collect();
    let canonical = canonicalize(element, Some(signature.id()), &prefixes)?;
    let actual_digest = match digest_method {
        Some(DIGEST_SHA256) => Sha256::digest(canonical.as_bytes()).to_vec(),
        Some(DIGEST_SHA512) => Sha512::digest(canonical.as_bytes()).to_vec(),
        other => return Err(profile(&format!("digest method {:?}", other))),
    };
    if actual_digest != expected_digest {
        return Err(SignatureError::DigestMismatch);
    }

    let signature_value = xml::child(signature, DSIG_NS, "SignatureValue")
        .map(xml::compact_text)
        .ok_or_else(|| profile("missing SignatureValue"))?;
    let signature_value = STANDARD
        .decode(signature_value)
        .map_err(|_| profile("SignatureValue is not base64"))?;

    let prefixes: Vec<&str> = signed_info_prefixes.iter().map(String::as_str).collect();
    let canonical_signed_info = canonicalize(signed_info, None, &prefixes)?;
    let verified = keys.iter().any(|key| {
        key.verify_rsa(
            signature_digest,
            canonical_signed_info.as_bytes(),
            &signature_value,
        )
    });
    if verified {
        Ok(())
    } else {
        Err(SignatureError::BadSignature)
    }
}

fn inclusive_prefixes(method: Node<'_, '_>) -> Vec<String> {
    xml::child(method, EXC_C14N_NS, "InclusiveNamespaces")
        .and_then(|n| n.attribute("PrefixList"))
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn profile(reason: &str) -> SignatureError {
    SignatureError::Profile(reason.to_string())
}
