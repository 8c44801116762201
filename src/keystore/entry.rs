// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Key Store Entries
//!
//! Typed key material held by the [`KeyStore`](super::KeyStore):
//! - **Secret**: symmetric bytes (session-token signing)
//! - **KeyPair**: Ed25519 seed plus its public key (service signing)
//! - **Certificate**: X.509 DER (IdP or service-account verification)

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};
use x509_cert::der::{Decode, Encode};
use x509_cert::spki::ObjectIdentifier;
use x509_cert::Certificate;

use super::KeyStoreError;

const ED25519_KEY_LEN: usize = 32;

const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

// =============================================================================
// Key Alias
// =============================================================================

/// Name of one entry in the key store.
///
/// Service accounts presenting signed requests are identified by the alias of
/// their verification key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyAlias(String);

impl KeyAlias {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyAlias {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for KeyAlias {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// Key Entry
// =============================================================================

/// Asymmetric algorithm of a stored key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Ed25519,
}

/// One stored key. Each alias resolves to exactly one of these.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyEntry {
    /// Symmetric secret
    Secret {
        #[serde(with = "b64")]
        material: Vec<u8>,
    },

    /// Private + public key pair
    KeyPair {
        algorithm: KeyAlgorithm,
        #[serde(with = "b64")]
        private_key: Vec<u8>,
        #[serde(with = "b64")]
        public_key: Vec<u8>,
    },

    /// X.509 certificate (DER)
    Certificate {
        #[serde(with = "b64")]
        der: Vec<u8>,
    },
}

impl KeyEntry {
    /// Generate a fresh random secret of `len` bytes.
    pub fn generate_secret(len: usize) -> Self {
        let mut material = vec![0u8; len];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut material);
        KeyEntry::Secret { material }
    }

    /// Generate a fresh Ed25519 key pair.
    pub fn generate_ed25519() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::from_ed25519(&signing_key)
    }

    /// Wrap an existing Ed25519 signing key.
    pub fn from_ed25519(signing_key: &SigningKey) -> Self {
        KeyEntry::KeyPair {
            algorithm: KeyAlgorithm::Ed25519,
            private_key: signing_key.to_bytes().to_vec(),
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
        }
    }

    /// Short type name used in errors and listings.
    pub fn kind(&self) -> &'static str {
        match self {
            KeyEntry::Secret { .. } => "secret",
            KeyEntry::KeyPair { .. } => "key pair",
            KeyEntry::Certificate { .. } => "certificate",
        }
    }

    /// Check that stored material is well formed (lengths, matching halves,
    /// parseable certificate).
    pub(crate) fn check(&self, alias: &KeyAlias) -> Result<(), KeyStoreError> {
        match self {
            KeyEntry::Secret { material } if material.is_empty() => Err(invalid(alias, "empty secret")),
            KeyEntry::Secret { .. } => Ok(()),
            KeyEntry::KeyPair { public_key, .. } => {
                let signing_key = self.ed25519_signing_key(alias)?;
                if signing_key.verifying_key().as_bytes().as_slice() != public_key.as_slice() {
                    return Err(invalid(alias, "public key does not match private seed"));
                }
                Ok(())
            }
            KeyEntry::Certificate { .. } => self.public_key(alias).map(|_| ()),
        }
    }

    /// Ed25519 signing key of a key pair entry.
    pub(crate) fn ed25519_signing_key(&self, alias: &KeyAlias) -> Result<SigningKey, KeyStoreError> {
        match self {
            KeyEntry::KeyPair {
                algorithm: KeyAlgorithm::Ed25519,
                private_key,
                ..
            } => {
                let seed: [u8; ED25519_KEY_LEN] = private_key
                    .as_slice()
                    .try_into()
                    .map_err(|_| invalid(alias, "Ed25519 seed must be 32 bytes"))?;
                Ok(SigningKey::from_bytes(&seed))
            }
            other => Err(KeyStoreError::WrongType {
                alias: alias.clone(),
                expected: "key pair",
                actual: other.kind(),
            }),
        }
    }

    /// Verification key for a key pair or certificate entry.
    pub(crate) fn public_key(&self, alias: &KeyAlias) -> Result<PublicKey, KeyStoreError> {
        match self {
            KeyEntry::KeyPair { public_key, .. } => PublicKey::ed25519_from_slice(public_key)
                .map_err(|reason| invalid(alias, &reason)),
            KeyEntry::Certificate { der } => {
                PublicKey::from_certificate_der(der).map_err(|reason| invalid(alias, &reason))
            }
            KeyEntry::Secret { .. } => Err(KeyStoreError::WrongType {
                alias: alias.clone(),
                expected: "key pair or certificate",
                actual: "secret",
            }),
        }
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEntry::Secret { material } => f
                .debug_struct("Secret")
                .field("len", &material.len())
                .finish_non_exhaustive(),
            KeyEntry::KeyPair { algorithm, .. } => f
                .debug_struct("KeyPair")
                .field("algorithm", algorithm)
                .finish_non_exhaustive(),
            KeyEntry::Certificate { der } => f
                .debug_struct("Certificate")
                .field("len", &der.len())
                .finish(),
        }
    }
}

fn invalid(alias: &KeyAlias, reason: &str) -> KeyStoreError {
    KeyStoreError::InvalidKey {
        alias: alias.clone(),
        reason: reason.to_string(),
    }
}

// =============================================================================
// Public Keys
// =============================================================================

/// Signature digest for RSA PKCS#1 v1.5 verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaDigest {
    Sha256,
    Sha512,
}

/// A verification key derived from a key pair or certificate.
#[derive(Debug, Clone, PartialEq)]
pub enum PublicKey {
    Ed25519(VerifyingKey),
    Rsa(RsaPublicKey),
}

impl PublicKey {
    /// Extract the subject public key of an X.509 certificate.
    pub fn from_certificate_der(der: &[u8]) -> Result<Self, String> {
        let certificate =
            Certificate::from_der(der).map_err(|e| format!("unreadable certificate: {e}"))?;
        let spki = &certificate.tbs_certificate.subject_public_key_info;

        if spki.algorithm.oid == OID_RSA_ENCRYPTION {
            let spki_der = spki
                .to_der()
                .map_err(|e| format!("unreadable public key info: {e}"))?;
            RsaPublicKey::from_public_key_der(&spki_der)
                .map(PublicKey::Rsa)
                .map_err(|e| format!("invalid RSA public key: {e}"))
        } else if spki.algorithm.oid == OID_ED25519 {
            Self::ed25519_from_slice(spki.subject_public_key.raw_bytes())
        } else {
            Err(format!("unsupported public key algorithm {}", spki.algorithm.oid))
        }
    }

    /// Build an RSA key from big-endian modulus and exponent bytes.
    pub fn rsa_from_components(modulus: &[u8], exponent: &[u8]) -> Result<Self, String> {
        RsaPublicKey::new(
            rsa::BigUint::from_bytes_be(modulus),
            rsa::BigUint::from_bytes_be(exponent),
        )
        .map(PublicKey::Rsa)
        .map_err(|e| format!("invalid RSA key: {e}"))
    }

    fn ed25519_from_slice(bytes: &[u8]) -> Result<Self, String> {
        let bytes: [u8; ED25519_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| "Ed25519 public key must be 32 bytes".to_string())?;
        VerifyingKey::from_bytes(&bytes)
            .map(PublicKey::Ed25519)
            .map_err(|e| format!("invalid Ed25519 public key: {e}"))
    }

    /// Verify a detached signature over `message`.
    ///
    /// Ed25519 keys use strict verification; RSA keys use PKCS#1 v1.5 with
    /// SHA-256. Any cryptographic failure is `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(key) => Signature::from_slice(signature)
                .map(|sig| key.verify_strict(message, &sig).is_ok())
                .unwrap_or(false),
            PublicKey::Rsa(_) => self.verify_rsa(RsaDigest::Sha256, message, signature),
        }
    }

    /// Verify an RSA PKCS#1 v1.5 signature with an explicit digest.
    pub fn verify_rsa(&self, digest: RsaDigest, message: &[u8], signature: &[u8]) -> bool {
        let PublicKey::Rsa(key) = self else {
            return false;
        };
        match digest {
            RsaDigest::Sha256 => key
                .verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message), signature)
                .is_ok(),
            RsaDigest::Sha512 => key
                .verify(Pkcs1v15Sign::new::<Sha512>(), &Sha512::digest(message), signature)
                .is_ok(),
        }
    }
}

// =============================================================================
// Serde helpers
// =============================================================================

mod b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
