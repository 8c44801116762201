// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Signed Service Requests
//!
//! Service-to-service authentication by detached signature.
//!
//! A caller sends `request` = base64url(JSON `{"account": <alias>, "instant": <epoch ms>}`)
//! and `signature` = base64url(signature over the decoded JSON bytes). The
//! account names a key-pair or certificate entry in the key store.
//!
//! Two failure tiers:
//! - unreadable input is a [`RequestValidationError`]
//! - stale, unknown-account and bad-signature requests are all `Ok(None)`

use std::sync::Arc;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::keystore::{KeyAlias, KeyStore};

/// Accepted distance between `instant` and the verifier's clock.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// base64url, padding optional on input, never written.
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum RequestValidationError {
    #[error("could not read request: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct RequestPayload {
    account: String,
    instant: i64,
}

// =============================================================================
// Verifier
// =============================================================================

/// Verifies signed service requests against key-store public keys.
pub struct SignedRequestVerifier {
    keys: Arc<KeyStore>,
    window_ms: u64,
}

impl SignedRequestVerifier {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self::with_window(keys, DEFAULT_WINDOW_MS)
    }

    pub fn with_window(keys: Arc<KeyStore>, window_ms: u64) -> Self {
        Self { keys, window_ms }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Verify against the current time.
    pub fn verify(&self, request: &str, signature: &str) -> Result<Option<KeyAlias>, RequestValidationError> {
        self.verify_at(request, signature, Utc::now())
    }

    /// Verify with an explicit clock. Returns the account on success.
    pub fn verify_at(
        &self,
        request: &str,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<KeyAlias>, RequestValidationError> {
        let payload_bytes = BASE64URL
            .decode(request.trim())
            .map_err(|e| RequestValidationError::Malformed(format!("request encoding: {e}")))?;
        let signature_bytes = BASE64URL
            .decode(signature.trim())
            .map_err(|e| RequestValidationError::Malformed(format!("signature encoding: {e}")))?;
        let payload: RequestPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|e| RequestValidationError::Malformed(format!("request payload: {e}")))?;

        let account = KeyAlias::from(payload.account);
        let skew = payload.instant.abs_diff(now.timestamp_millis());
        if skew > self.window_ms {
            debug!(account = %account, skew_ms = skew, "signed request outside freshness window");
            return Ok(None);
        }

        let public_key = match self.keys.public_key(&account) {
            Ok(key) => key,
            Err(e) => {
                debug!(account = %account, error = %e, "no verification key for account");
                return Ok(None);
            }
        };

        if !public_key.verify(&payload_bytes, &signature_bytes) {
            debug!(account = %account, "signed request signature rejected");
            return Ok(None);
        }

        Ok(Some(account))
    }
}

// =============================================================================
// Client Helper
// =============================================================================

/// Encoded `request`/`signature` pair, as a calling service sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequest {
    pub request: String,
    pub signature: String,
}

impl SignedRequest {
    /// Sign a request for `account` at `instant` (epoch milliseconds).
    pub fn sign(signing_key: &SigningKey, account: &str, instant: i64) -> Self {
        let payload = serde_json::json!({ "account": account, "instant": instant }).to_string();
        let signature = signing_key.sign(payload.as_bytes());
        Self {
            request: BASE64URL.encode(payload.as_bytes()),
            signature: BASE64URL.encode(signature.to_bytes()),
        }
    }

    /// Sign a request for `account` at the current time.
    pub fn sign_now(signing_key: &SigningKey, account: &str) -> Self {
        Self::sign(signing_key, account, Utc::now().timestamp_millis())
    }

    /// `request=..&signature=..` query string.
    pub fn to_query(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("request", &self.request)
            .append_pair("signature", &self.signature)
            .finish()
    }
}
