// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! HTTP-Redirect binding codec: raw DEFLATE (no zlib header) then standard
//! base64.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use thiserror::Error;

/// Upper bound on inflated message size.
pub const MAX_INFLATED_LEN: u64 = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid deflate stream: {0}")]
    Inflate(std::io::Error),

    #[error("inflated message exceeds {MAX_INFLATED_LEN} bytes")]
    TooLarge,

    #[error("deflate failed: {0}")]
    Deflate(std::io::Error),
}

/// Compress and encode a message.
pub fn encode(data: &[u8]) -> Result<String, CodecError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::Deflate)?;
    let compressed = encoder.finish().map_err(CodecError::Deflate)?;
    Ok(STANDARD.encode(compressed))
}

/// Decode and inflate a message produced by [`encode`] (or by an IdP).
pub fn decode(encoded: &str) -> Result<Vec<u8>, CodecError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let compressed = STANDARD.decode(compact)?;

    let mut inflated = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .take(MAX_INFLATED_LEN + 1)
        .read_to_end(&mut inflated)
        .map_err(CodecError::Inflate)?;
    if inflated.len() as u64 > MAX_INFLATED_LEN {
        return Err(CodecError::TooLarge);
    }
    Ok(inflated)
}
