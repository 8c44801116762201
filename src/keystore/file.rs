// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Encrypted key store file format.
//!
//! Layout:
//!
//! ```text
//! magic "SAGKS1" | rounds u32 LE | salt [16] | nonce [12] | AES-256-GCM ciphertext
//! ```
//!
//! The key is derived with PBKDF2-HMAC-SHA256 over the store password. The
//! header is bound as associated data, so a tampered header fails the same way
//! as a wrong password.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::KeyStoreError;

const MAGIC: &[u8; 6] = b"SAGKS1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + 4 + SALT_LEN + NONCE_LEN;

/// Default PBKDF2 round count for newly written stores.
pub const DEFAULT_KDF_ROUNDS: u32 = 210_000;

/// Encrypt `plaintext` into the on-disk format.
pub(crate) fn seal(password: &[u8], rounds: u32, plaintext: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + 16);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&rounds.to_le_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);

    let key = derive_key(password, &salt, rounds);
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| KeyStoreError::Crypto(format!("cipher init: {e}")))?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &out[..HEADER_LEN],
            },
        )
        .map_err(|_| KeyStoreError::Crypto("encryption failed".to_string()))?;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt the on-disk format. Returns the plaintext and the round count the
/// file was written with.
pub(crate) fn open(password: &[u8], data: &[u8]) -> Result<(Zeroizing<Vec<u8>>, u32), KeyStoreError> {
    if data.len() < HEADER_LEN || &data[..MAGIC.len()] != MAGIC {
        return Err(KeyStoreError::Corrupt("not a key store file".to_string()));
    }
    let mut offset = MAGIC.len();
    let rounds = u32::from_le_bytes(
        data[offset..offset + 4]
            .try_into()
            .map_err(|_| KeyStoreError::Corrupt("truncated header".to_string()))?,
    );
    offset += 4;
    if rounds == 0 {
        return Err(KeyStoreError::Corrupt("zero KDF rounds".to_string()));
    }
    let salt = &data[offset..offset + SALT_LEN];
    offset += SALT_LEN;
    let nonce = &data[offset..offset + NONCE_LEN];

    let key = derive_key(password, salt, rounds);
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| KeyStoreError::Crypto(format!("cipher init: {e}")))?;
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &data[HEADER_LEN..],
                aad: &data[..HEADER_LEN],
            },
        )
        .map_err(|_| KeyStoreError::BadPassword)?;
    Ok((Zeroizing::new(plaintext), rounds))
}

fn derive_key(password: &[u8], salt: &[u8], rounds: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, rounds, key.as_mut_slice());
    key
}
