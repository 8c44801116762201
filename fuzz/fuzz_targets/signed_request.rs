// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use secrecy::SecretString;
use stoa_auth_gateway::auth::SignedRequestVerifier;
use stoa_auth_gateway::keystore::{KeyAlias, KeyStore, KeyStoreOptions};

struct Target {
    _dir: tempfile::TempDir,
    verifier: SignedRequestVerifier,
}

fn target() -> &'static Target {
    static TARGET: OnceLock<Target> = OnceLock::new();
    TARGET.get_or_init(|| {
        let dir = tempfile::tempdir().expect("tempdir");
        let keys = KeyStore::open_with_options(
            dir.path().join("fuzz.sagks"),
            &SecretString::new("fuzz".to_string()),
            KeyStoreOptions { kdf_rounds: 16 },
        )
        .expect("keystore");
        keys.generate_key_pair(KeyAlias::from("billing"))
            .expect("key pair");
        Target {
            _dir: dir,
            verifier: SignedRequestVerifier::new(Arc::new(keys)),
        }
    })
}

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let (request, signature) = input.split_once('&').unwrap_or((input, ""));

    // Never panics; an unsigned input never verifies.
    if let Ok(account) = target().verifier.verify(request, signature) {
        assert!(account.is_none());
    }
});
