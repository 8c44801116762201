// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use stoa_auth_gateway::saml::testutil::{encode_response, TestIdp};
use stoa_auth_gateway::saml::{FederationHandler, FederationSettings, MetadataSource};

const SP: &str = "https://gw.example.test/sp/acme";
const ACS: &str = "https://gw.example.test/auth/acme/saml";

struct Target {
    runtime: tokio::runtime::Runtime,
    handler: FederationHandler,
}

fn target() -> &'static Target {
    static TARGET: OnceLock<Target> = OnceLock::new();
    TARGET.get_or_init(|| Target {
        runtime: tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime"),
        handler: FederationHandler::new(
            FederationSettings {
                entity_id: SP.to_string(),
                metadata: MetadataSource::Xml(TestIdp::new().metadata_xml()),
                idp_entity_id: None,
                acs_url: ACS.to_string(),
                clock_skew: chrono::Duration::seconds(60),
                strict_in_response_to: false,
                role_attribute: None,
            },
            reqwest::Client::new(),
        ),
    })
}

fuzz_target!(|data: &[u8]| {
    let Ok(xml) = std::str::from_utf8(data) else {
        return;
    };
    let target = target();

    // Arbitrary documents must be rejected or refused, never accepted.
    let verdict = target
        .runtime
        .block_on(target.handler.handle_response(&encode_response(xml)));
    assert!(!matches!(verdict, Ok(Some(_))));
});
