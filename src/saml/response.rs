// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! SAML Response evaluation
//!
//! Turns a decoded `samlp:Response` into a [`Verdict`]. Documents that cannot
//! be read are errors; documents that can be read but fail verification are
//! rejections.
//!
//! Checks, in order:
//! 1. unique `ID` attributes, an identified assertion, no encrypted assertions
//! 2. enveloped signature on the Response, the Assertion, or both
//! 3. status `Success`, `Destination` and `Issuer`
//! 4. `Conditions` window (with clock skew) and audience restriction
//! 5. non-empty `NameID`, bearer confirmation window and recipient

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use roxmltree::{Document, Node};
use tracing::debug;

use super::dsig;
use super::metadata::IdentityProvider;
use super::xml::{self, SAML_ASSERTION_NS, SAML_PROTOCOL_NS};
use super::FederationError;

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

// =============================================================================
// Principal
// =============================================================================

/// The authenticated subject of an accepted response.
#[derive(Debug, Clone, PartialEq)]
pub struct SamlPrincipal {
    pub name_id: String,
    pub name_id_format: Option<String>,
    pub session_index: Option<String>,
    /// Attribute name to values, in document order.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// `Conditions/@NotOnOrAfter`, when the IdP bounds the assertion.
    pub valid_until: Option<DateTime<Utc>>,
}

impl SamlPrincipal {
    pub fn attribute_values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// What the service provider expects of a response.
pub(crate) struct Expectations<'a> {
    pub sp_entity_id: &'a str,
    pub idp: &'a IdentityProvider,
    pub acs_url: &'a str,
    pub now: DateTime<Utc>,
    pub clock_skew: Duration,
}

#[derive(Debug)]
pub enum Verdict {
    Accepted {
        principal: SamlPrincipal,
        /// `Assertion/@ID`, consumed once by the handler.
        assertion_id: String,
        in_response_to: Option<String>,
    },
    Rejected(String),
}

fn reject(reason: impl Into<String>) -> Result<Verdict, FederationError> {
    Ok(Verdict::Rejected(reason.into()))
}

pub(crate) fn evaluate(xml_text: &str, expect: &Expectations<'_>) -> Result<Verdict, FederationError> {
    let doc = Document::parse(xml_text).map_err(|e| FederationError::SamlParsing(e.to_string()))?;
    let response = doc.root_element();
    if !xml::is(&response, SAML_PROTOCOL_NS, "Response") {
        return Err(FederationError::SamlParsing(format!(
            "expected samlp:Response, found {}",
            response.tag_name().name()
        )));
    }

    if let Some(id) = dsig::duplicate_id(&doc) {
        return reject(format!("duplicate ID '{}'", id));
    }
    if xml::child(response, SAML_ASSERTION_NS, "EncryptedAssertion").is_some() {
        return reject("encrypted assertions are not supported");
    }

    let Some(assertion) = xml::child(response, SAML_ASSERTION_NS, "Assertion") else {
        return reject("response carries no assertion");
    };
    let Some(assertion_id) = assertion.attribute("ID").filter(|id| !id.is_empty()) else {
        return reject("assertion has no ID");
    };

    let response_signed = dsig::is_signed(response);
    let assertion_signed = dsig::is_signed(assertion);
    if !response_signed && !assertion_signed {
        return reject("neither response nor assertion is signed");
    }
    if response_signed {
        if let Err(e) = dsig::verify_enveloped(response, &expect.idp.signing_keys) {
            return reject(format!("response signature: {}", e));
        }
    }
    if assertion_signed {
        if let Err(e) = dsig::verify_enveloped(assertion, &expect.idp.signing_keys) {
            return reject(format!("assertion signature: {}", e));
        }
    }

    let status = xml::child(response, SAML_PROTOCOL_NS, "Status")
        .and_then(|s| xml::child(s, SAML_PROTOCOL_NS, "StatusCode"))
        .and_then(|c| c.attribute("Value"));
    if status != Some(STATUS_SUCCESS) {
        return reject(format!("status {}", status.unwrap_or("missing")));
    }

    if let Some(destination) = response.attribute("Destination") {
        if destination != expect.acs_url {
            return reject(format!("destination '{}' is not this service", destination));
        }
    }

    for element in [response, assertion] {
        if let Some(issuer) = xml::child(element, SAML_ASSERTION_NS, "Issuer") {
            let issuer = xml::text(issuer);
            if issuer != expect.idp.entity_id {
                return reject(format!("unexpected issuer '{}'", issuer));
            }
        }
    }

    let mut valid_until = None;
    if let Some(conditions) = xml::child(assertion, SAML_ASSERTION_NS, "Conditions") {
        let not_before = timestamp(conditions, "NotBefore")?;
        let not_on_or_after = timestamp(conditions, "NotOnOrAfter")?;
        if let Some(not_before) = not_before {
            if expect.now + expect.clock_skew < not_before {
                return reject("assertion is not yet valid");
            }
        }
        if let Some(not_on_or_after) = not_on_or_after {
            if expect.now - expect.clock_skew >= not_on_or_after {
                return reject("assertion has expired");
            }
        }
        valid_until = not_on_or_after;

        for restriction in xml::children(conditions, SAML_ASSERTION_NS, "AudienceRestriction") {
            let allowed = xml::children(restriction, SAML_ASSERTION_NS, "Audience")
                .any(|audience| xml::text(audience) == expect.sp_entity_id);
            if !allowed {
                return reject("assertion is addressed to another audience");
            }
        }
    }

    let Some(subject) = xml::child(assertion, SAML_ASSERTION_NS, "Subject") else {
        return reject("assertion has no subject");
    };
    let Some(name_id) = xml::child(subject, SAML_ASSERTION_NS, "NameID") else {
        return reject("subject has no NameID");
    };
    let name = xml::text(name_id);
    if name.is_empty() {
        return reject("empty NameID");
    }

    for confirmation in xml::children(subject, SAML_ASSERTION_NS, "SubjectConfirmation") {
        let Some(data) = xml::child(confirmation, SAML_ASSERTION_NS, "SubjectConfirmationData") else {
            continue;
        };
        if let Some(not_on_or_after) = timestamp(data, "NotOnOrAfter")? {
            if expect.now - expect.clock_skew >= not_on_or_after {
                return reject("subject confirmation has expired");
            }
        }
        if let Some(recipient) = data.attribute("Recipient") {
            if recipient != expect.acs_url {
                return reject(format!("recipient '{}' is not this service", recipient));
            }
        }
    }

    let session_index = xml::child(assertion, SAML_ASSERTION_NS, "AuthnStatement")
        .and_then(|s| s.attribute("SessionIndex"))
        .map(str::to_string);

    let principal = SamlPrincipal {
        name_id: name,
        name_id_format: name_id.attribute("Format").map(str::to_string),
        session_index,
        attributes: attributes(assertion),
        valid_until,
    };
    let in_response_to = response.attribute("InResponseTo").map(str::to_string);

    debug!(
        in_response_to = ?in_response_to,
        attributes = principal.attributes.len(),
        "SAML response accepted"
    );

    Ok(Verdict::Accepted {
        principal,
        assertion_id: assertion_id.to_string(),
        in_response_to,
    })
}

fn timestamp(node: Node<'_, '_>, attribute: &str) -> Result<Option<DateTime<Utc>>, FederationError> {
    node.attribute(attribute)
        .map(|value| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    FederationError::SamlParsing(format!("{} '{}': {}", attribute, value, e))
                })
        })
        .transpose()
}

fn attributes(assertion: Node<'_, '_>) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for statement in xml::children(assertion, SAML_ASSERTION_NS, "AttributeStatement") {
        for attribute in xml::children(statement, SAML_ASSERTION_NS, "Attribute") {
            let Some(name) = attribute.attribute("Name") else {
                continue;
            };
            let values = out.entry(name.to_string()).or_default();
            values.extend(xml::children(attribute, SAML_ASSERTION_NS, "AttributeValue").map(xml::text));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::testutil::{ResponseTemplate, SignTarget, TestIdp};

    const SP: &str = "https://sp.example.test/acme";
    const ACS: &str = "https://sp.example.test/auth/acme/saml";

    fn fixture() -> (TestIdp, IdentityProvider) {
        let idp = TestIdp::new();
        let provider = IdentityProvider {
            entity_id: idp.entity_id.clone(),
            sso_url: idp.sso_url.clone(),
            signing_keys: vec![idp.public_key()],
        };
        (idp, provider)
    }

    fn run(xml: &str, provider: &IdentityProvider, now: DateTime<Utc>) -> Verdict {
        let expect = Expectations {
            sp_entity_id: SP,
            idp: provider,
            acs_url: ACS,
            now,
            clock_skew: Duration::seconds(60),
        };
        evaluate(xml, &expect).unwrap()
    }

    fn template() -> ResponseTemplate {
        let mut template = ResponseTemplate::new(SP, ACS, "alice@example.test");
        template.in_response_to = Some("_req1".to_string());
        template.session_index = Some("sess-1".to_string());
        template.attributes = vec![(
            "groups".to_string(),
            vec!["admins".to_string(), "editors".to_string()],
        )];
        template
    }

    fn rejected(verdict: Verdict) -> String {
        match verdict {
            Verdict::Rejected(reason) => reason,
            Verdict::Accepted { .. } => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_signed_assertion_accepted() {
        let (idp, provider) = fixture();
        let t = template();
        let xml = idp.signed_response(&t, SignTarget::Assertion);

        match run(&xml, &provider, t.issue_instant) {
            Verdict::Accepted {
                principal,
                assertion_id,
                in_response_to,
            } => {
                assert_eq!(assertion_id, t.assertion_id);
                assert_eq!(principal.name_id, "alice@example.test");
                assert_eq!(principal.session_index.as_deref(), Some("sess-1"));
                assert_eq!(principal.attribute_values("groups"), ["admins", "editors"]);
                assert!(principal.attribute_values("missing").is_empty());
                assert_eq!(principal.valid_until, Some(t.not_on_or_after));
                assert_eq!(in_response_to.as_deref(), Some("_req1"));
            }
            Verdict::Rejected(reason) => panic!("rejected: {}", reason),
        }
    }

    #[test]
    fn test_signed_response_and_both_accepted() {
        let (idp, provider) = fixture();
        let t = template();
        for target in [SignTarget::Response, SignTarget::Both] {
            let xml = idp.signed_response(&t, target);
            assert!(matches!(run(&xml, &provider, t.issue_instant), Verdict::Accepted { .. }));
        }
    }

    #[test]
    fn test_unsigned_rejected() {
        let (idp, provider) = fixture();
        let t = template();
        let xml = idp.signed_response(&t, SignTarget::None);
        assert!(rejected(run(&xml, &provider, t.issue_instant)).contains("signed"));
    }

    #[test]
    fn test_tampered_name_id_rejected() {
        let (idp, provider) = fixture();
        let t = template();
        let xml = idp
            .signed_response(&t, SignTarget::Assertion)
            .replace("alice@example.test", "mallory@example.test");
        assert!(rejected(run(&xml, &provider, t.issue_instant)).contains("signature"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let (idp, mut provider) = fixture();
        provider.signing_keys = vec![crate::saml::testutil::unrelated_public_key()];
        let t = template();
        let xml = idp.signed_response(&t, SignTarget::Assertion);
        assert!(rejected(run(&xml, &provider, t.issue_instant)).contains("signature"));
    }

    #[test]
    fn test_expired_assertion_rejected() {
        let (idp, provider) = fixture();
        let t = template();
        let xml = idp.signed_response(&t, SignTarget::Assertion);
        let late = t.not_on_or_after + Duration::seconds(61);
        assert!(rejected(run(&xml, &provider, late)).contains("expired"));
    }

    #[test]
    fn test_clock_skew_tolerated() {
        let (idp, provider) = fixture();
        let t = template();
        let xml = idp.signed_response(&t, SignTarget::Assertion);
        let early = t.not_before - Duration::seconds(30);
        assert!(matches!(run(&xml, &provider, early), Verdict::Accepted { .. }));
        let too_early = t.not_before - Duration::seconds(61);
        assert!(rejected(run(&xml, &provider, too_early)).contains("not yet valid"));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let (idp, provider) = fixture();
        let mut t = template();
        t.audience = "https://other.example.test".to_string();
        let xml = idp.signed_response(&t, SignTarget::Assertion);
        assert!(rejected(run(&xml, &provider, t.issue_instant)).contains("audience"));
    }

    #[test]
    fn test_failed_status_rejected() {
        let (idp, provider) = fixture();
        let mut t = template();
        t.status = "urn:oasis:names:tc:SAML:2.0:status:Requester".to_string();
        let xml = idp.signed_response(&t, SignTarget::Response);
        assert!(rejected(run(&xml, &provider, t.issue_instant)).contains("status"));
    }

    #[test]
    fn test_wrong_destination_rejected() {
        let (idp, provider) = fixture();
        let mut t = template();
        t.destination = "https://evil.example.test/acs".to_string();
        let xml = idp.signed_response(&t, SignTarget::Response);
        assert!(rejected(run(&xml, &provider, t.issue_instant)).contains("destination"));
    }

    #[test]
    fn test_empty_name_id_rejected() {
        let (idp, provider) = fixture();
        let mut t = template();
        t.name_id = String::new();
        let xml = idp.signed_response(&t, SignTarget::Assertion);
        assert!(rejected(run(&xml, &provider, t.issue_instant)).contains("NameID"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let (idp, provider) = fixture();
        let t = template();
        let xml = idp.signed_response(&t, SignTarget::Assertion).replacen(
            "<samlp:Status>",
            &format!(r#"<samlp:Extensions><x ID="{}" xmlns=""/></samlp:Extensions><samlp:Status>"#, t.assertion_id),
            1,
        );
        assert!(rejected(run(&xml, &provider, t.issue_instant)).contains("duplicate"));
    }

    #[test]
    fn test_garbage_is_a_parsing_error() {
        let (_, provider) = fixture();
        let expect = Expectations {
            sp_entity_id: SP,
            idp: &provider,
            acs_url: ACS,
            now: Utc::now(),
            clock_skew: Duration::seconds(60),
        };
        assert!(matches!(
            evaluate("not xml at all", &expect),
            Err(FederationError::SamlParsing(_))
        ));
        assert!(matches!(
            evaluate("<samlp:AuthnRequest xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\"/>", &expect),
            Err(FederationError::SamlParsing(_))
        ));
    }
}
