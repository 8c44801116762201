// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! AuthnRequest construction.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use super::xml::{escape, SAML_ASSERTION_NS, SAML_PROTOCOL_NS};

pub const TRANSIENT_NAME_ID: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";
pub const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// A SAML 2.0 authentication request.
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    /// Random request ID (`_` + 32 hex digits, a valid xs:ID).
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    /// SP entity ID.
    pub issuer: String,
    /// IdP sign-on endpoint.
    pub destination: String,
    pub acs_url: String,
}

impl AuthnRequest {
    pub fn new(
        issuer: impl Into<String>,
        destination: impl Into<String>,
        acs_url: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("_{}", Uuid::new_v4().simple()),
            issue_instant: now,
            issuer: issuer.into(),
            destination: destination.into(),
            acs_url: acs_url.into(),
        }
    }

    /// Serialize. Asks for a transient, IdP-allocated NameID and a response
    /// over HTTP-POST.
    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<samlp:AuthnRequest xmlns:samlp="{protocol}" xmlns:saml="{assertion}" "#,
                r#"ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" "#,
                r#"AssertionConsumerServiceURL="{acs}" ProtocolBinding="{binding}">"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                r#"<samlp:NameIDPolicy Format="{format}" AllowCreate="true"/>"#,
                r#"</samlp:AuthnRequest>"#
            ),
            protocol = SAML_PROTOCOL_NS,
            assertion = SAML_ASSERTION_NS,
            id = self.id,
            instant = self.issue_instant.to_rfc3339_opts(SecondsFormat::Secs, true),
            destination = escape(&self.destination),
            acs = escape(&self.acs_url),
            binding = HTTP_POST_BINDING,
            issuer = escape(&self.issuer),
            format = TRANSIENT_NAME_ID,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::xml;
    use chrono::TimeZone;
    use roxmltree::Document;

    fn request() -> AuthnRequest {
        AuthnRequest::new(
            "https://sp.example.test/acme",
            "https://idp.example.test/sso?tenant=a&b=c",
            "https://sp.example.test/auth/acme/saml",
            Utc.with_ymd_and_hms(2026, 5, 4, 3, 2, 1).unwrap(),
        )
    }

    #[test]
    fn test_request_ids_are_unique_xml_ids() {
        let a = request();
        let b = request();
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with('_'));
        assert_eq!(a.id.len(), 33);
    }

    #[test]
    fn test_request_xml_shape() {
        let req = request();
        let xml_text = req.to_xml();
        let doc = Document::parse(&xml_text).unwrap();
        let root = doc.root_element();

        assert!(xml::is(&root, SAML_PROTOCOL_NS, "AuthnRequest"));
        assert_eq!(root.attribute("ID"), Some(req.id.as_str()));
        assert_eq!(root.attribute("IssueInstant"), Some("2026-05-04T03:02:01Z"));
        assert_eq!(
            root.attribute("Destination"),
            Some("https://idp.example.test/sso?tenant=a&b=c")
        );
        assert_eq!(
            root.attribute("AssertionConsumerServiceURL"),
            Some("https://sp.example.test/auth/acme/saml")
        );

        let issuer = xml::child(root, SAML_ASSERTION_NS, "Issuer").unwrap();
        assert_eq!(xml::text(issuer), "https://sp.example.test/acme");

        let policy = xml::child(root, SAML_PROTOCOL_NS, "NameIDPolicy").unwrap();
        assert_eq!(policy.attribute("Format"), Some(TRANSIENT_NAME_ID));
        assert_eq!(policy.attribute("AllowCreate"), Some("true"));
    }
}
