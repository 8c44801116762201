// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Small `roxmltree` navigation helpers shared by the SAML modules.

use roxmltree::Node;

pub const SAML_PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const SAML_ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const SAML_METADATA_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// True if `node` is an element named `name` in namespace `ns`.
pub fn is(node: &Node<'_, '_>, ns: &str, name: &str) -> bool {
    node.is_element() && node.tag_name().namespace() == Some(ns) && node.tag_name().name() == name
}

/// Direct element children named `name` in namespace `ns`.
pub fn children<'a, 'input>(
    node: Node<'a, 'input>,
    ns: &'static str,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |c| is(c, ns, name))
}

/// First direct element child named `name` in namespace `ns`.
pub fn child<'a, 'input>(node: Node<'a, 'input>, ns: &'static str, name: &'static str) -> Option<Node<'a, 'input>> {
    children(node, ns, name).next()
}

/// Concatenated text content with surrounding whitespace removed.
pub fn text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Text content with all ASCII whitespace removed (base64 element values).
pub fn compact_text(node: Node<'_, '_>) -> String {
    text(node).chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

/// Escape text for use in element content or a double-quoted attribute.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}
