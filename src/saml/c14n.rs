// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Exclusive XML Canonicalization 1.0 (without comments) over a parsed
//! `roxmltree` subtree.
//!
//! Only what XML signatures on SAML messages need: element subtrees, an
//! optional excluded descendant (enveloped signature) and the
//! `InclusiveNamespaces` prefix list.

use std::collections::BTreeMap;

use roxmltree::{Attribute, Node, NodeId, NodeType};
use thiserror::Error;

/// Algorithm URI of exclusive C14N without comments.
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Nesting limit for canonicalized subtrees.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum C14nError {
    #[error("document nesting exceeds {MAX_DEPTH} levels")]
    TooDeep,

    #[error("namespace prefix '{0}' is not bound")]
    UnboundPrefix(String),
}

/// Canonicalize the subtree rooted at `node`.
///
/// `exclude` names a descendant element left out of the output together with
/// its subtree. `inclusive_prefixes` are rendered on the apex like a
/// non-exclusive canonicalization would (`#default` for the default namespace).
pub fn canonicalize(
    node: Node<'_, '_>,
    exclude: Option<NodeId>,
    inclusive_prefixes: &[&str],
) -> Result<String, C14nError> {
    let mut out = String::new();
    let mut rendered = BTreeMap::new();
    rendered.insert(String::new(), String::new());
    let mut writer = Writer {
        exclude,
        inclusive_prefixes,
        out: &mut out,
    };
    writer.element(node, &rendered, 0)?;
    Ok(out)
}

struct Writer<'w> {
    exclude: Option<NodeId>,
    inclusive_prefixes: &'w [&'w str],
    out: &'w mut String,
}

impl Writer<'_> {
    fn element(
        &mut self,
        node: Node<'_, '_>,
        rendered: &BTreeMap<String, String>,
        depth: usize,
    ) -> Result<(), C14nError> {
        if depth > MAX_DEPTH {
            return Err(C14nError::TooDeep);
        }

        let prefix = element_prefix(node);
        let mut utilized: BTreeMap<String, String> = BTreeMap::new();
        match prefix {
            Some(p) => {
                let uri = prefix_uri(node, p).ok_or_else(|| C14nError::UnboundPrefix(p.to_string()))?;
                utilized.insert(p.to_string(), uri.to_string());
            }
            None => {
                let uri = node.tag_name().namespace().unwrap_or("");
                utilized.insert(String::new(), uri.to_string());
            }
        }

        let mut attributes = Vec::new();
        for attr in node.attributes() {
            let (ns, qname) = match attr.namespace() {
                Some(ns) if ns == XML_NS => (ns, format!("xml:{}", attr.name())),
                Some(ns) => {
                    let p = attribute_prefix(node, &attr)
                        .ok_or_else(|| C14nError::UnboundPrefix(ns.to_string()))?;
                    utilized.insert(p.to_string(), ns.to_string());
                    (ns, format!("{}:{}", p, attr.name()))
                }
                None => ("", attr.name().to_string()),
            };
            attributes.push((ns, attr.name(), qname, attr.value()));
        }
        attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        if depth == 0 {
            for p in self.inclusive_prefixes {
                if *p == "#default" {
                    let uri = default_uri(node).unwrap_or("");
                    utilized.insert(String::new(), uri.to_string());
                } else if *p != "xml" {
                    if let Some(uri) = prefix_uri(node, p) {
                        utilized.insert(p.to_string(), uri.to_string());
                    }
                }
            }
        }

        let mut next_rendered = rendered.clone();
        let mut declarations = Vec::new();
        for (p, uri) in utilized {
            if rendered.get(&p) == Some(&uri) || (!p.is_empty() && uri.is_empty()) {
                continue;
            }
            next_rendered.insert(p.clone(), uri.clone());
            declarations.push((p, uri));
        }

        let qname = match prefix {
            Some(p) => format!("{}:{}", p, node.tag_name().name()),
            None => node.tag_name().name().to_string(),
        };

        self.out.push('<');
        self.out.push_str(&qname);
        for (p, uri) in &declarations {
            if p.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(p);
                self.out.push_str("=\"");
            }
            escape_attribute(uri, self.out);
            self.out.push('"');
        }
        for (_, _, name, value) in &attributes {
            self.out.push(' ');
            self.out.push_str(name);
            self.out.push_str("=\"");
            escape_attribute(value, self.out);
            self.out.push('"');
        }
        self.out.push('>');

        for child in node.children() {
            match child.node_type() {
                NodeType::Element => {
                    if Some(child.id()) != self.exclude {
                        self.element(child, &next_rendered, depth + 1)?;
                    }
                }
                NodeType::Text => {
                    if let Some(text) = child.text() {
                        escape_text(text, self.out);
                    }
                }
                NodeType::PI => {
                    if let Some(pi) = child.pi() {
                        self.out.push_str("<?");
                        self.out.push_str(pi.target);
                        if let Some(value) = pi.value {
                            self.out.push(' ');
                            self.out.push_str(value);
                        }
                        self.out.push_str("?>");
                    }
                }
                NodeType::Comment | NodeType::Root => {}
            }
        }

        self.out.push_str("</");
        self.out.push_str(&qname);
        self.out.push('>');
        Ok(())
    }
}

/// Prefix of an element as written in the source document.
fn element_prefix<'input>(node: Node<'_, 'input>) -> Option<&'input str> {
    let text = node.document().input_text();
    let rest = text.get(node.range().start + 1..)?;
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(rest.len());
    rest[..end].split_once(':').map(|(prefix, _)| prefix)
}

fn prefix_uri<'a>(node: Node<'a, '_>, prefix: &str) -> Option<&'a str> {
    node.namespaces()
        .find(|ns| ns.name() == Some(prefix))
        .map(|ns| ns.uri())
}

fn default_uri<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.namespaces()
        .find(|ns| ns.name().is_none())
        .map(|ns| ns.uri())
}

/// Prefix of a namespaced attribute as written in the source document,
/// falling back to any prefix bound to its namespace.
fn attribute_prefix<'a, 'input>(node: Node<'a, 'input>, attr: &Attribute<'a, 'input>) -> Option<&'a str> {
    let uri = attr.namespace()?;
    let written = node
        .document()
        .input_text()
        .get(attr.range_qname())
        .and_then(|qname| qname.split_once(':'))
        .map(|(prefix, _)| prefix)
        .filter(|prefix| prefix_uri(node, prefix) == Some(uri));
    if let Some(prefix) = written {
        return Some(prefix);
    }
    node.namespaces()
        .find(|ns| ns.uri() == uri && ns.name().is_some())
        .and_then(|ns| ns.name())
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
}
