//! Inclusive Canonical XML 1.0 (without comments)
//!
//! Only the parts of the algorithm that apply to an element tree are needed:
//! namespace declaration pruning, attribute ordering, character escaping and
//! start/end tag pairs for empty elements. Document subsets are always a
//! single element and its descendants, which is what an XMLDSig same-document
//! reference (`#id`) or SignedInfo selects.

use std::collections::BTreeMap;

use super::{local_part, namespace_prefix, XmlElement, XmlNode};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Canonical form of a whole document rooted at `root`
pub fn canonicalize_document(root: &XmlElement) -> Vec<u8> {
    canonicalize(root, &BTreeMap::new())
}

/// Canonical form of `element` as the apex of a document subset.
///
/// `inherited` holds the namespace declarations in scope from the element's
/// ancestors (prefix -> URI, `""` for the default namespace); inclusive C14N
/// renders all of them on the apex.
pub fn canonicalize(element: &XmlElement, inherited: &BTreeMap<String, String>) -> Vec<u8> {
    let mut out = Vec::new();
    write_element(element, inherited, &BTreeMap::new(), &mut out);
    out
}

fn write_element(
    element: &XmlElement,
    parent_scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
    out: &mut Vec<u8>,
) {
    let mut scope = parent_scope.clone();
    scope.extend(element.namespace_declarations());

    let mut now_rendered = rendered.clone();
    let mut namespaces = Vec::new();
    for (prefix, uri) in &scope {
        let previous = rendered.get(prefix);
        if uri.is_empty() {
            // xmlns="" only matters when it undoes a rendered default
            if prefix.is_empty() && previous.is_some_and(|p| !p.is_empty()) {
                namespaces.push((prefix.as_str(), ""));
                now_rendered.insert(prefix.clone(), String::new());
            }
            continue;
        }
        if previous != Some(uri) {
            namespaces.push((prefix.as_str(), uri.as_str()));
            now_rendered.insert(prefix.clone(), uri.clone());
        }
    }

    let mut attributes: Vec<(&str, &str, &str, &str)> = element
        .attributes
        .iter()
        .filter(|(name, _)| namespace_prefix(name).is_none())
        .map(|(name, value)| {
            let uri = match name.split_once(':') {
                Some(("xml", _)) => XML_NAMESPACE,
                Some((prefix, _)) => scope.get(prefix).map(String::as_str).unwrap_or(""),
                None => "",
            };
            (uri, local_part(name), name.as_str(), value.as_str())
        })
        .collect();
    attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    out.push(b'<');
    out.extend_from_slice(element.name.as_bytes());
    for (prefix, uri) in namespaces {
        out.extend_from_slice(b" xmlns");
        if !prefix.is_empty() {
            out.push(b':');
            out.extend_from_slice(prefix.as_bytes());
        }
        out.extend_from_slice(b"=\"");
        escape_attribute(uri, out);
        out.push(b'"');
    }
    for (_, _, name, value) in attributes {
        out.push(b' ');
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b"=\"");
        escape_attribute(value, out);
        out.push(b'"');
    }
    out.push(b'>');

    for child in &element.children {
        match child {
            XmlNode::Element(el) => write_element(el, &scope, &now_rendered, out),
            XmlNode::Text(text) => escape_text(text, out),
        }
    }

    out.extend_from_slice(b"</");
    out.extend_from_slice(element.name.as_bytes());
    out.push(b'>');
}

fn escape_text(text: &str, out: &mut Vec<u8>) {
    for c in text.chars() {
        match c {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            '\r' => out.extend_from_slice(b"&#xD;"),
            c => push_char(c, out),
        }
    }
}

fn escape_attribute(value: &str, out: &mut Vec<u8>) {
    for c in value.chars() {
        match c {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '"' => out.extend_from_slice(b"&quot;"),
            '\t' => out.extend_from_slice(b"&#x9;"),
            '\n' => out.extend_from_slice(b"&#xA;"),
            '\r' => out.extend_from_slice(b"&#xD;"),
            c => push_char(c, out),
        }
    }
}

fn push_char(c: char, out: &mut Vec<u8>) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}
