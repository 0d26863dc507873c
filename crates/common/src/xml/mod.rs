//! Minimal XML element tree
//!
//! Package documents (relationship parts, the content type registry and
//! signature documents) are small and fully owned by us, so they are loaded
//! into a plain element tree rather than streamed:
//!
//! - **Parsing** uses `quick-xml`; text nodes are preserved verbatim so that
//!   whitespace survives a parse/serialize cycle
//! - **Serialization** always emits inclusive Canonical XML 1.0 (see [`c14n`]),
//!   which means a document we write is byte-identical to its own canonical
//!   form and SignedInfo digests can be recomputed from the parsed tree
//!
//! Names are kept as qualified strings (`prefix:local`); namespace
//! declarations are ordinary `xmlns`/`xmlns:*` attributes.

pub mod c14n;

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

pub use c14n::{canonicalize, canonicalize_document};

/// Errors raised while reading XML documents
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("xml parse error: {0}")]
    Parse(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("xml is not valid utf-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed document: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name, e.g. `Reference` or `mdssi:Value`
    pub name: String,
    /// Attributes in document order, namespace declarations included
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    pub fn push(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    /// Set an attribute, replacing an existing one of the same name
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The name without its namespace prefix
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element with the given local name
    pub fn child(&self, local_name: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.local_name() == local_name)
    }

    pub fn children_named<'a>(
        &'a self,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |el| el.local_name() == local_name)
    }

    /// Follow a chain of child local names
    pub fn descend(&self, path: &[&str]) -> Option<&XmlElement> {
        path.iter().try_fold(self, |el, name| el.child(name))
    }

    /// Concatenated text content of direct text children
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Namespace declarations made on this element, keyed by prefix
    /// (`""` for the default namespace)
    pub fn namespace_declarations(&self) -> BTreeMap<String, String> {
        self.attributes
            .iter()
            .filter_map(|(name, value)| {
                namespace_prefix(name).map(|prefix| (prefix.to_string(), value.clone()))
            })
            .collect()
    }

    /// Parse a complete document and return its root element
    pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
        let text = std::str::from_utf8(strip_bom(bytes))?;
        let mut reader = Reader::from_str(text);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(element_from_start(&start)?),
                Event::Empty(start) => {
                    let el = element_from_start(&start)?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::End(_) => {
                    let el = stack
                        .pop()
                        .ok_or_else(|| XmlError::Malformed("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, el)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        push_text(parent, &text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        push_text(parent, std::str::from_utf8(&data)?);
                    }
                }
                Event::Eof => break,
                // declarations, comments, processing instructions and
                // doctypes carry nothing we keep
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Malformed("unclosed element".into()));
        }
        root.ok_or_else(|| XmlError::Malformed("document has no root element".into()))
    }

    /// Serialize as a standalone canonical document with an XML declaration
    pub fn to_document(&self) -> Vec<u8> {
        let mut out = b"<?xml version=\"1.0\" encoding=\"utf-8\"?>".to_vec();
        out.extend(canonicalize_document(self));
        out
    }
}

/// `prefix:local` -> `local`
pub fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name)
}

/// `xmlns` -> `Some("")`, `xmlns:p` -> `Some("p")`, anything else -> `None`
pub(crate) fn namespace_prefix(attr_name: &str) -> Option<&str> {
    if attr_name == "xmlns" {
        Some("")
    } else {
        attr_name.strip_prefix("xmlns:")
    }
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement, XmlError> {
    let name = std::str::from_utf8(start.name().as_ref())?.to_string();
    let mut el = XmlElement::new(name);
    for attr in start.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value()?.into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    el: XmlElement,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push(el);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(el);
            Ok(())
        }
        None => Err(XmlError::Malformed("multiple root elements".into())),
    }
}

fn push_text(parent: &mut XmlElement, text: &str) {
    if let Some(XmlNode::Text(existing)) = parent.children.last_mut() {
        existing.push_str(text);
    } else {
        parent.children.push(XmlNode::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_document() {
        let doc = br#"<?xml version="1.0" encoding="utf-8"?>
<Relationships xmlns="urn:test"><Relationship Id="R1" Target="/a.xml" /></Relationships>"#;
        let root = XmlElement::parse(doc).unwrap();
        assert_eq!(root.name, "Relationships");
        assert_eq!(root.attr("xmlns"), Some("urn:test"));
        let rel = root.child("Relationship").unwrap();
        assert_eq!(rel.attr("Id"), Some("R1"));
        assert_eq!(rel.attr("Target"), Some("/a.xml"));
    }

    #[test]
    fn test_parse_unescapes_text_and_attributes() {
        let doc = br#"<a b="x &amp; y"><c>1 &lt; 2</c></a>"#;
        let root = XmlElement::parse(doc).unwrap();
        assert_eq!(root.attr("b"), Some("x & y"));
        assert_eq!(root.child("c").unwrap().text(), "1 < 2");
    }

    #[test]
    fn test_parse_with_bom() {
        let mut doc = vec![0xEF, 0xBB, 0xBF];
        doc.extend_from_slice(b"<root/>");
        assert_eq!(XmlElement::parse(&doc).unwrap().name, "root");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(XmlElement::parse(b"<a><b></a>").is_err());
        assert!(XmlElement::parse(b"").is_err());
        assert!(XmlElement::parse(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_prefixed_lookup() {
        let root = XmlElement::parse(br#"<p:a xmlns:p="urn:p"><p:b>t</p:b></p:a>"#).unwrap();
        assert_eq!(root.local_name(), "a");
        assert_eq!(root.descend(&["b"]).unwrap().text(), "t");
        assert_eq!(
            root.namespace_declarations().get("p").map(String::as_str),
            Some("urn:p")
        );
    }

    #[test]
    fn test_document_roundtrip_is_stable() {
        let el = XmlElement::new("Types")
            .with_attr("xmlns", "urn:types")
            .with_child(XmlElement::new("Default").with_attr("Extension", "xml"));
        let first = el.to_document();
        let reparsed = XmlElement::parse(&first).unwrap();
        assert_eq!(reparsed, el);
        assert_eq!(reparsed.to_document(), first);
    }
}
