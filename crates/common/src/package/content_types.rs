//! Content type registry (`/[Content_Types].xml`)

use crate::xml::XmlElement;

use super::{PackageError, PartUri};

pub const CONTENT_TYPES_NAMESPACE: &str =
    "http://schemas.openxmlformats.org/package/2006/content-types";

/// Zip entry name of the registry; it is stored like any other part
pub const CONTENT_TYPES_PART_NAME: &str = "/[Content_Types].xml";

/// Media type for parts no rule matches
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentTypeRule {
    /// Applies to every part with this extension (stored without the dot)
    Default { extension: String },
    /// Applies to exactly one part
    Override { part: PartUri },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub rule: ContentTypeRule,
    pub media_type: String,
}

/// Media-type rules of a package.
///
/// Resolution order is exact-path override, then extension default, then
/// [`FALLBACK_CONTENT_TYPE`]. Both lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypes {
    entries: Vec<ContentType>,
    dirty: bool,
}

impl ContentTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part_uri() -> PartUri {
        PartUri::parse(CONTENT_TYPES_PART_NAME).expect("registry part name is valid")
    }

    pub fn from_xml(bytes: &[u8]) -> Result<Self, PackageError> {
        let malformed = |reason: String| PackageError::MalformedContainer {
            part: CONTENT_TYPES_PART_NAME.to_string(),
            reason,
        };
        let root = XmlElement::parse(bytes).map_err(|e| malformed(e.to_string()))?;
        if root.local_name() != "Types" {
            return Err(malformed(format!("unexpected root element {}", root.name)));
        }

        let mut entries = Vec::new();
        for el in root.elements() {
            let media_type = el
                .attr("ContentType")
                .ok_or_else(|| malformed(format!("{} without ContentType", el.name)))?
                .to_string();
            let rule = match el.local_name() {
                "Default" => ContentTypeRule::Default {
                    extension: el
                        .attr("Extension")
                        .ok_or_else(|| malformed("Default without Extension".into()))?
                        .trim_start_matches('.')
                        .to_string(),
                },
                "Override" => ContentTypeRule::Override {
                    part: PartUri::parse(
                        el.attr("PartName")
                            .ok_or_else(|| malformed("Override without PartName".into()))?,
                    )?,
                },
                other => return Err(malformed(format!("unexpected element {other}"))),
            };
            entries.push(ContentType { rule, media_type });
        }
        Ok(Self {
            entries,
            dirty: false,
        })
    }

    pub fn to_xml(&self) -> Vec<u8> {
        let mut root = XmlElement::new("Types").with_attr("xmlns", CONTENT_TYPES_NAMESPACE);
        // Defaults precede Overrides in every registry we have seen written
        for entry in &self.entries {
            if let ContentTypeRule::Default { extension } = &entry.rule {
                root.push(
                    XmlElement::new("Default")
                        .with_attr("Extension", extension.as_str())
                        .with_attr("ContentType", entry.media_type.as_str()),
                );
            }
        }
        for entry in &self.entries {
            if let ContentTypeRule::Override { part } = &entry.rule {
                root.push(
                    XmlElement::new("Override")
                        .with_attr("PartName", part.as_str())
                        .with_attr("ContentType", entry.media_type.as_str()),
                );
            }
        }
        root.to_document()
    }

    pub fn entries(&self) -> &[ContentType] {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn resolve(&self, part: &PartUri) -> &str {
        self.override_for(part)
            .or_else(|| part.extension().and_then(|ext| self.default_for(ext)))
            .unwrap_or(FALLBACK_CONTENT_TYPE)
    }

    pub fn default_for(&self, extension: &str) -> Option<&str> {
        self.entries.iter().find_map(|entry| match &entry.rule {
            ContentTypeRule::Default { extension: e } if e.eq_ignore_ascii_case(extension) => {
                Some(entry.media_type.as_str())
            }
            _ => None,
        })
    }

    pub fn override_for(&self, part: &PartUri) -> Option<&str> {
        self.entries.iter().find_map(|entry| match &entry.rule {
            ContentTypeRule::Override { part: p } if p == part => Some(entry.media_type.as_str()),
            _ => None,
        })
    }

    /// Add or replace the default for an extension
    pub fn add_default(&mut self, extension: &str, media_type: &str) {
        let extension = extension.trim_start_matches('.');
        self.entries.retain(|entry| {
            !matches!(&entry.rule, ContentTypeRule::Default { extension: e } if e.eq_ignore_ascii_case(extension))
        });
        let position = self
            .entries
            .iter()
            .position(|entry| matches!(entry.rule, ContentTypeRule::Override { .. }))
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            ContentType {
                rule: ContentTypeRule::Default {
                    extension: extension.to_string(),
                },
                media_type: media_type.to_string(),
            },
        );
        self.dirty = true;
    }

    /// Add or replace the override for a part
    pub fn add_override(&mut self, part: &PartUri, media_type: &str) {
        self.remove_override(part);
        self.entries.push(ContentType {
            rule: ContentTypeRule::Override { part: part.clone() },
            media_type: media_type.to_string(),
        });
        self.dirty = true;
    }

    pub fn remove_override(&mut self, part: &PartUri) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !matches!(&entry.rule, ContentTypeRule::Override { part: p } if p == part));
        let removed = self.entries.len() != before;
        self.dirty |= removed;
        removed
    }

    /// Make `part` resolve to `media_type` with the least specific rule:
    /// a default for an unseen extension, otherwise an override.
    pub fn register(&mut self, part: &PartUri, media_type: &str) {
        if self.resolve(part) == media_type {
            return;
        }
        match part.extension() {
            Some(ext) if self.default_for(ext).is_none() => self.add_default(ext, media_type),
            _ => self.add_override(part, media_type),
        }
    }
}
