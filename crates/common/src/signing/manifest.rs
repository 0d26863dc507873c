use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::crypto::DigestAlgorithm;
use crate::package::{Package, PartUri};
use crate::xml::XmlElement;

use super::{SignError, SIGNATURE_CONTENT_TYPE};

/// Digest of one protected part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub part: PartUri,
    pub content_type: String,
    pub digest_algorithm: DigestAlgorithm,
    /// Base64 digest of the raw part bytes
    pub digest: String,
}

impl ManifestEntry {
    /// `URI` of the entry's XML-DSig reference
    pub fn reference_uri(&self) -> String {
        format!("{}?ContentType={}", self.part, self.content_type)
    }

    fn to_xml(&self) -> XmlElement {
        XmlElement::new("Reference")
            .with_attr("URI", self.reference_uri())
            .with_child(
                XmlElement::new("DigestMethod").with_attr("Algorithm", self.digest_algorithm.uri()),
            )
            .with_child(XmlElement::new("DigestValue").with_text(self.digest.as_str()))
    }

    fn from_xml(reference: &XmlElement) -> Result<Self, SignError> {
        let malformed = |reason: &str| SignError::MalformedSignature(reason.to_string());
        let uri = reference
            .attr("URI")
            .ok_or_else(|| malformed("manifest reference without URI"))?;
        let (part, content_type) = match uri.split_once('?') {
            Some((part, query)) => (
                part,
                query.strip_prefix("ContentType=").unwrap_or_default(),
            ),
            None => (uri, ""),
        };
        let algorithm_uri = reference
            .child("DigestMethod")
            .and_then(|method| method.attr("Algorithm"))
            .ok_or_else(|| malformed("manifest reference without DigestMethod"))?;
        let digest_algorithm = DigestAlgorithm::from_uri(algorithm_uri)
            .ok_or_else(|| SignError::UnsupportedAlgorithm(algorithm_uri.to_string()))?;
        let digest = reference
            .child("DigestValue")
            .map(|value| value.text().trim().to_string())
            .ok_or_else(|| malformed("manifest reference without DigestValue"))?;
        Ok(Self {
            part: PartUri::parse(part).map_err(|e| SignError::MalformedSignature(e.to_string()))?,
            content_type: content_type.to_string(),
            digest_algorithm,
            digest,
        })
    }
}

/// The digests a signature protects, ordered by part name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureManifest {
    entries: Vec<ManifestEntry>,
}

impl SignatureManifest {
    /// Digest `parts` with `digest`.
    ///
    /// Duplicates collapse, signature parts are skipped, and the result is
    /// sorted by part name, so identical bytes always yield the same manifest.
    pub fn build(
        package: &mut Package,
        digest: DigestAlgorithm,
        parts: impl IntoIterator<Item = PartUri>,
    ) -> Result<Self, SignError> {
        if !digest.is_supported() {
            return Err(SignError::UnsupportedAlgorithm(digest.to_string()));
        }
        let parts: BTreeSet<PartUri> = parts.into_iter().collect();

        let mut entries = Vec::with_capacity(parts.len());
        for part in parts {
            let content_type = package.media_type(&part).to_string();
            if content_type == SIGNATURE_CONTENT_TYPE {
                continue;
            }
            let bytes = package.read_part(&part)?;
            entries.push(ManifestEntry {
                digest: BASE64.encode(digest.digest(&bytes)?),
                part,
                content_type,
                digest_algorithm: digest,
            });
        }
        tracing::debug!("built manifest of {} parts ({})", entries.len(), digest);
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `Manifest` element
    pub fn to_xml(&self) -> XmlElement {
        let mut manifest = XmlElement::new("Manifest");
        for entry in &self.entries {
            manifest.push(entry.to_xml());
        }
        manifest
    }

    pub fn from_xml(manifest: &XmlElement) -> Result<Self, SignError> {
        let entries = manifest
            .children_named("Reference")
            .map(ManifestEntry::from_xml)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(part: &str) -> ManifestEntry {
        ManifestEntry {
            part: PartUri::parse(part).unwrap(),
            content_type: "text/xml".into(),
            digest_algorithm: DigestAlgorithm::Sha256,
            digest: "q1MKE+RZFJgrefm34/uplM/R8/si9xzqGvvwK0YMbR0=".into(),
        }
    }

    #[test]
    fn test_reference_uri_carries_content_type() {
        assert_eq!(
            entry("/extension.vsixmanifest").reference_uri(),
            "/extension.vsixmanifest?ContentType=text/xml"
        );
    }

    #[test]
    fn test_xml_roundtrip() {
        let manifest = SignatureManifest {
            entries: vec![entry("/a.xml"), entry("/_rels/.rels")],
        };
        let xml = manifest.to_xml();
        assert_eq!(xml.children_named("Reference").count(), 2);
        assert_eq!(SignatureManifest::from_xml(&xml).unwrap(), manifest);
    }

    #[test]
    fn test_unknown_digest_method_is_unsupported() {
        let xml = XmlElement::new("Manifest").with_child(
            XmlElement::new("Reference")
                .with_attr("URI", "/a.xml?ContentType=text/xml")
                .with_child(XmlElement::new("DigestMethod").with_attr("Algorithm", "urn:unknown"))
                .with_child(XmlElement::new("DigestValue").with_text("AAAA")),
        );
        assert!(matches!(
            SignatureManifest::from_xml(&xml),
            Err(SignError::UnsupportedAlgorithm(_))
        ));
    }
}
