//! XML-DSig documents for OPC packages
//!
//! SignedInfo holds a single reference to the package object. The package
//! object carries the manifest of part digests and the signing time, so every
//! part digest is covered by the signature value:
//!
//! ```text
//! Signature
//!   SignedInfo ── Reference #idPackageObject
//!   SignatureValue
//!   KeyInfo/X509Data/X509Certificate
//!   Object Id=idPackageObject
//!     Manifest ── Reference /part?ContentType=...
//!     SignatureProperties ── mdssi:SignatureTime
//!   Object (optional)
//!     xades:QualifyingProperties ── ... EncapsulatedTimeStamp
//! ```

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::crypto::{signature_method, Certificate, DigestAlgorithm, SigningCertificate};
use crate::xml::{canonicalize, XmlElement, XmlNode};

use super::manifest::SignatureManifest;
use super::SignError;

pub const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const MDSSI_NAMESPACE: &str = "http://schemas.openxmlformats.org/package/2006/digital-signature";
pub const XADES_NAMESPACE: &str = "http://uri.etsi.org/01903/v1.3.2#";

const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const OBJECT_REFERENCE_TYPE: &str = "http://www.w3.org/2000/09/xmldsig#Object";

pub const SIGNATURE_ID: &str = "SignatureIdValue";
pub const PACKAGE_OBJECT_ID: &str = "idPackageObject";
const SIGNATURE_TIME_ID: &str = "idSignatureTime";

/// Format advertised in `mdssi:SignatureTime`, and the matching chrono pattern
const SIGNATURE_TIME_FORMAT: &str = "YYYY-MM-DDThh:mm:ssTZD";
const SIGNATURE_TIME_PATTERN: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A signature document, either freshly signed or read from a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDocument {
    root: XmlElement,
}

impl SignatureDocument {
    /// Build and sign a document over `manifest`.
    ///
    /// `pkcs_digest` digests the package object and the canonical SignedInfo;
    /// together with the certificate's key family it selects the
    /// SignatureMethod.
    pub fn sign(
        manifest: &SignatureManifest,
        signer: &SigningCertificate,
        pkcs_digest: DigestAlgorithm,
        signing_time: DateTime<Utc>,
    ) -> Result<Self, SignError> {
        let method = signature_method(signer.key_family(), pkcs_digest)?;
        let context = signature_namespaces();

        let object = package_object(manifest, signing_time);
        let object_digest = pkcs_digest.digest(&canonicalize(&object, &context))?;

        let signed_info = XmlElement::new("SignedInfo")
            .with_child(XmlElement::new("CanonicalizationMethod").with_attr("Algorithm", C14N_ALGORITHM))
            .with_child(XmlElement::new("SignatureMethod").with_attr("Algorithm", method))
            .with_child(
                XmlElement::new("Reference")
                    .with_attr("URI", format!("#{PACKAGE_OBJECT_ID}"))
                    .with_attr("Type", OBJECT_REFERENCE_TYPE)
                    .with_child(
                        XmlElement::new("DigestMethod").with_attr("Algorithm", pkcs_digest.uri()),
                    )
                    .with_child(XmlElement::new("DigestValue").with_text(BASE64.encode(object_digest))),
            );
        let signature_value = signer.sign(pkcs_digest, &canonicalize(&signed_info, &context))?;

        let root = XmlElement::new("Signature")
            .with_attr("xmlns", XMLDSIG_NAMESPACE)
            .with_attr("Id", SIGNATURE_ID)
            .with_child(signed_info)
            .with_child(XmlElement::new("SignatureValue").with_text(BASE64.encode(signature_value)))
            .with_child(
                XmlElement::new("KeyInfo").with_child(XmlElement::new("X509Data").with_child(
                    XmlElement::new("X509Certificate")
                        .with_text(BASE64.encode(signer.certificate().der())),
                )),
            )
            .with_child(object);

        Ok(Self { root })
    }

    /// Parse a signature part
    pub fn parse(bytes: &[u8]) -> Result<Self, SignError> {
        let root =
            XmlElement::parse(bytes).map_err(|e| SignError::MalformedSignature(e.to_string()))?;
        if root.local_name() != "Signature" {
            return Err(SignError::MalformedSignature(format!(
                "unexpected root element {}",
                root.name
            )));
        }
        let document = Self { root };
        if document.signed_info().is_none() {
            return Err(SignError::MalformedSignature("missing SignedInfo".into()));
        }
        Ok(document)
    }

    /// Serialized document, as stored in the signature part
    pub fn to_bytes(&self) -> Vec<u8> {
        self.root.to_document()
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// Namespaces in scope for the children of `Signature`
    pub(crate) fn namespace_context(&self) -> BTreeMap<String, String> {
        self.root.namespace_declarations()
    }

    pub fn signed_info(&self) -> Option<&XmlElement> {
        self.root.child("SignedInfo")
    }

    pub fn signature_method(&self) -> Option<&str> {
        self.signed_info()?
            .child("SignatureMethod")?
            .attr("Algorithm")
    }

    pub fn signature_value(&self) -> Result<Vec<u8>, SignError> {
        let value = self
            .root
            .child("SignatureValue")
            .ok_or_else(|| SignError::MalformedSignature("missing SignatureValue".into()))?;
        decode_base64(&value.text())
    }

    pub fn certificate(&self) -> Result<Certificate, SignError> {
        let encoded = self
            .root
            .descend(&["KeyInfo", "X509Data", "X509Certificate"])
            .ok_or_else(|| SignError::MalformedSignature("missing X509Certificate".into()))?;
        Ok(Certificate::from_der(&decode_base64(&encoded.text())?)?)
    }

    /// The `Object` the SignedInfo reference points at
    pub fn package_object(&self) -> Option<&XmlElement> {
        self.root
            .children_named("Object")
            .find(|object| object.attr("Id") == Some(PACKAGE_OBJECT_ID))
    }

    pub fn manifest(&self) -> Result<SignatureManifest, SignError> {
        let manifest = self
            .package_object()
            .and_then(|object| object.child("Manifest"))
            .ok_or_else(|| SignError::MalformedSignature("missing package manifest".into()))?;
        SignatureManifest::from_xml(manifest)
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        let value = self
            .package_object()?
            .descend(&["SignatureProperties", "SignatureProperty", "SignatureTime", "Value"])?
            .text();
        DateTime::parse_from_rfc3339(value.trim())
            .ok()
            .map(|time| time.with_timezone(&Utc))
    }

    fn timestamp_object_position(&self) -> Option<usize> {
        self.root.children.iter().position(|child| match child {
            XmlNode::Element(el) => {
                el.local_name() == "Object" && el.child("QualifyingProperties").is_some()
            }
            XmlNode::Text(_) => false,
        })
    }

    /// The embedded RFC 3161 token, if the signature was timestamped
    pub fn timestamp_token(&self) -> Option<Vec<u8>> {
        let index = self.timestamp_object_position()?;
        let XmlNode::Element(object) = &self.root.children[index] else {
            return None;
        };
        let encoded = object.descend(&[
            "QualifyingProperties",
            "UnsignedProperties",
            "UnsignedSignatureProperties",
            "SignatureTimeStamp",
            "EncapsulatedTimeStamp",
        ])?;
        decode_base64(&encoded.text()).ok()
    }

    /// Embed `token` as the signature's timestamp, replacing any previous one.
    ///
    /// The timestamp is an unsigned property, so SignedInfo and the package
    /// object are left exactly as they were.
    pub fn set_timestamp_token(&mut self, token: &[u8]) {
        while let Some(index) = self.timestamp_object_position() {
            self.root.children.remove(index);
        }
        let xades = |name: &str| XmlElement::new(format!("xades:{name}"));
        let object = XmlElement::new("Object").with_child(
            xades("QualifyingProperties")
                .with_attr("xmlns:xades", XADES_NAMESPACE)
                .with_attr("Target", format!("#{SIGNATURE_ID}"))
                .with_child(xades("UnsignedProperties").with_child(
                    xades("UnsignedSignatureProperties").with_child(
                        xades("SignatureTimeStamp").with_child(
                            xades("EncapsulatedTimeStamp").with_text(BASE64.encode(token)),
                        ),
                    ),
                )),
        );
        self.root.push(object);
    }
}

fn signature_namespaces() -> BTreeMap<String, String> {
    BTreeMap::from([(String::new(), XMLDSIG_NAMESPACE.to_string())])
}

fn package_object(manifest: &SignatureManifest, signing_time: DateTime<Utc>) -> XmlElement {
    let signature_time = XmlElement::new("mdssi:SignatureTime")
        .with_attr("xmlns:mdssi", MDSSI_NAMESPACE)
        .with_child(XmlElement::new("mdssi:Format").with_text(SIGNATURE_TIME_FORMAT))
        .with_child(
            XmlElement::new("mdssi:Value")
                .with_text(signing_time.format(SIGNATURE_TIME_PATTERN).to_string()),
        );
    XmlElement::new("Object")
        .with_attr("Id", PACKAGE_OBJECT_ID)
        .with_child(manifest.to_xml())
        .with_child(
            XmlElement::new("SignatureProperties").with_child(
                XmlElement::new("SignatureProperty")
                    .with_attr("Id", SIGNATURE_TIME_ID)
                    .with_attr("Target", format!("#{SIGNATURE_ID}"))
                    .with_child(signature_time),
            ),
        )
}

fn decode_base64(text: &str) -> Result<Vec<u8>, SignError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| SignError::MalformedSignature(format!("invalid base64: {e}")))
}
