use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::crypto::{signature_method_digest, Certificate, DigestAlgorithm};
use crate::package::{Package, PartUri, RelationshipOwner};
use crate::xml::canonicalize;

use super::timestamp::TimestampBuilder;
use super::xml_signature::{SignatureDocument, PACKAGE_OBJECT_ID};
use super::{SignError, VerifyError, ORIGIN_RELATIONSHIP_TYPE, SIGNATURE_RELATIONSHIP_TYPE};

/// Where a package's signature is stored, found from relationships alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureLocation {
    pub origin: PartUri,
    /// Id of the origin's relationship to the signature part
    pub relationship_id: String,
    pub part: PartUri,
}

impl Package {
    /// Follow root → origin relationship → origin part → signature
    /// relationship → signature part without reading the signature itself.
    ///
    /// Any missing link means the package is unsigned.
    pub fn signature_location(&mut self) -> Result<Option<SignatureLocation>, SignError> {
        let root = RelationshipOwner::Package;
        let Some(origin_relationship) =
            self.find_relationship_by_type(&root, ORIGIN_RELATIONSHIP_TYPE)?
        else {
            return Ok(None);
        };
        let Some(origin) = origin_relationship.target_part(&root)? else {
            return Ok(None);
        };
        if !self.contains_part(&origin) {
            return Ok(None);
        }

        let owner = RelationshipOwner::Part(origin.clone());
        let Some(signature_relationship) =
            self.find_relationship_by_type(&owner, SIGNATURE_RELATIONSHIP_TYPE)?
        else {
            return Ok(None);
        };
        let Some(part) = signature_relationship.target_part(&owner)? else {
            return Ok(None);
        };
        if !self.contains_part(&part) {
            tracing::warn!("signature relationship points at missing part {}", part);
            return Ok(None);
        }
        Ok(Some(SignatureLocation {
            origin,
            relationship_id: signature_relationship.id,
            part,
        }))
    }

    /// Signatures reachable from the package root. An origin carries at
    /// most one signature.
    pub fn signatures(&mut self) -> Result<Vec<OpcSignature>, SignError> {
        let Some(location) = self.signature_location()? else {
            return Ok(Vec::new());
        };
        let document = SignatureDocument::parse(&self.read_part(&location.part)?)?;
        Ok(vec![OpcSignature::new(
            location.origin,
            location.relationship_id,
            location.part,
            document,
        )])
    }

    /// Remove the package's signature without parsing it, so a damaged
    /// signature part can be dropped too. Returns the removed part.
    pub fn remove_signature(&mut self) -> Result<Option<PartUri>, SignError> {
        let Some(location) = self.signature_location()? else {
            return Ok(None);
        };
        remove_signature_part(self, &location.origin, &location.relationship_id, &location.part)?;
        Ok(Some(location.part))
    }
}

fn remove_signature_part(
    package: &mut Package,
    origin: &PartUri,
    relationship_id: &str,
    part: &PartUri,
) -> Result<(), SignError> {
    package.remove_relationship(&RelationshipOwner::Part(origin.clone()), relationship_id)?;
    package.remove_part(part)?;
    tracing::info!("removed signature {} from {}", part, package.path().display());
    Ok(())
}

/// A signature embedded in a package.
///
/// The handle stays usable after [`OpcSignature::remove`] for inspection,
/// but its part is gone: timestamping and verifying fail from then on.
#[derive(Debug, Clone)]
pub struct OpcSignature {
    origin: PartUri,
    relationship_id: String,
    part: Option<PartUri>,
    document: SignatureDocument,
}

impl OpcSignature {
    pub(crate) fn new(
        origin: PartUri,
        relationship_id: String,
        part: PartUri,
        document: SignatureDocument,
    ) -> Self {
        Self {
            origin,
            relationship_id,
            part: Some(part),
            document,
        }
    }

    /// The signature part, or `None` once removed
    pub fn part(&self) -> Option<&PartUri> {
        self.part.as_ref()
    }

    pub fn origin(&self) -> &PartUri {
        &self.origin
    }

    /// Id of the origin's relationship to the signature part
    pub fn relationship_id(&self) -> &str {
        &self.relationship_id
    }

    pub fn document(&self) -> &SignatureDocument {
        &self.document
    }

    pub(crate) fn document_mut(&mut self) -> &mut SignatureDocument {
        &mut self.document
    }

    pub fn signature_method(&self) -> Option<&str> {
        self.document.signature_method()
    }

    pub fn certificate(&self) -> Result<Certificate, SignError> {
        self.document.certificate()
    }

    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.document.signing_time()
    }

    pub fn timestamp_token(&self) -> Option<Vec<u8>> {
        self.document.timestamp_token()
    }

    fn require_part(&self) -> Result<&PartUri, SignError> {
        self.part
            .as_ref()
            .ok_or_else(|| SignError::InvalidOperation("signature has been removed".into()))
    }

    /// Delete the signature part, the origin's relationship to it and its
    /// content type override
    pub fn remove(&mut self, package: &mut Package) -> Result<(), SignError> {
        let part = self.require_part()?.clone();
        remove_signature_part(package, &self.origin, &self.relationship_id, &part)?;
        self.part = None;
        Ok(())
    }

    /// Begin attaching a timestamp to this signature
    pub fn timestamp_builder(&mut self) -> Result<TimestampBuilder<'_>, SignError> {
        self.require_part()?;
        Ok(TimestampBuilder::new(self))
    }

    /// Check the signature against the package's current content.
    ///
    /// Every manifest digest is recomputed from the part bytes, then the
    /// package object digest, then the signature value against the embedded
    /// certificate.
    pub fn verify(&self, package: &mut Package) -> Result<(), VerifyError> {
        self.require_part()?;
        let document = &self.document;

        for entry in document.manifest()?.entries() {
            if !package.contains_part(&entry.part) {
                return Err(VerifyError::MissingPart(entry.part.to_string()));
            }
            let bytes = package.read_part(&entry.part)?;
            let digest = entry
                .digest_algorithm
                .digest(&bytes)
                .map_err(SignError::from)?;
            if BASE64.encode(digest) != entry.digest {
                return Err(VerifyError::DigestMismatch(entry.part.to_string()));
            }
        }

        let context = document.namespace_context();
        let signed_info = document
            .signed_info()
            .ok_or_else(|| VerifyError::Malformed("missing SignedInfo".into()))?;
        let object_uri = format!("#{PACKAGE_OBJECT_ID}");
        let reference = signed_info
            .children_named("Reference")
            .find(|reference| reference.attr("URI") == Some(object_uri.as_str()))
            .ok_or_else(|| VerifyError::Malformed("no reference to the package object".into()))?;
        let reference_digest = reference
            .child("DigestMethod")
            .and_then(|method| method.attr("Algorithm"))
            .and_then(DigestAlgorithm::from_uri)
            .ok_or_else(|| {
                VerifyError::Malformed("package object reference without a known DigestMethod".into())
            })?;
        let expected = reference
            .child("DigestValue")
            .map(|value| value.text().trim().to_string())
            .unwrap_or_default();
        let object = document
            .package_object()
            .ok_or_else(|| VerifyError::Malformed("missing package object".into()))?;
        let actual = BASE64.encode(
            reference_digest
                .digest(&canonicalize(object, &context))
                .map_err(SignError::from)?,
        );
        if actual != expected {
            return Err(VerifyError::DigestMismatch(object_uri));
        }

        let certificate = document.certificate()?;
        let method = document
            .signature_method()
            .ok_or_else(|| VerifyError::Malformed("missing SignatureMethod".into()))?;
        let digest = signature_method_digest(certificate.key_family(), method)
            .ok_or_else(|| VerifyError::UnsupportedAlgorithm(method.to_string()))?;
        certificate
            .public_key()
            .verify(
                digest,
                &canonicalize(signed_info, &context),
                &document.signature_value()?,
            )
            .map_err(VerifyError::SignatureInvalid)?;

        tracing::debug!("verified signature {:?}", self.part);
        Ok(())
    }
}
