use chrono::{DateTime, Utc};

use crate::crypto::{signature_method, Certificate};
use crate::package::{ContentTypes, OpenMode, Package, PartUri, RelationshipOwner};

use super::manifest::SignatureManifest;
use super::signature::OpcSignature;
use super::xml_signature::SignatureDocument;
use super::{
    SignConfig, SignError, ORIGIN_CONTENT_TYPE, ORIGIN_PART_NAME, ORIGIN_RELATIONSHIP_TYPE,
    SIGNATURE_CONTENT_TYPE, SIGNATURE_PART_DIRECTORY, SIGNATURE_PART_EXTENSION,
    SIGNATURE_RELATIONSHIP_TYPE, SIGNATURE_STORAGE_ROOT,
};

impl Package {
    /// Start building a signature over this package's parts
    pub fn signature_builder(&mut self) -> SignatureBuilder<'_> {
        SignatureBuilder {
            package: self,
            enqueued: Vec::new(),
        }
    }
}

/// Collects the parts a signature protects and produces the signature.
///
/// Signing is all-or-nothing: on any failure the package's in-memory state
/// is rolled back, so no origin, relationship or signature part survives a
/// failed attempt.
///
/// # Examples
///
/// ```ignore
/// let mut package = Package::open("extension.vsix", OpenMode::ReadWrite)?;
/// let mut builder = package.signature_builder();
/// builder.enqueue_defaults();
/// let signature = builder.sign(&SignConfig::new(source))?;
/// package.close()?;
/// ```
pub struct SignatureBuilder<'a> {
    package: &'a mut Package,
    enqueued: Vec<PartUri>,
}

impl<'a> SignatureBuilder<'a> {
    /// Protect `part` with the signature; enqueuing twice has no effect
    pub fn enqueue_part(&mut self, part: PartUri) -> &mut Self {
        if !self.enqueued.contains(&part) {
            self.enqueued.push(part);
        }
        self
    }

    pub fn dequeue_part(&mut self, part: &PartUri) -> bool {
        let before = self.enqueued.len();
        self.enqueued.retain(|enqueued| enqueued != part);
        self.enqueued.len() != before
    }

    /// Enqueue every content part: all parts except relationship parts, the
    /// content type registry and anything under the signature storage root.
    pub fn enqueue_defaults(&mut self) -> &mut Self {
        let registry = ContentTypes::part_uri();
        let storage_root = signature_storage_root();
        let parts: Vec<PartUri> = self
            .package
            .parts()
            .map(|part| part.uri())
            .filter(|uri| {
                !uri.is_relationships_part()
                    && **uri != registry
                    && !uri.equal_or_contained_by(&storage_root)
            })
            .cloned()
            .collect();
        for part in parts {
            self.enqueue_part(part);
        }
        self
    }

    pub fn enqueued(&self) -> &[PartUri] {
        &self.enqueued
    }

    /// Sign the enqueued parts, stamping the current time
    pub fn sign(self, config: &SignConfig) -> Result<OpcSignature, SignError> {
        self.sign_at(config, Utc::now())
    }

    /// Sign the enqueued parts with a fixed signing time
    pub fn sign_at(
        self,
        config: &SignConfig,
        signing_time: DateTime<Utc>,
    ) -> Result<OpcSignature, SignError> {
        if self.package.mode() == OpenMode::Read {
            return Err(SignError::InvalidOperation(
                "cannot sign a package opened read-only".into(),
            ));
        }
        // relationships only; the existing signature part may not even parse
        if !config.force && self.package.signature_location()?.is_some() {
            return Err(SignError::AlreadySigned);
        }
        let signer = config.load_certificate()?;
        signature_method(signer.key_family(), config.pkcs_digest)?;
        if !config.file_digest.is_supported() {
            return Err(SignError::UnsupportedAlgorithm(config.file_digest.to_string()));
        }
        if self.enqueued.is_empty() {
            return Err(SignError::InvalidOperation("no parts enqueued for signing".into()));
        }

        let SignatureBuilder { package, enqueued } = self;
        let snapshot = package.snapshot();
        let result = (|| -> Result<OpcSignature, SignError> {
            let origin = find_or_create_origin(package)?;
            let (signature_part, relationship_id) =
                find_or_create_signature_part(package, &origin, signer.certificate())?;
            package.stage()?;

            let mut parts = enqueued;
            parts.extend(
                [
                    ContentTypes::part_uri(),
                    PartUri::root_relationships(),
                    origin.relationships_uri(),
                    origin.clone(),
                ]
                .into_iter()
                .filter(|part| package.contains_part(part)),
            );
            let manifest = SignatureManifest::build(package, config.file_digest, parts)?;
            let document =
                SignatureDocument::sign(&manifest, &signer, config.pkcs_digest, signing_time)?;
            package.write_part(&signature_part, document.to_bytes())?;

            tracing::info!(
                "signed {} parts of {} with {} ({})",
                manifest.len(),
                package.path().display(),
                signer.certificate().subject(),
                signer.certificate().thumbprint()
            );
            Ok(OpcSignature::new(origin, relationship_id, signature_part, document))
        })();

        if let Err(e) = &result {
            tracing::warn!("signing failed, rolling back: {}", e);
            package.restore(snapshot);
        }
        result
    }
}

fn signature_storage_root() -> PartUri {
    PartUri::parse(SIGNATURE_STORAGE_ROOT).expect("signature storage root is a valid part name")
}

/// Follow the package's origin relationship, creating the origin part and
/// relationship when either is missing
fn find_or_create_origin(package: &mut Package) -> Result<PartUri, SignError> {
    let root = RelationshipOwner::Package;
    let origin = match package.find_relationship_by_type(&root, ORIGIN_RELATIONSHIP_TYPE)? {
        Some(relationship) => relationship.target_part(&root)?.ok_or_else(|| {
            SignError::MalformedSignature("origin relationship targets an external resource".into())
        })?,
        None => {
            let origin = PartUri::parse(ORIGIN_PART_NAME)?;
            package.add_relationship(&root, &origin, ORIGIN_RELATIONSHIP_TYPE)?;
            origin
        }
    };
    if !package.contains_part(&origin) {
        package.create_part(&origin, ORIGIN_CONTENT_TYPE)?;
    }
    Ok(origin)
}

/// Follow the origin's signature relationship, or create a signature part
/// named after the certificate thumbprint
fn find_or_create_signature_part(
    package: &mut Package,
    origin: &PartUri,
    certificate: &Certificate,
) -> Result<(PartUri, String), SignError> {
    let owner = RelationshipOwner::Part(origin.clone());
    let (part, relationship_id) =
        match package.find_relationship_by_type(&owner, SIGNATURE_RELATIONSHIP_TYPE)? {
            Some(relationship) => {
                let part = relationship.target_part(&owner)?.ok_or_else(|| {
                    SignError::MalformedSignature(
                        "signature relationship targets an external resource".into(),
                    )
                })?;
                (part, relationship.id)
            }
            None => {
                let part = PartUri::parse(&format!(
                    "{SIGNATURE_PART_DIRECTORY}/{}.{SIGNATURE_PART_EXTENSION}",
                    certificate.thumbprint()
                ))?;
                let relationship =
                    package.add_relationship(&owner, &part, SIGNATURE_RELATIONSHIP_TYPE)?;
                (part, relationship.id)
            }
        };
    if !package.contains_part(&part) {
        package.create_part(&part, SIGNATURE_CONTENT_TYPE)?;
    }
    Ok((part, relationship_id))
}
