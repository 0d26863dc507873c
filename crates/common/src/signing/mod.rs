//! Package signatures
//!
//! A signed package carries one XML-DSig document, reached from the package
//! root through two relationships:
//!
//! ```text
//!  /_rels/.rels ──origin──► origin.psdor ──signature──► xml-signature/<thumbprint>.psdsxs
//! ```
//!
//! - **[`SignatureBuilder`]**: collects the parts to protect and signs them
//! - **[`SignatureManifest`]**: digests of the protected parts
//! - **[`SignatureDocument`]**: the signature XML, built or parsed
//! - **[`OpcSignature`]**: an existing signature; list, remove, verify
//! - **[`TimestampBuilder`]**: attaches an RFC 3161 timestamp to a signature

mod builder;
mod config;
mod manifest;
mod signature;
mod timestamp;
mod xml_signature;

pub use builder::SignatureBuilder;
pub use config::{CertificateSource, SignConfig};
pub use manifest::{ManifestEntry, SignatureManifest};
pub use signature::{OpcSignature, SignatureLocation};
pub use timestamp::{TimestampBuilder, TimestampFailure, TimestampResult, DEFAULT_TIMESTAMP_TIMEOUT};
pub use xml_signature::{
    SignatureDocument, MDSSI_NAMESPACE, PACKAGE_OBJECT_ID, SIGNATURE_ID, XADES_NAMESPACE,
    XMLDSIG_NAMESPACE,
};

use crate::crypto::{CertificateError, CryptoError};
use crate::package::PackageError;

pub const ORIGIN_RELATIONSHIP_TYPE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/origin";
pub const SIGNATURE_RELATIONSHIP_TYPE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/signature";

pub const ORIGIN_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.digital-signature-origin";
pub const SIGNATURE_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-package.digital-signature-xmlsignature+xml";

/// Everything signature related lives under this directory
pub const SIGNATURE_STORAGE_ROOT: &str = "/package/services/digital-signature";
pub const ORIGIN_PART_NAME: &str = "/package/services/digital-signature/origin.psdor";
pub const SIGNATURE_PART_DIRECTORY: &str = "/package/services/digital-signature/xml-signature";
pub const SIGNATURE_PART_EXTENSION: &str = "psdsxs";

/// Errors raised while signing or reading signatures
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("package is already signed")]
    AlreadySigned,
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("package error: {0}")]
    Package(PackageError),
    #[error("certificate error: {0}")]
    Certificate(CertificateError),
    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<PackageError> for SignError {
    fn from(e: PackageError) -> Self {
        match e {
            PackageError::InvalidOperation(reason) => SignError::InvalidOperation(reason),
            other => SignError::Package(other),
        }
    }
}

impl From<CertificateError> for SignError {
    fn from(e: CertificateError) -> Self {
        match e {
            // a certificate we cannot sign with is a usage error
            CertificateError::MissingPrivateKey | CertificateError::KeyMismatch => {
                SignError::InvalidOperation(e.to_string())
            }
            other => SignError::Certificate(other),
        }
    }
}

impl From<CryptoError> for SignError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::UnsupportedAlgorithm(name) => SignError::UnsupportedAlgorithm(name),
            other => SignError::Crypto(other),
        }
    }
}

/// Reasons a signature fails verification
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("signed part is missing: {0}")]
    MissingPart(String),
    #[error("digest mismatch for {0}")]
    DigestMismatch(String),
    #[error("signature value does not verify: {0}")]
    SignatureInvalid(CryptoError),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("package error: {0}")]
    Package(#[from] PackageError),
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
}

impl From<SignError> for VerifyError {
    fn from(e: SignError) -> Self {
        match e {
            SignError::InvalidOperation(reason) => VerifyError::InvalidOperation(reason),
            SignError::UnsupportedAlgorithm(name) => VerifyError::UnsupportedAlgorithm(name),
            SignError::MalformedSignature(reason) => VerifyError::Malformed(reason),
            SignError::Package(e) => VerifyError::Package(e),
            SignError::Certificate(e) => VerifyError::Certificate(e),
            SignError::Crypto(e) => VerifyError::SignatureInvalid(e),
            SignError::AlreadySigned => {
                VerifyError::InvalidOperation("package is already signed".into())
            }
        }
    }
}
