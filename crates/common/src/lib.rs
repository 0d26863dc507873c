/**
 * Digest algorithms, key families and the
 *  signature method table.
 * Loading of PEM certificates and private keys.
 */
pub mod crypto;
/**
 * The OPC package engine: parts, relationships,
 *  content types and the deferred, atomic flush
 *  back to the zip container.
 */
pub mod package;
/**
 * Package signatures: manifests, XML-DSig
 *  documents, the signature accessor and
 *  RFC 3161 timestamping.
 */
pub mod signing;
/**
 * Minimal XML tree with a canonical
 *  (C14N 1.0) writer.
 */
pub mod xml;

pub mod prelude {
    pub use crate::crypto::{DigestAlgorithm, KeyFamily, SigningCertificate};
    pub use crate::package::{OpenMode, Package, PackageError, PartUri};
    pub use crate::signing::{
        CertificateSource, OpcSignature, SignConfig, SignError, SignatureBuilder,
        TimestampFailure, TimestampResult, VerifyError,
    };
}
