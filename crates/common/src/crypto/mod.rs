//! Cryptographic primitives for package signatures
//!
//! - **Digests**: the XML-DSig digest algorithms ([`DigestAlgorithm`])
//! - **Key families**: RSA, ECDSA P-256 and ECDSA P-384 ([`KeyFamily`])
//! - **Signature methods**: which key family / digest pairs may sign, and the
//!   SignatureMethod URI each pair is written as ([`signature_method`])
//! - **Certificates**: PEM loading of a leaf certificate and its private key
//!   ([`SigningCertificate`])
//!
//! RSA signatures use PKCS#1 v1.5 padding. ECDSA signatures are encoded as the
//! fixed-width concatenation `r || s`, as XML-DSig requires.

mod certificate;

use std::fmt;
use std::str::FromStr;

use der::asn1::ObjectIdentifier;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

pub use certificate::{Certificate, CertificateError, PublicKey, SigningCertificate};

/// Errors raised by signing and verifying primitives
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("ecdsa error: {0}")]
    Ecdsa(#[from] p256::ecdsa::Error),
}

/// Digest algorithms known to the signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// Recognised so it can be named and rejected; never computed
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 5] = [
        DigestAlgorithm::Md5,
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
    ];

    /// XML-DSig DigestMethod URI
    pub fn uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "http://www.w3.org/2001/04/xmldsig-more#md5",
            DigestAlgorithm::Sha1 => "http://www.w3.org/2000/09/xmldsig#sha1",
            DigestAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            DigestAlgorithm::Sha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            DigestAlgorithm::Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.uri() == uri)
    }

    /// Object identifier used in RFC 3161 message imprints
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Md5 => ObjectIdentifier::new_unwrap("1.2.840.113549.2.5"),
            DigestAlgorithm::Sha1 => ObjectIdentifier::new_unwrap("1.3.14.3.2.26"),
            DigestAlgorithm::Sha256 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1"),
            DigestAlgorithm::Sha384 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2"),
            DigestAlgorithm::Sha512 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3"),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, DigestAlgorithm::Md5)
    }

    pub fn digest(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(match self {
            DigestAlgorithm::Md5 => return Err(CryptoError::UnsupportedAlgorithm(self.to_string())),
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        })
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA1",
            DigestAlgorithm::Sha256 => "SHA256",
            DigestAlgorithm::Sha384 => "SHA384",
            DigestAlgorithm::Sha512 => "SHA512",
        };
        f.write_str(name)
    }
}

impl FromStr for DigestAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(CryptoError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Rsa,
    EcdsaP256,
    EcdsaP384,
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyFamily::Rsa => "RSA",
            KeyFamily::EcdsaP256 => "ECDSA P-256",
            KeyFamily::EcdsaP384 => "ECDSA P-384",
        })
    }
}

/// Key family / digest pairs that may sign, with their SignatureMethod URIs
const SIGNATURE_METHODS: &[(KeyFamily, DigestAlgorithm, &str)] = &[
    (KeyFamily::Rsa, DigestAlgorithm::Sha1, "http://www.w3.org/2000/09/xmldsig#rsa-sha1"),
    (KeyFamily::Rsa, DigestAlgorithm::Sha256, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"),
    (KeyFamily::Rsa, DigestAlgorithm::Sha384, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384"),
    (KeyFamily::Rsa, DigestAlgorithm::Sha512, "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512"),
    (KeyFamily::EcdsaP256, DigestAlgorithm::Sha1, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha1"),
    (KeyFamily::EcdsaP256, DigestAlgorithm::Sha256, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"),
    (KeyFamily::EcdsaP256, DigestAlgorithm::Sha384, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384"),
    (KeyFamily::EcdsaP256, DigestAlgorithm::Sha512, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512"),
    (KeyFamily::EcdsaP384, DigestAlgorithm::Sha256, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"),
    (KeyFamily::EcdsaP384, DigestAlgorithm::Sha384, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384"),
    (KeyFamily::EcdsaP384, DigestAlgorithm::Sha512, "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512"),
];

/// SignatureMethod URI for a key family signing with `digest`.
///
/// Pairs absent from the table (MD5 with anything, P-384 with SHA-1) fail
/// with [`CryptoError::UnsupportedAlgorithm`].
pub fn signature_method(family: KeyFamily, digest: DigestAlgorithm) -> Result<&'static str, CryptoError> {
    SIGNATURE_METHODS
        .iter()
        .find(|(f, d, _)| *f == family && *d == digest)
        .map(|(_, _, uri)| *uri)
        .ok_or_else(|| {
            CryptoError::UnsupportedAlgorithm(format!("{family} with {digest}"))
        })
}

/// Digest a SignatureMethod URI signs with, if `family` may use it
pub fn signature_method_digest(family: KeyFamily, uri: &str) -> Option<DigestAlgorithm> {
    SIGNATURE_METHODS
        .iter()
        .find(|(f, _, u)| *f == family && *u == uri)
        .map(|(_, d, _)| *d)
}
