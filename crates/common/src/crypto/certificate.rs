use std::path::Path;

use chrono::{DateTime, Utc};
use der::{Decode, Encode};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use super::{CryptoError, DigestAlgorithm, KeyFamily};

const PEM_CERTIFICATE: &str = "CERTIFICATE";
const PEM_PRIVATE_KEY: &str = "PRIVATE KEY";
const PEM_ENCRYPTED_PRIVATE_KEY: &str = "ENCRYPTED PRIVATE KEY";
const PEM_RSA_PRIVATE_KEY: &str = "RSA PRIVATE KEY";
const PEM_EC_PRIVATE_KEY: &str = "EC PRIVATE KEY";

/// Errors that can occur while loading a certificate or its key
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid PEM: {0}")]
    Pem(#[from] pem::PemError),
    #[error("invalid certificate: {0}")]
    Der(#[from] der::Error),
    #[error("no certificate found")]
    MissingCertificate,
    #[error("certificate has no private key")]
    MissingPrivateKey,
    #[error("private key is encrypted and no password was given")]
    PasswordRequired,
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),
    #[error("private key does not belong to the certificate")]
    KeyMismatch,
}

/// Public key of a certificate, one variant per supported key family
#[derive(Debug, Clone, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
}

impl PublicKey {
    /// Decode a DER `SubjectPublicKeyInfo`
    pub fn from_spki_der(der: &[u8]) -> Result<Self, CertificateError> {
        if let Ok(key) = RsaPublicKey::from_public_key_der(der) {
            return Ok(PublicKey::Rsa(key));
        }
        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(der) {
            return Ok(PublicKey::P256(key));
        }
        if let Ok(key) = p384::ecdsa::VerifyingKey::from_public_key_der(der) {
            return Ok(PublicKey::P384(key));
        }
        Err(CertificateError::UnsupportedKey(
            "public key is neither RSA nor ECDSA P-256/P-384".into(),
        ))
    }

    /// Which row of the signature method table this key signs with
    pub fn key_family(&self) -> KeyFamily {
        match self {
            PublicKey::Rsa(_) => KeyFamily::Rsa,
            PublicKey::P256(_) => KeyFamily::EcdsaP256,
            PublicKey::P384(_) => KeyFamily::EcdsaP384,
        }
    }

    /// Check a signature over `data`, hashed with `digest`.
    ///
    /// ECDSA signatures are expected as raw `r‖s`, the way they appear in a
    /// `SignatureValue`.
    pub fn verify(
        &self,
        digest: DigestAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let hashed = digest.digest(data)?;
        match self {
            PublicKey::Rsa(key) => Ok(key.verify(pkcs1v15(digest)?, &hashed, signature)?),
            PublicKey::P256(key) => {
                let signature = p256::ecdsa::Signature::from_slice(signature)?;
                Ok(key.verify_prehash(&hashed, &signature)?)
            }
            PublicKey::P384(key) => {
                let signature = p384::ecdsa::Signature::from_slice(signature)?;
                Ok(key.verify_prehash(&hashed, &signature)?)
            }
        }
    }
}

fn pkcs1v15(digest: DigestAlgorithm) -> Result<Pkcs1v15Sign, CryptoError> {
    Ok(match digest {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
        DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
        DigestAlgorithm::Md5 => return Err(CryptoError::UnsupportedAlgorithm(digest.to_string())),
    })
}

/// An X.509 certificate as embedded in a signature
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    inner: x509_cert::Certificate,
    public_key: PublicKey,
}

impl Certificate {
    /// Decode a DER encoded certificate.
    ///
    /// Fails when the certificate does not parse or its public key is not
    /// RSA, P-256 or P-384.
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let inner = x509_cert::Certificate::from_der(der)?;
        let spki = inner.tbs_certificate.subject_public_key_info.to_der()?;
        let public_key = PublicKey::from_spki_der(&spki)?;
        Ok(Self {
            der: der.to_vec(),
            inner,
            public_key,
        })
    }

    /// The DER encoding the certificate was decoded from, as embedded in
    /// `X509Certificate`
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// SHA-1 of the DER encoding, uppercase hex
    pub fn thumbprint(&self) -> String {
        hex::encode_upper(Sha1::digest(&self.der))
    }

    /// Subject distinguished name in RFC 4514 form, e.g. `CN=Example`
    pub fn subject(&self) -> String {
        self.inner.tbs_certificate.subject.to_string()
    }

    /// Issuer distinguished name in RFC 4514 form
    pub fn issuer(&self) -> String {
        self.inner.tbs_certificate.issuer.to_string()
    }

    /// Serial number as uppercase hex of its DER integer bytes
    pub fn serial_number(&self) -> String {
        hex::encode_upper(self.inner.tbs_certificate.serial_number.as_bytes())
    }

    /// End of the validity period, if it fits a `DateTime`
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        let since_epoch = self
            .inner
            .tbs_certificate
            .validity
            .not_after
            .to_unix_duration();
        DateTime::from_timestamp(since_epoch.as_secs() as i64, 0)
    }

    /// The subject public key, used to check signature values
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Key family of the subject public key; together with a digest it
    /// picks the signature method
    pub fn key_family(&self) -> KeyFamily {
        self.public_key.key_family()
    }
}

/// A decoded private key
#[derive(Clone)]
enum PrivateKey {
    Rsa(Box<RsaPrivateKey>),
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl PrivateKey {
    fn from_pem_block(block: &pem::Pem, password: Option<&str>) -> Result<Self, CertificateError> {
        let invalid = |e: &dyn std::fmt::Display| CertificateError::InvalidPrivateKey(e.to_string());
        match block.tag() {
            PEM_PRIVATE_KEY => Self::from_pkcs8_der(block.contents()),
            PEM_ENCRYPTED_PRIVATE_KEY => {
                let password = password.ok_or(CertificateError::PasswordRequired)?;
                let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(block.contents())
                    .map_err(|e| invalid(&e))?;
                let document = encrypted.decrypt(password).map_err(|e| {
                    CertificateError::InvalidPrivateKey(format!(
                        "failed to decrypt (wrong password?): {e}"
                    ))
                })?;
                Self::from_pkcs8_der(document.as_bytes())
            }
            PEM_RSA_PRIVATE_KEY => RsaPrivateKey::from_pkcs1_der(block.contents())
                .map(|key| PrivateKey::Rsa(Box::new(key)))
                .map_err(|e| invalid(&e)),
            PEM_EC_PRIVATE_KEY => {
                if let Ok(key) = p256::SecretKey::from_sec1_der(block.contents()) {
                    return Ok(PrivateKey::P256(key.into()));
                }
                p384::SecretKey::from_sec1_der(block.contents())
                    .map(|key| PrivateKey::P384(key.into()))
                    .map_err(|_| {
                        CertificateError::UnsupportedKey("EC key is not on P-256 or P-384".into())
                    })
            }
            other => Err(CertificateError::UnsupportedKey(format!("PEM block {other}"))),
        }
    }

    fn from_pkcs8_der(der: &[u8]) -> Result<Self, CertificateError> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::Rsa(Box::new(key)));
        }
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::P256(key));
        }
        if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::P384(key));
        }
        let info = pkcs8::PrivateKeyInfo::try_from(der)
            .map_err(|e| CertificateError::InvalidPrivateKey(e.to_string()))?;
        Err(CertificateError::UnsupportedKey(format!(
            "key algorithm {}",
            info.algorithm.oid
        )))
    }

    fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
            PrivateKey::P256(key) => PublicKey::P256(key.verifying_key().clone()),
            PrivateKey::P384(key) => PublicKey::P384(key.verifying_key().clone()),
        }
    }
}

fn is_private_key_tag(tag: &str) -> bool {
    matches!(
        tag,
        PEM_PRIVATE_KEY | PEM_ENCRYPTED_PRIVATE_KEY | PEM_RSA_PRIVATE_KEY | PEM_EC_PRIVATE_KEY
    )
}

/// A leaf certificate together with the private key that signs for it
///
/// # Examples
///
/// ```ignore
/// let signer = SigningCertificate::from_files("cert.pem", Some("key.pem".as_ref()), None)?;
/// let signature = signer.sign(DigestAlgorithm::Sha256, b"data")?;
/// signer.certificate().public_key().verify(DigestAlgorithm::Sha256, b"data", &signature)?;
/// ```
#[derive(Clone)]
pub struct SigningCertificate {
    certificate: Certificate,
    private_key: PrivateKey,
}

impl std::fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCertificate")
            .field("subject", &self.certificate.subject())
            .field("thumbprint", &self.certificate.thumbprint())
            .finish()
    }
}

impl SigningCertificate {
    /// Load from PEM text.
    ///
    /// The first `CERTIFICATE` block is the leaf. The key is the first
    /// private key block in `key_pem`, or in `cert_pem` when no separate key
    /// is given.
    pub fn from_pem(
        cert_pem: &str,
        key_pem: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, CertificateError> {
        let cert_blocks = pem::parse_many(cert_pem)?;
        let leaf = cert_blocks
            .iter()
            .find(|block| block.tag() == PEM_CERTIFICATE)
            .ok_or(CertificateError::MissingCertificate)?;
        let certificate = Certificate::from_der(leaf.contents())?;

        let key_blocks = match key_pem {
            Some(text) => pem::parse_many(text)?,
            None => cert_blocks,
        };
        let key_block = key_blocks
            .iter()
            .find(|block| is_private_key_tag(block.tag()))
            .ok_or(CertificateError::MissingPrivateKey)?;
        let private_key = PrivateKey::from_pem_block(key_block, password)?;

        if private_key.public_key() != *certificate.public_key() {
            return Err(CertificateError::KeyMismatch);
        }

        tracing::debug!(
            "loaded {} certificate {} ({})",
            certificate.key_family(),
            certificate.subject(),
            certificate.thumbprint()
        );
        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Load from PEM files on disk.
    ///
    /// `key_path` may be omitted when the certificate file also holds the
    /// private key. See [`SigningCertificate::from_pem`].
    pub fn from_files(
        cert_path: &Path,
        key_path: Option<&Path>,
        password: Option<&str>,
    ) -> Result<Self, CertificateError> {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = key_path.map(std::fs::read_to_string).transpose()?;
        Self::from_pem(&cert_pem, key_pem.as_deref(), password)
    }

    /// The leaf certificate embedded in every signature made with this key
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Key family of the certificate, which matches the private key
    pub fn key_family(&self) -> KeyFamily {
        self.certificate.key_family()
    }

    /// Sign `data`, hashed with `digest`.
    ///
    /// RSA keys produce a PKCS#1 v1.5 signature. ECDSA keys produce the raw
    /// `r‖s` concatenation XML-DSig expects, not a DER sequence. Fails with
    /// [`CryptoError::UnsupportedAlgorithm`] for digests the key family
    /// cannot sign with.
    pub fn sign(&self, digest: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        super::signature_method(self.key_family(), digest)?;
        let hashed = digest.digest(data)?;
        match &self.private_key {
            PrivateKey::Rsa(key) => Ok(key.sign(pkcs1v15(digest)?, &hashed)?),
            PrivateKey::P256(key) => {
                let signature: p256::ecdsa::Signature = key.sign_prehash(&hashed)?;
                Ok(signature.to_bytes().to_vec())
            }
            PrivateKey::P384(key) => {
                let signature: p384::ecdsa::Signature = key.sign_prehash(&hashed)?;
                Ok(signature.to_bytes().to_vec())
            }
        }
    }
}
