use std::path::PathBuf;

use crate::crypto::{CertificateError, DigestAlgorithm, SigningCertificate};

/// Where the signing certificate and its private key come from
#[derive(Debug, Clone)]
pub enum CertificateSource {
    /// PEM files; without a key file the key is read from the certificate file
    Files {
        certificate: PathBuf,
        private_key: Option<PathBuf>,
    },
    /// PEM text already in memory
    Pem {
        certificate: String,
        private_key: Option<String>,
    },
}

/// Settings for one sign operation
#[derive(Debug, Clone)]
pub struct SignConfig {
    pub certificate: CertificateSource,
    /// Password of an encrypted PKCS#8 private key
    pub password: Option<String>,
    /// Digest of every protected part
    pub file_digest: DigestAlgorithm,
    /// Digest of the signed XML, and of the signature method
    pub pkcs_digest: DigestAlgorithm,
    /// Replace an existing signature instead of failing
    pub force: bool,
}

impl SignConfig {
    pub fn new(certificate: CertificateSource) -> Self {
        Self {
            certificate,
            password: None,
            file_digest: DigestAlgorithm::Sha256,
            pkcs_digest: DigestAlgorithm::Sha256,
            force: false,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_file_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.file_digest = digest;
        self
    }

    pub fn with_pkcs_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.pkcs_digest = digest;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn load_certificate(&self) -> Result<SigningCertificate, CertificateError> {
        let password = self.password.as_deref();
        match &self.certificate {
            CertificateSource::Files {
                certificate,
                private_key,
            } => SigningCertificate::from_files(certificate, private_key.as_deref(), password),
            CertificateSource::Pem {
                certificate,
                private_key,
            } => SigningCertificate::from_pem(certificate, private_key.as_deref(), password),
        }
    }
}
