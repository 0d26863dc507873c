use std::path::PathBuf;

use clap::Args;
use common::crypto::DigestAlgorithm;
use common::package::{OpenMode, Package, PackageError};
use common::signing::{
    CertificateSource, SignConfig, SignError, TimestampFailure, TimestampResult,
};
use url::Url;

use crate::cli::op::{ExitStatus, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Sign {
    /// Package to sign
    pub file: PathBuf,

    /// PEM certificate; may also carry the private key
    #[arg(short = 'c', long)]
    pub certificate: PathBuf,

    /// PEM private key, if not bundled with the certificate
    #[arg(short = 'k', long)]
    pub key: Option<PathBuf>,

    /// Password of an encrypted private key
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Digest of every protected part (sha1, sha256, sha384, sha512)
    #[arg(long)]
    pub file_digest: Option<DigestAlgorithm>,

    /// Digest of the signed XML and the signature method
    #[arg(long)]
    pub pkcs_digest: Option<DigestAlgorithm>,

    /// RFC 3161 time-stamping authority to timestamp the new signature with
    #[arg(short = 't', long)]
    pub timestamp_url: Option<Url>,

    #[arg(long)]
    pub timestamp_digest: Option<DigestAlgorithm>,

    /// Replace an existing signature
    #[arg(short = 'f', long)]
    pub force: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SignOpError {
    #[error("package error: {0}")]
    Package(#[from] PackageError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("package signed, but timestamping failed: {0}")]
    Timestamp(TimestampFailure),
}

impl ExitStatus for SignOpError {
    fn exit_code(&self) -> i32 {
        match self {
            SignOpError::Sign(SignError::AlreadySigned) => 2,
            SignOpError::Timestamp(_) => 3,
            _ => 1,
        }
    }
}

impl Sign {
    fn sign_config(&self, ctx: &OpContext) -> SignConfig {
        let config = &ctx.config;
        let mut sign_config = SignConfig::new(CertificateSource::Files {
            certificate: self.certificate.clone(),
            private_key: self.key.clone(),
        })
        .with_file_digest(config.file_digest(self.file_digest))
        .with_pkcs_digest(config.pkcs_digest(self.pkcs_digest))
        .with_force(self.force);
        if let Some(password) = &self.password {
            sign_config = sign_config.with_password(password.clone());
        }
        sign_config
    }

    /// Sign the open package and timestamp the new signature. Nothing is
    /// written here; the caller closes or discards the package.
    async fn sign_package(
        &self,
        package: &mut Package,
        ctx: &OpContext,
        timestamp: Option<(&Url, DigestAlgorithm)>,
    ) -> Result<(String, Option<TimestampResult>), SignOpError> {
        let mut builder = package.signature_builder();
        builder.enqueue_defaults();
        let mut signature = builder.sign(&self.sign_config(ctx))?;
        let certificate = signature.certificate()?;

        let output = format!(
            "Signed {}\n - Certificate: {}\n - Thumbprint: {}",
            self.file.display(),
            certificate.subject(),
            certificate.thumbprint()
        );

        let result = match timestamp {
            Some((url, digest)) => Some(
                signature
                    .timestamp_builder()?
                    .timeout(ctx.config.timestamp_timeout())
                    .request(package, url, digest, &ctx.cancel)
                    .await?,
            ),
            None => None,
        };
        Ok((output, result))
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Sign {
    type Error = SignOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let config = &ctx.config;
        let timestamp_url = config.timestamp_url(self.timestamp_url.clone());
        let timestamp_digest = config.timestamp_digest(self.timestamp_digest);
        if timestamp_url.is_some() && !timestamp_digest.is_supported() {
            return Err(SignError::UnsupportedAlgorithm(timestamp_digest.to_string()).into());
        }

        let mut package = Package::open(&self.file, OpenMode::ReadWrite)?;
        let timestamp = timestamp_url.as_ref().map(|url| (url, timestamp_digest));
        let (mut output, result) = match self.sign_package(&mut package, ctx, timestamp).await {
            Ok(signed) => signed,
            Err(e) => {
                package.discard();
                return Err(e);
            }
        };

        // the signature is kept even when the authority did not answer
        package.close()?;

        match (timestamp_url, result) {
            (Some(_), Some(TimestampResult::Failed(failure))) => {
                Err(SignOpError::Timestamp(failure))
            }
            (Some(url), Some(TimestampResult::Success)) => {
                output.push_str(&format!("\n - Timestamp: {}", url));
                Ok(output)
            }
            _ => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use super::*;
    use crate::cli::op::Op;
    use crate::config::AppConfig;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="utf-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="vsixmanifest" ContentType="text/xml" /></Types>"#;

    /// Write a one-part package and a self-signed P-256 certificate bundle
    fn fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let package = dir.join("extension.vsix");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&package).unwrap());
        let options = zip::write::FileOptions::default();
        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(CONTENT_TYPES.as_bytes()).unwrap();
        zip.start_file("extension.vsixmanifest", options).unwrap();
        zip.write_all(b"<PackageManifest Version=\"2.0.0\" />").unwrap();
        zip.finish().unwrap();

        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["opcsign-cli".to_string()]).unwrap();
        let certificate = dir.join("signer.pem");
        std::fs::write(
            &certificate,
            format!("{}\n{}", cert.pem(), key_pair.serialize_pem()),
        )
        .unwrap();
        (package, certificate)
    }

    fn sign_op(file: PathBuf, certificate: PathBuf) -> Sign {
        Sign {
            file,
            certificate,
            key: None,
            password: None,
            file_digest: None,
            pkcs_digest: None,
            timestamp_url: None,
            timestamp_digest: None,
            force: false,
        }
    }

    fn is_signed(path: &Path) -> bool {
        let mut package = Package::open(path, OpenMode::Read).unwrap();
        !package.signatures().unwrap().is_empty()
    }

    fn unused_endpoint() -> Url {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/").parse().unwrap()
    }

    #[tokio::test]
    async fn test_sign_writes_signature() {
        let dir = tempfile::TempDir::new().unwrap();
        let (package, certificate) = fixture(dir.path());

        let output = sign_op(package.clone(), certificate.clone())
            .execute(&OpContext::new(AppConfig::default()))
            .await
            .unwrap();
        assert!(output.contains("Thumbprint"));
        assert!(is_signed(&package));

        let err = sign_op(package.clone(), certificate)
            .execute(&OpContext::new(AppConfig::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, SignOpError::Sign(SignError::AlreadySigned)));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_timestamp_digest_leaves_package_unsigned() {
        let dir = tempfile::TempDir::new().unwrap();
        let (package, certificate) = fixture(dir.path());
        let original = std::fs::read(&package).unwrap();

        let mut op = sign_op(package.clone(), certificate);
        op.timestamp_url = Some(unused_endpoint());
        op.timestamp_digest = Some(DigestAlgorithm::Md5);
        let err = op
            .execute(&OpContext::new(AppConfig::default()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SignOpError::Sign(SignError::UnsupportedAlgorithm(_))
        ));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(std::fs::read(&package).unwrap(), original);
        assert!(!is_signed(&package));
    }

    #[tokio::test]
    async fn test_unreachable_authority_keeps_signature() {
        let dir = tempfile::TempDir::new().unwrap();
        let (package, certificate) = fixture(dir.path());

        let mut op = sign_op(package.clone(), certificate);
        op.timestamp_url = Some(unused_endpoint());
        let config = AppConfig {
            timestamp_timeout_secs: Some(5),
            ..AppConfig::default()
        };
        let err = op.execute(&OpContext::new(config)).await.unwrap_err();

        assert!(matches!(err, SignOpError::Timestamp(_)));
        assert_eq!(err.exit_code(), 3);
        assert!(is_signed(&package));
    }
}
