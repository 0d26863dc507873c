use std::fmt::Write;
use std::path::PathBuf;

use clap::Args;
use common::package::{OpenMode, Package, PackageError};
use common::signing::SignError;

use crate::cli::op::ExitStatus;

#[derive(Args, Debug, Clone)]
pub struct List {
    /// Package to inspect
    pub file: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("package error: {0}")]
    Package(#[from] PackageError),
    #[error(transparent)]
    Sign(#[from] SignError),
}

impl ExitStatus for ListError {}

#[async_trait::async_trait]
impl crate::cli::op::Op for List {
    type Error = ListError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut package = Package::open(&self.file, OpenMode::Read)?;
        let signatures = package.signatures()?;
        if signatures.is_empty() {
            return Ok(format!("{} is not signed", self.file.display()));
        }

        let mut output = String::new();
        for signature in &signatures {
            let certificate = signature.certificate()?;
            let part = signature
                .part()
                .map(|part| part.to_string())
                .unwrap_or_default();
            let signed_at = signature
                .signing_time()
                .map(|time| time.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            let expires = certificate
                .not_after()
                .map(|time| time.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());

            let _ = writeln!(output, "{}", part);
            let _ = writeln!(output, " - Subject: {}", certificate.subject());
            let _ = writeln!(output, " - Issuer: {}", certificate.issuer());
            let _ = writeln!(output, " - Serial: {}", certificate.serial_number());
            let _ = writeln!(output, " - Thumbprint: {}", certificate.thumbprint());
            let _ = writeln!(output, " - Expires: {}", expires);
            let _ = writeln!(
                output,
                " - Method: {}",
                signature.signature_method().unwrap_or("unknown")
            );
            let _ = writeln!(output, " - Signed at: {}", signed_at);
            let _ = write!(
                output,
                " - Timestamped: {}",
                if signature.timestamp_token().is_some() { "yes" } else { "no" }
            );
        }
        Ok(output)
    }
}
