use std::path::PathBuf;

use clap::Args;
use common::package::{OpenMode, Package, PackageError};
use common::signing::{SignError, VerifyError};

use crate::cli::op::ExitStatus;

#[derive(Args, Debug, Clone)]
pub struct Verify {
    /// Package to verify
    pub file: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyOpError {
    #[error("{0} is not signed")]
    NotSigned(PathBuf),
    #[error("package error: {0}")]
    Package(#[from] PackageError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("signature is invalid: {0}")]
    Invalid(#[from] VerifyError),
}

impl ExitStatus for VerifyOpError {}

#[async_trait::async_trait]
impl crate::cli::op::Op for Verify {
    type Error = VerifyOpError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut package = Package::open(&self.file, OpenMode::Read)?;
        let signatures = package.signatures()?;
        if signatures.is_empty() {
            return Err(VerifyOpError::NotSigned(self.file.clone()));
        }

        let mut lines = Vec::new();
        for signature in &signatures {
            signature.verify(&mut package)?;
            lines.push(format!(
                "Valid signature by {}",
                signature.certificate()?.subject()
            ));
        }
        Ok(lines.join("\n"))
    }
}
