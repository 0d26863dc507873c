use std::path::PathBuf;

use clap::Args;
use common::package::{OpenMode, Package, PackageError};
use common::signing::SignError;

use crate::cli::op::ExitStatus;

#[derive(Args, Debug, Clone)]
pub struct Unsign {
    /// Package to remove the signature from
    pub file: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum UnsignError {
    #[error("{0} is not signed")]
    NotSigned(PathBuf),
    #[error("package error: {0}")]
    Package(#[from] PackageError),
    #[error(transparent)]
    Sign(#[from] SignError),
}

impl ExitStatus for UnsignError {}

#[async_trait::async_trait]
impl crate::cli::op::Op for Unsign {
    type Error = UnsignError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut package = Package::open(&self.file, OpenMode::ReadWrite)?;
        let part = match package.remove_signature() {
            Ok(Some(part)) => part,
            Ok(None) => return Err(UnsignError::NotSigned(self.file.clone())),
            Err(e) => {
                package.discard();
                return Err(e.into());
            }
        };
        package.close()?;

        Ok(format!("Removed signature {} from {}", part, self.file.display()))
    }
}
