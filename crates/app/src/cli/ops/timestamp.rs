use std::path::PathBuf;

use clap::Args;
use common::crypto::DigestAlgorithm;
use common::package::{OpenMode, Package, PackageError};
use common::signing::{SignError, TimestampFailure, TimestampResult};
use url::Url;

use crate::cli::op::ExitStatus;

#[derive(Args, Debug, Clone)]
pub struct Timestamp {
    /// Signed package to timestamp
    pub file: PathBuf,

    /// RFC 3161 time-stamping authority (falls back to the config file)
    #[arg(short = 't', long)]
    pub timestamp_url: Option<Url>,

    #[arg(long)]
    pub timestamp_digest: Option<DigestAlgorithm>,
}

#[derive(Debug, thiserror::Error)]
pub enum TimestampOpError {
    #[error("no time-stamping authority given; pass --timestamp-url or set timestamp_url")]
    MissingUrl,
    #[error("{0} is not signed")]
    NotSigned(PathBuf),
    #[error("package error: {0}")]
    Package(#[from] PackageError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("timestamping failed: {0}")]
    Failed(TimestampFailure),
}

impl ExitStatus for TimestampOpError {
    fn exit_code(&self) -> i32 {
        match self {
            TimestampOpError::Failed(_) => 3,
            _ => 1,
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Timestamp {
    type Error = TimestampOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = &ctx.config;
        let url = config
            .timestamp_url(self.timestamp_url.clone())
            .ok_or(TimestampOpError::MissingUrl)?;

        let mut package = Package::open(&self.file, OpenMode::ReadWrite)?;
        let mut signatures = package.signatures()?;
        let Some(signature) = signatures.first_mut() else {
            return Err(TimestampOpError::NotSigned(self.file.clone()));
        };

        let result = signature
            .timestamp_builder()?
            .timeout(config.timestamp_timeout())
            .request(
                &mut package,
                &url,
                config.timestamp_digest(self.timestamp_digest),
                &ctx.cancel,
            )
            .await?;
        package.close()?;

        match result {
            TimestampResult::Success => {
                Ok(format!("Timestamped {} via {}", self.file.display(), url))
            }
            TimestampResult::Failed(failure) => Err(TimestampOpError::Failed(failure)),
        }
    }
}
