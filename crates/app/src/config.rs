use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use common::crypto::DigestAlgorithm;
use common::signing::DEFAULT_TIMESTAMP_TIMEOUT;
use serde::{Deserialize, Deserializer};
use url::Url;

pub const APP_NAME: &str = "opcsign";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Defaults read from the config file. Command-line flags win over
/// anything set here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Digest of every protected part
    #[serde(default, deserialize_with = "from_str_opt")]
    pub file_digest: Option<DigestAlgorithm>,
    /// Digest of the signed XML
    #[serde(default, deserialize_with = "from_str_opt")]
    pub pkcs_digest: Option<DigestAlgorithm>,
    /// Time-stamping authority used when signing
    #[serde(default)]
    pub timestamp_url: Option<Url>,
    #[serde(default, deserialize_with = "from_str_opt")]
    pub timestamp_digest: Option<DigestAlgorithm>,
    #[serde(default)]
    pub timestamp_timeout_secs: Option<u64>,
    #[serde(default, deserialize_with = "from_str_opt")]
    pub log_level: Option<tracing::Level>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

fn from_str_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    Option::<String>::deserialize(deserializer)?
        .map(|value| value.parse().map_err(serde::de::Error::custom))
        .transpose()
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the config file. An explicit path must exist; a missing file at
    /// the default location just means defaults.
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::from_file(&path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn file_digest(&self, flag: Option<DigestAlgorithm>) -> DigestAlgorithm {
        flag.or(self.file_digest).unwrap_or(DigestAlgorithm::Sha256)
    }

    pub fn pkcs_digest(&self, flag: Option<DigestAlgorithm>) -> DigestAlgorithm {
        flag.or(self.pkcs_digest).unwrap_or(DigestAlgorithm::Sha256)
    }

    pub fn timestamp_digest(&self, flag: Option<DigestAlgorithm>) -> DigestAlgorithm {
        flag.or(self.timestamp_digest).unwrap_or(DigestAlgorithm::Sha256)
    }

    pub fn timestamp_url(&self, flag: Option<Url>) -> Option<Url> {
        flag.or_else(|| self.timestamp_url.clone())
    }

    pub fn timestamp_timeout(&self) -> Duration {
        self.timestamp_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMESTAMP_TIMEOUT)
    }

    pub fn log_level(&self, flag: Option<tracing::Level>) -> tracing::Level {
        flag.or(self.log_level).unwrap_or(tracing::Level::WARN)
    }
}
