//! Run configuration.
//!
//! Built once by the binary from CLI flags and environment fallbacks, then
//! passed by reference. `validate` runs before the first subject so a bad
//! setup fails fast instead of partway through a batch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::gateway::{ChatModel, ProviderKind, DEFAULT_TIMEOUT};
use crate::likert::ExtractionPolicy;
use crate::retry::RetryPolicy;
use crate::runner::NoImagesPolicy;

pub const DEFAULT_INPUT_PATH: &str = "input_data.xlsx";
pub const DEFAULT_IMAGES_DIR: &str = "ct_scans";
pub const DEFAULT_ID_COLUMN: &str = "Reihenfolge Bilder";
pub const DEFAULT_HISTORY_COLUMN: &str = "Anamnese (medical history)";
pub const DEFAULT_IMAGE_PREFIX: &str = "Patient";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: set {var}")]
    MissingCredential { var: &'static str },
    #[error("input spreadsheet not found: {0}")]
    MissingInput(PathBuf),
    #[error("image directory not found: {0}")]
    MissingImageDir(PathBuf),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Which endpoint to call and how.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: ChatModel,
    /// Overrides the provider's public endpoint (proxies, test servers).
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            model: ChatModel::default_for(kind),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read the provider's API key from its environment variable.
    pub fn from_env(kind: ProviderKind) -> Result<Self, ConfigError> {
        Self::from_lookup(kind, |var| std::env::var(var).ok())
    }

    /// Like `from_env`, with an injectable variable lookup.
    pub fn from_lookup<F>(kind: ProviderKind, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = kind.api_key_env();
        match lookup(var) {
            Some(key) if !key.trim().is_empty() => Ok(Self::new(kind, key.trim())),
            _ => Err(ConfigError::MissingCredential { var }),
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model = ChatModel::new(self.kind, model_id);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Everything a classification run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub provider: ProviderSettings,
    pub input_path: PathBuf,
    pub images_dir: PathBuf,
    pub output_path: PathBuf,
    pub id_column: String,
    pub history_column: String,
    pub image_prefix: String,
    pub retry: RetryPolicy,
    pub no_images: NoImagesPolicy,
    pub extraction: ExtractionPolicy,
}

impl RunConfig {
    /// Defaults for everything but the provider.
    pub fn new(provider: ProviderSettings) -> Self {
        let output_path = PathBuf::from(provider.kind.default_output_file());
        Self {
            provider,
            input_path: PathBuf::from(DEFAULT_INPUT_PATH),
            images_dir: PathBuf::from(DEFAULT_IMAGES_DIR),
            output_path,
            id_column: DEFAULT_ID_COLUMN.to_string(),
            history_column: DEFAULT_HISTORY_COLUMN.to_string(),
            image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
            retry: RetryPolicy::default(),
            no_images: NoImagesPolicy::default(),
            extraction: ExtractionPolicy::default(),
        }
    }

    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_path = path.into();
        self
    }

    pub fn with_images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.images_dir = dir.into();
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check the credential and input paths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                var: self.provider.kind.api_key_env(),
            });
        }
        if self.id_column.trim().is_empty() {
            return Err(ConfigError::Invalid("id column name is empty".to_string()));
        }
        if !self.input_path.is_file() {
            return Err(ConfigError::MissingInput(self.input_path.clone()));
        }
        if !self.images_dir.is_dir() {
            return Err(ConfigError::MissingImageDir(self.images_dir.clone()));
        }
        Ok(())
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}
