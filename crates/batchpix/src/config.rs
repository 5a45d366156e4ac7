use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum bytes a single candidate file may declare (50 MB).
const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterConfig {
    /// Maximum number of candidates per submission. Oversized batches are
    /// rejected whole; partial admission is never performed.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Number of concurrent conversion workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_accepted_suffixes")]
    pub accepted_suffixes: Vec<String>,
    #[serde(default = "default_accepted_media_types")]
    pub accepted_media_types: Vec<String>,
    /// Enables the secondary codec path for fallback-convertible inputs
    /// (JPEGs produced by on-device re-encoding upstream of this tool).
    #[serde(default)]
    pub enable_fallback_codec: bool,
    #[serde(default = "default_fallback_suffixes")]
    pub fallback_suffixes: Vec<String>,
    #[serde(default = "default_fallback_media_types")]
    pub fallback_media_types: Vec<String>,
    /// Quality parameter handed to the primary codec, in `0.0..=1.0`.
    #[serde(default = "default_target_quality")]
    pub target_quality: f32,
}

fn default_max_files() -> usize {
    100
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_concurrency() -> usize {
    3
}

fn default_accepted_suffixes() -> Vec<String> {
    vec![".heic".to_string(), ".heif".to_string()]
}

fn default_accepted_media_types() -> Vec<String> {
    vec!["image/heic".to_string(), "image/heif".to_string()]
}

fn default_fallback_suffixes() -> Vec<String> {
    vec![".jpg".to_string(), ".jpeg".to_string()]
}

fn default_fallback_media_types() -> Vec<String> {
    vec!["image/jpeg".to_string()]
}

fn default_target_quality() -> f32 {
    0.9
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_file_size_bytes: default_max_file_size(),
            concurrency: default_concurrency(),
            accepted_suffixes: default_accepted_suffixes(),
            accepted_media_types: default_accepted_media_types(),
            enable_fallback_codec: false,
            fallback_suffixes: default_fallback_suffixes(),
            fallback_media_types: default_fallback_media_types(),
            target_quality: default_target_quality(),
        }
    }
}

impl ConverterConfig {
    /// Parses a config from a JSON string, applying field defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_files == 0 {
            return Err(ConfigError::Validation {
                message: "maxFiles must be greater than 0".to_string(),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Validation {
                message: "concurrency must be greater than 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.target_quality) {
            return Err(ConfigError::Validation {
                message: format!(
                    "targetQuality must be within 0.0..=1.0, got {}",
                    self.target_quality
                ),
            });
        }
        if self.accepted_suffixes.is_empty() && self.accepted_media_types.is_empty() {
            return Err(ConfigError::Validation {
                message: "at least one accepted suffix or media type is required".to_string(),
            });
        }
        Ok(())
    }
}
