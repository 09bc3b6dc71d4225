use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::embeddings::{device::DevicePreference, DEFAULT_BATCH_SIZE, DEFAULT_MAX_TOKENS};
use crate::loader::{MalformedLinePolicy, DEFAULT_FILE_PATTERN};
use crate::vector_store::CollisionPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("batch_size must be a positive integer")]
    InvalidBatchSize,
    #[error("max_tokens must be a positive integer")]
    InvalidMaxTokens,
    #[error("file_pattern must not be empty")]
    EmptyPattern,
}

/// Settings for an embed run and the cluster run that follows it.
///
/// Every field has a default, so `{}` is a complete configuration.
///
/// ```json
/// {
///   "input_dir": "data/articles",
///   "store_path": "embeddings/articles.nmst",
///   "batch_size": 16,
///   "device": "cpu"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub file_pattern: String,
    pub recursive: bool,
    pub store_path: PathBuf,
    pub batch_size: usize,
    pub max_tokens: usize,
    pub device: DevicePreference,
    pub malformed_lines: MalformedLinePolicy,
    pub collisions: CollisionPolicy,
    /// Where `cluster` writes its JSON results.
    pub results_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data/articles"),
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            recursive: false,
            store_path: PathBuf::from("embeddings/articles.nmst"),
            batch_size: DEFAULT_BATCH_SIZE,
            max_tokens: DEFAULT_MAX_TOKENS,
            device: DevicePreference::default(),
            malformed_lines: MalformedLinePolicy::default(),
            collisions: CollisionPolicy::default(),
            results_path: PathBuf::from("embeddings/clusters.json"),
        }
    }
}

impl PipelineConfig {
    /// # Errors
    /// Malformed JSON, unknown fields or invalid values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// See [`PipelineConfig::from_json`], plus failing to read the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// # Errors
    /// A zero batch size or token cap, or an empty file pattern.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens);
        }
        if self.file_pattern.trim().is_empty() {
            return Err(ConfigError::EmptyPattern);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.device, DevicePreference::Auto);
        assert_eq!(config.store_path, PathBuf::from("embeddings/articles.nmst"));
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_json(
            r#"{"input_dir": "dumps", "batch_size": 2, "device": "cpu", "collisions": "reject"}"#,
        )
        .unwrap();
        assert_eq!(config.input_dir, PathBuf::from("dumps"));
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.device, DevicePreference::Cpu);
        assert_eq!(config.collisions, CollisionPolicy::Reject);
        assert_eq!(config.malformed_lines, MalformedLinePolicy::Skip);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(matches!(
            PipelineConfig::from_json(r#"{"batch_size": 0}"#),
            Err(ConfigError::InvalidBatchSize)
        ));
        assert!(matches!(
            PipelineConfig::from_json(r#"{"max_tokens": 0}"#),
            Err(ConfigError::InvalidMaxTokens)
        ));
        assert!(matches!(
            PipelineConfig::from_json(r#"{"batchsize": 4}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"recursive": true}}"#).unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert!(config.recursive);

        let missing = PipelineConfig::from_file("/nonexistent/newsmap.json");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
