//! Configuration for the upload backend
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports `${VAR_NAME}` syntax where VAR_NAME must start with a letter or
/// underscore and contain only uppercase letters, digits, and underscores.
fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&format!("${{{}}}", var_name), &value);
        }
    }

    result
}

/// Custom deserializer for strings with environment variable expansion.
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.map(|v| expand_env_vars(&v)))
}

fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.bucket.is_empty() {
            return Err(ConfigError::ValidationError(
                "store.bucket must not be empty".into(),
            ));
        }

        if let Some(ref endpoint) = self.store.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(
                    "store.endpoint must start with http:// or https://".into(),
                ));
            }
        }

        if self.store.part_size == 0 {
            return Err(ConfigError::ValidationError(
                "store.part_size must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Object-store backend configuration.
///
/// `access_key_id` and `secret_access_key` support `${VAR}` environment
/// expansion so credentials never need to be committed to the YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_with_env")]
    pub access_key_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_with_env")]
    pub secret_access_key: Option<String>,
    #[serde(default = "default_part_size")]
    pub part_size: usize,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

pub fn default_region() -> String {
    "us-east-1".to_string()
}

/// S3's minimum non-final part size; the default part size matches the
/// value named in the upload backend's configuration surface.
pub fn default_part_size() -> usize {
    8 * 1024 * 1024
}

/// Metrics HTTP endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            store: StoreConfig {
                bucket: "test-bucket".into(),
                region: "us-east-1".into(),
                endpoint: None,
                access_key_id: None,
                secret_access_key: None,
                part_size: default_part_size(),
                temp_dir: None,
            },
            metrics: MetricsConfig::default(),
        }
    }

    #[test]
    fn test_default_part_size_is_8_mib() {
        assert_eq!(default_part_size(), 8 * 1024 * 1024);
    }

    #[test]
    fn test_config_validation_empty_bucket() {
        let mut config = test_config();
        config.store.bucket = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_endpoint() {
        let mut config = test_config();
        config.store.endpoint = Some("ftp://example.com".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_part_size() {
        let mut config = test_config();
        config.store.part_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_success() {
        let config = test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_env_vars_in_access_key() {
        std::env::set_var("TUS_S3_TEST_ACCESS_KEY", "expanded-key");
        let yaml = "store:\n  bucket: b\n  access_key_id: ${TUS_S3_TEST_ACCESS_KEY}\n";
        let expanded = super::expand_env_vars(yaml);
        assert!(expanded.contains("expanded-key"));
        std::env::remove_var("TUS_S3_TEST_ACCESS_KEY");
    }
}
