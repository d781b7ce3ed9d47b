//! Configuration management for docseek
//!
//! Loads the TOML config file, applies `DOCSEEK_*` environment overrides and
//! named profiles, then validates the result before any component sees it.

use crate::error::{DocseekError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub models: ModelsConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the metadata database and the dumped ANN graph
    pub data_dir: PathBuf,
    /// Persist the ANN index after every `add` and `optimize`
    pub auto_save: bool,
}

/// Model manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub default_model: String,
    /// Inference backend name ("fastembed")
    pub backend: String,
    pub max_loaded_models: usize,
    pub batch_size: usize,
    pub inference_timeout: String,
    /// Pick a model per chunk from content heuristics instead of always using the default
    pub adaptive_selection: bool,
}

/// ANN index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dimensions: usize,
    pub similarity_threshold: f32,
    pub max_elements: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    pub search_timeout: String,
}

/// Search handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_top_k: usize,
    pub history_limit: usize,
    /// Maximum related chunks attached to each result
    pub related_chunks: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_selection: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DocseekError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| DocseekError::io(e, format!("Failed to read config file: {:?}", path)))?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| DocseekError::io(e, format!("Failed to write config file: {:?}", path)))?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| DocseekError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.default_model {
            self.models.default_model = model;
        }
        if let Some(threshold) = overrides.similarity_threshold {
            self.index.similarity_threshold = threshold;
        }
        if let Some(adaptive) = overrides.adaptive_selection {
            self.models.adaptive_selection = adaptive;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: DOCSEEK_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("DOCSEEK_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "STORAGE__AUTO_SAVE" => {
                self.storage.auto_save = parse_env(path, value)?;
            }
            "MODELS__DEFAULT_MODEL" => {
                self.models.default_model = value.to_string();
            }
            "MODELS__MAX_LOADED_MODELS" => {
                self.models.max_loaded_models = parse_env(path, value)?;
            }
            "MODELS__ADAPTIVE_SELECTION" => {
                self.models.adaptive_selection = parse_env(path, value)?;
            }
            "INDEX__SIMILARITY_THRESHOLD" => {
                self.index.similarity_threshold = parse_env(path, value)?;
            }
            "INDEX__HNSW_EF_SEARCH" => {
                self.index.hnsw_ef_search = parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| DocseekError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("docseek").join("config.toml"))
    }

    /// Data directory with a leading `~/` expanded
    pub fn data_dir(&self) -> Result<PathBuf> {
        expand_path(&self.storage.data_dir)
    }

    pub fn inference_timeout(&self) -> Duration {
        parse_duration(&self.models.inference_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn search_timeout(&self) -> Duration {
        parse_duration(&self.index.search_timeout).unwrap_or(Duration::from_secs(5))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.docseek"),
                auto_save: true,
            },
            models: ModelsConfig {
                default_model: crate::models::DEFAULT_MODEL_ID.to_string(),
                backend: "fastembed".to_string(),
                max_loaded_models: 2,
                batch_size: 32,
                inference_timeout: "30s".to_string(),
                adaptive_selection: false,
            },
            index: IndexConfig {
                dimensions: 384,
                similarity_threshold: 0.3,
                max_elements: 100_000,
                hnsw_m: 16,
                hnsw_ef_construction: 200,
                hnsw_ef_search: 64,
                search_timeout: "5s".to_string(),
            },
            search: SearchConfig {
                default_top_k: 10,
                history_limit: 100,
                related_chunks: 2,
            },
            profiles: HashMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| DocseekError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse duration strings like "250ms", "5s", "10m", "1h"; bare digits are seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, "s"),
    };
    let value: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| DocseekError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| DocseekError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("5d"), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.index.similarity_threshold = 0.42;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!((loaded.index.similarity_threshold - 0.42).abs() < f32::EPSILON);
        assert_eq!(loaded.models.default_model, config.models.default_model);
    }

    #[test]
    fn test_default_pins_ingestion_model() {
        let config = Config::default();
        assert!(!config.models.adaptive_selection);
        assert_eq!(config.models.default_model, "all-MiniLM-L6-v2");
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/docseek/config.toml"));
        assert!(matches!(result, Err(DocseekError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "precise".to_string(),
            ProfileOverrides {
                default_model: Some("bge-small-en-v1.5".to_string()),
                similarity_threshold: Some(0.6),
                adaptive_selection: Some(true),
            },
        );

        config.apply_profile("precise").unwrap();
        assert_eq!(config.models.default_model, "bge-small-en-v1.5");
        assert!(config.models.adaptive_selection);
        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_expand_path_passthrough() {
        let path = Path::new("/var/lib/docseek");
        assert_eq!(expand_path(path).unwrap(), PathBuf::from("/var/lib/docseek"));
    }
}
