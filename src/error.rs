use std::path::PathBuf;
use thiserror::Error;

use crate::index::IndexError;

/// Main error type for docseek
#[derive(Error, Debug)]
pub enum DocseekError {
    /// A component was used before `init` completed
    #[error("{component} is not initialized")]
    NotInitialized { component: &'static str },

    /// Model id is not in the catalog
    #[error("Model not found: {id}")]
    ModelNotFound { id: String },

    /// Inference failed, including the single fallback attempt
    #[error("Inference unavailable for model {model}: {reason}")]
    InferenceUnavailable { model: String, reason: String },

    /// Vector length does not match the configured dimensionality
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Caller supplied input that cannot be processed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An operation exceeded its configured deadline
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    /// ANN index errors
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DocseekError {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }

    pub fn json(source: serde_json::Error, context: impl Into<String>) -> Self {
        Self::Json {
            source,
            context: context.into(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for docseek operations
pub type Result<T> = std::result::Result<T, DocseekError>;
