//! Error types for the metro-etl core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering configuration, extraction, store access, and stage preconditions.

use std::path::PathBuf;

/// Top-level error type for the metro-etl core library.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{stage}: required input missing at {}", path.display())]
    MissingInput { stage: String, path: PathBuf },

    #[error("{stage}: no usable input rows found in {}", path.display())]
    NoInput { stage: String, path: PathBuf },

    #[error("Analysis error: {message}")]
    Analysis { message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EtlError {
    pub fn missing_input(stage: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::MissingInput {
            stage: stage.into(),
            path: path.into(),
        }
    }

    pub fn no_input(stage: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::NoInput {
            stage: stage.into(),
            path: path.into(),
        }
    }
}

/// Errors from loading and validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),
}

/// Errors from a single extraction attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {message}")]
    Transport { message: String },

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("server returned HTTP {status}")]
    Status { status: u16 },

    #[error("unknown entity: {name}")]
    UnknownEntity { name: String },

    #[error("could not persist payload to {}: {message}", path.display())]
    Persist { path: PathBuf, message: String },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Transport { .. } | FetchError::Timeout { .. } | FetchError::Status { .. }
        )
    }
}

/// Errors from the record store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {message}")]
    Connection { message: String },

    #[error("store rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("statement execution is not available: {message}")]
    Unsupported { message: String },

    #[error("invalid identifier: {name}")]
    InvalidIdentifier { name: String },

    #[error("insert failed: {message}")]
    Insert { message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A type alias for results using the top-level `EtlError`.
pub type Result<T> = std::result::Result<T, EtlError>;
