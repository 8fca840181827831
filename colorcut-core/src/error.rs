//! Error types shared across the colorcut workspace.
//!
//! Uses `thiserror` for public API error types covering configuration and
//! persistence failures.

use std::path::PathBuf;

/// Top-level error type for the colorcut core library.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration file not found: {}", path.display())]
    MissingConfigFile { path: PathBuf },

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<figment::Error> for CoreError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
