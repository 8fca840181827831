//! # colorcut-core: shared foundation for the colorcut workspace
//!
//! Layered configuration loading, the core error type, and atomic
//! persistence helpers used by the ML pipeline and the CLI.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{config_exists, load_config};
pub use error::CoreError;
