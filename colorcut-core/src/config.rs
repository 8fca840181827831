//! Layered configuration loading.
//!
//! Uses `figment` for layered configuration: defaults -> config files ->
//! environment. Configuration is loaded from `~/.config/colorcut/config.toml`
//! and/or `.colorcut/config.toml` in the workspace directory. The concrete
//! configuration type lives with the crate that owns its semantics; this
//! module only knows how to stack the sources.

use crate::error::CoreError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Directory inside a workspace that holds colorcut state.
pub const WORKSPACE_DIR: &str = ".colorcut";

/// Prefix for environment-variable overrides, e.g. `COLORCUT_TRAINING__BATCH_SIZE`.
pub const ENV_PREFIX: &str = "COLORCUT_";

const CONFIG_FILE: &str = "config.toml";

/// Platform project directories (config, data, logs).
pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "colorcut", "colorcut")
}

/// `~/.config/colorcut/config.toml` on Linux, platform equivalent elsewhere.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join(CONFIG_FILE))
}

/// `<workspace>/.colorcut/config.toml`.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join(CONFIG_FILE)
}

/// Directory for rolling log files.
pub fn log_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from(".").join(WORKSPACE_DIR).join("logs"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `COLORCUT_`, `__` separates sections)
/// 2. Explicit config file (`--config`)
/// 3. Workspace-local config (`.colorcut/config.toml`)
/// 4. User config (`~/.config/colorcut/config.toml`)
/// 5. Built-in defaults
///
/// CLI flags are applied by the caller on top of the returned value.
pub fn load_config<T>(workspace: Option<&Path>, explicit: Option<&Path>) -> Result<T, CoreError>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            tracing::debug!(path = %user_config.display(), "Merging user config");
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            tracing::debug!(path = %ws_config.display(), "Merging workspace config");
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(CoreError::MissingConfigFile {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    Ok(figment.extract()?)
}

/// Check whether any colorcut configuration file exists (user or workspace level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Write `config` as TOML to the workspace config path.
///
/// Returns `Ok(None)` without touching anything when the file already exists.
pub fn write_workspace_config<T: Serialize>(
    workspace: &Path,
    config: &T,
) -> Result<Option<PathBuf>, CoreError> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Ok(None);
    }
    let rendered = toml::to_string_pretty(config)?;
    crate::persistence::atomic_write(&path, rendered.as_bytes())?;
    Ok(Some(path))
}
