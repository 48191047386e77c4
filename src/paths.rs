//! Where config and cache live on disk.

use anyhow::{anyhow, Context, Result};
use homedir::my_home;
use std::path::PathBuf;

const APP_DIR: &str = "intent-classifier";

/// `$INTENT_CLASSIFIER_CONFIG_DIR`, `$XDG_CONFIG_HOME/intent-classifier`,
/// or `~/.config/intent-classifier`.
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = env_path("INTENT_CLASSIFIER_CONFIG_DIR") {
        return Ok(dir);
    }
    if let Some(xdg) = env_path("XDG_CONFIG_HOME") {
        return Ok(xdg.join(APP_DIR));
    }
    if cfg!(windows) {
        if let Some(app_data) = env_path("APPDATA") {
            return Ok(app_data.join(APP_DIR));
        }
    }
    Ok(home()?.join(".config").join(APP_DIR))
}

/// Per-user cache root.
pub fn cache_root(cache_override: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = env_path("INTENT_CLASSIFIER_CACHE_DIR") {
        return Ok(dir);
    }
    if let Some(dir) = cache_override {
        return Ok(dir);
    }
    if cfg!(windows) {
        if let Some(local) = env_path("LOCALAPPDATA") {
            return Ok(local.join(APP_DIR));
        }
        return Ok(home()?.join("AppData").join("Local").join(APP_DIR));
    }
    if let Some(xdg) = env_path("XDG_CACHE_HOME") {
        return Ok(xdg.join(APP_DIR));
    }
    Ok(home()?.join(".cache").join(APP_DIR))
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn home() -> Result<PathBuf> {
    my_home()
        .map_err(|e| anyhow!("Could not determine home directory: {e:?}"))?
        .context("Home directory path is empty")
}
