//! Per-user home directory layout and configuration.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::similarity::{
    MatchOptions, DEFAULT_FUNCTION_COUNT_TOLERANCE, DEFAULT_MAX_DISTANCE,
};
use crate::services::host::DEFAULT_BACKEND;

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "BINTAG_HOME";

/// Directory name created under `$HOME`.
pub const HOME_DIR_NAME: &str = ".bintag";

pub const CONFIG_VERSION: &str = "0.1.0";

/// Logical layout of the bintag home directory.
///
/// Does not touch the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinTagLayout {
    pub root: PathBuf,
    /// `config.json` under the root.
    pub config_path: PathBuf,
    /// One file per tag, named after the tag.
    pub tags_dir: PathBuf,
}

impl BinTagLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let config_path = root.join("config.json");
        let tags_dir = root.join("tags");
        Self { root, config_path, tags_dir }
    }

    /// Layout for the home resolved by [`resolve_home`].
    pub fn resolve(flag: Option<&Path>) -> Self {
        Self::new(resolve_home(flag))
    }
}

/// Resolve the home directory: `flag`, else `$BINTAG_HOME`, else `$HOME/.bintag`,
/// else `/tmp` when `HOME` is unset.
pub fn resolve_home(flag: Option<&Path>) -> PathBuf {
    resolve_home_from(flag, env::var_os(HOME_ENV), env::var_os("HOME"))
}

fn resolve_home_from(
    flag: Option<&Path>,
    bintag_home: Option<OsString>,
    home: Option<OsString>,
) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(path) = bintag_home.filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    match home.filter(|v| !v.is_empty()) {
        Some(home) => PathBuf::from(home).join(HOME_DIR_NAME),
        None => PathBuf::from("/tmp"),
    }
}

/// Serializable configuration stored at `config.json`.
///
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinTagConfig {
    /// Schema/config version. This is about the config format, not the tool version.
    pub config_version: String,
    /// Host backend used when the CLI does not name one.
    pub default_backend: String,
    /// Matches at or above this distance are not reported.
    pub max_distance: f64,
    /// Tags whose function-count ratio exceeds this are skipped.
    pub function_count_tolerance: f64,
    /// Optional per-function instruction cap passed to disassembling hosts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instructions_per_function: Option<usize>,
}

impl Default for BinTagConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION.to_string(),
            default_backend: DEFAULT_BACKEND.to_string(),
            max_distance: DEFAULT_MAX_DISTANCE,
            function_count_tolerance: DEFAULT_FUNCTION_COUNT_TOLERANCE,
            max_instructions_per_function: None,
        }
    }
}

impl BinTagConfig {
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            max_distance: self.max_distance,
            function_count_tolerance: self.function_count_tolerance,
        }
    }
}

/// Load the config JSON for `layout`; a missing file yields the defaults.
pub fn load_config(layout: &BinTagLayout) -> Result<BinTagConfig> {
    if !layout.config_path.exists() {
        debug!(path = %layout.config_path.display(), "no config file, using defaults");
        return Ok(BinTagConfig::default());
    }
    let config_json = fs::read_to_string(&layout.config_path).with_context(|| {
        format!("Failed to read config at {}", layout.config_path.display())
    })?;
    let config: BinTagConfig = serde_json::from_str(&config_json)
        .with_context(|| format!("Failed to parse config JSON at {}", layout.config_path.display()))?;
    Ok(config)
}

/// Create the home and tag directories, and write a default config if none exists.
///
/// Returns `true` when a config file was written.
pub fn init_home(layout: &BinTagLayout) -> Result<bool> {
    fs::create_dir_all(&layout.tags_dir)
        .with_context(|| format!("Failed to create tags dir: {}", layout.tags_dir.display()))?;
    if layout.config_path.exists() {
        return Ok(false);
    }
    let json = serde_json::to_string_pretty(&BinTagConfig::default())?;
    fs::write(&layout.config_path, json + "\n").with_context(|| {
        format!("Failed to write config: {}", layout.config_path.display())
    })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_resolution_order() {
        let flag = PathBuf::from("/flag");
        assert_eq!(
            resolve_home_from(Some(&flag), Some("/env".into()), Some("/home/u".into())),
            flag
        );
        assert_eq!(
            resolve_home_from(None, Some("/env".into()), Some("/home/u".into())),
            PathBuf::from("/env")
        );
        assert_eq!(
            resolve_home_from(None, Some("".into()), Some("/home/u".into())),
            PathBuf::from("/home/u/.bintag")
        );
        assert_eq!(resolve_home_from(None, None, None), PathBuf::from("/tmp"));
    }

    #[test]
    fn missing_config_yields_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let layout = BinTagLayout::new(temp.path());
        let config = load_config(&layout).unwrap();
        assert_eq!(config, BinTagConfig::default());
        assert_eq!(config.match_options(), MatchOptions::default());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let layout = BinTagLayout::new(temp.path());
        fs::write(&layout.config_path, r#"{"max_distance": 2.5}"#).unwrap();
        let config = load_config(&layout).unwrap();
        assert_eq!(config.max_distance, 2.5);
        assert_eq!(config.default_backend, DEFAULT_BACKEND);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let layout = BinTagLayout::new(temp.path());
        fs::write(&layout.config_path, "{not json").unwrap();
        let err = load_config(&layout).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config JSON"));
    }

    #[test]
    fn init_home_writes_config_once() {
        let temp = tempfile::tempdir().unwrap();
        let layout = BinTagLayout::new(temp.path().join("home"));
        assert!(init_home(&layout).unwrap());
        assert!(layout.tags_dir.is_dir());
        assert!(!init_home(&layout).unwrap());
        assert_eq!(load_config(&layout).unwrap(), BinTagConfig::default());
    }
}
