//! Config file discovery, loading, and environment variable overlay.

use crate::{CaptureMethod, ConfigError, MuffleConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Values set by one config file. Unset keys leave earlier layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub method: Option<CaptureMethod>,
    pub log_level: Option<String>,
}

impl ConfigLayer {
    /// Overlay this layer onto `config`.
    pub fn apply(self, config: &mut MuffleConfig) {
        if let Some(method) = self.method {
            config.capture.method = method;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/muffle/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("muffle/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("muffle.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load a config layer from a TOML file.
pub fn load_from_file(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<ConfigLayer, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_error(e.to_string()))?;

    let mut layer = ConfigLayer::default();

    if let Some(capture) = table.get("capture").and_then(|v| v.as_table()) {
        if let Some(v) = capture.get("method") {
            let raw = v
                .as_str()
                .ok_or_else(|| parse_error("capture.method must be a string".to_string()))?;
            let method = raw.parse().map_err(|e: ConfigError| parse_error(e.to_string()))?;
            layer.method = Some(method);
        }
    }

    if let Some(logging) = table.get("logging").and_then(|v| v.as_table()) {
        if let Some(v) = logging.get("level").and_then(|v| v.as_str()) {
            layer.log_level = Some(v.to_string());
        }
    }

    Ok(layer)
}

/// Apply environment variable overrides to config.
///
/// An unparseable `MUFFLE_CAPTURE` is an error, not ignored.
pub fn apply_env_overrides(
    config: &mut MuffleConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    if let Ok(v) = env::var("MUFFLE_CAPTURE") {
        config.capture.method = v.parse()?;
        sources.env_overrides.push("MUFFLE_CAPTURE".to_string());
    }

    if let Ok(v) = env::var("MUFFLE_LOG") {
        config.logging.level = v;
        sources.env_overrides.push("MUFFLE_LOG".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.logging.level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    Ok(())
}
