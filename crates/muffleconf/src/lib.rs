//! Configuration loading for muffle.
//!
//! This crate owns the single selector that decides how output is captured
//! for a run, plus the log level used by binaries.
//!
//! # Usage
//!
//! ```rust,no_run
//! use muffleconf::MuffleConfig;
//!
//! let config = MuffleConfig::load().expect("Failed to load config");
//! println!("capture method: {}", config.capture.method);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/muffle/config.toml` (system)
//! 2. `~/.config/muffle/config.toml` (user)
//! 3. `./muffle.toml` (local override, or an explicit path)
//! 4. Environment variables (`MUFFLE_CAPTURE`, `MUFFLE_LOG`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [capture]
//! method = "fd"      # fd | sys | no | tee-sys
//!
//! [logging]
//! level = "info"
//! ```

pub mod loader;
pub mod method;

pub use loader::{discover_config_files_with_override, ConfigLayer, ConfigSources};
pub use method::CaptureMethod;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unknown capturing method: {0:?} (expected one of fd|sys|no|tee-sys)")]
    UnknownMethod(String),
}

/// `[capture]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CaptureConfig {
    /// Per-test capturing method.
    /// Default: fd
    #[serde(default)]
    pub method: CaptureMethod,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive.
    /// Default: warn
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "warn".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// Complete muffle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MuffleConfig {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MuffleConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/muffle/config.toml`
    /// 3. `~/.config/muffle/config.toml`
    /// 4. `./muffle.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./muffle.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = MuffleConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let layer = loader::load_from_file(&path)?;
            layer.apply(&mut config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources)?;

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# muffle configuration\n\n");

        output.push_str("[capture]\n");
        output.push_str(&format!("method = \"{}\"\n", self.capture.method));

        output.push_str("\n[logging]\n");
        output.push_str(&format!("level = \"{}\"\n", self.logging.level));

        output
    }
}
