//! # ssp-config
//!
//! Configuration management for the ssp sandbox.
//!
//! Loads configuration from:
//! 1. `~/.ssp/config.toml` (global)
//! 2. `.ssp/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(PoisonError::into_inner)
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid preopen {0:?}: expected HOST or HOST::GUEST")]
    Preopen(String),
    #[error("invalid log level {0:?}")]
    LogLevel(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.ssp/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                config = Self::load_file(&global_path)?;
            }
        }

        // 2. Load project config (.ssp/config.toml) - overrides global
        let project_path = Self::project_config_path();
        if project_path.exists() {
            config.merge(Self::load_file(&project_path)?);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Parse a single config file, without merging or env overrides.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.ssp/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".ssp/config.toml"))
    }

    /// Project config path, relative to the working directory.
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".ssp/config.toml")
    }

    /// Merge a project config over this one. Lists replace when non-empty.
    pub fn merge(&mut self, other: Config) {
        if !other.sandbox.preopens.is_empty() {
            self.sandbox.preopens = other.sandbox.preopens;
        }
        if !other.sandbox.args.is_empty() {
            self.sandbox.args = other.sandbox.args;
        }
        if !other.sandbox.env.is_empty() {
            self.sandbox.env = other.sandbox.env;
        }
        if other.sandbox.inherit_stdio != SandboxConfig::default().inherit_stdio {
            self.sandbox.inherit_stdio = other.sandbox.inherit_stdio;
        }
        if other.logging.level != LoggingConfig::default().level {
            self.logging.level = other.logging.level;
        }
    }

    /// Apply `SSP_PREOPENS` and `SSP_LOG_LEVEL` as returned by `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(list) = lookup("SSP_PREOPENS") {
            self.sandbox.preopens = list
                .split(',')
                .filter(|s| !s.is_empty())
                .map(PreopenConfig::from_str)
                .collect::<Result<_, _>>()?;
        }
        if let Some(level) = lookup("SSP_LOG_LEVEL") {
            logging::LogLevel::from_str(&level)?;
            self.logging.level = level;
        }
        Ok(())
    }

    /// Render the effective configuration.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml().unwrap_or_default()
    }
}

/// Sandbox construction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Expose the host's stdin, stdout and stderr as handles 0..=2
    pub inherit_stdio: bool,
    pub args: Vec<String>,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    /// Host directories exposed to the guest
    pub preopens: Vec<PreopenConfig>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            inherit_stdio: true,
            args: Vec::new(),
            env: Vec::new(),
            preopens: Vec::new(),
        }
    }
}

/// One preopened directory: `host` on disk, named `guest` inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreopenConfig {
    pub host: PathBuf,
    pub guest: String,
}

impl FromStr for PreopenConfig {
    type Err = ConfigError;

    /// `HOST::GUEST`, or `HOST` alone to reuse the host path as the guest name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, guest) = match s.split_once("::") {
            Some((host, guest)) => (host, guest),
            None => (s, s),
        };
        if host.is_empty() || guest.is_empty() {
            return Err(ConfigError::Preopen(s.to_owned()));
        }
        Ok(Self {
            host: PathBuf::from(host),
            guest: guest.to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// error, warn, info, debug or trace
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn log_level(&self) -> Result<logging::LogLevel, ConfigError> {
        self.level.parse()
    }
}
