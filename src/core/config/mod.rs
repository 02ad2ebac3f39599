//! core::config
//!
//! Configuration schema and loading.
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Config file
//! 3. Environment (`GITHUB_TOKEN`, `GIT_AUTHOR_*`, `GIT_COMMITTER_*`)
//! 4. CLI flags (not handled here)
//!
//! # Config Locations
//!
//! Searched in order:
//! 1. `$PATCHPR_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/patchpr/config.toml`
//! 3. `~/.patchpr/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use patchpr::core::config::Config;
//!
//! let config = Config::load().unwrap();
//! println!("API: {}", config.api_url());
//! println!("Head branch: {}", config.head_branch());
//! ```

pub mod schema;

pub use schema::{CommitSection, FileConfig, ForkSection, GitHubSection};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::applier::{ApplierOptions, Materialize, StrategyKind, DEFAULT_COMMIT_MESSAGE};
use crate::fork::Backoff;

/// Default GitHub REST API base URL.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Default branch that receives new commits.
pub const DEFAULT_HEAD_BRANCH: &str = "patchpr";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Configuration with defaults applied.
///
/// Accessors resolve each value against the file contents and fall back to
/// the built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Parsed file contents
    pub file: FileConfig,
    /// Path the file was loaded from (if any)
    path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed or
    /// fails validation. A missing config file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let file: FileConfig = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        file.validate()?;

        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(Self {
            file,
            path: Some(path.to_path_buf()),
        })
    }

    /// Locate the first existing config file.
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check $PATCHPR_CONFIG
        if let Ok(path) = std::env::var("PATCHPR_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Check $XDG_CONFIG_HOME/patchpr/config.toml
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("patchpr/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        // 3. Check ~/.patchpr/config.toml
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".patchpr/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Path of the loaded config file, if one was found.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// GitHub REST API base URL, without a trailing slash.
    pub fn api_url(&self) -> &str {
        self.file
            .github
            .as_ref()
            .and_then(|g| g.url.as_deref())
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
    }

    /// Per-request timeout for API calls.
    pub fn timeout(&self) -> Duration {
        let secs = self
            .file
            .github
            .as_ref()
            .and_then(|g| g.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Branch that receives new commits.
    pub fn head_branch(&self) -> &str {
        self.commit()
            .and_then(|c| c.head_branch.as_deref())
            .unwrap_or(DEFAULT_HEAD_BRANCH)
    }

    /// Selected applier strategy.
    pub fn strategy(&self) -> StrategyKind {
        self.commit().and_then(|c| c.strategy).unwrap_or_default()
    }

    /// Options handed to appliers at construction.
    pub fn applier_options(&self) -> ApplierOptions {
        let commit = self.commit();
        ApplierOptions {
            default_message: commit
                .and_then(|c| c.message.clone())
                .unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string()),
            materialize: commit
                .and_then(|c| c.materialize)
                .unwrap_or(Materialize::Eager),
        }
    }

    /// Backoff policy for fork readiness polling.
    pub fn fork_backoff(&self) -> Backoff {
        let defaults = Backoff::default();
        let Some(fork) = self.file.fork.as_ref() else {
            return defaults;
        };
        Backoff {
            initial_delay: fork
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: fork
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            timeout: fork
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    fn commit(&self) -> Option<&CommitSection> {
        self.file.commit.as_ref()
    }
}
