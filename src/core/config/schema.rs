//! core::config::schema
//!
//! Configuration schema types.
//!
//! Located at (in order of precedence):
//! 1. `$PATCHPR_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/patchpr/config.toml`
//! 3. `~/.patchpr/config.toml`
//!
//! # Validation
//!
//! Config values are validated after parsing so that nonsensical timeouts
//! and backoff settings are rejected before any network call is made.

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::applier::{Materialize, StrategyKind};

/// Configuration file contents.
///
/// # Example
///
/// ```toml
/// [github]
/// url = "https://github.example.com/api/v3"
/// timeout_secs = 30
///
/// [commit]
/// message = "Apply automated patch"
/// materialize = "deferred"
/// strategy = "content"
/// head_branch = "bot/patches"
///
/// [fork]
/// initial_delay_ms = 250
/// max_delay_ms = 4000
/// timeout_secs = 120
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// GitHub API settings
    pub github: Option<GitHubSection>,

    /// Commit construction defaults
    pub commit: Option<CommitSection>,

    /// Fork readiness polling
    pub fork: Option<ForkSection>,
}

impl FileConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(github) = &self.github {
            if github.timeout_secs == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "github.timeout_secs must be greater than zero".to_string(),
                ));
            }
            if let Some(url) = &github.url {
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err(ConfigError::InvalidValue(format!(
                        "github.url must be an http(s) URL, got '{}'",
                        url
                    )));
                }
            }
        }

        if let Some(commit) = &self.commit {
            if let Some(branch) = &commit.head_branch {
                if branch.is_empty() {
                    return Err(ConfigError::InvalidValue(
                        "commit.head_branch cannot be empty".to_string(),
                    ));
                }
            }
        }

        if let Some(fork) = &self.fork {
            if fork.timeout_secs == Some(0) || fork.initial_delay_ms == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "fork delays and timeouts must be greater than zero".to_string(),
                ));
            }
            if let (Some(initial), Some(max)) = (fork.initial_delay_ms, fork.max_delay_ms) {
                if max < initial {
                    return Err(ConfigError::InvalidValue(format!(
                        "fork.max_delay_ms ({}) is less than fork.initial_delay_ms ({})",
                        max, initial
                    )));
                }
            }
        }

        Ok(())
    }
}

/// `[github]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GitHubSection {
    /// REST API base URL (GitHub Enterprise uses `https://host/api/v3`)
    pub url: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// `[commit]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CommitSection {
    /// Message used when neither the patch nor the caller provides one
    pub message: Option<String>,

    /// When computed content is uploaded as blobs
    pub materialize: Option<Materialize>,

    /// Which applier builds commits
    pub strategy: Option<StrategyKind>,

    /// Branch that receives the new commits
    pub head_branch: Option<String>,
}

/// `[fork]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ForkSection {
    /// First delay between readiness polls
    pub initial_delay_ms: Option<u64>,

    /// Ceiling for any single delay
    pub max_delay_ms: Option<u64>,

    /// Total time to wait before giving up
    pub timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_valid() {
        assert!(FileConfig::default().validate().is_ok());
    }

    #[test]
    fn parses_all_sections() {
        let config: FileConfig = toml::from_str(
            r#"
            [github]
            url = "https://github.example.com/api/v3"
            timeout_secs = 30

            [commit]
            message = "Automated"
            materialize = "deferred"
            strategy = "content"
            head_branch = "bot/patches"

            [fork]
            initial_delay_ms = 100
            max_delay_ms = 1000
            timeout_secs = 10
            "#,
        )
        .unwrap();

        let commit = config.commit.as_ref().unwrap();
        assert_eq!(commit.materialize, Some(Materialize::Deferred));
        assert_eq!(commit.strategy, Some(StrategyKind::Content));
        assert_eq!(config.fork.as_ref().unwrap().max_delay_ms, Some(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = FileConfig {
            github: Some(GitHubSection {
                timeout_secs: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_delay_below_initial_rejected() {
        let config = FileConfig {
            fork: Some(ForkSection {
                initial_delay_ms: Some(500),
                max_delay_ms: Some(100),
                timeout_secs: None,
            }),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_delay_ms"));
    }

    #[test]
    fn non_http_url_rejected() {
        let config = FileConfig {
            github: Some(GitHubSection {
                url: Some("ftp://example.com".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("[commit]\nsquash = true\n");
        assert!(result.is_err());
    }
}
