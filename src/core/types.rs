//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Repository`] - A hosted repository identified by owner and name
//! - [`FileMode`] - Git file mode (octal, e.g. `100644`)
//! - [`Identity`] - Name and email of a commit author or committer
//! - [`PatchHeader`] - Commit metadata carried by a patch preamble
//!
//! # Examples
//!
//! ```
//! use patchpr::core::types::{FileMode, Repository};
//!
//! let repo = Repository::parse("octocat/hello-world").unwrap();
//! assert_eq!(repo.to_string(), "octocat/hello-world");
//!
//! assert_eq!(FileMode::default().to_string(), "100644");
//! assert!(Repository::parse("missing-slash").is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid repository '{input}': {reason}")]
    InvalidRepository { input: String, reason: &'static str },

    #[error("invalid file mode: {0}")]
    InvalidFileMode(String),
}

/// A hosted repository, identified by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    /// User or organization that owns the repository
    pub owner: String,
    /// Repository name
    pub name: String,
}

impl Repository {
    /// Create a repository identifier without validation.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse a repository from `owner/name` format.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRepository` if the slash is missing or
    /// either side of it is empty.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let (owner, name) = s.split_once('/').ok_or(TypeError::InvalidRepository {
            input: s.to_string(),
            reason: "missing slash",
        })?;
        if owner.is_empty() || name.is_empty() {
            return Err(TypeError::InvalidRepository {
                input: s.to_string(),
                reason: "missing owner or name",
            });
        }
        Ok(Self::new(owner, name))
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.owner.is_empty() && self.name.is_empty() {
            return Ok(());
        }
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for Repository {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A git file mode.
///
/// Stored as the numeric mode and rendered in octal, the way git trees and
/// the GitHub API spell it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    /// Regular, non-executable file. Used when nothing else specifies a mode.
    pub const REGULAR: FileMode = FileMode(0o100644);
    /// Executable file.
    pub const EXECUTABLE: FileMode = FileMode(0o100755);
    /// Symbolic link.
    pub const SYMLINK: FileMode = FileMode(0o120000);
    /// Directory (tree).
    pub const TREE: FileMode = FileMode(0o040000);
    /// Submodule (gitlink).
    pub const GITLINK: FileMode = FileMode(0o160000);

    /// Create a mode from its numeric value.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The numeric value of the mode.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Parse an octal mode string such as `100755`.
    pub fn parse_octal(s: &str) -> Result<Self, TypeError> {
        u32::from_str_radix(s.trim(), 8)
            .map(Self)
            .map_err(|_| TypeError::InvalidFileMode(s.to_string()))
    }

    /// Whether this is the default regular-file mode.
    pub fn is_regular(self) -> bool {
        self == Self::REGULAR
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self::REGULAR
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.0)
    }
}

impl Serialize for FileMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FileMode::parse_octal(&s).map_err(serde::de::Error::custom)
    }
}

/// Name and email of a person in a patch header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parse `Name <email>`. A bare address without brackets is accepted as
    /// an email with an empty name.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        match (s.find('<'), s.rfind('>')) {
            (Some(open), Some(close)) if open < close => Some(Self::new(
                s[..open].trim().trim_matches('"'),
                s[open + 1..close].trim(),
            )),
            _ if s.contains('@') => Some(Self::new("", s)),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Commit metadata parsed from a patch preamble.
///
/// Every field is optional; appliers fall back to templates, defaults, or
/// values assigned by the remote for anything missing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchHeader {
    pub title: String,
    pub body: String,
    pub author: Option<Identity>,
    pub author_date: Option<DateTime<FixedOffset>>,
    pub committer: Option<Identity>,
    pub committer_date: Option<DateTime<FixedOffset>>,
}

impl PatchHeader {
    /// Create a header carrying only a message.
    pub fn with_message(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// The full commit message: title, then a blank line and the body if
    /// there is one.
    pub fn message(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else if self.title.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod repository {
        use super::*;

        #[test]
        fn parses_owner_and_name() {
            let repo = Repository::parse("octocat/hello-world").unwrap();
            assert_eq!(repo.owner, "octocat");
            assert_eq!(repo.name, "hello-world");
        }

        #[test]
        fn name_may_contain_slashes_after_the_first() {
            let repo = Repository::parse("octocat/a/b").unwrap();
            assert_eq!(repo.owner, "octocat");
            assert_eq!(repo.name, "a/b");
        }

        #[test]
        fn rejects_missing_slash() {
            let err = Repository::parse("octocat").unwrap_err();
            assert!(err.to_string().contains("missing slash"));
        }

        #[test]
        fn rejects_empty_parts() {
            assert!(Repository::parse("/name").is_err());
            assert!(Repository::parse("owner/").is_err());
        }

        #[test]
        fn display_of_empty_is_empty() {
            assert_eq!(Repository::new("", "").to_string(), "");
        }
    }

    mod file_mode {
        use super::*;

        #[test]
        fn displays_as_six_octal_digits() {
            assert_eq!(FileMode::REGULAR.to_string(), "100644");
            assert_eq!(FileMode::EXECUTABLE.to_string(), "100755");
            assert_eq!(FileMode::TREE.to_string(), "040000");
        }

        #[test]
        fn parses_octal() {
            assert_eq!(FileMode::parse_octal("100755").unwrap(), FileMode::EXECUTABLE);
            assert_eq!(FileMode::parse_octal("40000").unwrap(), FileMode::TREE);
            assert!(FileMode::parse_octal("10089").is_err());
        }

        #[test]
        fn serde_uses_octal_strings() {
            let json = serde_json::to_string(&FileMode::SYMLINK).unwrap();
            assert_eq!(json, "\"120000\"");
            let back: FileMode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, FileMode::SYMLINK);
        }
    }

    mod identity {
        use super::*;

        #[test]
        fn parses_name_and_email() {
            let id = Identity::parse("Morton Haypenny <mhaypenny@example.com>").unwrap();
            assert_eq!(id.name, "Morton Haypenny");
            assert_eq!(id.email, "mhaypenny@example.com");
        }

        #[test]
        fn parses_bare_email() {
            let id = Identity::parse("dev@example.com").unwrap();
            assert_eq!(id.name, "");
            assert_eq!(id.email, "dev@example.com");
        }

        #[test]
        fn rejects_garbage() {
            assert!(Identity::parse("").is_none());
            assert!(Identity::parse("no email here").is_none());
        }
    }

    #[test]
    fn header_message_joins_title_and_body() {
        let header = PatchHeader::with_message("Fix bug", "Details here.");
        assert_eq!(header.message(), "Fix bug\n\nDetails here.");

        let title_only = PatchHeader::with_message("Fix bug", "");
        assert_eq!(title_only.message(), "Fix bug");

        assert_eq!(PatchHeader::default().message(), "");
    }
}
