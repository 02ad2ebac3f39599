//! forge::traits
//!
//! Remote collaborator contracts: the object-graph API and the
//! content-commit API, plus the wire types they exchange.
//!
//! # Design
//!
//! Both traits are async because every call is a network round trip, and
//! both take the target [`Repository`] per call so a single client can
//! serve a base repository and its fork.
//!
//! - [`GitDatabase`] works with immutable, content-addressed objects:
//!   blobs, trees, commits, plus references and pull requests.
//! - [`ContentCommits`] reads files by path expression against a commit
//!   and submits a whole set of named file changes as one commit on a
//!   branch, guarded by an expected head.
//!
//! Implementations never retry. Errors keep their kind so callers can tell
//! a missing object from an authentication or transport failure.
//!
//! # Example
//!
//! ```
//! use patchpr::core::types::Repository;
//! use patchpr::forge::mock::MockRepository;
//! use patchpr::forge::GitDatabase;
//!
//! # tokio_test::block_on(async {
//! let repo = Repository::new("octocat", "hello-world");
//! let mock = MockRepository::new();
//! let base = mock.seed(&repo, "main", &[("README.md", "hi\n")]);
//!
//! let tree = mock.get_tree(&repo, &base.tree).await.unwrap();
//! assert_eq!(tree.entries[0].path, "README.md");
//! # });
//! ```

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{FileMode, Repository};

/// Errors from remote operations.
///
/// These map to the failure modes of the GitHub REST and GraphQL APIs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForgeError {
    /// Authentication is required but not available.
    #[error("authentication required")]
    AuthRequired,

    /// Authentication failed (invalid token, expired, insufficient permissions).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded.
    #[error("rate limited")]
    RateLimited,

    /// API returned an error.
    #[error("API error: {status} - {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Network or connection error.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The operation is not supported by this remote.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The branch no longer points at the expected head commit.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Kind of object a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    Commit,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Blob => write!(f, "blob"),
            EntryKind::Tree => write!(f, "tree"),
            EntryKind::Commit => write!(f, "commit"),
        }
    }
}

/// One entry of a fetched tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Name within the tree (a single path segment)
    pub path: String,
    pub mode: FileMode,
    pub kind: EntryKind,
    /// Hash of the referenced object
    pub sha: String,
}

/// A fetched, non-recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    pub sha: String,
    pub entries: Vec<TreeEntry>,
    /// The remote omitted entries from the listing
    pub truncated: bool,
}

impl Tree {
    /// Find an entry by name and kind.
    pub fn find(&self, name: &str, kind: EntryKind) -> Option<&TreeEntry> {
        self.entries
            .iter()
            .find(|e| e.path == name && e.kind == kind)
    }
}

/// What a tree update points the path at.
#[derive(Clone, PartialEq, Eq)]
pub enum TreeObject {
    /// An existing blob, by hash.
    Blob(String),
    /// Raw content not yet stored as a blob.
    Content(Vec<u8>),
    /// Remove the path.
    Delete,
}

impl fmt::Debug for TreeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeObject::Blob(sha) => f.debug_tuple("Blob").field(sha).finish(),
            TreeObject::Content(bytes) => write!(f, "Content({} bytes)", bytes.len()),
            TreeObject::Delete => write!(f, "Delete"),
        }
    }
}

/// A change to one path, applied on top of a base tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntryUpdate {
    /// Full slash-separated path from the repository root
    pub path: String,
    pub mode: FileMode,
    pub object: TreeObject,
}

impl TreeEntryUpdate {
    pub fn blob(path: impl Into<String>, mode: FileMode, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode,
            object: TreeObject::Blob(sha.into()),
        }
    }

    pub fn content(path: impl Into<String>, mode: FileMode, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            mode,
            object: TreeObject::Content(content),
        }
    }

    /// Remove `path`, which currently has `mode`.
    pub fn delete(path: impl Into<String>, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            mode,
            object: TreeObject::Delete,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.object, TreeObject::Delete)
    }
}

/// Author or committer of a commit.
///
/// A missing date lets the remote assign the current time, and an empty
/// name and email let it assign the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitAuthor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<FixedOffset>>,
}

/// A commit as returned by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Commit {
    pub sha: String,
    /// Hash of the root tree
    pub tree: String,
    pub parents: Vec<String>,
    pub message: String,
    pub author: Option<CommitAuthor>,
    pub committer: Option<CommitAuthor>,
}

/// Request to create a commit object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewCommit {
    pub message: String,
    pub tree: String,
    pub parents: Vec<String>,
    /// Remote-assigned identity when `None`
    pub author: Option<CommitAuthor>,
    pub committer: Option<CommitAuthor>,
}

/// A reference and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    /// Fully qualified name, e.g. `refs/heads/main`
    pub name: String,
    pub sha: String,
}

/// Request to create a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewPullRequest {
    pub title: String,
    /// Head branch name, or `owner:branch` for cross-repository requests
    pub head: String,
    /// Base branch name
    pub base: String,
    pub body: Option<String>,
    pub draft: bool,
    pub maintainer_can_modify: bool,
}

/// Pull request information returned from the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    /// Web URL for viewing
    pub url: String,
    pub head: String,
    pub base: String,
    pub title: String,
}

/// Repository metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub repository: Repository,
    pub default_branch: String,
    /// Whether this repository is a fork of another
    pub fork: bool,
}

/// Result of reading a file through a path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLookup {
    /// Hash of the blob
    pub oid: String,
    /// File text; `None` for binary content
    pub text: Option<String>,
    /// The remote cut the text short
    pub truncated: bool,
}

impl BlobLookup {
    /// Whether the text is complete and usable as file content.
    pub fn is_readable(&self) -> bool {
        self.text.is_some() && !self.truncated
    }
}

/// New content for one path in a content commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAddition {
    pub path: String,
    pub contents: Vec<u8>,
}

/// The named file changes of one content commit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileChanges {
    pub additions: Vec<FileAddition>,
    pub deletions: Vec<String>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }
}

/// Request to commit named file changes on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCommit {
    /// Fully qualified branch name, e.g. `refs/heads/patchpr`
    pub branch: String,
    /// Commit the branch must currently point at
    pub expected_head: String,
    pub headline: String,
    pub body: String,
    pub changes: FileChanges,
}

/// The object-graph API.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Error Handling
///
/// All methods return `Result<T, ForgeError>`. `NotFound` means the object
/// or reference does not exist; everything else is a remote or transport
/// failure.
#[async_trait]
pub trait GitDatabase: Send + Sync {
    /// Fetch a tree listing (non-recursive) by hash.
    async fn get_tree(&self, repo: &Repository, sha: &str) -> Result<Tree, ForgeError>;

    /// Fetch blob content by hash.
    async fn get_blob(&self, repo: &Repository, sha: &str) -> Result<Vec<u8>, ForgeError>;

    /// Store content as a blob and return its hash.
    async fn create_blob(&self, repo: &Repository, content: &[u8]) -> Result<String, ForgeError>;

    /// Create a tree from `base` plus `updates` and return its hash.
    ///
    /// Update paths are full paths; intermediate trees are created or
    /// removed by the remote. Order of `updates` is not significant.
    async fn create_tree(
        &self,
        repo: &Repository,
        base: &str,
        updates: &[TreeEntryUpdate],
    ) -> Result<String, ForgeError>;

    /// Fetch a commit by hash.
    async fn get_commit(&self, repo: &Repository, sha: &str) -> Result<Commit, ForgeError>;

    /// Create a commit object.
    async fn create_commit(&self, repo: &Repository, commit: &NewCommit)
        -> Result<Commit, ForgeError>;

    /// Look up a fully qualified reference. Returns `None` if it does not
    /// exist.
    async fn get_ref(&self, repo: &Repository, name: &str) -> Result<Option<GitRef>, ForgeError>;

    /// Create a reference.
    ///
    /// # Errors
    ///
    /// - `ApiError` with status 422 if the reference already exists
    async fn create_ref(&self, repo: &Repository, name: &str, sha: &str)
        -> Result<GitRef, ForgeError>;

    /// Move an existing reference.
    ///
    /// # Errors
    ///
    /// - `ApiError` with status 422 if the update is not a fast-forward and
    ///   `force` is false
    async fn update_ref(
        &self,
        repo: &Repository,
        name: &str,
        sha: &str,
        force: bool,
    ) -> Result<GitRef, ForgeError>;

    /// Open a pull request.
    async fn create_pull_request(
        &self,
        repo: &Repository,
        request: &NewPullRequest,
    ) -> Result<PullRequest, ForgeError>;

    /// Fetch repository metadata.
    async fn get_repository(&self, repo: &Repository) -> Result<RepositoryInfo, ForgeError>;

    /// Fork `repo` into the authenticated account.
    ///
    /// The fork may not be readable yet when this returns.
    async fn create_fork(&self, repo: &Repository) -> Result<RepositoryInfo, ForgeError>;
}

/// The content-commit API.
#[async_trait]
pub trait ContentCommits: Send + Sync {
    /// Read a file at `path` in `commit`. Returns `None` if the path does
    /// not name a blob.
    async fn lookup_blob(
        &self,
        repo: &Repository,
        commit: &str,
        path: &str,
    ) -> Result<Option<BlobLookup>, ForgeError>;

    /// List the names and modes of blobs directly inside `directory` in
    /// `commit`. The empty string is the root.
    async fn list_modes(
        &self,
        repo: &Repository,
        commit: &str,
        directory: &str,
    ) -> Result<Vec<(String, FileMode)>, ForgeError>;

    /// Commit `request.changes` atomically on `request.branch` and return
    /// the new commit hash.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the branch does not point at `request.expected_head`
    async fn create_commit_on_branch(
        &self,
        repo: &Repository,
        request: &BranchCommit,
    ) -> Result<String, ForgeError>;
}
