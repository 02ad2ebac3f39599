//! applier
//!
//! Turns file patches into commits on the remote.
//!
//! # Architecture
//!
//! Two strategies share one contract, [`PatchApplier`]:
//!
//! - [`TreeApplier`] builds blobs, a tree, and a commit through the
//!   object-graph API. Existing entries are resolved lazily through a
//!   [`TreeCache`] scoped to the current base tree.
//! - [`ContentApplier`] keeps new file contents in memory and submits them
//!   as one commit-with-changes request on a branch. It cannot set file
//!   modes and reports such patches as [`ApplyError::Unsupported`].
//!
//! [`Strategy`] holds whichever one was chosen at construction.
//!
//! Every operation finishes its remote calls before it touches pending
//! state, so dropping an operation's future (for example through
//! `tokio::time::timeout`) leaves the applier as it was before the call.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use patchpr::applier::{ApplierOptions, TreeApplier};
//! use patchpr::core::types::Repository;
//! use patchpr::forge::mock::MockRepository;
//! use patchpr::patch;
//!
//! # tokio_test::block_on(async {
//! let repo = Repository::new("octocat", "hello-world");
//! let mock = MockRepository::new();
//! let base = mock.seed(&repo, "main", &[("a.txt", "hello\n")]);
//!
//! let mut applier = TreeApplier::new(Arc::new(mock.clone()), repo, ApplierOptions::default(), &base);
//! let parsed = patch::parse(b"\
//! diff --git a/a.txt b/a.txt
//! --- a/a.txt
//! +++ b/a.txt
//! @@ -1 +1 @@
//! -hello
//! +hello world
//! ").unwrap();
//! applier.apply(&parsed.files[0]).await.unwrap();
//!
//! let commit = applier.commit(None, None).await.unwrap();
//! assert_eq!(commit.parents, vec![base.sha]);
//! assert_eq!(mock.read_file(&commit.tree, "a.txt").unwrap().1, b"hello world\n");
//! # });
//! ```

pub mod cache;
mod content;
mod tree;

pub use cache::TreeCache;
pub use content::ContentApplier;
pub use tree::TreeApplier;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{FileMode, PatchHeader};
use crate::forge::{Commit, CommitAuthor, ForgeError};
use crate::patch::{FilePatch, PatchError};

/// Commit message used when neither the patch nor a template provides one.
pub const DEFAULT_COMMIT_MESSAGE: &str = "Apply patch with patchpr";

/// Errors from applying patches and committing.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A patch creates a path that already exists.
    #[error("cannot create {path}: entry already exists")]
    ExistingEntry { path: String },

    /// A patch modifies or deletes a path that does not exist.
    #[error("cannot apply patch to {path}: no entry exists")]
    MissingEntry { path: String },

    /// Commit was called with nothing staged and no uncommitted tree.
    #[error("nothing to commit: no pending changes")]
    NothingPending,

    /// A reference that must be a branch is not under `refs/heads/`.
    #[error("reference {name} is not a branch")]
    NotABranch { name: String },

    /// The content strategy cannot express this patch.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A remote call failed.
    #[error("{op} {target}: {source}")]
    Remote {
        /// Operation that failed, e.g. `get tree`
        op: &'static str,
        /// Hash, path, or reference involved
        target: String,
        #[source]
        source: ForgeError,
    },

    /// The patch does not apply.
    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl ApplyError {
    /// Whether the error means the content strategy cannot handle the
    /// patch, so the tree strategy may succeed instead.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ApplyError::Unsupported(_))
    }

    /// Whether the remote rejected a content commit because the branch
    /// moved.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ApplyError::Remote {
                source: ForgeError::Conflict(_),
                ..
            }
        )
    }

    /// Adapter for `map_err` that tags a remote error.
    pub(crate) fn remote(op: &'static str, target: &str) -> impl FnOnce(ForgeError) -> Self {
        let target = target.to_string();
        move |source| ApplyError::Remote { op, target, source }
    }
}

/// When computed content is stored as a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialize {
    /// Create the blob as soon as the patch is applied and keep only its
    /// hash.
    #[default]
    Eager,
    /// Keep the content in memory and send it with the tree.
    Deferred,
}

impl FromStr for Materialize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eager" => Ok(Materialize::Eager),
            "deferred" => Ok(Materialize::Deferred),
            _ => Err(format!("unknown materialize policy '{}' (expected eager or deferred)", s)),
        }
    }
}

/// Which applier a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Tree,
    Content,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Tree => write!(f, "tree"),
            StrategyKind::Content => write!(f, "content"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tree" => Ok(StrategyKind::Tree),
            "content" => Ok(StrategyKind::Content),
            _ => Err(format!("unknown strategy '{}' (expected tree or content)", s)),
        }
    }
}

/// Construction-time settings shared by both appliers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplierOptions {
    /// Message for commits that get none from a header or template
    pub default_message: String,
    /// Blob materialization policy (tree strategy only)
    pub materialize: Materialize,
}

impl Default for ApplierOptions {
    fn default() -> Self {
        Self {
            default_message: DEFAULT_COMMIT_MESSAGE.to_string(),
            materialize: Materialize::Eager,
        }
    }
}

/// Defaults for commit fields that a patch header does not set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitTemplate {
    pub message: Option<String>,
    pub author: Option<CommitAuthor>,
    pub committer: Option<CommitAuthor>,
}

/// Mode of a staged entry: explicit new mode, then the mode of the entry
/// being modified, then the patch's old mode, then the regular-file mode.
pub fn resolve_mode(
    new_mode: Option<FileMode>,
    existing: Option<FileMode>,
    old_mode: Option<FileMode>,
) -> FileMode {
    new_mode.or(existing).or(old_mode).unwrap_or_default()
}

/// Whether a patch changes the mode of a file.
pub fn is_mode_change(patch: &FilePatch) -> bool {
    matches!((patch.old_mode, patch.new_mode), (Some(old), Some(new)) if old != new)
}

/// The operations both strategies support.
#[async_trait]
pub trait PatchApplier: Send {
    /// Stage the changes of one file patch.
    async fn apply(&mut self, patch: &FilePatch) -> Result<(), ApplyError>;

    /// Commit everything staged and return the new commit hash. The commit
    /// becomes the base for the next round.
    async fn commit(&mut self, header: Option<&PatchHeader>) -> Result<String, ApplyError>;

    /// Discard staged state and rebind to `commit`.
    fn reset(&mut self, commit: &Commit);

    /// Hash of the current base commit, if bound to one.
    fn base_commit(&self) -> Option<&str>;
}

/// The applier chosen for a run.
pub enum Strategy {
    Tree(TreeApplier),
    Content(ContentApplier),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Tree(_) => StrategyKind::Tree,
            Strategy::Content(_) => StrategyKind::Content,
        }
    }

    fn inner(&mut self) -> &mut dyn PatchApplier {
        match self {
            Strategy::Tree(applier) => applier,
            Strategy::Content(applier) => applier,
        }
    }
}

#[async_trait]
impl PatchApplier for Strategy {
    async fn apply(&mut self, patch: &FilePatch) -> Result<(), ApplyError> {
        self.inner().apply(patch).await
    }

    async fn commit(&mut self, header: Option<&PatchHeader>) -> Result<String, ApplyError> {
        self.inner().commit(header).await
    }

    fn reset(&mut self, commit: &Commit) {
        self.inner().reset(commit)
    }

    fn base_commit(&self) -> Option<&str> {
        match self {
            Strategy::Tree(applier) => PatchApplier::base_commit(applier),
            Strategy::Content(applier) => PatchApplier::base_commit(applier),
        }
    }
}

/// Message title and body for a commit: the header's when it has one,
/// otherwise the split `fallback`.
pub(crate) fn message_parts(header: Option<&PatchHeader>, fallback: &str) -> (String, String) {
    match header {
        Some(h) if !h.title.is_empty() || !h.body.is_empty() => (h.title.clone(), h.body.clone()),
        _ => crate::patch::split_message(fallback),
    }
}
