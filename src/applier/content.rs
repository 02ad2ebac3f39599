//! applier::content
//!
//! Patch application through the content-commit API.
//!
//! # Design
//!
//! Changes are kept in memory as whole file contents (or deletions) keyed
//! by path and submitted together as one commit on a branch. The remote
//! checks that the branch still points at the applier's base commit and
//! assigns author, committer, and timestamps itself.
//!
//! The API cannot set file modes. Patches that would need one are rejected
//! with [`ApplyError::Unsupported`] before anything is read or staged:
//!
//! - a new mode other than `100644`
//! - a mode change
//! - a rename of a file whose current mode is not `100644`
//!
//! Existing content is read by path expression against the base commit.
//! Binary or truncated files are fetched by blob hash through an optional
//! object-graph fallback; without one they are unsupported.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{is_mode_change, message_parts, ApplierOptions, ApplyError, PatchApplier};
use crate::core::types::{FileMode, PatchHeader, Repository};
use crate::forge::{
    BranchCommit, Commit, ContentCommits, FileAddition, FileChanges, GitDatabase,
};
use crate::patch::FilePatch;

#[derive(Debug, Clone, PartialEq, Eq)]
enum FileChange {
    Write(Vec<u8>),
    Delete,
}

/// Applies patches by committing named file changes.
///
/// State is owned by one caller; use separate instances for concurrent
/// work.
pub struct ContentApplier {
    api: Arc<dyn ContentCommits>,
    fallback: Option<Arc<dyn GitDatabase>>,
    repo: Repository,
    branch: String,
    options: ApplierOptions,
    commit: String,
    changes: HashMap<String, FileChange>,
    /// directory -> file name -> mode, at the base commit
    modes: HashMap<String, HashMap<String, FileMode>>,
}

impl ContentApplier {
    /// Create an applier that commits to `branch`, which must currently
    /// point at `base_commit`. A short branch name is qualified with
    /// `refs/heads/`.
    pub fn new(
        api: Arc<dyn ContentCommits>,
        repo: Repository,
        branch: &str,
        options: ApplierOptions,
        base_commit: impl Into<String>,
    ) -> Self {
        let branch = if branch.starts_with("refs/") {
            branch.to_string()
        } else {
            format!("refs/heads/{}", branch)
        };
        Self {
            api,
            fallback: None,
            repo,
            branch,
            options,
            commit: base_commit.into(),
            changes: HashMap::new(),
            modes: HashMap::new(),
        }
    }

    /// Read binary or oversized files through the object-graph API.
    pub fn with_fallback(mut self, db: Arc<dyn GitDatabase>) -> Self {
        self.fallback = Some(db);
        self
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Fully qualified branch that `commit` targets.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn base_commit(&self) -> &str {
        &self.commit
    }

    pub fn has_pending(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Paths with staged changes, sorted.
    pub fn pending_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.changes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Stage the changes of one file patch.
    ///
    /// # Errors
    ///
    /// - `Unsupported` for mode changes, non-default modes, and renames of
    ///   files with a non-default mode; also for unreadable content without
    ///   a fallback
    /// - `ExistingEntry` / `MissingEntry` for create or modify mismatches
    /// - `Patch` when the hunks do not apply
    /// - `Remote` when a lookup fails
    pub async fn apply(&mut self, patch: &FilePatch) -> Result<(), ApplyError> {
        self.check_supported(patch).await?;

        let staged = if patch.is_new {
            let path = &patch.new_name;
            if self.exists(path).await? {
                return Err(ApplyError::ExistingEntry { path: path.clone() });
            }
            vec![(path.clone(), FileChange::Write(patch.apply(&[])?))]
        } else if patch.is_delete {
            let path = &patch.old_name;
            if !self.exists(path).await? {
                return Err(ApplyError::MissingEntry { path: path.clone() });
            }
            if patch.has_fragments() && !patch.is_binary {
                let old = self.read(path).await?;
                patch.apply(&old)?;
            }
            vec![(path.clone(), FileChange::Delete)]
        } else {
            let old_path = &patch.old_name;
            if !self.exists(old_path).await? {
                return Err(ApplyError::MissingEntry {
                    path: old_path.clone(),
                });
            }
            let renamed = patch.new_name != *old_path && !patch.is_copy;
            if !patch.has_fragments() && patch.new_name == *old_path {
                tracing::warn!(path = %old_path, "patch has no content changes; nothing staged");
                return Ok(());
            }

            let old = self.read(old_path).await?;
            let mut staged = vec![(patch.new_name.clone(), FileChange::Write(patch.apply(&old)?))];
            if renamed {
                staged.push((old_path.clone(), FileChange::Delete));
            }
            staged
        };

        for (path, change) in staged {
            tracing::debug!(path = %path, delete = change == FileChange::Delete, "staged");
            self.changes.insert(path, change);
        }
        Ok(())
    }

    async fn check_supported(&mut self, patch: &FilePatch) -> Result<(), ApplyError> {
        if let Some(mode) = patch.new_mode {
            if !mode.is_regular() {
                return Err(ApplyError::Unsupported(format!(
                    "cannot set mode {} on {}",
                    mode,
                    patch.path()
                )));
            }
        }
        if is_mode_change(patch) {
            return Err(ApplyError::Unsupported(format!(
                "cannot change mode of {}",
                patch.path()
            )));
        }
        // a renamed or copied file keeps its source mode, which cannot be set here
        if (patch.is_rename || patch.is_copy) && patch.old_name != patch.new_name {
            if let Some(mode) = self.mode(&patch.old_name).await? {
                if !mode.is_regular() {
                    let verb = if patch.is_copy { "copy" } else { "rename" };
                    return Err(ApplyError::Unsupported(format!(
                        "cannot {} {} with mode {}",
                        verb, patch.old_name, mode
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether `path` currently names a file: staged changes first, then
    /// the base commit.
    async fn exists(&mut self, path: &str) -> Result<bool, ApplyError> {
        match self.changes.get(path) {
            Some(FileChange::Write(_)) => Ok(true),
            Some(FileChange::Delete) => Ok(false),
            None => Ok(self.mode(path).await?.is_some()),
        }
    }

    /// Mode of `path` at the base commit, through the per-directory cache.
    async fn mode(&mut self, path: &str) -> Result<Option<FileMode>, ApplyError> {
        let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));

        if !self.modes.contains_key(dir) {
            tracing::debug!(repo = %self.repo, directory = dir, "listing modes");
            let listing = self
                .api
                .list_modes(&self.repo, &self.commit, dir)
                .await
                .map_err(ApplyError::remote("list modes", dir))?;
            self.modes
                .insert(dir.to_string(), listing.into_iter().collect());
        }

        Ok(self
            .modes
            .get(dir)
            .and_then(|files| files.get(name))
            .copied())
    }

    /// Current content of `path`: staged content first, then the base
    /// commit, then the fallback for binary or truncated files.
    async fn read(&self, path: &str) -> Result<Vec<u8>, ApplyError> {
        match self.changes.get(path) {
            Some(FileChange::Write(content)) => return Ok(content.clone()),
            Some(FileChange::Delete) => {
                return Err(ApplyError::MissingEntry {
                    path: path.to_string(),
                })
            }
            None => {}
        }

        let lookup = self
            .api
            .lookup_blob(&self.repo, &self.commit, path)
            .await
            .map_err(ApplyError::remote("get content", path))?
            .ok_or_else(|| ApplyError::MissingEntry {
                path: path.to_string(),
            })?;

        if lookup.is_readable() {
            return Ok(lookup.text.unwrap_or_default().into_bytes());
        }

        match &self.fallback {
            Some(db) => {
                tracing::debug!(path, blob = %lookup.oid, "content is binary or truncated, fetching blob");
                db.get_blob(&self.repo, &lookup.oid)
                    .await
                    .map_err(ApplyError::remote("get blob", &lookup.oid))
            }
            None => Err(ApplyError::Unsupported(format!(
                "content of {} is binary or too large to read",
                path
            ))),
        }
    }

    /// Commit staged changes on the applier's branch.
    pub async fn commit(&mut self, header: Option<&PatchHeader>) -> Result<String, ApplyError> {
        let branch = self.branch.clone();
        self.commit_to(&branch, header).await
    }

    /// Commit staged changes on `branch`, which must point at the base
    /// commit. Only the message comes from `header`; the remote assigns
    /// identities and dates.
    ///
    /// # Errors
    ///
    /// - `NotABranch` if `branch` is not under `refs/heads/`
    /// - `NothingPending` if nothing is staged
    /// - `Remote` if the request fails; a moved branch is a
    ///   [`ForgeError::Conflict`](crate::forge::ForgeError::Conflict) and is
    ///   not retried
    pub async fn commit_to(
        &mut self,
        branch: &str,
        header: Option<&PatchHeader>,
    ) -> Result<String, ApplyError> {
        if !branch.starts_with("refs/heads/") {
            return Err(ApplyError::NotABranch {
                name: branch.to_string(),
            });
        }
        if self.changes.is_empty() {
            return Err(ApplyError::NothingPending);
        }

        let mut changes = FileChanges::default();
        for path in self.pending_paths() {
            match &self.changes[path] {
                FileChange::Write(content) => changes.additions.push(FileAddition {
                    path: path.to_string(),
                    contents: content.clone(),
                }),
                FileChange::Delete => changes.deletions.push(path.to_string()),
            }
        }

        let (headline, body) = message_parts(header, &self.options.default_message);
        let request = BranchCommit {
            branch: branch.to_string(),
            expected_head: self.commit.clone(),
            headline,
            body,
            changes,
        };

        let sha = self
            .api
            .create_commit_on_branch(&self.repo, &request)
            .await
            .map_err(ApplyError::remote("commit on branch", branch))?;
        tracing::info!(repo = %self.repo, branch, commit = %sha, "created commit");

        self.commit = sha.clone();
        self.changes.clear();
        self.modes.clear();
        Ok(sha)
    }

    /// Discard staged changes and rebind to `commit`.
    pub fn reset(&mut self, commit: impl Into<String>) {
        self.commit = commit.into();
        self.changes.clear();
        self.modes.clear();
    }
}

#[async_trait]
impl PatchApplier for ContentApplier {
    async fn apply(&mut self, patch: &FilePatch) -> Result<(), ApplyError> {
        ContentApplier::apply(self, patch).await
    }

    async fn commit(&mut self, header: Option<&PatchHeader>) -> Result<String, ApplyError> {
        ContentApplier::commit(self, header).await
    }

    fn reset(&mut self, commit: &Commit) {
        ContentApplier::reset(self, commit.sha.clone())
    }

    fn base_commit(&self) -> Option<&str> {
        Some(&self.commit)
    }
}
