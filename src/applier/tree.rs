//! applier::tree
//!
//! Patch application through the object-graph API.
//!
//! # Design
//!
//! The applier keeps one pending [`TreeEntryUpdate`] per path. Lookups see
//! pending updates first (a pending delete hides the remote entry), then
//! walk the base tree through the [`TreeCache`]. `create_tree` sends all
//! pending updates in one request; `commit` wraps the resulting tree in a
//! commit whose sole parent is the current base commit and adopts it as
//! the new base.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use super::{
    message_parts, resolve_mode, ApplierOptions, ApplyError, CommitTemplate, Materialize,
    PatchApplier, TreeCache,
};
use crate::core::types::{Identity, PatchHeader, Repository};
use crate::forge::{
    Commit, CommitAuthor, EntryKind, GitDatabase, NewCommit, TreeEntryUpdate, TreeObject,
};
use crate::patch::FilePatch;

/// Applies patches by building blobs, trees, and commits.
///
/// State is owned by one caller; use separate instances for concurrent
/// work.
pub struct TreeApplier {
    db: Arc<dyn GitDatabase>,
    repo: Repository,
    options: ApplierOptions,
    commit: Option<String>,
    tree: String,
    cache: TreeCache,
    pending: HashMap<String, TreeEntryUpdate>,
    uncommitted: bool,
}

impl TreeApplier {
    /// Bind an applier to an existing commit.
    pub fn new(
        db: Arc<dyn GitDatabase>,
        repo: Repository,
        options: ApplierOptions,
        base: &Commit,
    ) -> Self {
        let mut applier = Self::with_tree(db, repo, options, base.tree.clone());
        applier.commit = Some(base.sha.clone());
        applier
    }

    /// Bind an applier to a bare tree. The first commit has no parent.
    pub fn with_tree(
        db: Arc<dyn GitDatabase>,
        repo: Repository,
        options: ApplierOptions,
        tree: impl Into<String>,
    ) -> Self {
        Self {
            db,
            repo,
            options,
            commit: None,
            tree: tree.into(),
            cache: TreeCache::new(),
            pending: HashMap::new(),
            uncommitted: false,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Hash of the current base tree.
    pub fn base_tree(&self) -> &str {
        &self.tree
    }

    /// Whether a tree was created but not yet committed.
    pub fn has_uncommitted_tree(&self) -> bool {
        self.uncommitted
    }

    /// Pending updates, in no particular order.
    pub fn pending(&self) -> impl Iterator<Item = &TreeEntryUpdate> {
        self.pending.values()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Stage the changes of one file patch.
    ///
    /// Remote calls (entry lookups, blob reads, eager blob creation) all
    /// happen before anything is staged.
    ///
    /// # Errors
    ///
    /// - `ExistingEntry` when creating a path that exists
    /// - `MissingEntry` when modifying or deleting a path that does not
    /// - `Patch` when the hunks do not apply
    /// - `Remote` when a fetch or blob creation fails
    pub async fn apply(&mut self, patch: &FilePatch) -> Result<(), ApplyError> {
        let staged = if patch.is_new {
            self.stage_create(patch).await?
        } else if patch.is_delete {
            self.stage_delete(patch).await?
        } else {
            self.stage_modify(patch).await?
        };
        let staged = self.materialize(staged).await?;

        for update in staged {
            tracing::debug!(path = %update.path, object = ?update.object, "staged");
            self.pending.insert(update.path.clone(), update);
        }
        Ok(())
    }

    async fn stage_create(&mut self, patch: &FilePatch) -> Result<Vec<TreeEntryUpdate>, ApplyError> {
        let path = &patch.new_name;
        if self.entry(path).await?.is_some() {
            return Err(ApplyError::ExistingEntry { path: path.clone() });
        }

        let content = patch.apply(&[])?;
        let mode = resolve_mode(patch.new_mode, None, patch.old_mode);
        Ok(vec![TreeEntryUpdate::content(path.clone(), mode, content)])
    }

    async fn stage_delete(&mut self, patch: &FilePatch) -> Result<Vec<TreeEntryUpdate>, ApplyError> {
        let path = &patch.old_name;
        let entry = self
            .entry(path)
            .await?
            .ok_or_else(|| ApplyError::MissingEntry { path: path.clone() })?;

        // Only checks that the patch matches what is being deleted.
        if patch.has_fragments() && !patch.is_binary {
            let old = self.read(&entry).await?;
            patch.apply(&old)?;
        }
        Ok(vec![TreeEntryUpdate::delete(path.clone(), entry.mode)])
    }

    async fn stage_modify(&mut self, patch: &FilePatch) -> Result<Vec<TreeEntryUpdate>, ApplyError> {
        let old_path = &patch.old_name;
        let entry = self
            .entry(old_path)
            .await?
            .ok_or_else(|| ApplyError::MissingEntry {
                path: old_path.clone(),
            })?;

        let object = if patch.has_fragments() {
            let old = self.read(&entry).await?;
            TreeObject::Content(patch.apply(&old)?)
        } else {
            entry.object.clone()
        };

        let mut staged = vec![TreeEntryUpdate {
            path: patch.new_name.clone(),
            mode: resolve_mode(patch.new_mode, Some(entry.mode), patch.old_mode),
            object,
        }];
        if patch.new_name != *old_path && !patch.is_copy {
            staged.push(TreeEntryUpdate::delete(old_path.clone(), entry.mode));
        }
        Ok(staged)
    }

    /// Store staged content as blobs when materializing eagerly.
    async fn materialize(
        &self,
        staged: Vec<TreeEntryUpdate>,
    ) -> Result<Vec<TreeEntryUpdate>, ApplyError> {
        if self.options.materialize == Materialize::Deferred {
            return Ok(staged);
        }

        let mut out = Vec::with_capacity(staged.len());
        for mut update in staged {
            if let TreeObject::Content(content) = &update.object {
                let sha = self
                    .db
                    .create_blob(&self.repo, content)
                    .await
                    .map_err(ApplyError::remote("create blob", &update.path))?;
                update.object = TreeObject::Blob(sha);
            }
            out.push(update);
        }
        Ok(out)
    }

    /// The entry currently visible at `path`, or `None` if absent.
    async fn entry(&mut self, path: &str) -> Result<Option<TreeEntryUpdate>, ApplyError> {
        if let Some(update) = self.pending.get(path) {
            return Ok((!update.is_delete()).then(|| update.clone()));
        }

        let mut segments: Vec<&str> = path.split('/').collect();
        let Some(name) = segments.pop() else {
            return Ok(None);
        };

        let mut sha = self.tree.clone();
        for dir in segments {
            let tree = self.cache.fetch(self.db.as_ref(), &self.repo, &sha).await?;
            match tree.find(dir, EntryKind::Tree) {
                Some(entry) => sha = entry.sha.clone(),
                None => return Ok(None),
            }
        }

        let tree = self.cache.fetch(self.db.as_ref(), &self.repo, &sha).await?;
        Ok(tree
            .find(name, EntryKind::Blob)
            .map(|entry| TreeEntryUpdate::blob(path, entry.mode, entry.sha.clone())))
    }

    async fn read(&self, entry: &TreeEntryUpdate) -> Result<Vec<u8>, ApplyError> {
        match &entry.object {
            TreeObject::Content(content) => Ok(content.clone()),
            TreeObject::Blob(sha) => self
                .db
                .get_blob(&self.repo, sha)
                .await
                .map_err(ApplyError::remote("get blob", sha)),
            TreeObject::Delete => Err(ApplyError::MissingEntry {
                path: entry.path.clone(),
            }),
        }
    }

    /// Create a tree from the base tree and all pending updates, and make
    /// it the new base tree.
    ///
    /// # Errors
    ///
    /// - `NothingPending` if no updates are staged
    /// - `Remote` if tree creation fails; pending updates are kept
    pub async fn create_tree(&mut self) -> Result<String, ApplyError> {
        if self.pending.is_empty() {
            return Err(ApplyError::NothingPending);
        }

        let mut updates: Vec<TreeEntryUpdate> = self.pending.values().cloned().collect();
        updates.sort_by(|a, b| a.path.cmp(&b.path));

        let sha = self
            .db
            .create_tree(&self.repo, &self.tree, &updates)
            .await
            .map_err(ApplyError::remote("create tree", &self.tree))?;
        tracing::info!(repo = %self.repo, tree = %sha, entries = updates.len(), "created tree");

        self.tree = sha.clone();
        self.cache.clear();
        self.pending.clear();
        self.uncommitted = true;
        Ok(sha)
    }

    /// Commit pending updates (creating a tree first if needed) on top of
    /// the base commit.
    ///
    /// Header fields override template fields, which override the default
    /// message; identities the remote assigns are used when neither sets
    /// them.
    ///
    /// If tree creation succeeds and commit creation fails, the new tree
    /// stays the base tree and a later call commits it.
    ///
    /// # Errors
    ///
    /// - `NothingPending` if there are no updates and no uncommitted tree
    /// - `Remote` if tree or commit creation fails
    pub async fn commit(
        &mut self,
        template: Option<&CommitTemplate>,
        header: Option<&PatchHeader>,
    ) -> Result<Commit, ApplyError> {
        if !self.uncommitted && self.pending.is_empty() {
            return Err(ApplyError::NothingPending);
        }
        if !self.pending.is_empty() {
            self.create_tree().await?;
        }

        let request = self.new_commit(template, header);
        let commit = self
            .db
            .create_commit(&self.repo, &request)
            .await
            .map_err(ApplyError::remote("create commit", &self.tree))?;
        tracing::info!(repo = %self.repo, commit = %commit.sha, tree = %commit.tree, "created commit");

        self.commit = Some(commit.sha.clone());
        self.uncommitted = false;
        Ok(commit)
    }

    fn new_commit(&self, template: Option<&CommitTemplate>, header: Option<&PatchHeader>) -> NewCommit {
        let template_message = template
            .and_then(|t| t.message.as_deref())
            .unwrap_or(&self.options.default_message);
        let (title, body) = message_parts(header, template_message);
        let message = PatchHeader::with_message(title, body).message();

        let mut author = template.and_then(|t| t.author.clone());
        let mut committer = template.and_then(|t| t.committer.clone());
        if let Some(h) = header {
            merge_identity(&mut author, h.author.as_ref(), h.author_date);
            merge_identity(&mut committer, h.committer.as_ref(), h.committer_date);
        }

        NewCommit {
            message,
            tree: self.tree.clone(),
            parents: self.commit.iter().cloned().collect(),
            author,
            committer,
        }
    }

    /// Discard pending updates and cached trees and rebind to `commit`.
    pub fn reset(&mut self, commit: &Commit) {
        self.commit = Some(commit.sha.clone());
        self.tree = commit.tree.clone();
        self.cache.clear();
        self.pending.clear();
        self.uncommitted = false;
    }
}

/// Overlay header identity and date on a template identity. A date with
/// no identity yields an author with an empty name and email, which the
/// remote fills with its own identity.
fn merge_identity(
    target: &mut Option<CommitAuthor>,
    identity: Option<&Identity>,
    date: Option<DateTime<FixedOffset>>,
) {
    if let Some(id) = identity {
        let entry = target.get_or_insert_with(CommitAuthor::default);
        entry.name = id.name.clone();
        entry.email = id.email.clone();
    }
    if let Some(date) = date {
        target.get_or_insert_with(CommitAuthor::default).date = Some(date);
    }
}

#[async_trait]
impl PatchApplier for TreeApplier {
    async fn apply(&mut self, patch: &FilePatch) -> Result<(), ApplyError> {
        TreeApplier::apply(self, patch).await
    }

    async fn commit(&mut self, header: Option<&PatchHeader>) -> Result<String, ApplyError> {
        TreeApplier::commit(self, None, header)
            .await
            .map(|commit| commit.sha)
    }

    fn reset(&mut self, commit: &Commit) {
        TreeApplier::reset(self, commit)
    }

    fn base_commit(&self) -> Option<&str> {
        self.commit.as_deref()
    }
}
