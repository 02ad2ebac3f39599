//! reference
//!
//! Pointing a named reference at a commit, and opening pull requests from
//! it.
//!
//! A [`Reference`] holds no remote state. Every call looks up the current
//! target first, then creates or updates.

use std::sync::Arc;

use crate::applier::ApplyError;
use crate::core::types::Repository;
use crate::forge::{GitDatabase, GitRef, NewPullRequest, PullRequest};

/// A named reference in a repository.
pub struct Reference {
    db: Arc<dyn GitDatabase>,
    repo: Repository,
    name: String,
}

impl Reference {
    /// Create a reference handle. Names without a `refs/` prefix are taken
    /// relative to `refs/`, so `heads/main` means `refs/heads/main`.
    pub fn new(db: Arc<dyn GitDatabase>, repo: Repository, name: &str) -> Self {
        let name = if name.starts_with("refs/") {
            name.to_string()
        } else {
            format!("refs/{}", name)
        };
        Self { db, repo, name }
    }

    /// Handle for `refs/heads/<branch>`.
    pub fn branch(db: Arc<dyn GitDatabase>, repo: Repository, branch: &str) -> Self {
        let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
        Self::new(db, repo, &format!("refs/heads/{}", branch))
    }

    /// Fully qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Branch name without `refs/heads/`, if this is a branch.
    pub fn branch_name(&self) -> Option<&str> {
        self.name.strip_prefix("refs/heads/")
    }

    /// Point the reference at `sha`, creating it if needed.
    ///
    /// An existing reference is only moved backwards or sideways when
    /// `force` is set; otherwise the remote rejects non-fast-forward
    /// updates.
    ///
    /// # Errors
    ///
    /// Returns `ApplyError::Remote` tagged with the reference name.
    pub async fn set(&self, sha: &str, force: bool) -> Result<GitRef, ApplyError> {
        let current = self
            .db
            .get_ref(&self.repo, &self.name)
            .await
            .map_err(ApplyError::remote("get reference", &self.name))?;

        let updated = match current {
            None => {
                tracing::debug!(reference = %self.name, sha, "creating reference");
                self.db
                    .create_ref(&self.repo, &self.name, sha)
                    .await
                    .map_err(ApplyError::remote("create reference", &self.name))?
            }
            Some(existing) if existing.sha == sha => {
                tracing::debug!(reference = %self.name, sha, "reference already up to date");
                existing
            }
            Some(_) => {
                tracing::debug!(reference = %self.name, sha, force, "updating reference");
                self.db
                    .update_ref(&self.repo, &self.name, sha, force)
                    .await
                    .map_err(ApplyError::remote("update reference", &self.name))?
            }
        };
        tracing::info!(repo = %self.repo, reference = %updated.name, sha = %updated.sha, "set reference");
        Ok(updated)
    }

    /// Open a pull request in this reference's repository with this branch
    /// as head. Other fields of `request` pass through unchanged.
    ///
    /// # Errors
    ///
    /// - `NotABranch` if the reference is not under `refs/heads/`
    /// - `Remote` if the request fails
    pub async fn pull_request(&self, request: &NewPullRequest) -> Result<PullRequest, ApplyError> {
        let branch = self.require_branch()?;
        let request = NewPullRequest {
            head: branch.to_string(),
            ..request.clone()
        };
        self.open(&self.repo, &request).await
    }

    /// Open a pull request in `target` (usually the parent of a fork) with
    /// `owner:branch` of this reference as head.
    pub async fn pull_request_to(
        &self,
        target: &Repository,
        request: &NewPullRequest,
    ) -> Result<PullRequest, ApplyError> {
        let branch = self.require_branch()?;
        let head = if *target == self.repo {
            branch.to_string()
        } else {
            format!("{}:{}", self.repo.owner, branch)
        };
        let request = NewPullRequest {
            head,
            ..request.clone()
        };
        self.open(target, &request).await
    }

    fn require_branch(&self) -> Result<&str, ApplyError> {
        self.branch_name().ok_or_else(|| ApplyError::NotABranch {
            name: self.name.clone(),
        })
    }

    async fn open(
        &self,
        target: &Repository,
        request: &NewPullRequest,
    ) -> Result<PullRequest, ApplyError> {
        let pr = self
            .db
            .create_pull_request(target, request)
            .await
            .map_err(ApplyError::remote("create pull request", &request.head))?;
        tracing::info!(repo = %target, number = pr.number, url = %pr.url, "opened pull request");
        Ok(pr)
    }
}
