//! applier::cache
//!
//! Tree listings fetched during one base-tree generation.
//!
//! Trees are immutable, so a listing never goes stale; the cache is still
//! cleared whenever the applier creates a new tree, because every hash it
//! holds was reached from the previous base.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::ApplyError;
use crate::core::types::Repository;
use crate::forge::{GitDatabase, Tree};

/// Lazy, write-through map from tree hash to listing.
#[derive(Debug, Default)]
pub struct TreeCache {
    trees: HashMap<String, Tree>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the listing for `sha`, fetching and caching it on a miss.
    ///
    /// # Errors
    ///
    /// Fetch failures are returned as `ApplyError::Remote` tagged with the
    /// tree hash. Nothing is cached on failure.
    pub async fn fetch(
        &mut self,
        db: &dyn GitDatabase,
        repo: &Repository,
        sha: &str,
    ) -> Result<&Tree, ApplyError> {
        match self.trees.entry(sha.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                tracing::debug!(repo = %repo, tree = sha, "fetching tree");
                let tree = db
                    .get_tree(repo, sha)
                    .await
                    .map_err(ApplyError::remote("get tree", sha))?;
                if tree.truncated {
                    tracing::warn!(tree = sha, "tree listing was truncated by the remote");
                }
                Ok(entry.insert(tree))
            }
        }
    }

    pub fn contains(&self, sha: &str) -> bool {
        self.trees.contains_key(sha)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Drop every listing.
    pub fn clear(&mut self) {
        self.trees.clear();
    }
}
