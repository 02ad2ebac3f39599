//! fork
//!
//! Creating a fork and waiting until it can be written to.
//!
//! GitHub creates forks asynchronously: the fork request returns at once
//! but the new repository's references appear some time later. Readiness
//! is polled with exponential backoff, capped per attempt and bounded by a
//! total deadline on the monotonic clock. This is the only place that
//! retries a remote call.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};

use crate::core::types::Repository;
use crate::forge::{ForgeError, GitDatabase, RepositoryInfo};

/// Errors from fork operations.
#[derive(Debug, Error)]
pub enum ForkError {
    #[error("fork {op} failed for {repo}: {source}")]
    Remote {
        op: &'static str,
        repo: Repository,
        #[source]
        source: ForgeError,
    },

    #[error("fork {repo} was not ready after {waited:?}")]
    Timeout { repo: Repository, waited: Duration },
}

/// Delay schedule for readiness polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first unsuccessful poll
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Total time allowed before giving up
    pub timeout: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// The delay after `delay`: doubled, capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.saturating_mul(2).min(self.max_delay)
    }
}

/// Ask the remote to fork `repo` into the authenticated account.
pub async fn create_fork(
    db: &dyn GitDatabase,
    repo: &Repository,
) -> Result<RepositoryInfo, ForkError> {
    tracing::debug!(repo = %repo, "creating fork");
    let fork = db.create_fork(repo).await.map_err(|source| ForkError::Remote {
        op: "create",
        repo: repo.clone(),
        source,
    })?;
    tracing::info!(parent = %repo, fork = %fork.repository, "requested fork");
    Ok(fork)
}

/// Poll until the default branch of `fork` exists.
///
/// A missing branch or a `NotFound` response counts as "not ready yet";
/// any other error ends the wait. The last sleep is shortened so the total
/// wait never exceeds `backoff.timeout`.
pub async fn wait_until_ready(
    db: &dyn GitDatabase,
    fork: &RepositoryInfo,
    backoff: &Backoff,
) -> Result<(), ForkError> {
    let repo = &fork.repository;
    let branch = format!("refs/heads/{}", fork.default_branch);
    let start = Instant::now();
    let deadline = start + backoff.timeout;
    let mut delay = backoff.initial_delay;
    let mut attempt = 1u32;

    loop {
        match db.get_ref(repo, &branch).await {
            Ok(Some(_)) => {
                tracing::info!(fork = %repo, attempts = attempt, "fork is ready");
                return Ok(());
            }
            Ok(None) | Err(ForgeError::NotFound(_)) => {}
            Err(source) => {
                return Err(ForkError::Remote {
                    op: "readiness check",
                    repo: repo.clone(),
                    source,
                })
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ForkError::Timeout {
                repo: repo.clone(),
                waited: now - start,
            });
        }

        let pause = delay.min(deadline - now);
        tracing::debug!(fork = %repo, attempt, delay = ?pause, "fork not ready, waiting");
        sleep(pause).await;

        delay = backoff.next_delay(delay);
        attempt += 1;
    }
}
