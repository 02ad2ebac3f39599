//! cli::args
//!
//! Command-line argument definitions using clap derive.

use std::path::PathBuf;

use clap::Parser;

use crate::applier::StrategyKind;
use crate::core::types::Repository;

/// Create a GitHub pull request from patch files without cloning the
/// repository.
///
/// Each patch file becomes one commit on the head branch. Author and
/// committer come from the patch header and can be overridden with the
/// GIT_AUTHOR_{NAME,EMAIL,DATE} and GIT_COMMITTER_{NAME,EMAIL,DATE}
/// environment variables.
#[derive(Parser, Debug)]
#[command(name = "patchpr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Repository to apply the patches to, as owner/name
    #[arg(short, long, value_name = "OWNER/NAME")]
    pub repository: Repository,

    /// Branch targeted by the pull request [default: repository default branch]
    #[arg(long, value_name = "BRANCH")]
    pub base_branch: Option<String>,

    /// Branch to create or update with the new commits [default: patchpr]
    #[arg(long, value_name = "BRANCH")]
    pub head_branch: Option<String>,

    /// Commit to apply the patches to: a SHA or a full ref such as
    /// refs/heads/main or refs/tags/v1 [default: base branch]
    #[arg(long, value_name = "SHA|REF")]
    pub patch_base: Option<String>,

    /// Update the head branch even if the update is not a fast-forward
    #[arg(short, long)]
    pub force: bool,

    /// Print the commit, tree and pull request as JSON
    #[arg(long)]
    pub json: bool,

    /// Commit message; overrides the patch header
    #[arg(short, long)]
    pub message: Option<String>,

    /// Only update the head branch
    #[arg(long)]
    pub no_pull_request: bool,

    /// Pull request title [default: title of the last commit]
    #[arg(long, value_name = "TITLE")]
    pub pull_title: Option<String>,

    /// Pull request body [default: body of the last commit]
    #[arg(long, value_name = "BODY")]
    pub pull_body: Option<String>,

    /// Open the pull request as a draft
    #[arg(long)]
    pub draft: bool,

    /// GitHub token with repository write access
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// GitHub REST API URL [default: from config, or https://api.github.com]
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Fork the repository and push the head branch to the fork
    #[arg(long, conflicts_with = "fork_repository")]
    pub fork: bool,

    /// Push the head branch to this existing fork
    #[arg(long, value_name = "OWNER/NAME")]
    pub fork_repository: Option<Repository>,

    /// How commits are built: tree (object API) or content (GraphQL)
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<StrategyKind>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Patch files; `-` or none reads standard input
    #[arg(value_name = "PATCH")]
    pub patches: Vec<PathBuf>,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }

    /// Patch sources in order, with standard input as the default.
    pub fn patch_sources(&self) -> Vec<PathBuf> {
        if self.patches.is_empty() {
            vec![PathBuf::from("-")]
        } else {
            self.patches.clone()
        }
    }

    /// Whether commits go to a fork rather than the repository itself.
    pub fn uses_fork(&self) -> bool {
        self.fork || self.fork_repository.is_some()
    }
}
