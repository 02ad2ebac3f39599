//! cli
//!
//! Command-line interface for patchpr.
//!
//! # Flow
//!
//! 1. Parse arguments, install logging, load configuration
//! 2. Read and parse every patch source before touching the network
//! 3. Resolve the base commit (and fork the repository if asked)
//! 4. Apply each patch and commit it with the selected strategy
//! 5. Point the head branch at the last commit and open a pull request
//!
//! [`execute`] runs steps 3 to 5 against any remote implementing both
//! forge traits, so the whole flow can be driven by
//! [`MockRepository`](crate::forge::mock::MockRepository).

pub mod args;

pub use args::Cli;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

use crate::applier::{ContentApplier, PatchApplier, Strategy, StrategyKind, TreeApplier};
use crate::core::config::Config;
use crate::core::types::{Identity, PatchHeader};
use crate::forge::github::GitHubClient;
use crate::forge::{ContentCommits, GitDatabase, NewPullRequest};
use crate::fork;
use crate::patch::{self, FilePatch};
use crate::reference::Reference;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "PATCHPR_LOG";

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.debug);

    let config = Config::load()?;
    let patches = cli
        .patch_sources()
        .iter()
        .map(|path| load_patch(path, cli.message.as_deref(), env_var))
        .collect::<Result<Vec<_>>>()?;

    let token = cli
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("a GitHub token is required; use --token or set GITHUB_TOKEN"))?;
    let url = cli.url.as_deref().unwrap_or(config.api_url());
    let client = Arc::new(GitHubClient::with_api_base(token, url, config.timeout())?);
    tracing::debug!(client = ?client, "created GitHub client");

    // Use tokio runtime to run async code
    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(execute(&cli, &config, client, &patches))?;

    print!("{}", outcome.render(cli.json)?);
    Ok(())
}

/// Install the stderr log subscriber. `debug` wins over `PATCHPR_LOG`.
pub fn init_logging(debug: bool) {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;
    use tracing_subscriber::EnvFilter;

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // a subscriber may already be installed (tests)
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

// ---------------------------------------------------------------------------
// Patch input
// ---------------------------------------------------------------------------

/// One parsed patch source, committed as one commit.
#[derive(Debug, Clone)]
pub struct PatchInput {
    /// File name, or `-` for standard input
    pub source: String,
    pub files: Vec<FilePatch>,
    /// Commit metadata with overrides applied
    pub header: PatchHeader,
}

/// Read and parse a patch file (`-` reads standard input).
///
/// `message` replaces any message in the patch header, and `env` supplies
/// the `GIT_AUTHOR_*` / `GIT_COMMITTER_*` overrides.
pub fn load_patch(
    path: &Path,
    message: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PatchInput> {
    let source = path.display().to_string();
    let data = if source == "-" {
        let mut data = Vec::new();
        std::io::stdin()
            .read_to_end(&mut data)
            .context("failed to read patch from stdin")?;
        data
    } else {
        std::fs::read(path).with_context(|| format!("failed to read patch file: {}", source))?
    };
    parse_patch(&source, &data, message, env)
}

/// Parse patch bytes from `source` into files and a commit header.
pub fn parse_patch(
    source: &str,
    data: &[u8],
    message: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PatchInput> {
    let parsed =
        patch::parse(data).with_context(|| format!("failed to parse patch: {}", source))?;
    if parsed.files.is_empty() {
        bail!("patch {} contains no file changes", source);
    }

    let mut header = if parsed.preamble.trim().is_empty() {
        PatchHeader::default()
    } else {
        patch::parse_header(&parsed.preamble).unwrap_or_else(|| {
            tracing::warn!(source, "ignoring invalid patch header");
            PatchHeader::default()
        })
    };

    if let Some(message) = message {
        let (title, body) = patch::split_message(message);
        header.title = title;
        header.body = body;
    } else if header.title.is_empty() && header.body.is_empty() {
        header.title = if source == "-" {
            "Apply patch from stdin".to_string()
        } else {
            format!("Apply {}", source)
        };
    }
    apply_env_overrides(&mut header, env);

    Ok(PatchInput {
        source: source.to_string(),
        files: parsed.files,
        header,
    })
}

/// Replace header identities and dates with `GIT_AUTHOR_*` and
/// `GIT_COMMITTER_*` values. Setting either name or email replaces the
/// whole identity; an unparsable date is ignored.
pub fn apply_env_overrides(header: &mut PatchHeader, env: impl Fn(&str) -> Option<String>) {
    let people = [
        ("AUTHOR", &mut header.author, &mut header.author_date),
        ("COMMITTER", &mut header.committer, &mut header.committer_date),
    ];
    for (kind, identity, date) in people {
        let name = env(&format!("GIT_{}_NAME", kind));
        let email = env(&format!("GIT_{}_EMAIL", kind));
        if name.is_some() || email.is_some() {
            *identity = Some(Identity::new(
                name.unwrap_or_default(),
                email.unwrap_or_default(),
            ));
        }
        if let Some(parsed) = env(&format!("GIT_{}_DATE", kind)).and_then(|d| patch::parse_date(&d)) {
            *date = Some(parsed);
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// What a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub commit: String,
    pub tree: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestSummary {
    pub number: u64,
    pub url: String,
}

impl Outcome {
    /// Text for stdout: pretty JSON, the pull request URL, or the commit.
    pub fn render(&self, json: bool) -> Result<String> {
        if json {
            Ok(format!("{}\n", serde_json::to_string_pretty(self)?))
        } else if let Some(pr) = &self.pull_request {
            Ok(format!("{}\n", pr.url))
        } else {
            Ok(format!("{}\n", self.commit))
        }
    }
}

/// Commit `patches` to the head branch and optionally open a pull request.
pub async fn execute<R>(
    cli: &Cli,
    config: &Config,
    remote: Arc<R>,
    patches: &[PatchInput],
) -> Result<Outcome>
where
    R: GitDatabase + ContentCommits + 'static,
{
    let repo = &cli.repository;
    let db: Arc<dyn GitDatabase> = remote.clone();

    let needs_default = cli.base_branch.is_none() && (cli.patch_base.is_none() || !cli.no_pull_request);
    let base_branch = match &cli.base_branch {
        Some(branch) => branch.clone(),
        None if needs_default => {
            db.get_repository(repo)
                .await
                .with_context(|| format!("failed to get repository {}", repo))?
                .default_branch
        }
        None => String::new(),
    };

    let patch_base = cli
        .patch_base
        .clone()
        .unwrap_or_else(|| format!("refs/heads/{}", base_branch));
    let base_sha = if patch_base.starts_with("refs/") {
        db.get_ref(repo, &patch_base)
            .await
            .with_context(|| format!("failed to resolve patch base: {}", patch_base))?
            .ok_or_else(|| anyhow!("patch base does not exist: {}", patch_base))?
            .sha
    } else {
        patch_base
    };
    let base = db
        .get_commit(repo, &base_sha)
        .await
        .with_context(|| format!("failed to get patch base commit: {}", base_sha))?;
    tracing::debug!(repo = %repo, commit = %base.sha, tree = %base.tree, "resolved patch base");

    let target = if cli.fork {
        let info = fork::create_fork(db.as_ref(), repo).await?;
        fork::wait_until_ready(db.as_ref(), &info, &config.fork_backoff()).await?;
        info.repository
    } else if let Some(fork) = &cli.fork_repository {
        fork.clone()
    } else {
        repo.clone()
    };

    let head = cli.head_branch.as_deref().unwrap_or(config.head_branch());
    let reference = Reference::branch(db.clone(), target.clone(), head);
    let options = config.applier_options();

    let mut applier = match cli.strategy.unwrap_or(config.strategy()) {
        StrategyKind::Tree => {
            Strategy::Tree(TreeApplier::new(db.clone(), target.clone(), options, &base))
        }
        StrategyKind::Content => {
            // commits land directly on the branch, so it must start at the base
            reference.set(&base.sha, cli.force).await?;
            let api: Arc<dyn ContentCommits> = remote.clone();
            Strategy::Content(
                ContentApplier::new(api, target.clone(), head, options, base.sha.clone())
                    .with_fallback(db.clone()),
            )
        }
    };
    tracing::debug!(strategy = %applier.kind(), head, repo = %target, "applying patches");

    for input in patches {
        for file in &input.files {
            applier
                .apply(file)
                .await
                .with_context(|| format!("failed to apply {} from {}", file.path(), input.source))?;
        }
        applier
            .commit(Some(&input.header))
            .await
            .with_context(|| format!("failed to commit {}", input.source))?;
    }

    let commit_sha = applier
        .base_commit()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no patches were applied"))?;
    if applier.kind() == StrategyKind::Tree {
        reference.set(&commit_sha, cli.force).await?;
    }
    let commit = db
        .get_commit(&target, &commit_sha)
        .await
        .with_context(|| format!("failed to get commit {}", commit_sha))?;

    let pull_request = if cli.no_pull_request {
        None
    } else {
        let last = patches.last().map(|p| &p.header);
        let title = cli
            .pull_title
            .clone()
            .or_else(|| last.map(|h| h.title.clone()))
            .unwrap_or_default();
        let body = cli
            .pull_body
            .clone()
            .or_else(|| last.map(|h| h.body.clone()))
            .filter(|b| !b.is_empty());
        let request = NewPullRequest {
            title,
            head: String::new(),
            base: base_branch,
            body,
            draft: cli.draft,
            maintainer_can_modify: cli.uses_fork(),
        };
        let pr = reference.pull_request_to(repo, &request).await?;
        Some(PullRequestSummary {
            number: pr.number,
            url: pr.url,
        })
    };

    Ok(Outcome {
        commit: commit.sha,
        tree: commit.tree,
        pull_request,
    })
}
