//! forge::github
//!
//! GitHub implementation of the remote traits.
//!
//! # Design
//!
//! - [`GitDatabase`] maps onto the REST v3 Git Data API (`git/trees`,
//!   `git/blobs`, `git/commits`, `git/refs`) plus `pulls` and `forks`.
//! - [`ContentCommits`] maps onto GraphQL v4: `object(expression:)` lookups
//!   and the `createCommitOnBranch` mutation.
//!
//! Every call is a single request. Nothing is retried; rate limiting is
//! reported as `ForgeError::RateLimited` and left to the caller.
//!
//! # GitHub Enterprise
//!
//! Pass the REST base (e.g. `https://github.example.com/api/v3`) to
//! [`GitHubClient::with_api_base`]. The GraphQL endpoint is derived from it
//! (`/api/graphql` for Enterprise, `/graphql` otherwise).
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use patchpr::core::types::Repository;
//! use patchpr::forge::github::GitHubClient;
//! use patchpr::forge::GitDatabase;
//!
//! # async fn example() -> Result<(), patchpr::forge::ForgeError> {
//! let client = GitHubClient::new("ghp_xxx")?;
//! let repo = Repository::new("octocat", "hello-world");
//! let info = client.get_repository(&repo).await?;
//! println!("default branch: {}", info.default_branch);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::traits::{
    BlobLookup, BranchCommit, Commit, CommitAuthor, ContentCommits, EntryKind, ForgeError,
    GitDatabase, GitRef, NewCommit, NewPullRequest, PullRequest, RepositoryInfo, Tree, TreeEntry,
    TreeEntryUpdate, TreeObject,
};
use crate::core::types::{FileMode, Repository};

/// Default GitHub API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = concat!("patchpr/", env!("CARGO_PKG_VERSION"));

/// Media type for raw blob content.
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

/// GitHub client for one token, usable against any repository.
pub struct GitHubClient {
    /// HTTP client for making requests
    client: Client,
    /// Personal access token or app token
    token: String,
    /// REST API base URL, without trailing slash
    api_base: String,
    /// GraphQL endpoint
    graphql_url: String,
}

// Custom Debug to avoid exposing the token
impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("has_token", &!self.token.is_empty())
            .field("api_base", &self.api_base)
            .field("graphql_url", &self.graphql_url)
            .finish()
    }
}

impl GitHubClient {
    /// Create a client for github.com with a 60 second request timeout.
    pub fn new(token: impl Into<String>) -> Result<Self, ForgeError> {
        Self::with_api_base(token, DEFAULT_API_BASE, Duration::from_secs(60))
    }

    /// Create a client for a custom REST API base URL.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::NetworkError` if the HTTP client cannot be
    /// built.
    pub fn with_api_base(
        token: impl Into<String>,
        api_base: &str,
        timeout: Duration,
    ) -> Result<Self, ForgeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForgeError::NetworkError(e.to_string()))?;
        let api_base = api_base.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            token: token.into(),
            graphql_url: graphql_url(&api_base),
            api_base,
        })
    }

    /// REST API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// GraphQL endpoint URL.
    pub fn graphql_url(&self) -> &str {
        &self.graphql_url
    }

    /// Build common headers for API requests.
    fn headers(&self) -> Result<HeaderMap, ForgeError> {
        if self.token.is_empty() {
            return Err(ForgeError::AuthRequired);
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.token))
                .map_err(|_| ForgeError::AuthFailed("token contains invalid characters".into()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        Ok(headers)
    }

    /// Build URL for a repository endpoint.
    fn repo_url(&self, repo: &Repository, path: &str) -> String {
        if path.is_empty() {
            format!("{}/repos/{}/{}", self.api_base, repo.owner, repo.name)
        } else {
            format!(
                "{}/repos/{}/{}/{}",
                self.api_base, repo.owner, repo.name, path
            )
        }
    }

    /// Send a GET request and decode the JSON response.
    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ForgeError> {
        tracing::debug!(method = "GET", url, "GitHub request");
        let response = self
            .client
            .get(url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| ForgeError::NetworkError(e.to_string()))?;
        self.handle_response(response).await
    }

    /// Send a request with a JSON body and decode the JSON response.
    async fn send<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<T, ForgeError> {
        tracing::debug!(method = %method, url, "GitHub request");
        let response = self
            .client
            .request(method, url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| ForgeError::NetworkError(e.to_string()))?;
        self.handle_response(response).await
    }

    /// Run a GraphQL query or mutation.
    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ForgeError> {
        let body = json!({ "query": query, "variables": variables });
        let result: GraphQLResponse<T> = self.send(Method::POST, &self.graphql_url, &body).await?;

        if let Some(error) = result.errors.into_iter().next() {
            return Err(graphql_error(error));
        }
        result.data.ok_or_else(|| ForgeError::ApiError {
            status: 200,
            message: "GraphQL response contained no data".into(),
        })
    }

    /// Handle API response, mapping errors appropriately.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, ForgeError> {
        let status = response.status();

        if status.is_success() {
            response.json().await.map_err(|e| ForgeError::ApiError {
                status: status.as_u16(),
                message: format!("Failed to parse response: {}", e),
            })
        } else {
            Err(self.handle_error_response(response, status).await)
        }
    }

    /// Map an error response from the API.
    async fn handle_error_response(&self, response: Response, status: StatusCode) -> ForgeError {
        let rate_limited = response
            .headers()
            .get("X-RateLimit-Remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "0");

        // Try to get error message from body
        let message = match response.json::<GitHubErrorResponse>().await {
            Ok(err) => err.message,
            Err(_) => "Unknown error".to_string(),
        };

        match status {
            StatusCode::UNAUTHORIZED => ForgeError::AuthFailed("Invalid or expired token".into()),
            StatusCode::FORBIDDEN if rate_limited => ForgeError::RateLimited,
            StatusCode::FORBIDDEN => ForgeError::AuthFailed(format!("Permission denied: {}", message)),
            StatusCode::NOT_FOUND => ForgeError::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => ForgeError::RateLimited,
            _ if status.is_server_error() => ForgeError::ApiError {
                status: status.as_u16(),
                message: format!("GitHub server error: {}", message),
            },
            _ => ForgeError::ApiError {
                status: status.as_u16(),
                message,
            },
        }
    }
}

/// GraphQL endpoint for a REST base URL.
fn graphql_url(api_base: &str) -> String {
    match api_base.strip_suffix("/api/v3") {
        Some(host) => format!("{}/api/graphql", host),
        None => format!("{}/graphql", api_base),
    }
}

/// Reference path for the `git/ref(s)` endpoints, which omit `refs/`.
fn ref_path(name: &str) -> &str {
    name.strip_prefix("refs/").unwrap_or(name)
}

fn graphql_error(error: GraphQLError) -> ForgeError {
    match error.kind.as_deref() {
        Some("NOT_FOUND") => ForgeError::NotFound(error.message),
        Some("STALE_DATA") => ForgeError::Conflict(error.message),
        _ if error.message.contains("Expected branch to point to") => {
            ForgeError::Conflict(error.message)
        }
        _ => ForgeError::ApiError {
            status: 200,
            message: error.message,
        },
    }
}

fn parse_error(message: impl Into<String>) -> ForgeError {
    ForgeError::ApiError {
        status: 200,
        message: message.into(),
    }
}

#[async_trait]
impl GitDatabase for GitHubClient {
    async fn get_tree(&self, repo: &Repository, sha: &str) -> Result<Tree, ForgeError> {
        let url = self.repo_url(repo, &format!("git/trees/{}", sha));
        let tree: GitHubTree = self.get(&url).await?;

        let mut entries = Vec::with_capacity(tree.tree.len());
        for entry in tree.tree {
            let mode = FileMode::parse_octal(&entry.mode)
                .map_err(|e| parse_error(format!("tree {}: {}", sha, e)))?;
            entries.push(TreeEntry {
                path: entry.path,
                mode,
                kind: entry.kind,
                sha: entry.sha,
            });
        }
        Ok(Tree {
            sha: tree.sha,
            entries,
            truncated: tree.truncated,
        })
    }

    async fn get_blob(&self, repo: &Repository, sha: &str) -> Result<Vec<u8>, ForgeError> {
        let url = self.repo_url(repo, &format!("git/blobs/{}", sha));
        tracing::debug!(method = "GET", url = %url, "GitHub request");

        let mut headers = self.headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static(RAW_MEDIA_TYPE));
        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| ForgeError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.handle_error_response(response, status).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ForgeError::NetworkError(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn create_blob(&self, repo: &Repository, content: &[u8]) -> Result<String, ForgeError> {
        let url = self.repo_url(repo, "git/blobs");
        let body = json!({
            "content": BASE64.encode(content),
            "encoding": "base64",
        });
        let blob: GitHubSha = self.send(Method::POST, &url, &body).await?;
        Ok(blob.sha)
    }

    async fn create_tree(
        &self,
        repo: &Repository,
        base: &str,
        updates: &[TreeEntryUpdate],
    ) -> Result<String, ForgeError> {
        let mut entries = Vec::with_capacity(updates.len());
        for update in updates {
            let kind = if update.mode == FileMode::GITLINK {
                EntryKind::Commit
            } else {
                EntryKind::Blob
            };
            let mut entry = json!({
                "path": update.path,
                "mode": update.mode.to_string(),
                "type": kind,
            });
            match &update.object {
                TreeObject::Blob(sha) => entry["sha"] = json!(sha),
                TreeObject::Delete => entry["sha"] = serde_json::Value::Null,
                TreeObject::Content(content) => match std::str::from_utf8(content) {
                    Ok(text) => entry["content"] = json!(text),
                    // the tree endpoint only takes text content inline
                    Err(_) => entry["sha"] = json!(self.create_blob(repo, content).await?),
                },
            }
            entries.push(entry);
        }

        let url = self.repo_url(repo, "git/trees");
        let body = json!({ "base_tree": base, "tree": entries });
        let tree: GitHubSha = self.send(Method::POST, &url, &body).await?;
        Ok(tree.sha)
    }

    async fn get_commit(&self, repo: &Repository, sha: &str) -> Result<Commit, ForgeError> {
        let url = self.repo_url(repo, &format!("git/commits/{}", sha));
        let commit: GitHubCommit = self.get(&url).await?;
        Ok(commit.into())
    }

    async fn create_commit(
        &self,
        repo: &Repository,
        commit: &NewCommit,
    ) -> Result<Commit, ForgeError> {
        let url = self.repo_url(repo, "git/commits");
        let body = CreateCommitBody {
            message: &commit.message,
            tree: &commit.tree,
            parents: &commit.parents,
            author: commit.author.as_ref(),
            committer: commit.committer.as_ref(),
        };
        let created: GitHubCommit = self.send(Method::POST, &url, &body).await?;
        Ok(created.into())
    }

    async fn get_ref(&self, repo: &Repository, name: &str) -> Result<Option<GitRef>, ForgeError> {
        let url = self.repo_url(repo, &format!("git/ref/{}", ref_path(name)));
        match self.get::<GitHubRef>(&url).await {
            Ok(r) => Ok(Some(r.into())),
            Err(ForgeError::NotFound(_)) => Ok(None),
            // an empty repository (e.g. a fork still being created)
            Err(ForgeError::ApiError { status: 409, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_ref(
        &self,
        repo: &Repository,
        name: &str,
        sha: &str,
    ) -> Result<GitRef, ForgeError> {
        let url = self.repo_url(repo, "git/refs");
        let body = json!({ "ref": name, "sha": sha });
        let created: GitHubRef = self.send(Method::POST, &url, &body).await?;
        Ok(created.into())
    }

    async fn update_ref(
        &self,
        repo: &Repository,
        name: &str,
        sha: &str,
        force: bool,
    ) -> Result<GitRef, ForgeError> {
        let url = self.repo_url(repo, &format!("git/refs/{}", ref_path(name)));
        let body = json!({ "sha": sha, "force": force });
        let updated: GitHubRef = self.send(Method::PATCH, &url, &body).await?;
        Ok(updated.into())
    }

    async fn create_pull_request(
        &self,
        repo: &Repository,
        request: &NewPullRequest,
    ) -> Result<PullRequest, ForgeError> {
        let url = self.repo_url(repo, "pulls");
        let body = CreatePrBody {
            title: &request.title,
            head: &request.head,
            base: &request.base,
            body: request.body.as_deref(),
            draft: request.draft,
            maintainer_can_modify: request.maintainer_can_modify,
        };
        let pr: GitHubPullRequest = self.send(Method::POST, &url, &body).await?;
        Ok(pr.into())
    }

    async fn get_repository(&self, repo: &Repository) -> Result<RepositoryInfo, ForgeError> {
        let url = self.repo_url(repo, "");
        let info: GitHubRepository = self.get(&url).await?;
        Ok(info.into())
    }

    async fn create_fork(&self, repo: &Repository) -> Result<RepositoryInfo, ForgeError> {
        let url = self.repo_url(repo, "forks");
        let info: GitHubRepository = self.send(Method::POST, &url, &json!({})).await?;
        Ok(info.into())
    }
}

const LOOKUP_BLOB_QUERY: &str = r#"query($owner: String!, $name: String!, $expression: String!) {
  repository(owner: $owner, name: $name) {
    object(expression: $expression) {
      __typename
      ... on Blob { oid isBinary isTruncated text }
    }
  }
}"#;

const LIST_MODES_QUERY: &str = r#"query($owner: String!, $name: String!, $expression: String!) {
  repository(owner: $owner, name: $name) {
    object(expression: $expression) {
      __typename
      ... on Tree { entries { name mode type } }
    }
  }
}"#;

const COMMIT_ON_BRANCH_MUTATION: &str = r#"mutation($input: CreateCommitOnBranchInput!) {
  createCommitOnBranch(input: $input) {
    commit { oid }
  }
}"#;

#[async_trait]
impl ContentCommits for GitHubClient {
    async fn lookup_blob(
        &self,
        repo: &Repository,
        commit: &str,
        path: &str,
    ) -> Result<Option<BlobLookup>, ForgeError> {
        let variables = json!({
            "owner": repo.owner,
            "name": repo.name,
            "expression": format!("{}:{}", commit, path),
        });
        let data: RepositoryData<GraphQLBlob> = self.graphql(LOOKUP_BLOB_QUERY, variables).await?;

        let repository = data
            .repository
            .ok_or_else(|| ForgeError::NotFound(format!("repository {}", repo)))?;
        let Some(blob) = repository.object else {
            return Ok(None);
        };
        if blob.typename != "Blob" {
            return Ok(None);
        }
        let oid = blob
            .oid
            .ok_or_else(|| parse_error(format!("blob {} has no oid", path)))?;

        Ok(Some(BlobLookup {
            oid,
            text: if blob.is_binary { None } else { blob.text },
            truncated: blob.is_truncated,
        }))
    }

    async fn list_modes(
        &self,
        repo: &Repository,
        commit: &str,
        directory: &str,
    ) -> Result<Vec<(String, FileMode)>, ForgeError> {
        let variables = json!({
            "owner": repo.owner,
            "name": repo.name,
            "expression": format!("{}:{}", commit, directory),
        });
        let data: RepositoryData<GraphQLTree> = self.graphql(LIST_MODES_QUERY, variables).await?;

        let repository = data
            .repository
            .ok_or_else(|| ForgeError::NotFound(format!("repository {}", repo)))?;
        let entries = match repository.object {
            Some(tree) if tree.typename == "Tree" => tree.entries,
            _ => Vec::new(),
        };
        Ok(entries
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| (e.name, FileMode::from_bits(e.mode)))
            .collect())
    }

    async fn create_commit_on_branch(
        &self,
        repo: &Repository,
        request: &BranchCommit,
    ) -> Result<String, ForgeError> {
        let additions: Vec<_> = request
            .changes
            .additions
            .iter()
            .map(|a| json!({ "path": a.path, "contents": BASE64.encode(&a.contents) }))
            .collect();
        let deletions: Vec<_> = request
            .changes
            .deletions
            .iter()
            .map(|path| json!({ "path": path }))
            .collect();

        let branch = request
            .branch
            .strip_prefix("refs/heads/")
            .unwrap_or(&request.branch);
        let mut message = json!({ "headline": request.headline });
        if !request.body.is_empty() {
            message["body"] = json!(request.body);
        }

        let variables = json!({
            "input": {
                "branch": {
                    "repositoryNameWithOwner": repo.to_string(),
                    "branchName": branch,
                },
                "expectedHeadOid": request.expected_head,
                "message": message,
                "fileChanges": { "additions": additions, "deletions": deletions },
            }
        });
        let data: CreateCommitData = self.graphql(COMMIT_ON_BRANCH_MUTATION, variables).await?;

        data.create_commit_on_branch
            .map(|created| created.commit.oid)
            .ok_or_else(|| parse_error("createCommitOnBranch returned no commit"))
    }
}

// --------------------------------------------------------------------------
// Wire types
// --------------------------------------------------------------------------

/// Response containing only a hash.
#[derive(Deserialize)]
struct GitHubSha {
    sha: String,
}

#[derive(Deserialize)]
struct GitHubTree {
    sha: String,
    tree: Vec<GitHubTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct GitHubTreeEntry {
    path: String,
    mode: String,
    #[serde(rename = "type")]
    kind: EntryKind,
    sha: String,
}

#[derive(Deserialize)]
struct GitHubCommit {
    sha: String,
    tree: GitHubSha,
    #[serde(default)]
    parents: Vec<GitHubSha>,
    #[serde(default)]
    message: String,
    author: Option<CommitAuthor>,
    committer: Option<CommitAuthor>,
}

impl From<GitHubCommit> for Commit {
    fn from(c: GitHubCommit) -> Self {
        Commit {
            sha: c.sha,
            tree: c.tree.sha,
            parents: c.parents.into_iter().map(|p| p.sha).collect(),
            message: c.message,
            author: c.author,
            committer: c.committer,
        }
    }
}

/// Request body for creating a commit.
#[derive(Serialize)]
struct CreateCommitBody<'a> {
    message: &'a str,
    tree: &'a str,
    parents: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a CommitAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    committer: Option<&'a CommitAuthor>,
}

#[derive(Deserialize)]
struct GitHubRef {
    #[serde(rename = "ref")]
    name: String,
    object: GitHubSha,
}

impl From<GitHubRef> for GitRef {
    fn from(r: GitHubRef) -> Self {
        GitRef {
            name: r.name,
            sha: r.object.sha,
        }
    }
}

/// Request body for creating a PR.
#[derive(Serialize)]
struct CreatePrBody<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    draft: bool,
    maintainer_can_modify: bool,
}

/// GitHub PR response format.
#[derive(Deserialize)]
struct GitHubPullRequest {
    number: u64,
    html_url: String,
    head: GitHubBranch,
    base: GitHubBranch,
    title: String,
}

/// GitHub ref (head/base) format.
#[derive(Deserialize)]
struct GitHubBranch {
    #[serde(rename = "ref")]
    ref_name: String,
}

impl From<GitHubPullRequest> for PullRequest {
    fn from(pr: GitHubPullRequest) -> Self {
        PullRequest {
            number: pr.number,
            url: pr.html_url,
            head: pr.head.ref_name,
            base: pr.base.ref_name,
            title: pr.title,
        }
    }
}

#[derive(Deserialize)]
struct GitHubRepository {
    name: String,
    owner: GitHubOwner,
    default_branch: String,
    #[serde(default)]
    fork: bool,
}

#[derive(Deserialize)]
struct GitHubOwner {
    login: String,
}

impl From<GitHubRepository> for RepositoryInfo {
    fn from(r: GitHubRepository) -> Self {
        RepositoryInfo {
            repository: Repository::new(r.owner.login, r.name),
            default_branch: r.default_branch,
            fork: r.fork,
        }
    }
}

/// GitHub error response format.
#[derive(Deserialize)]
struct GitHubErrorResponse {
    message: String,
}

/// GraphQL response wrapper.
#[derive(Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

/// GraphQL error format.
#[derive(Deserialize)]
struct GraphQLError {
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct RepositoryData<T> {
    repository: Option<ObjectData<T>>,
}

#[derive(Deserialize)]
struct ObjectData<T> {
    object: Option<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQLBlob {
    #[serde(rename = "__typename")]
    typename: String,
    oid: Option<String>,
    #[serde(default)]
    is_binary: bool,
    #[serde(default)]
    is_truncated: bool,
    text: Option<String>,
}

#[derive(Deserialize)]
struct GraphQLTree {
    #[serde(rename = "__typename")]
    typename: String,
    #[serde(default)]
    entries: Vec<GraphQLTreeEntry>,
}

#[derive(Deserialize)]
struct GraphQLTreeEntry {
    name: String,
    mode: u32,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCommitData {
    create_commit_on_branch: Option<CreatedCommit>,
}

#[derive(Deserialize)]
struct CreatedCommit {
    commit: CommitOid,
}

#[derive(Deserialize)]
struct CommitOid {
    oid: String,
}
