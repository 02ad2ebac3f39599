//! forge::mock
//!
//! In-memory remote for deterministic testing.
//!
//! # Design
//!
//! [`MockRepository`] implements both [`GitDatabase`] and [`ContentCommits`]
//! over a content-addressed object store shared by every repository it
//! hosts, so a fork sees the objects of its parent. Hashes are derived from
//! object contents, which makes identical trees compare equal.
//!
//! Every call is recorded. Tests can make a call fail with a chosen error,
//! or stall forever (to exercise cancellation), and can delay fork
//! readiness by a number of polls.
//!
//! # Example
//!
//! ```
//! use patchpr::core::types::Repository;
//! use patchpr::forge::mock::{MockCall, MockRepository};
//! use patchpr::forge::{ForgeError, GitDatabase};
//!
//! # tokio_test::block_on(async {
//! let repo = Repository::new("octocat", "hello-world");
//! let mock = MockRepository::new().fail_on(MockCall::CreateBlob, ForgeError::RateLimited);
//! mock.seed(&repo, "main", &[("a.txt", "hello\n")]);
//!
//! let err = mock.create_blob(&repo, b"x").await.unwrap_err();
//! assert_eq!(err, ForgeError::RateLimited);
//! assert_eq!(mock.count(MockCall::CreateBlob), 1);
//! # });
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::traits::{
    BlobLookup, BranchCommit, Commit, CommitAuthor, ContentCommits, EntryKind, ForgeError,
    GitDatabase, GitRef, NewCommit, NewPullRequest, PullRequest, RepositoryInfo, Tree, TreeEntry,
    TreeEntryUpdate, TreeObject,
};
use crate::core::types::{FileMode, Repository};

/// Owner of forks created through the mock.
pub const MOCK_USER: &str = "mock-user";

/// Mock remote for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone)]
pub struct MockRepository {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Debug, Default)]
struct MockInner {
    objects: HashMap<String, Object>,
    repos: HashMap<Repository, RepoState>,
    pull_requests: Vec<(Repository, PullRequest)>,
    next_pr_number: u64,
    fail_on: Vec<(MockCall, ForgeError)>,
    stall_on: HashSet<MockCall>,
    fork_delay: usize,
    text_limit: Option<usize>,
    operations: Vec<MockOperation>,
}

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit(Commit),
}

#[derive(Debug, Clone)]
struct RepoState {
    default_branch: String,
    refs: BTreeMap<String, String>,
    fork: bool,
    /// Readiness polls that still report the fork as empty
    unready_polls: usize,
}

#[derive(Debug, Clone)]
struct Leaf {
    mode: FileMode,
    kind: EntryKind,
    sha: String,
}

/// Remote operations, for failure injection and verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    GetTree,
    GetBlob,
    CreateBlob,
    CreateTree,
    GetCommit,
    CreateCommit,
    GetRef,
    CreateRef,
    UpdateRef,
    CreatePullRequest,
    GetRepository,
    CreateFork,
    LookupBlob,
    ListModes,
    CreateCommitOnBranch,
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockOperation {
    pub call: MockCall,
    /// Hash, path, or reference the call was about
    pub target: String,
}

impl MockRepository {
    /// Create an empty mock remote.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                next_pr_number: 1,
                ..Default::default()
            })),
        }
    }

    /// Make every `call` fail with `error`.
    pub fn fail_on(self, call: MockCall, error: ForgeError) -> Self {
        self.state().fail_on.push((call, error));
        self
    }

    /// Make every `call` wait forever once recorded.
    pub fn stall_on(self, call: MockCall) -> Self {
        self.state().stall_on.insert(call);
        self
    }

    /// Report new forks as empty for the first `polls` reference lookups.
    pub fn with_fork_delay(self, polls: usize) -> Self {
        self.state().fork_delay = polls;
        self
    }

    /// Truncate text returned by content lookups to `limit` bytes.
    pub fn with_text_limit(self, limit: usize) -> Self {
        self.state().text_limit = Some(limit);
        self
    }

    /// Clear failure and stall configuration.
    pub fn clear_failures(&self) {
        let mut inner = self.state();
        inner.fail_on.clear();
        inner.stall_on.clear();
    }

    /// Create `repo` (if needed) with a root commit holding `files` as
    /// regular files, and point `branch` at it. The first seeded branch
    /// becomes the default branch.
    pub fn seed(&self, repo: &Repository, branch: &str, files: &[(&str, &str)]) -> Commit {
        let files: Vec<(&str, FileMode, &[u8])> = files
            .iter()
            .map(|(path, content)| (*path, FileMode::REGULAR, content.as_bytes()))
            .collect();
        self.seed_with_modes(repo, branch, &files)
    }

    /// Like [`seed`](Self::seed) with explicit modes and raw content.
    pub fn seed_with_modes(
        &self,
        repo: &Repository,
        branch: &str,
        files: &[(&str, FileMode, &[u8])],
    ) -> Commit {
        let mut inner = self.state();

        let mut leaves = BTreeMap::new();
        for (path, mode, content) in files {
            let sha = inner.store(Object::Blob(content.to_vec()));
            leaves.insert(
                path.to_string(),
                Leaf {
                    mode: *mode,
                    kind: EntryKind::Blob,
                    sha,
                },
            );
        }
        let tree = inner.write_tree(&leaves);
        let commit = inner.store_commit(NewCommit {
            message: "Initial commit".to_string(),
            tree,
            parents: Vec::new(),
            author: None,
            committer: None,
        });

        let state = inner.repos.entry(repo.clone()).or_insert_with(|| RepoState {
            default_branch: branch.to_string(),
            refs: BTreeMap::new(),
            fork: false,
            unready_polls: 0,
        });
        state
            .refs
            .insert(format!("refs/heads/{}", branch), commit.sha.clone());
        commit
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.state().operations.clone()
    }

    /// Number of recorded operations of one kind.
    pub fn count(&self, call: MockCall) -> usize {
        self.state()
            .operations
            .iter()
            .filter(|op| op.call == call)
            .count()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        self.state().operations.clear();
    }

    /// Current target of a fully qualified reference.
    pub fn ref_sha(&self, repo: &Repository, name: &str) -> Option<String> {
        self.state()
            .repos
            .get(repo)
            .and_then(|r| r.refs.get(name).cloned())
    }

    /// Move a reference directly, bypassing fast-forward checks.
    pub fn set_ref(&self, repo: &Repository, name: &str, sha: &str) {
        if let Some(state) = self.state().repos.get_mut(repo) {
            state.refs.insert(name.to_string(), sha.to_string());
        }
    }

    /// A stored commit, for verification.
    pub fn commit(&self, sha: &str) -> Option<Commit> {
        match self.state().objects.get(sha) {
            Some(Object::Commit(commit)) => Some(commit.clone()),
            _ => None,
        }
    }

    /// Every blob reachable from a tree, keyed by full path, with its mode
    /// and hash.
    pub fn files(&self, tree: &str) -> BTreeMap<String, (FileMode, String)> {
        let inner = self.state();
        let mut leaves = BTreeMap::new();
        inner.flatten(tree, "", &mut leaves);
        leaves
            .into_iter()
            .map(|(path, leaf)| (path, (leaf.mode, leaf.sha)))
            .collect()
    }

    /// Mode and content of the file at `path` in `tree`.
    pub fn read_file(&self, tree: &str, path: &str) -> Option<(FileMode, Vec<u8>)> {
        let (mode, sha) = self.files(tree).remove(path)?;
        match self.state().objects.get(&sha) {
            Some(Object::Blob(content)) => Some((mode, content.clone())),
            _ => None,
        }
    }

    /// Pull requests opened against a repository.
    pub fn pull_requests(&self, repo: &Repository) -> Vec<PullRequest> {
        self.state()
            .pull_requests
            .iter()
            .filter(|(r, _)| r == repo)
            .map(|(_, pr)| pr.clone())
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, then stall or fail if configured to.
    async fn begin(&self, call: MockCall, target: impl Into<String>) -> Result<(), ForgeError> {
        let stall = {
            let mut inner = self.state();
            inner.operations.push(MockOperation {
                call,
                target: target.into(),
            });
            if let Some((_, error)) = inner.fail_on.iter().find(|(c, _)| *c == call) {
                return Err(error.clone());
            }
            inner.stall_on.contains(&call)
        };
        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

impl Default for MockRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInner {
    fn store(&mut self, object: Object) -> String {
        let mut hasher = Sha256::new();
        match &object {
            Object::Blob(content) => {
                hasher.update(b"blob\0");
                hasher.update(content);
            }
            Object::Tree(entries) => {
                hasher.update(b"tree\0");
                for e in entries {
                    hasher.update(format!("{} {} {} {}\n", e.mode, e.kind, e.sha, e.path));
                }
            }
            Object::Commit(c) => {
                hasher.update(b"commit\0");
                hasher.update(format!("{}\n{}\n{}", c.tree, c.parents.join(" "), c.message));
                if let Some(author) = &c.author {
                    hasher.update(format!("\n{} <{}>", author.name, author.email));
                }
            }
        }
        let mut sha = hex::encode(hasher.finalize());
        sha.truncate(40);
        self.objects.insert(sha.clone(), object);
        sha
    }

    fn store_commit(&mut self, request: NewCommit) -> Commit {
        let identity = CommitAuthor {
            name: MOCK_USER.to_string(),
            email: format!("{}@example.com", MOCK_USER),
            date: None,
        };
        let mut commit = Commit {
            sha: String::new(),
            tree: request.tree,
            parents: request.parents,
            message: request.message,
            author: Some(fill_identity(request.author, &identity)),
            committer: Some(fill_identity(request.committer, &identity)),
        };
        commit.sha = self.store(Object::Commit(commit.clone()));
        if let Some(Object::Commit(stored)) = self.objects.get_mut(&commit.sha) {
            stored.sha = commit.sha.clone();
        }
        commit
    }

    /// Build trees bottom-up from full paths. Directories without leaves
    /// are not created.
    fn write_tree(&mut self, leaves: &BTreeMap<String, Leaf>) -> String {
        let mut entries = Vec::new();
        let mut dirs: BTreeMap<String, BTreeMap<String, Leaf>> = BTreeMap::new();

        for (path, leaf) in leaves {
            match path.split_once('/') {
                Some((dir, rest)) => {
                    dirs.entry(dir.to_string())
                        .or_default()
                        .insert(rest.to_string(), leaf.clone());
                }
                None => entries.push(TreeEntry {
                    path: path.clone(),
                    mode: leaf.mode,
                    kind: leaf.kind,
                    sha: leaf.sha.clone(),
                }),
            }
        }
        for (dir, children) in dirs {
            let sha = self.write_tree(&children);
            entries.push(TreeEntry {
                path: dir,
                mode: FileMode::TREE,
                kind: EntryKind::Tree,
                sha,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        self.store(Object::Tree(entries))
    }

    fn flatten(&self, tree: &str, prefix: &str, out: &mut BTreeMap<String, Leaf>) {
        let Some(Object::Tree(entries)) = self.objects.get(tree) else {
            return;
        };
        for e in entries {
            let path = format!("{}{}", prefix, e.path);
            if e.kind == EntryKind::Tree {
                self.flatten(&e.sha, &format!("{}/", path), out);
            } else {
                out.insert(
                    path,
                    Leaf {
                        mode: e.mode,
                        kind: e.kind,
                        sha: e.sha.clone(),
                    },
                );
            }
        }
    }

    /// Walk `path` from `tree`. The empty path is the tree itself.
    fn walk(&self, tree: &str, path: &str) -> Option<TreeEntry> {
        let mut current = TreeEntry {
            path: String::new(),
            mode: FileMode::TREE,
            kind: EntryKind::Tree,
            sha: tree.to_string(),
        };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let Some(Object::Tree(entries)) = self.objects.get(&current.sha) else {
                return None;
            };
            current = entries.iter().find(|e| e.path == segment)?.clone();
        }
        Some(current)
    }

    fn commit(&self, sha: &str) -> Result<&Commit, ForgeError> {
        match self.objects.get(sha) {
            Some(Object::Commit(commit)) => Ok(commit),
            _ => Err(ForgeError::NotFound(format!("commit {}", sha))),
        }
    }

    fn repo(&self, repo: &Repository) -> Result<&RepoState, ForgeError> {
        self.repos
            .get(repo)
            .ok_or_else(|| ForgeError::NotFound(format!("repository {}", repo)))
    }

    fn repo_mut(&mut self, repo: &Repository) -> Result<&mut RepoState, ForgeError> {
        self.repos
            .get_mut(repo)
            .ok_or_else(|| ForgeError::NotFound(format!("repository {}", repo)))
    }

    /// Whether `ancestor` is reachable from `sha` through parents.
    fn is_ancestor(&self, ancestor: &str, sha: &str) -> bool {
        let mut queue = VecDeque::from([sha.to_string()]);
        let mut seen = HashSet::new();
        while let Some(next) = queue.pop_front() {
            if next == ancestor {
                return true;
            }
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Ok(commit) = self.commit(&next) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        false
    }

    fn info(&self, repo: &Repository) -> Result<RepositoryInfo, ForgeError> {
        let state = self.repo(repo)?;
        Ok(RepositoryInfo {
            repository: repo.clone(),
            default_branch: state.default_branch.clone(),
            fork: state.fork,
        })
    }
}

fn unprocessable(message: impl Into<String>) -> ForgeError {
    ForgeError::ApiError {
        status: 422,
        message: message.into(),
    }
}

#[async_trait]
impl GitDatabase for MockRepository {
    async fn get_tree(&self, repo: &Repository, sha: &str) -> Result<Tree, ForgeError> {
        self.begin(MockCall::GetTree, sha).await?;
        let inner = self.state();
        inner.repo(repo)?;
        match inner.objects.get(sha) {
            Some(Object::Tree(entries)) => Ok(Tree {
                sha: sha.to_string(),
                entries: entries.clone(),
                truncated: false,
            }),
            _ => Err(ForgeError::NotFound(format!("tree {}", sha))),
        }
    }

    async fn get_blob(&self, repo: &Repository, sha: &str) -> Result<Vec<u8>, ForgeError> {
        self.begin(MockCall::GetBlob, sha).await?;
        let inner = self.state();
        inner.repo(repo)?;
        match inner.objects.get(sha) {
            Some(Object::Blob(content)) => Ok(content.clone()),
            _ => Err(ForgeError::NotFound(format!("blob {}", sha))),
        }
    }

    async fn create_blob(&self, repo: &Repository, content: &[u8]) -> Result<String, ForgeError> {
        self.begin(MockCall::CreateBlob, format!("{} bytes", content.len()))
            .await?;
        let mut inner = self.state();
        inner.repo(repo)?;
        Ok(inner.store(Object::Blob(content.to_vec())))
    }

    async fn create_tree(
        &self,
        repo: &Repository,
        base: &str,
        updates: &[TreeEntryUpdate],
    ) -> Result<String, ForgeError> {
        self.begin(MockCall::CreateTree, base).await?;
        let mut inner = self.state();
        inner.repo(repo)?;
        if !matches!(inner.objects.get(base), Some(Object::Tree(_))) {
            return Err(unprocessable(format!("base tree {} does not exist", base)));
        }

        let mut leaves = BTreeMap::new();
        inner.flatten(base, "", &mut leaves);

        for update in updates {
            match &update.object {
                TreeObject::Delete => {
                    leaves.remove(&update.path);
                }
                TreeObject::Blob(sha) => {
                    if !matches!(inner.objects.get(sha), Some(Object::Blob(_))) {
                        return Err(unprocessable(format!("blob {} does not exist", sha)));
                    }
                    leaves.insert(
                        update.path.clone(),
                        Leaf {
                            mode: update.mode,
                            kind: EntryKind::Blob,
                            sha: sha.clone(),
                        },
                    );
                }
                TreeObject::Content(content) => {
                    let sha = inner.store(Object::Blob(content.clone()));
                    leaves.insert(
                        update.path.clone(),
                        Leaf {
                            mode: update.mode,
                            kind: EntryKind::Blob,
                            sha,
                        },
                    );
                }
            }
        }

        Ok(inner.write_tree(&leaves))
    }

    async fn get_commit(&self, repo: &Repository, sha: &str) -> Result<Commit, ForgeError> {
        self.begin(MockCall::GetCommit, sha).await?;
        let inner = self.state();
        inner.repo(repo)?;
        inner.commit(sha).cloned()
    }

    async fn create_commit(
        &self,
        repo: &Repository,
        commit: &NewCommit,
    ) -> Result<Commit, ForgeError> {
        self.begin(MockCall::CreateCommit, &commit.tree).await?;
        let mut inner = self.state();
        inner.repo(repo)?;
        if !matches!(inner.objects.get(&commit.tree), Some(Object::Tree(_))) {
            return Err(unprocessable(format!("tree {} does not exist", commit.tree)));
        }
        for parent in &commit.parents {
            if inner.commit(parent).is_err() {
                return Err(unprocessable(format!("parent {} does not exist", parent)));
            }
        }
        Ok(inner.store_commit(commit.clone()))
    }

    async fn get_ref(&self, repo: &Repository, name: &str) -> Result<Option<GitRef>, ForgeError> {
        self.begin(MockCall::GetRef, name).await?;
        let mut inner = self.state();
        let state = inner.repo_mut(repo)?;
        if state.unready_polls > 0 {
            state.unready_polls -= 1;
            return Ok(None);
        }
        Ok(state.refs.get(name).map(|sha| GitRef {
            name: name.to_string(),
            sha: sha.clone(),
        }))
    }

    async fn create_ref(
        &self,
        repo: &Repository,
        name: &str,
        sha: &str,
    ) -> Result<GitRef, ForgeError> {
        self.begin(MockCall::CreateRef, name).await?;
        let mut inner = self.state();
        if inner.commit(sha).is_err() {
            return Err(unprocessable("Object does not exist"));
        }
        let state = inner.repo_mut(repo)?;
        if state.refs.contains_key(name) {
            return Err(unprocessable("Reference already exists"));
        }
        state.refs.insert(name.to_string(), sha.to_string());
        Ok(GitRef {
            name: name.to_string(),
            sha: sha.to_string(),
        })
    }

    async fn update_ref(
        &self,
        repo: &Repository,
        name: &str,
        sha: &str,
        force: bool,
    ) -> Result<GitRef, ForgeError> {
        self.begin(MockCall::UpdateRef, name).await?;
        let mut inner = self.state();
        if inner.commit(sha).is_err() {
            return Err(unprocessable("Object does not exist"));
        }
        let current = inner
            .repo(repo)?
            .refs
            .get(name)
            .cloned()
            .ok_or_else(|| unprocessable("Reference does not exist"))?;
        if !force && !inner.is_ancestor(&current, sha) {
            return Err(unprocessable("Update is not a fast forward"));
        }
        inner
            .repo_mut(repo)?
            .refs
            .insert(name.to_string(), sha.to_string());
        Ok(GitRef {
            name: name.to_string(),
            sha: sha.to_string(),
        })
    }

    async fn create_pull_request(
        &self,
        repo: &Repository,
        request: &NewPullRequest,
    ) -> Result<PullRequest, ForgeError> {
        self.begin(MockCall::CreatePullRequest, &request.head).await?;
        let mut inner = self.state();

        let (head_repo, head_branch) = match request.head.split_once(':') {
            Some((owner, branch)) => (Repository::new(owner, repo.name.clone()), branch),
            None => (repo.clone(), request.head.as_str()),
        };
        let head_exists = inner
            .repos
            .get(&head_repo)
            .is_some_and(|r| r.refs.contains_key(&format!("refs/heads/{}", head_branch)));
        let base_exists = inner
            .repo(repo)?
            .refs
            .contains_key(&format!("refs/heads/{}", request.base));
        if !head_exists || !base_exists {
            return Err(unprocessable("Validation Failed"));
        }

        let number = inner.next_pr_number;
        inner.next_pr_number += 1;
        let pr = PullRequest {
            number,
            url: format!("https://github.com/{}/pull/{}", repo, number),
            head: request.head.clone(),
            base: request.base.clone(),
            title: request.title.clone(),
        };
        inner.pull_requests.push((repo.clone(), pr.clone()));
        Ok(pr)
    }

    async fn get_repository(&self, repo: &Repository) -> Result<RepositoryInfo, ForgeError> {
        self.begin(MockCall::GetRepository, repo.to_string()).await?;
        self.state().info(repo)
    }

    async fn create_fork(&self, repo: &Repository) -> Result<RepositoryInfo, ForgeError> {
        self.begin(MockCall::CreateFork, repo.to_string()).await?;
        let mut inner = self.state();
        let source = inner.repo(repo)?.clone();
        let fork = Repository::new(MOCK_USER, repo.name.clone());

        if !inner.repos.contains_key(&fork) {
            let unready_polls = inner.fork_delay;
            inner.repos.insert(
                fork.clone(),
                RepoState {
                    default_branch: source.default_branch,
                    refs: source.refs,
                    fork: true,
                    unready_polls,
                },
            );
        }
        inner.info(&fork)
    }
}

#[async_trait]
impl ContentCommits for MockRepository {
    async fn lookup_blob(
        &self,
        repo: &Repository,
        commit: &str,
        path: &str,
    ) -> Result<Option<BlobLookup>, ForgeError> {
        self.begin(MockCall::LookupBlob, path).await?;
        let inner = self.state();
        inner.repo(repo)?;
        let tree = inner.commit(commit)?.tree.clone();

        let Some(entry) = inner.walk(&tree, path) else {
            return Ok(None);
        };
        let Some(Object::Blob(content)) = inner.objects.get(&entry.sha) else {
            return Ok(None);
        };

        let text = std::str::from_utf8(content)
            .ok()
            .filter(|s| !s.contains('\0'))
            .map(str::to_string);
        let (text, truncated) = match (text, inner.text_limit) {
            (Some(mut text), Some(limit)) if text.len() > limit => {
                let mut end = limit;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
                (Some(text), true)
            }
            (text, _) => (text, false),
        };

        Ok(Some(BlobLookup {
            oid: entry.sha,
            text,
            truncated,
        }))
    }

    async fn list_modes(
        &self,
        repo: &Repository,
        commit: &str,
        directory: &str,
    ) -> Result<Vec<(String, FileMode)>, ForgeError> {
        self.begin(MockCall::ListModes, directory).await?;
        let inner = self.state();
        inner.repo(repo)?;
        let tree = inner.commit(commit)?.tree.clone();

        let Some(dir) = inner.walk(&tree, directory) else {
            return Ok(Vec::new());
        };
        let Some(Object::Tree(entries)) = inner.objects.get(&dir.sha) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .filter(|e| e.kind == EntryKind::Blob)
            .map(|e| (e.path.clone(), e.mode))
            .collect())
    }

    async fn create_commit_on_branch(
        &self,
        repo: &Repository,
        request: &BranchCommit,
    ) -> Result<String, ForgeError> {
        self.begin(MockCall::CreateCommitOnBranch, &request.branch)
            .await?;
        let mut inner = self.state();

        let head = inner
            .repo(repo)?
            .refs
            .get(&request.branch)
            .cloned()
            .ok_or_else(|| ForgeError::NotFound(format!("branch {}", request.branch)))?;
        if head != request.expected_head {
            return Err(ForgeError::Conflict(format!(
                "Expected branch to point to \"{}\" but it did not",
                request.expected_head
            )));
        }

        let base_tree = inner.commit(&head)?.tree.clone();
        let mut leaves = BTreeMap::new();
        inner.flatten(&base_tree, "", &mut leaves);

        for path in &request.changes.deletions {
            if leaves.remove(path).is_none() {
                return Err(unprocessable(format!("path {} does not exist", path)));
            }
        }
        for addition in &request.changes.additions {
            let mode = leaves
                .get(&addition.path)
                .map(|l| l.mode)
                .unwrap_or(FileMode::REGULAR);
            let sha = inner.store(Object::Blob(addition.contents.clone()));
            leaves.insert(
                addition.path.clone(),
                Leaf {
                    mode,
                    kind: EntryKind::Blob,
                    sha,
                },
            );
        }

        let tree = inner.write_tree(&leaves);
        let message = if request.body.is_empty() {
            request.headline.clone()
        } else {
            format!("{}\n\n{}", request.headline, request.body)
        };
        let commit = inner.store_commit(NewCommit {
            message,
            tree,
            parents: vec![head],
            author: None,
            committer: None,
        });

        inner
            .repo_mut(repo)?
            .refs
            .insert(request.branch.clone(), commit.sha.clone());
        Ok(commit.sha)
    }
}

/// The stored identity for a requested one; an empty name and email take
/// the mock user's, keeping any requested date.
fn fill_identity(requested: Option<CommitAuthor>, user: &CommitAuthor) -> CommitAuthor {
    match requested {
        Some(person) if person.name.is_empty() && person.email.is_empty() => CommitAuthor {
            date: person.date,
            ..user.clone()
        },
        Some(person) => person,
        None => user.clone(),
    }
}
