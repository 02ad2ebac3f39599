//! Integration tests for `GitHubClient` against a local HTTP server.
//!
//! Each test mounts the endpoints one operation needs and checks both the
//! request the client sends and how it reads the response.

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use patchpr::core::types::{FileMode, Repository};
use patchpr::forge::github::GitHubClient;
use patchpr::forge::{
    BranchCommit, ContentCommits, EntryKind, FileAddition, FileChanges, ForgeError, GitDatabase,
    NewPullRequest, TreeEntryUpdate,
};

fn repo() -> Repository {
    Repository::new("octocat", "hello-world")
}

fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::with_api_base("test-token", &server.uri(), Duration::from_secs(5)).unwrap()
}

/// JSON bodies of every request the server received, in order.
async fn bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap_or(Value::Null))
        .collect()
}

// =============================================================================
// REST
// =============================================================================

mod rest {
    use super::*;

    #[tokio::test]
    async fn get_tree_sends_headers_and_parses_modes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/hello-world/git/trees/t1"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("x-github-api-version", "2022-11-28"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sha": "t1",
                "truncated": false,
                "tree": [
                    {"path": "run.sh", "mode": "100755", "type": "blob", "sha": "b1", "size": 10},
                    {"path": "src", "mode": "040000", "type": "tree", "sha": "t2"},
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tree = client(&server).get_tree(&repo(), "t1").await.unwrap();
        assert_eq!(tree.entries.len(), 2);
        let run = tree.find("run.sh", EntryKind::Blob).unwrap();
        assert_eq!(run.mode, FileMode::EXECUTABLE);
        assert!(tree.find("src", EntryKind::Tree).is_some());
    }

    #[tokio::test]
    async fn get_blob_reads_raw_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/hello-world/git/blobs/b1"))
            .and(header("accept", "application/vnd.github.raw"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8, 159, 146, 150]))
            .mount(&server)
            .await;

        let blob = client(&server).get_blob(&repo(), "b1").await.unwrap();
        assert_eq!(blob, vec![0u8, 159, 146, 150]);
    }

    #[tokio::test]
    async fn create_tree_inlines_text_and_uploads_binary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/octocat/hello-world/git/blobs"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sha": "blob9"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/octocat/hello-world/git/trees"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sha": "tree9"})))
            .expect(1)
            .mount(&server)
            .await;

        let updates = [
            TreeEntryUpdate::content("a.txt", FileMode::REGULAR, b"hello\n".to_vec()),
            TreeEntryUpdate::content("logo.png", FileMode::REGULAR, vec![0x89, 0xff, 0x00]),
            TreeEntryUpdate::blob("run.sh", FileMode::EXECUTABLE, "b1"),
            TreeEntryUpdate::delete("gone.sh", FileMode::EXECUTABLE),
        ];
        let sha = client(&server)
            .create_tree(&repo(), "base", &updates)
            .await
            .unwrap();
        assert_eq!(sha, "tree9");

        let bodies = bodies(&server).await;
        assert_eq!(bodies[0], json!({"content": "if8A", "encoding": "base64"}));
        assert_eq!(
            bodies[1],
            json!({
                "base_tree": "base",
                "tree": [
                    {"path": "a.txt", "mode": "100644", "type": "blob", "content": "hello\n"},
                    {"path": "logo.png", "mode": "100644", "type": "blob", "sha": "blob9"},
                    {"path": "run.sh", "mode": "100755", "type": "blob", "sha": "b1"},
                    {"path": "gone.sh", "mode": "100755", "type": "blob", "sha": null},
                ]
            })
        );
    }

    #[tokio::test]
    async fn create_commit_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/octocat/hello-world/git/commits"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "sha": "c2",
                "tree": {"sha": "t2"},
                "parents": [{"sha": "c1"}],
                "message": "Fix",
                "author": {"name": "A", "email": "a@example.com", "date": "2020-04-11T22:21:23Z"},
                "committer": {"name": "C", "email": "c@example.com", "date": "2020-04-11T22:21:23Z"},
            })))
            .mount(&server)
            .await;

        let commit = client(&server)
            .create_commit(
                &repo(),
                &patchpr::forge::NewCommit {
                    message: "Fix".into(),
                    tree: "t2".into(),
                    parents: vec!["c1".into()],
                    author: None,
                    committer: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(commit.sha, "c2");
        assert_eq!(commit.tree, "t2");
        assert_eq!(commit.parents, vec!["c1".to_string()]);
        assert_eq!(commit.author.unwrap().date.unwrap().timestamp(), 1586643683);

        // identities the caller leaves out are not sent
        let body = &bodies(&server).await[0];
        assert!(body.get("author").is_none());
        assert_eq!(body["parents"], json!(["c1"]));
    }

    #[tokio::test]
    async fn refs_strip_prefix_and_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/hello-world/git/ref/heads/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/repos/octocat/hello-world/git/refs/heads/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ref": "refs/heads/main",
                "object": {"sha": "c2", "type": "commit"}
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.get_ref(&repo(), "refs/heads/missing").await.unwrap(), None);

        let updated = client
            .update_ref(&repo(), "refs/heads/main", "c2", true)
            .await
            .unwrap();
        assert_eq!(updated.name, "refs/heads/main");
        assert_eq!(updated.sha, "c2");
        assert_eq!(bodies(&server).await[1], json!({"sha": "c2", "force": true}));
    }

    #[tokio::test]
    async fn pull_request_and_fork() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/octocat/hello-world/pulls"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "number": 42,
                "html_url": "https://github.com/octocat/hello-world/pull/42",
                "title": "Fix",
                "head": {"ref": "patchpr", "label": "me:patchpr"},
                "base": {"ref": "main"},
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/octocat/hello-world/forks"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "name": "hello-world",
                "owner": {"login": "me"},
                "default_branch": "main",
                "fork": true,
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let pr = client
            .create_pull_request(
                &repo(),
                &NewPullRequest {
                    title: "Fix".into(),
                    head: "me:patchpr".into(),
                    base: "main".into(),
                    body: None,
                    draft: true,
                    maintainer_can_modify: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(pr.number, 42);
        assert_eq!(pr.url, "https://github.com/octocat/hello-world/pull/42");

        let fork = client.create_fork(&repo()).await.unwrap();
        assert_eq!(fork.repository, Repository::new("me", "hello-world"));
        assert!(fork.fork);

        let body = &bodies(&server).await[0];
        assert_eq!(body["head"], "me:patchpr");
        assert_eq!(body["draft"], true);
        assert!(body.get("body").is_none());
    }
}

// =============================================================================
// Error mapping
// =============================================================================

mod errors {
    use super::*;

    async fn error_for(response: ResponseTemplate) -> ForgeError {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(response)
            .mount(&server)
            .await;
        client(&server)
            .get_repository(&repo())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn status_codes() {
        assert!(matches!(
            error_for(ResponseTemplate::new(401)).await,
            ForgeError::AuthFailed(_)
        ));
        assert!(matches!(
            error_for(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"}))).await,
            ForgeError::NotFound(m) if m == "Not Found"
        ));
        assert!(matches!(
            error_for(ResponseTemplate::new(429)).await,
            ForgeError::RateLimited
        ));
        assert!(matches!(
            error_for(ResponseTemplate::new(502)).await,
            ForgeError::ApiError { status: 502, ref message } if message.contains("server error")
        ));
        assert!(matches!(
            error_for(ResponseTemplate::new(422).set_body_json(json!({"message": "Validation Failed"}))).await,
            ForgeError::ApiError { status: 422, ref message } if message == "Validation Failed"
        ));
    }

    #[tokio::test]
    async fn forbidden_with_exhausted_quota_is_rate_limited() {
        let limited = ResponseTemplate::new(403)
            .insert_header("X-RateLimit-Remaining", "0")
            .set_body_json(json!({"message": "API rate limit exceeded"}));
        assert!(matches!(error_for(limited).await, ForgeError::RateLimited));

        let denied = ResponseTemplate::new(403).set_body_json(json!({"message": "Resource not accessible"}));
        assert!(matches!(
            error_for(denied).await,
            ForgeError::AuthFailed(m) if m.contains("Resource not accessible")
        ));
    }

    #[tokio::test]
    async fn empty_token_is_rejected_locally() {
        let server = MockServer::start().await;
        let client =
            GitHubClient::with_api_base("", &server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.get_repository(&repo()).await.unwrap_err();
        assert_eq!(err, ForgeError::AuthRequired);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}

// =============================================================================
// GraphQL
// =============================================================================

mod graphql {
    use super::*;

    async fn graphql_server(response: Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn lookup_blob_text_and_binary() {
        let server = graphql_server(json!({"data": {"repository": {"object": {
            "__typename": "Blob", "oid": "b1", "isBinary": false, "isTruncated": false, "text": "hello\n"
        }}}}))
        .await;
        let found = client(&server)
            .lookup_blob(&repo(), "c1", "a.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.oid, "b1");
        assert_eq!(found.text.as_deref(), Some("hello\n"));
        assert_eq!(bodies(&server).await[0]["variables"]["expression"], "c1:a.txt");

        let server = graphql_server(json!({"data": {"repository": {"object": {
            "__typename": "Blob", "oid": "b2", "isBinary": true, "isTruncated": false, "text": null
        }}}}))
        .await;
        let found = client(&server)
            .lookup_blob(&repo(), "c1", "logo.png")
            .await
            .unwrap()
            .unwrap();
        assert!(found.text.is_none());
        assert!(!found.is_readable());
    }

    #[tokio::test]
    async fn lookup_of_missing_path_is_none() {
        let server = graphql_server(json!({"data": {"repository": {"object": null}}})).await;
        let found = client(&server)
            .lookup_blob(&repo(), "c1", "nope.txt")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn list_modes_reads_numeric_modes() {
        let server = graphql_server(json!({"data": {"repository": {"object": {
            "__typename": "Tree",
            "entries": [
                {"name": "run.sh", "mode": 33261, "type": "blob"},
                {"name": "a.txt", "mode": 33188, "type": "blob"},
                {"name": "src", "mode": 16384, "type": "tree"},
            ]
        }}}}))
        .await;
        let modes = client(&server).list_modes(&repo(), "c1", "").await.unwrap();
        assert_eq!(
            modes,
            vec![
                ("run.sh".to_string(), FileMode::EXECUTABLE),
                ("a.txt".to_string(), FileMode::REGULAR),
            ]
        );
    }

    fn branch_commit() -> BranchCommit {
        BranchCommit {
            branch: "refs/heads/patchpr".into(),
            expected_head: "c1".into(),
            headline: "Fix".into(),
            body: String::new(),
            changes: FileChanges {
                additions: vec![FileAddition {
                    path: "a.txt".into(),
                    contents: b"hi\n".to_vec(),
                }],
                deletions: vec!["b.txt".into()],
            },
        }
    }

    #[tokio::test]
    async fn commit_on_branch_sends_mutation_input() {
        let server = graphql_server(json!({"data": {"createCommitOnBranch": {"commit": {"oid": "c2"}}}})).await;

        let sha = client(&server)
            .create_commit_on_branch(&repo(), &branch_commit())
            .await
            .unwrap();
        assert_eq!(sha, "c2");

        let input = &bodies(&server).await[0]["variables"]["input"];
        assert_eq!(
            input["branch"],
            json!({"repositoryNameWithOwner": "octocat/hello-world", "branchName": "patchpr"})
        );
        assert_eq!(input["expectedHeadOid"], "c1");
        assert_eq!(input["message"], json!({"headline": "Fix"}));
        assert_eq!(
            input["fileChanges"],
            json!({"additions": [{"path": "a.txt", "contents": "aGkK"}], "deletions": [{"path": "b.txt"}]})
        );
    }

    #[tokio::test]
    async fn moved_branch_is_conflict() {
        let server = graphql_server(json!({
            "data": {"createCommitOnBranch": null},
            "errors": [{"type": "STALE_DATA", "message": "Expected branch to point to \"c1\" but it did not"}]
        }))
        .await;

        let err = client(&server)
            .create_commit_on_branch(&repo(), &branch_commit())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Conflict(_)));
    }

    #[test]
    fn enterprise_endpoint() {
        let client = GitHubClient::with_api_base(
            "t",
            "https://github.example.com/api/v3/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.graphql_url(), "https://github.example.com/api/graphql");
    }
}

// =============================================================================
// Live API (read-only)
// =============================================================================

#[cfg(feature = "live_github_tests")]
mod live_tests {
    use super::*;

    fn get_test_token() -> Option<String> {
        std::env::var("GITHUB_TOKEN").ok()
    }

    fn get_test_repo() -> Option<Repository> {
        let repo = std::env::var("PATCHPR_TEST_REPOSITORY").ok()?;
        Repository::parse(&repo).ok()
    }

    #[tokio::test]
    async fn live_default_branch_resolves_to_tree() {
        let Some(token) = get_test_token() else {
            eprintln!("Skipping: GITHUB_TOKEN not set");
            return;
        };
        let Some(repo) = get_test_repo() else {
            eprintln!("Skipping: PATCHPR_TEST_REPOSITORY not set");
            return;
        };

        let client = GitHubClient::new(token).unwrap();
        let info = client.get_repository(&repo).await.unwrap();
        let head = client
            .get_ref(&repo, &format!("refs/heads/{}", info.default_branch))
            .await
            .unwrap()
            .expect("default branch exists");

        let commit = client.get_commit(&repo, &head.sha).await.unwrap();
        let tree = client.get_tree(&repo, &commit.tree).await.unwrap();
        assert_eq!(tree.sha, commit.tree);

        let modes = client.list_modes(&repo, &head.sha, "").await.unwrap();
        assert!(modes.iter().all(|(name, _)| !name.contains('/')));
    }

    #[tokio::test]
    async fn live_missing_ref_is_none() {
        let (Some(token), Some(repo)) = (get_test_token(), get_test_repo()) else {
            eprintln!("Skipping: live credentials not set");
            return;
        };

        let client = GitHubClient::new(token).unwrap();
        let missing = client
            .get_ref(&repo, "refs/heads/patchpr-does-not-exist-7f3a")
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
