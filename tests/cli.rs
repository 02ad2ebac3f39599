//! Integration tests for the `patchpr` binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PATCH: &str = "\
From: Morton Haypenny <mhaypenny@example.com>
Date: Sat, 11 Apr 2020 15:21:23 -0700
Subject: [PATCH] Say hello to the world

---
diff --git a/a.txt b/a.txt
index 1111111..2222222 100644
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-hello
+hello world
";

/// A command isolated from the user's config and credentials.
fn patchpr(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("patchpr").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home)
        .env_remove("PATCHPR_CONFIG")
        .env_remove("GITHUB_TOKEN")
        .env_remove("GIT_AUTHOR_NAME")
        .env_remove("GIT_AUTHOR_EMAIL")
        .env_remove("GIT_AUTHOR_DATE")
        .env_remove("GIT_COMMITTER_NAME")
        .env_remove("GIT_COMMITTER_EMAIL")
        .env_remove("GIT_COMMITTER_DATE");
    cmd
}

mod usage {
    use super::*;

    #[test]
    fn help_lists_flags() {
        let home = TempDir::new().unwrap();
        patchpr(home.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("--repository"))
            .stdout(predicate::str::contains("--patch-base"))
            .stdout(predicate::str::contains("--strategy"));
    }

    #[test]
    fn repository_is_required() {
        let home = TempDir::new().unwrap();
        patchpr(home.path())
            .arg("fix.patch")
            .assert()
            .code(2)
            .stderr(predicate::str::contains("--repository"));
    }

    #[test]
    fn token_is_required() {
        let home = TempDir::new().unwrap();
        let patch = home.path().join("fix.patch");
        std::fs::write(&patch, PATCH).unwrap();

        patchpr(home.path())
            .args(["--repository", "octocat/hello-world"])
            .arg(&patch)
            .assert()
            .failure()
            .stderr(predicate::str::contains("token is required"));
    }

    #[test]
    fn patch_without_changes_fails_before_network() {
        let home = TempDir::new().unwrap();
        patchpr(home.path())
            .args(["--repository", "octocat/hello-world", "--token", "t", "-"])
            .args(["--url", "http://127.0.0.1:9"])
            .write_stdin("just some text\n")
            .assert()
            .failure()
            .stderr(predicate::str::contains("contains no file changes"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let home = TempDir::new().unwrap();
        let config = home.path().join("config.toml");
        std::fs::write(&config, "[commit]\nstrategy = \"sideways\"\n").unwrap();

        patchpr(home.path())
            .env("PATCHPR_CONFIG", &config)
            .args(["--repository", "octocat/hello-world", "--token", "t"])
            .write_stdin(PATCH)
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to parse config file"));
    }
}

mod end_to_end {
    use super::*;

    async fn mount(server: &MockServer, verb: &str, route: &str, status: u16, body: Value) {
        Mock::given(method(verb))
            .and(path(format!("/repos/octocat/hello-world/{}", route)))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn github() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/hello-world"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "hello-world",
                "owner": {"login": "octocat"},
                "default_branch": "main",
                "fork": false,
            })))
            .mount(&server)
            .await;
        mount(&server, "GET", "git/ref/heads/main", 200,
            json!({"ref": "refs/heads/main", "object": {"sha": "c1"}})).await;
        mount(&server, "GET", "git/commits/c1", 200,
            json!({"sha": "c1", "tree": {"sha": "t1"}, "parents": [], "message": "init"})).await;
        mount(&server, "GET", "git/trees/t1", 200, json!({
            "sha": "t1",
            "tree": [{"path": "a.txt", "mode": "100644", "type": "blob", "sha": "b1"}],
        }))
        .await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/hello-world/git/blobs/b1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes("hello\n"))
            .mount(&server)
            .await;
        mount(&server, "POST", "git/blobs", 201, json!({"sha": "b2"})).await;
        mount(&server, "POST", "git/trees", 201, json!({"sha": "t2"})).await;
        mount(&server, "POST", "git/commits", 201, json!({
            "sha": "c2", "tree": {"sha": "t2"}, "parents": [{"sha": "c1"}],
            "message": "Say hello to the world",
        }))
        .await;
        mount(&server, "GET", "git/commits/c2", 200, json!({
            "sha": "c2", "tree": {"sha": "t2"}, "parents": [{"sha": "c1"}],
            "message": "Say hello to the world",
        }))
        .await;
        mount(&server, "GET", "git/ref/heads/patchpr", 404, json!({"message": "Not Found"})).await;
        mount(&server, "POST", "git/refs", 201,
            json!({"ref": "refs/heads/patchpr", "object": {"sha": "c2"}})).await;
        mount(&server, "POST", "pulls", 201, json!({
            "number": 7,
            "html_url": "https://github.com/octocat/hello-world/pull/7",
            "title": "Say hello to the world",
            "head": {"ref": "patchpr"},
            "base": {"ref": "main"},
        }))
        .await;
        server
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn creates_commit_branch_and_pull_request() {
        let server = github().await;
        let url = server.uri();

        let output = tokio::task::spawn_blocking(move || {
            let home = TempDir::new().unwrap();
            patchpr(home.path())
                .env("GITHUB_TOKEN", "test-token")
                .args(["--repository", "octocat/hello-world", "--json", "--url", url.as_str()])
                .write_stdin(PATCH)
                .assert()
                .success()
                .get_output()
                .stdout
                .clone()
        })
        .await
        .unwrap();

        let result: Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(
            result,
            json!({
                "commit": "c2",
                "tree": "t2",
                "pull_request": {"number": 7, "url": "https://github.com/octocat/hello-world/pull/7"},
            })
        );

        let requests = server.received_requests().await.unwrap();
        let commit = requests
            .iter()
            .find(|r| r.method.as_str() == "POST" && r.url.path().ends_with("/git/commits"))
            .unwrap();
        let body: Value = serde_json::from_slice(&commit.body).unwrap();
        assert_eq!(body["message"], "Say hello to the world");
        assert_eq!(body["parents"], json!(["c1"]));
        assert_eq!(body["author"]["name"], "Morton Haypenny");
        assert_eq!(body["author"]["date"], "2020-04-11T15:21:23-07:00");

        let pull = requests
            .iter()
            .find(|r| r.url.path().ends_with("/pulls"))
            .unwrap();
        let body: Value = serde_json::from_slice(&pull.body).unwrap();
        assert_eq!(body["head"], "patchpr");
        assert_eq!(body["base"], "main");
    }
}
