//! Whole-client integration tests against a mock Hub, exercising the public
//! `Client` facade end to end rather than any one component in isolation.

use hub_cache::{Client, DownloadOptions, HubConfig, HubError, SnapshotOptions};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, cache_dir: &std::path::Path) -> Client {
    let config = HubConfig::builder().endpoint(server.uri()).cache_dir(cache_dir).build();
    Client::new(config)
}

#[tokio::test]
async fn download_file_then_try_to_load_from_cache_finds_it() {
    let server = MockServer::start().await;
    let commit = "1".repeat(40);
    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Repo-Commit", commit.as_str())
                .insert_header("ETag", "\"etag-config\"")
                .insert_header("Content-Length", "2"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
        .mount(&server)
        .await;

    let cache_dir = tempfile::tempdir().unwrap();
    let client = client_for(&server, cache_dir.path());
    let repo = hub_cache::RepoId::model("acme/widget");
    let options = DownloadOptions {
        revision: Some("main"),
        ..Default::default()
    };

    let path = client.download_file(&repo, "config.json", &options).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"{}");

    let cached = client
        .try_to_load_from_cache(&repo, "config.json", "main")
        .await
        .unwrap();
    assert_eq!(cached, Some(path));
}

#[tokio::test]
async fn snapshot_download_filters_by_allow_pattern_and_writes_every_matching_file() {
    let server = MockServer::start().await;
    let commit = "2".repeat(40);

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/models/.*/revision/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sha": commit,
            "siblings": [
                {"rfilename": "config.json"},
                {"rfilename": "weights.bin"},
                {"rfilename": "README.md"},
            ],
        })))
        .mount(&server)
        .await;

    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Repo-Commit", commit.as_str())
                .insert_header("ETag", "\"etag-any\"")
                .insert_header("Content-Length", "4"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"/resolve/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
        .mount(&server)
        .await;

    let cache_dir = tempfile::tempdir().unwrap();
    let client = client_for(&server, cache_dir.path());
    let repo = hub_cache::RepoId::model("acme/widget");
    let allow = vec!["*.json".to_string()];
    let options = SnapshotOptions {
        revision: Some(&commit),
        allow_patterns: &allow,
        ..Default::default()
    };

    let snapshot_dir = client.snapshot_download(&repo, &options).await.unwrap();
    assert!(snapshot_dir.join("config.json").exists());
    assert!(!snapshot_dir.join("weights.bin").exists());
    assert!(!snapshot_dir.join("README.md").exists());
}

#[tokio::test]
async fn local_files_only_with_nothing_cached_is_local_entry_not_found() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let client = client_for(&server, cache_dir.path());
    let repo = hub_cache::RepoId::model("acme/widget");
    let options = DownloadOptions {
        local_files_only: true,
        ..Default::default()
    };

    let err = client.download_file(&repo, "config.json", &options).await.unwrap_err();
    assert!(matches!(err, HubError::LocalEntryNotFound { .. }));
}
