//! Full runs through the coordinator: discovery, queue, workers, store

use crate::common::{commit_json, release_json, repo_json, test_config};
use serde_json::json;
use star_harvest::config::{Config, DiscoverySourceKind, ExecutionStrategy, QueueMode};
use star_harvest::crawler::Coordinator;
use star_harvest::storage::{RunStatus, StoreStats};
use std::path::Path;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NAMES: [&str; 4] = ["alpha", "bravo", "charlie", "delta"];

/// Two star ranges whose boundary repository (`charlie`) appears in both
async fn mount_search(server: &MockServer) {
    let page = |q: &str, page: &str, items: serde_json::Value| {
        Mock::given(method("GET"))
            .and(path("/search/repositories"))
            .and(query_param("q", q))
            .and(query_param("page", page))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({
                    "total_count": 3,
                    "items": items
                })),
            )
    };

    page(
        "stars:>=5000",
        "1",
        json!([repo_json(1, "acme", "alpha", 9000), repo_json(2, "acme", "bravo", 7000)]),
    )
    .mount(server)
    .await;
    page(
        "stars:>=5000",
        "2",
        json!([repo_json(3, "acme", "charlie", 5000)]),
    )
    .mount(server)
    .await;
    page(
        "stars:1000..4999",
        "1",
        json!([repo_json(3, "acme", "charlie", 5000), repo_json(4, "acme", "delta", 1200)]),
    )
    .mount(server)
    .await;
    page("stars:1000..4999", "2", json!([])).mount(server).await;
}

/// One release and one commit per repository
async fn mount_history(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/repos/acme/[a-z]+/releases$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([release_json("v1.0", "2024-01-01T00:00:00Z")])),
        )
        .mount(server)
        .await;

    for name in NAMES {
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/{}/commits", name)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([commit_json(&format!("{}-c1", name), "init")])),
            )
            .mount(server)
            .await;
    }
}

fn search_config(server: &MockServer, db: &Path) -> Config {
    let mut config = test_config(server, db);
    config.discovery.star_ranges = vec!["stars:>=5000".to_string(), "stars:1000..4999".to_string()];
    config
}

#[tokio::test]
async fn test_batch_run_ingests_discovered_repositories() {
    let server = MockServer::start().await;
    mount_search(&server).await;
    mount_history(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = search_config(&server, &dir.path().join("harvest.db"));
    let coordinator = Coordinator::new(config, "hash".to_string()).unwrap();

    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.discovered, 4);
    assert_eq!(summary.tally.succeeded, 4);
    assert_eq!(summary.tally.failed, 0);
    assert_eq!(summary.metrics.processed, 4);
    assert_eq!(
        coordinator.store().stats().unwrap(),
        StoreStats {
            repositories: 4,
            releases: 4,
            commits: 4,
        }
    );

    let run = coordinator.store().get_run(summary.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.tally, summary.tally);
    assert_eq!(run.config_hash, "hash");
    assert!(coordinator.queue().is_empty().unwrap());
}

#[tokio::test]
async fn test_second_run_skips_processed_repositories() {
    let server = MockServer::start().await;
    mount_search(&server).await;
    mount_history(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = search_config(&server, &dir.path().join("harvest.db"));
    let coordinator = Coordinator::new(config, "hash".to_string()).unwrap();

    coordinator.run().await.unwrap();
    let before = coordinator.store().stats().unwrap();

    let second = coordinator.run().await.unwrap();
    assert_eq!(second.tally.skipped, 4);
    assert_eq!(second.tally.succeeded, 0);
    assert_eq!(coordinator.store().stats().unwrap(), before);
    assert_eq!(coordinator.store().recent_runs(5).unwrap().len(), 2);
}

#[tokio::test]
async fn test_discovery_limit_caps_queue() {
    let server = MockServer::start().await;
    mount_search(&server).await;
    mount_history(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = search_config(&server, &dir.path().join("harvest.db"));
    config.discovery.limit = 3;
    let coordinator = Coordinator::new(config, "hash".to_string()).unwrap();

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.tally.total(), 3);
}

#[tokio::test]
async fn test_streaming_mode_drains_while_discovering() {
    let server = MockServer::start().await;
    mount_search(&server).await;
    mount_history(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = search_config(&server, &dir.path().join("harvest.db"));
    config.crawler.mode = QueueMode::Streaming;
    let coordinator = Coordinator::new(config, "hash".to_string()).unwrap();

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.discovered, 4);
    assert_eq!(summary.tally.succeeded, 4);
    assert_eq!(coordinator.store().stats().unwrap().repositories, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execution_strategies_persist_identical_state() {
    let server = MockServer::start().await;
    mount_search(&server).await;
    mount_history(&server).await;

    let mut results = Vec::new();
    for strategy in [ExecutionStrategy::Threads, ExecutionStrategy::Tasks] {
        let dir = tempfile::tempdir().unwrap();
        let mut config = search_config(&server, &dir.path().join("harvest.db"));
        config.crawler.strategy = strategy;
        let coordinator = Coordinator::new(config, "hash".to_string()).unwrap();

        let summary = coordinator.run().await.unwrap();
        let store = coordinator.store();
        let tags: Vec<Vec<String>> = NAMES
            .iter()
            .map(|name| store.release_tags(&format!("acme/{}", name)).unwrap())
            .collect();
        let commits: Vec<Vec<String>> = NAMES
            .iter()
            .map(|name| {
                store
                    .commits_for_release(&format!("acme/{}", name), "v1.0")
                    .unwrap()
            })
            .collect();

        results.push((summary.tally, store.stats().unwrap(), tags, commits));
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].0.succeeded, 4);
}

#[tokio::test]
async fn test_ranking_discovery_resolves_scraped_links() {
    let server = MockServer::start().await;
    mount_history(&server).await;

    let html = r#"
        <html><body>
            <a href="/">Home</a>
            <a href="/repositories?page=2">Next</a>
            <a href="/acme/alpha">alpha</a>
            <a href="/acme/bravo">bravo</a>
        </body></html>
    "#;
    for page in ["1", "2"] {
        Mock::given(method("GET"))
            .and(path("/repositories"))
            .and(query_param("page", page))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(html),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/repos/acme/alpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repo_json(1, "acme", "alpha", 9000)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/bravo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repo_json(2, "acme", "bravo", 7000)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, &dir.path().join("harvest.db"));
    config.discovery.source = DiscoverySourceKind::Ranking;
    let coordinator = Coordinator::new(config, "hash".to_string()).unwrap();

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.tally.succeeded, 2);
    assert_eq!(coordinator.store().star_count(1).unwrap(), Some(9000));
}

#[tokio::test]
async fn test_failing_repository_does_not_abort_run() {
    let server = MockServer::start().await;
    mount_search(&server).await;

    // bravo's history is unavailable; everyone else has none
    Mock::given(method("GET"))
        .and(path("/repos/acme/bravo/releases"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/repos/acme/[a-z]+/(releases|tags|commits)$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = search_config(&server, &dir.path().join("harvest.db"));
    let coordinator = Coordinator::new(config, "hash".to_string()).unwrap();

    let summary = coordinator.run().await.unwrap();
    assert_eq!(summary.tally.succeeded, 3);
    assert_eq!(summary.tally.failed, 1);

    let run = coordinator.store().get_run(summary.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}
