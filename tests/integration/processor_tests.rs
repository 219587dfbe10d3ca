//! Repository processing against a mock API and a real SQLite store

use crate::common::{
    commit_json, descriptor, gateway_for, release_json, tag_json, test_config,
};
use serde_json::json;
use star_harvest::api::ApiEndpoints;
use star_harvest::crawler::{ProcessOutcome, ProcessorSettings, RepositoryProcessor};
use star_harvest::output::CrawlMetrics;
use star_harvest::storage::{SqliteStateCache, SqliteStore, StateCache, StoreStats};
use star_harvest::HarvestError;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    _dir: TempDir,
    processor: RepositoryProcessor,
    store: Arc<SqliteStore>,
    cache: Arc<SqliteStateCache>,
    metrics: Arc<CrawlMetrics>,
}

fn harness(server: &MockServer) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("harvest.db");
    let config = test_config(server, &db);
    let (gateway, metrics) = gateway_for(&config);

    let store = Arc::new(SqliteStore::open(&db).unwrap());
    let cache = Arc::new(SqliteStateCache::open(&db).unwrap());
    let processor = RepositoryProcessor::new(
        gateway,
        ApiEndpoints::new(&config.api.base_url).unwrap(),
        store.clone(),
        cache.clone(),
        ProcessorSettings::from_config(&config),
        metrics.clone(),
    );

    Harness {
        _dir: dir,
        processor,
        store,
        cache,
        metrics,
    }
}

async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_end_to_end_two_releases() {
    let server = MockServer::start().await;
    let h = harness(&server);

    mount_json(
        &server,
        "/repos/acme/widget/releases",
        json!([
            release_json("v2.0", "2024-02-01T00:00:00Z"),
            release_json("v1.0", "2024-01-01T00:00:00Z"),
        ]),
    )
    .await;
    mount_json(
        &server,
        "/repos/acme/widget/compare/v1.0...v2.0",
        json!({ "commits": [commit_json("c3", "three"), commit_json("c2", "two")] }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/commits"))
        .and(query_param("sha", "v1.0"))
        .and(query_param("per_page", "10"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([commit_json("c2", "two"), commit_json("c1", "one")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = h
        .processor
        .process(&descriptor(42, "acme", "widget"))
        .await
        .unwrap();

    let ProcessOutcome::Ingested(summary) = outcome else {
        panic!("expected ingestion, got {:?}", outcome);
    };
    assert_eq!(summary.releases, 2);
    assert_eq!(summary.windows, 2);
    assert_eq!(summary.cursor.as_deref(), Some("v2.0"));

    assert_eq!(
        h.store.stats().unwrap(),
        StoreStats {
            repositories: 1,
            releases: 2,
            commits: 3,
        }
    );
    assert_eq!(
        h.store.commits_for_release("acme/widget", "v2.0").unwrap(),
        vec!["c2", "c3"]
    );
    assert_eq!(
        h.store.commits_for_release("acme/widget", "v1.0").unwrap(),
        vec!["c1"]
    );

    assert_eq!(
        h.cache.get_last_release("acme/widget").unwrap().as_deref(),
        Some("v2.0")
    );
    assert!(h.cache.is_processed("acme/widget").unwrap());
}

#[tokio::test]
async fn test_walk_stops_at_cached_release() {
    let server = MockServer::start().await;
    let h = harness(&server);
    h.cache
        .set_last_release("acme/widget", "v2", Duration::from_secs(600))
        .unwrap();

    mount_json(
        &server,
        "/repos/acme/widget/releases",
        json!([
            release_json("v3", "2024-03-01T00:00:00Z"),
            release_json("v2", "2024-02-01T00:00:00Z"),
            release_json("v1", "2024-01-01T00:00:00Z"),
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/compare/v2...v3"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "commits": [commit_json("c9", "nine")] })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/compare/v1...v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "commits": [] })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = h
        .processor
        .process(&descriptor(42, "acme", "widget"))
        .await
        .unwrap();

    let ProcessOutcome::Ingested(summary) = outcome else {
        panic!("expected ingestion, got {:?}", outcome);
    };
    assert_eq!(summary.windows, 1);
    assert_eq!(summary.commits, 1);
    assert_eq!(
        h.cache.get_last_release("acme/widget").unwrap().as_deref(),
        Some("v3")
    );
}

#[tokio::test]
async fn test_processed_repository_writes_nothing() {
    let server = MockServer::start().await;
    let h = harness(&server);

    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/releases"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([release_json("v1.0", "2024-01-01T00:00:00Z")])),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_json(
        &server,
        "/repos/acme/widget/commits",
        json!([commit_json("c1", "one")]),
    )
    .await;

    let widget = descriptor(42, "acme", "widget");
    let first = h.processor.process(&widget).await.unwrap();
    assert!(matches!(first, ProcessOutcome::Ingested(_)));
    let after_first = h.store.stats().unwrap();

    let second = h.processor.process(&widget).await.unwrap();
    assert_eq!(second, ProcessOutcome::Skipped);
    assert_eq!(h.store.stats().unwrap(), after_first);
    assert_eq!(h.metrics.snapshot().cache_hits, 1);
}

#[tokio::test]
async fn test_unprocessable_compare_counts_as_empty_window() {
    let server = MockServer::start().await;
    let h = harness(&server);

    mount_json(
        &server,
        "/repos/acme/widget/releases",
        json!([
            release_json("v2.0", "2024-02-01T00:00:00Z"),
            release_json("v1.0", "2024-01-01T00:00:00Z"),
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/compare/v1.0...v2.0"))
        .respond_with(ResponseTemplate::new(422))
        .expect(1)
        .mount(&server)
        .await;
    mount_json(
        &server,
        "/repos/acme/widget/commits",
        json!([commit_json("c1", "one")]),
    )
    .await;

    let outcome = h
        .processor
        .process(&descriptor(42, "acme", "widget"))
        .await
        .unwrap();

    let ProcessOutcome::Ingested(summary) = outcome else {
        panic!("expected ingestion, got {:?}", outcome);
    };
    assert_eq!(summary.windows, 2);
    assert_eq!(summary.commits, 1);
    assert!(h.cache.is_processed("acme/widget").unwrap());
}

#[tokio::test]
async fn test_tags_stand_in_for_missing_releases() {
    let server = MockServer::start().await;
    let h = harness(&server);

    mount_json(&server, "/repos/acme/widget/releases", json!([])).await;
    mount_json(
        &server,
        "/repos/acme/widget/tags",
        json!([tag_json("v0.2", "bbb"), tag_json("v0.1", "aaa")]),
    )
    .await;
    mount_json(
        &server,
        "/repos/acme/widget/compare/v0.1...v0.2",
        json!({ "commits": [commit_json("bbb", "second")] }),
    )
    .await;
    mount_json(
        &server,
        "/repos/acme/widget/commits",
        json!([commit_json("aaa", "first")]),
    )
    .await;

    h.processor
        .process(&descriptor(42, "acme", "widget"))
        .await
        .unwrap();

    let mut tags = h.store.release_tags("acme/widget").unwrap();
    tags.sort();
    assert_eq!(tags, vec!["v0.1", "v0.2"]);
    assert_eq!(h.store.stats().unwrap().commits, 2);
    assert_eq!(
        h.cache.get_last_release("acme/widget").unwrap().as_deref(),
        Some("v0.2")
    );
}

#[tokio::test]
async fn test_recent_commits_without_releases_or_tags() {
    let server = MockServer::start().await;
    let h = harness(&server);

    mount_json(&server, "/repos/acme/widget/releases", json!([])).await;
    mount_json(&server, "/repos/acme/widget/tags", json!([])).await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/commits"))
        .and(query_param("per_page", "20"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([commit_json("c2", "two"), commit_json("c1", "one")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = h
        .processor
        .process(&descriptor(42, "acme", "widget"))
        .await
        .unwrap();

    let ProcessOutcome::Ingested(summary) = outcome else {
        panic!("expected ingestion, got {:?}", outcome);
    };
    assert_eq!(summary.releases, 0);
    assert_eq!(summary.cursor, None);
    assert_eq!(h.store.stats().unwrap().commits, 2);
    assert!(h.cache.get_last_release("acme/widget").unwrap().is_none());
    assert!(h.cache.is_processed("acme/widget").unwrap());
}

#[tokio::test]
async fn test_unavailable_window_defers_without_advancing_cursor() {
    let server = MockServer::start().await;
    let h = harness(&server);

    mount_json(
        &server,
        "/repos/acme/widget/releases",
        json!([
            release_json("v2.0", "2024-02-01T00:00:00Z"),
            release_json("v1.0", "2024-01-01T00:00:00Z"),
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/compare/v1.0...v2.0"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let result = h.processor.process(&descriptor(42, "acme", "widget")).await;

    assert!(matches!(result, Err(HarvestError::Deferred { .. })));
    // Partial rows are kept; commits are deduplicated on the next pass
    assert_eq!(h.store.stats().unwrap().releases, 2);
    assert!(h.cache.get_last_release("acme/widget").unwrap().is_none());
    assert!(!h.cache.is_processed("acme/widget").unwrap());
}

#[tokio::test]
async fn test_unavailable_release_listing_writes_nothing() {
    let server = MockServer::start().await;
    let h = harness(&server);

    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/releases"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = h.processor.process(&descriptor(42, "acme", "widget")).await;

    assert!(matches!(result, Err(HarvestError::Deferred { .. })));
    assert_eq!(h.store.stats().unwrap(), StoreStats::default());
    assert!(!h.cache.is_processed("acme/widget").unwrap());
}

#[tokio::test]
async fn test_star_count_refreshed_on_reprocess() {
    let server = MockServer::start().await;
    let h = harness(&server);

    mount_json(&server, "/repos/acme/widget/releases", json!([])).await;
    mount_json(&server, "/repos/acme/widget/tags", json!([])).await;
    mount_json(&server, "/repos/acme/widget/commits", json!([])).await;

    let mut widget = descriptor(42, "acme", "widget");
    h.processor.process(&widget).await.unwrap();

    h.cache.clear().unwrap();
    widget.stars = 99_999;
    h.processor.process(&widget).await.unwrap();

    assert_eq!(h.store.star_count(42).unwrap(), Some(99_999));
    assert_eq!(h.store.stats().unwrap().repositories, 1);
}
