//! Integration tests for the HTTP filter backend.
//!
//! A wiremock server stands in for the filter backend so the tests cover
//! URL layout, status handling, body decoding and the NDJSON notification
//! stream end to end.

use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use filtersync_engine::engine::{EngineSettings, FilterSyncEngine};
use filtersync_engine::error::{EngineError, FetchError, StreamError};
use filtersync_engine::http::{wait_until_reachable, HttpBackend};
use filtersync_engine::retry::RetryPolicy;
use filtersync_engine::{Filter, FilterBackend};

// =============================================================================
// Test Helpers
// =============================================================================

fn filters_body() -> serde_json::Value {
    json!([
        {"id": "1", "key": "all", "name": "All", "showCounter": true},
        {"id": "2", "key": "mine", "name": "Mine", "showCounter": true, "assignee": "admin"},
        {"id": "3", "key": "done", "name": "Done", "status": "COMPLETED"}
    ])
}

async fn mount_filters(server: &MockServer, app: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/apps/{app}/filters")))
        .respond_with(ResponseTemplate::new(200).set_body_json(filters_body()))
        .mount(server)
        .await;
}

async fn mount_count(server: &MockServer, app: &str, key: &str, count: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/apps/{app}/filters/{key}/count")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": count })))
        .mount(server)
        .await;
}

// =============================================================================
// Request/response
// =============================================================================

#[tokio::test]
async fn test_fetch_filters_preserves_order_and_attributes() {
    let server = MockServer::start().await;
    mount_filters(&server, "tasks").await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let filters = backend.fetch_filters("tasks").await.unwrap();

    let keys: Vec<_> = filters.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(keys, vec!["all", "mine", "done"]);
    assert!(filters[0].show_counter);
    assert_eq!(filters[1].assignee.as_deref(), Some("admin"));
    assert!(!filters[2].show_counter);
}

#[tokio::test]
async fn test_fetch_count_reads_count_field() {
    let server = MockServer::start().await;
    mount_count(&server, "tasks", "mine", 12).await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let count = backend
        .fetch_count("tasks", &Filter::new("2", "mine", "Mine"))
        .await
        .unwrap();

    assert_eq!(count, 12);
}

#[tokio::test]
async fn test_non_success_status_surfaces_as_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apps/tasks/filters"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let err = backend.fetch_filters("tasks").await.unwrap_err();

    match err {
        FetchError::Status { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_surfaces_as_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apps/tasks/filters/mine/count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total": 3 })))
        .mount(&server)
        .await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let err = backend
        .fetch_count("tasks", &Filter::new("2", "mine", "Mine"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Decode(_)), "got {err:?}");
}

// =============================================================================
// Notification stream
// =============================================================================

#[tokio::test]
async fn test_notification_stream_decodes_ndjson() {
    let server = MockServer::start().await;
    let body = concat!(
        r#"{"sequence":1,"subjectId":"t1","timestamp":"2026-02-03T05:01:57Z","hints":{"keys":["mine"]}}"#,
        "\n",
        "garbage\n",
        "\n",
        r#"{"sequence":2,"subjectId":"t2","timestamp":"2026-02-03T05:01:58Z"}"#,
        "\n",
    );
    Mock::given(method("GET"))
        .and(path("/apps/tasks/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let stream = backend.notifications("tasks").await.unwrap();
    let items: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .expect("stream did not end");

    assert_eq!(items.len(), 3);
    let first = items[0].as_ref().unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(first.hints.keys, vec!["mine".to_string()]);
    assert!(matches!(items[1], Err(StreamError::Decode(_))));
    assert_eq!(items[2].as_ref().unwrap().subject_id, "t2");
}

#[tokio::test]
async fn test_notification_stream_open_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apps/tasks/notifications"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let result = backend.notifications("tasks").await;

    assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
}

// =============================================================================
// Reachability
// =============================================================================

#[tokio::test]
async fn test_wait_until_reachable_retries_until_healthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let attempts = wait_until_reachable(&backend, 10, Duration::from_millis(5))
        .await
        .unwrap();

    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn test_wait_until_reachable_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let result = wait_until_reachable(&backend, 4, Duration::from_millis(1)).await;

    assert!(matches!(result, Err(FetchError::Status { status: 500, .. })));
}

// =============================================================================
// Engine over HTTP
// =============================================================================

#[tokio::test]
async fn test_engine_loads_catalog_and_initial_counts_over_http() {
    let server = MockServer::start().await;
    mount_filters(&server, "tasks").await;
    mount_count(&server, "tasks", "mine", 5).await;
    mount_count(&server, "tasks", "all", 11).await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let mut engine = FilterSyncEngine::new(
        std::sync::Arc::new(backend),
        EngineSettings {
            poll_interval: Duration::from_secs(60),
            load_retry: RetryPolicy::fast_for_tests(),
            ..EngineSettings::default()
        },
    );
    engine.set_context("tasks").await.unwrap();

    assert_eq!(engine.active_filter().unwrap().key, "all");
    assert_eq!(engine.counter("mine"), 5);
    assert_eq!(engine.catalog().len(), 3);

    // The active filter is polled right away rather than after a full interval.
    tokio::time::timeout(Duration::from_secs(3), async {
        while engine.counter("all") != 11 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("active filter was not polled");
}

#[tokio::test]
async fn test_engine_retries_catalog_load_then_reports() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apps/tasks/filters"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;
    let backend = HttpBackend::new(&server.uri()).unwrap();

    let mut engine = FilterSyncEngine::new(
        std::sync::Arc::new(backend),
        EngineSettings {
            load_retry: RetryPolicy::fast_for_tests(),
            ..EngineSettings::default()
        },
    );
    let mut events = engine.subscribe();

    let err = engine.set_context("tasks").await.unwrap_err();

    assert!(matches!(err, EngineError::Fetch(FetchError::Status { status: 502, .. })));
    assert!(engine.active_filter().is_none());
    assert_eq!(events.try_recv().unwrap().name(), "error");
}
