mod common;

use axum::http::StatusCode;
use common::{
    assert_err_envelope, assert_ok_envelope, build_test_context, build_test_context_with_store,
    request_json, request_no_body, request_raw, ts_ago,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tallymon_common::query::{AggregateQuery, Bucket};
use tallymon_common::types::{Sample, SeriesKey};
use tallymon_server::logging::MAX_BODY_BYTES;
use tallymon_storage::{MemoryMetricStore, MetricStore, StorageError};

#[tokio::test]
async fn health_should_return_ok_envelope() {
    let ctx = build_test_context();
    let (status, body, trace) = request_no_body(&ctx.app, "GET", "/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert!(body["data"]["version"].is_string());
    assert_eq!(body["data"]["storage_backend"], "memory");
    assert_eq!(trace.as_deref(), body["trace_id"].as_str());
}

#[tokio::test]
async fn ingest_writes_every_metric_and_alerts_once() {
    let ctx = build_test_context();
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/metrics",
        json!({
            "resource_id": "host1",
            "timestamp": ts_ago(30),
            "metrics": {"cpu.user": 20.0, "mem.used": 512}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["writes"], 2);

    let events = ctx.wait_for_events(1).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].resource_id, "host1");
    assert_eq!(events[0].metric_key, "cpu.user");
    assert_eq!(events[0].value, 20.0);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/series").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!([{"resource_id": "host1", "metric_keys": ["cpu.user", "mem.used"]}])
    );
}

#[tokio::test]
async fn threshold_boundary_is_exclusive() {
    let ctx = build_test_context();
    for (resource, value) in [("at-threshold", 15.0), ("above", 16.0)] {
        let (status, _, _) = request_json(
            &ctx.app,
            "POST",
            "/v1/metrics",
            json!({"resource_id": resource, "timestamp": ts_ago(5), "metrics": {"cpu.user": value}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let events = ctx.wait_for_events(1).await;
    // batches are evaluated in order, so the first one is already done
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].resource_id, "above");
}

#[tokio::test]
async fn empty_metrics_is_a_no_op() {
    let ctx = build_test_context();
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/metrics",
        json!({"resource_id": "host1", "timestamp": ts_ago(5), "metrics": {}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["writes"], 0);
    assert_eq!(body["data"]["evaluated"], false);

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/series").await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn invalid_batches_are_rejected() {
    let ctx = build_test_context();

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/metrics",
        json!({"resource_id": "", "timestamp": ts_ago(5), "metrics": {"cpu.user": 50.0}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/metrics",
        json!({"resource_id": "host1", "timestamp": "last tuesday", "metrics": {"cpu.user": 50.0}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_raw(&ctx.app, "POST", "/v1/metrics", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(ctx.events().is_empty());
}

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let ctx = build_test_context();
    let body = format!(
        r#"{{"resource_id":"{}","timestamp":"{}","metrics":{{"cpu.user":50.0}}}}"#,
        "h".repeat(MAX_BODY_BYTES),
        ts_ago(5)
    );
    let (status, body, trace) = request_raw(&ctx.app, "POST", "/v1/metrics", &body).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_err_envelope(&body, 1413);
    assert_eq!(trace.as_deref(), body["trace_id"].as_str());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(ctx.events().is_empty());
    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/series").await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn legacy_path_accepts_metrics() {
    let ctx = build_test_context();
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/metrics",
        json!({"resource_id": "host1", "timestamp": ts_ago(5), "metrics": {"cpu.idle": 90.0}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["writes"], 1);
}

async fn ingest_values(ctx: &common::TestContext, resource: &str, ts: &str, values: &[f64]) {
    for v in values {
        let (status, _, _) = request_json(
            &ctx.app,
            "POST",
            "/v1/metrics",
            json!({"resource_id": resource, "timestamp": ts, "metrics": {"disk.io": v}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn graph_aggregates_one_bucket() {
    let ctx = build_test_context();
    let ts = ts_ago(120);
    ingest_values(&ctx, "host1", &ts, &[1.0, 5.0, 3.0, 2.0, 4.0]).await;

    let (status, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/graph?resource_id=host1&metric_key=disk.io&aggregator=max",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["aggregator"], "max");
    assert_eq!(body["data"]["delta"], false);
    let points = body["data"]["points"].as_array().unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0]["y"], 5.0);
    assert_eq!(points[0]["x"].as_i64().unwrap() % 60, 0);
}

#[tokio::test]
async fn unknown_aggregator_falls_back_to_avg() {
    let ctx = build_test_context();
    ingest_values(&ctx, "host1", &ts_ago(120), &[1.0, 5.0, 3.0, 2.0, 4.0]).await;

    let (status, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/graph?metric_key=disk.io&aggregator=median",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["aggregator"], "avg");
    assert_eq!(body["data"]["resource_id"], "*");
    assert_eq!(body["data"]["points"][0]["y"], 3.0);
}

#[tokio::test]
async fn graph_change_alias_yields_first_difference() {
    let ctx = build_test_context();
    ingest_values(&ctx, "host1", &ts_ago(240), &[10.0]).await;
    ingest_values(&ctx, "host1", &ts_ago(120), &[25.0]).await;

    let (status, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/graph?resource_id=host1&metric_key=disk.io&change=true",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["delta"], true);
    let points = body["data"]["points"].as_array().unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0]["y"], 15.0);
}

#[tokio::test]
async fn graph_glob_resource_pattern() {
    let ctx = build_test_context();
    let ts = ts_ago(60);
    ingest_values(&ctx, "web-1", &ts, &[1.0]).await;
    ingest_values(&ctx, "web-2", &ts, &[2.0]).await;
    ingest_values(&ctx, "db-1", &ts, &[100.0]).await;

    let (_, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/graph?resource_id=web-*&metric_key=disk.io&aggregator=sum",
    )
    .await;
    assert_eq!(body["data"]["points"][0]["y"], 3.0);

    let (_, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/graph?resource_id=web&metric_key=disk.io&aggregator=sum",
    )
    .await;
    assert_eq!(body["data"]["points"], json!([]));
}

#[tokio::test]
async fn graph_window_excludes_old_samples() {
    let ctx = build_test_context();
    ingest_values(&ctx, "host1", &ts_ago(7200), &[50.0]).await;
    ingest_values(&ctx, "host1", &ts_ago(60), &[5.0]).await;

    let (_, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/graph?metric_key=disk.io&window=30m&bucket=1h&aggregator=sum",
    )
    .await;
    let points = body["data"]["points"].as_array().unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0]["y"], 5.0);
}

#[tokio::test]
async fn graph_rejects_malformed_parameters() {
    let ctx = build_test_context();

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/graph?resource_id=host1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) =
        request_no_body(&ctx.app, "GET", "/v1/graph?metric_key=cpu.user&window=forever").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, _, _) =
        request_no_body(&ctx.app, "GET", "/v1/graph?metric_key=cpu.user&bucket=0s").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) =
        request_no_body(&ctx.app, "GET", "/v1/graph?metric_key=cpu.user&delta=maybe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

struct StallingStore;

impl MetricStore for StallingStore {
    fn write_sample(&self, _sample: &Sample) -> Result<(), StorageError> {
        Ok(())
    }

    fn query_distinct_series(&self) -> Result<Vec<SeriesKey>, StorageError> {
        Err(StorageError::Other("disk detached".into()))
    }

    fn query_aggregated(&self, _query: &AggregateQuery) -> Result<Vec<Bucket>, StorageError> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn slow_query_times_out() {
    let ctx = build_test_context_with_store(Arc::new(StallingStore));
    let (status, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/graph?metric_key=cpu.user&timeout_ms=20",
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_err_envelope(&body, 1504);
}

#[tokio::test]
async fn storage_failure_maps_to_503() {
    let ctx = build_test_context_with_store(Arc::new(StallingStore));
    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/series").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_err_envelope(&body, 1501);
}

/// Stores the first sample it sees and rejects the rest.
#[derive(Default)]
struct SingleWriteStore {
    inner: MemoryMetricStore,
}

impl MetricStore for SingleWriteStore {
    fn write_sample(&self, sample: &Sample) -> Result<(), StorageError> {
        if !self.inner.is_empty() {
            return Err(StorageError::Other("partition is read-only".into()));
        }
        self.inner.write_sample(sample)
    }

    fn query_distinct_series(&self) -> Result<Vec<SeriesKey>, StorageError> {
        self.inner.query_distinct_series()
    }

    fn query_aggregated(&self, query: &AggregateQuery) -> Result<Vec<Bucket>, StorageError> {
        self.inner.query_aggregated(query)
    }
}

#[tokio::test]
async fn partial_write_failure_maps_to_503_and_still_alerts() {
    let ctx = build_test_context_with_store(Arc::new(SingleWriteStore::default()));
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/metrics",
        json!({
            "resource_id": "host1",
            "timestamp": ts_ago(5),
            "metrics": {"cpu.idle": 10.0, "cpu.user": 90.0}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_err_envelope(&body, 1501);
    assert!(body["err_msg"].as_str().unwrap().contains("cpu.user"));

    let (_, body, _) = request_no_body(&ctx.app, "GET", "/v1/series").await;
    assert_eq!(
        body["data"],
        json!([{"resource_id": "host1", "metric_keys": ["cpu.idle"]}])
    );

    let events = ctx.wait_for_events(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(ctx.events().len(), 1);
    assert_eq!(events[0].metric_key, "cpu.user");
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let ctx = build_test_context();
    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    for path in ["/v1/health", "/v1/metrics", "/v1/series", "/v1/graph"] {
        assert!(body["paths"][path].is_object(), "missing {path}");
    }
}

#[tokio::test]
async fn sqlite_backed_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = tallymon_storage::SqliteMetricStore::new(dir.path()).unwrap();
    let ctx = build_test_context_with_store(Arc::new(store));

    let ts = ts_ago(90);
    ingest_values(&ctx, "db_1", &ts, &[2.0, 4.0]).await;
    ingest_values(&ctx, "dbx1", &ts, &[100.0]).await;

    // '_' in the stored name is literal, not a single-character wildcard
    let (status, body, _) = request_no_body(
        &ctx.app,
        "GET",
        "/v1/graph?resource_id=db_*&metric_key=disk.io&aggregator=sum",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["points"][0]["y"], 6.0);
}
