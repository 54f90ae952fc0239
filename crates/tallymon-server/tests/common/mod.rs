#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tallymon_alert::evaluator::AlertEvaluator;
use tallymon_alert::rules::threshold::ThresholdRule;
use tallymon_alert::sink::{AlertDispatcher, AlertSink};
use tallymon_common::types::AlertEvent;
use tallymon_server::app;
use tallymon_server::config::{ServerConfig, StorageBackend};
use tallymon_server::state::AppState;
use tallymon_storage::{MemoryMetricStore, MetricStore};
use tokio::sync::mpsc;
use tower::util::ServiceExt;

#[derive(Default, Clone)]
pub struct CollectingSink {
    pub events: Arc<Mutex<Vec<AlertEvent>>>,
}

#[async_trait]
impl AlertSink for CollectingSink {
    async fn deliver(&self, event: &AlertEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "collect"
    }
}

pub struct TestContext {
    pub state: AppState,
    pub app: axum::Router,
    pub sink: CollectingSink,
}

impl TestContext {
    pub fn events(&self) -> Vec<AlertEvent> {
        self.sink.events.lock().unwrap().clone()
    }

    /// Polls until at least `n` alert events were delivered or a second
    /// has passed.
    pub async fn wait_for_events(&self, n: usize) -> Vec<AlertEvent> {
        for _ in 0..100 {
            let events = self.events();
            if events.len() >= n {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.events()
    }
}

pub fn build_test_context() -> TestContext {
    build_test_context_with_store(Arc::new(MemoryMetricStore::new()))
}

/// Router plus a live alert pipeline (stock `cpu.user > 15` rule feeding a
/// collecting sink) around the given store.
pub fn build_test_context_with_store(store: Arc<dyn MetricStore>) -> TestContext {
    let mut config = ServerConfig::default();
    config.storage.backend = StorageBackend::Memory;

    let sink = CollectingSink::default();
    let evaluator = AlertEvaluator::new(vec![Box::new(ThresholdRule::cpu_user_high())]);
    let dispatcher = AlertDispatcher::new(vec![Box::new(sink.clone())], Duration::from_secs(1));

    let (batch_tx, batch_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(16);
    tokio::spawn(evaluator.run(batch_rx, event_tx));
    tokio::spawn(dispatcher.run(event_rx));

    let state = AppState::new(store, batch_tx, config);
    let app = app::build_http_app(state.clone());

    TestContext { state, app, sink }
}

/// RFC 3339 timestamp `secs_ago` seconds before now.
pub fn ts_ago(secs_ago: i64) -> String {
    (Utc::now() - chrono::Duration::seconds(secs_ago)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Value,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_raw(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub fn assert_ok_envelope(body: &Value) {
    assert_eq!(body["err_code"], 0, "unexpected body: {body}");
    assert_eq!(body["err_msg"], "success");
    assert!(body["trace_id"].as_str().is_some());
}

pub fn assert_err_envelope(body: &Value, code: i64) {
    assert_eq!(body["err_code"], code, "unexpected body: {body}");
    assert!(body["data"].is_null());
    assert!(body["err_msg"].as_str().is_some_and(|m| !m.is_empty()));
}
