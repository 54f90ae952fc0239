use crate::error::{IngestError, QueryError};
use crate::ingest::IngestReport;
use crate::logging::TraceId;
use crate::query::QuerySpec;
use crate::state::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tallymon_common::duration::parse_duration;
use tallymon_common::query::Aggregator;
use utoipa::{IntoParams, OpenApi, ToSchema};

/// Error envelope (`data` is always null).
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    /// Non-zero error code.
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

/// Envelope wrapped around every JSON response.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success.
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "payload_too_large" => 1413,
        "internal_error" => 1500,
        "storage_error" => 1501,
        "timeout" => 1504,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn bad_request(trace_id: &str, msg: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", msg)
}

fn ingest_error_response(trace_id: &str, err: &IngestError) -> Response {
    match err {
        IngestError::Validation(msg) => bad_request(trace_id, msg),
        IngestError::Storage { .. } => {
            tracing::error!(trace_id, error = %err, "Ingest failed in storage");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                trace_id,
                "storage_error",
                &err.to_string(),
            )
        }
    }
}

fn query_error_response(trace_id: &str, err: &QueryError) -> Response {
    match err {
        QueryError::Invalid(msg) => bad_request(trace_id, msg),
        QueryError::Storage(e) => {
            tracing::error!(trace_id, error = %e, "Query failed in storage");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                trace_id,
                "storage_error",
                &err.to_string(),
            )
        }
        QueryError::Timeout(_) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            trace_id,
            "timeout",
            &err.to_string(),
        ),
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub version: String,
    pub uptime_secs: i64,
    /// Free slots in the alert evaluation queue.
    pub alert_queue_available: usize,
    pub storage_backend: String,
}

#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses((status = 200, description = "Service health", body = HealthResponse))
)]
async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
            alert_queue_available: state.ingestor.alert_queue_capacity(),
            storage_backend: format!("{:?}", state.config.storage.backend).to_lowercase(),
        },
    )
}

/// A batch of metrics for one resource at one instant.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct IngestRequest {
    pub resource_id: String,
    /// RFC 3339, or `YYYY-MM-DDTHH:MM:SS[.fff]` read as UTC.
    pub timestamp: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

#[utoipa::path(
    post,
    path = "/v1/metrics",
    tag = "Metrics",
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Batch stored", body = IngestReport),
        (status = 400, description = "Invalid batch", body = ApiError),
        (status = 503, description = "Storage failure", body = ApiError)
    )
)]
async fn ingest_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(&trace_id, &rejection.body_text()),
    };

    match state
        .ingestor
        .ingest(&req.resource_id, &req.timestamp, req.metrics)
        .await
    {
        Ok(report) => success_response(StatusCode::OK, &trace_id, report),
        Err(e) => ingest_error_response(&trace_id, &e),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SeriesResponse {
    pub resource_id: String,
    pub metric_keys: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/v1/series",
    tag = "Metrics",
    responses(
        (status = 200, description = "Known resources and their metric keys", body = Vec<SeriesResponse>),
        (status = 503, description = "Storage failure", body = ApiError)
    )
)]
async fn list_series(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let store = state.store.clone();
    let keys = match tokio::task::spawn_blocking(move || store.query_distinct_series()).await {
        Ok(Ok(keys)) => keys,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to list series");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &trace_id,
                "storage_error",
                &e.to_string(),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Series task failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "internal_error",
                "Internal error",
            );
        }
    };

    // keys arrive ordered by (resource_id, metric_key)
    let mut series: Vec<SeriesResponse> = Vec::new();
    for key in keys {
        match series.last_mut() {
            Some(last) if last.resource_id == key.resource_id => last.metric_keys.push(key.metric_key),
            _ => series.push(SeriesResponse {
                resource_id: key.resource_id,
                metric_keys: vec![key.metric_key],
            }),
        }
    }
    success_response(StatusCode::OK, &trace_id, series)
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GraphParams {
    /// Resource pattern; empty or missing means `*`.
    pub resource_id: Option<String>,
    /// Metric pattern (required).
    pub metric_key: Option<String>,
    /// `avg` (default), `sum`, `max` or `min`; anything else means `avg`.
    pub aggregator: Option<String>,
    /// Look-back window, e.g. `3h` (default from config).
    pub window: Option<String>,
    /// Bucket size, e.g. `1m` (default from config).
    pub bucket: Option<String>,
    pub delta: Option<bool>,
    /// Alias of `delta`.
    pub change: Option<bool>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GraphPoint {
    /// Bucket start, unix seconds.
    pub x: i64,
    pub y: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GraphResponse {
    pub resource_id: String,
    pub metric_key: String,
    /// The aggregator actually applied.
    pub aggregator: String,
    pub delta: bool,
    pub points: Vec<GraphPoint>,
}

#[utoipa::path(
    get,
    path = "/v1/graph",
    tag = "Metrics",
    params(GraphParams),
    responses(
        (status = 200, description = "Bucketed series", body = GraphResponse),
        (status = 400, description = "Malformed query", body = ApiError),
        (status = 503, description = "Storage failure", body = ApiError),
        (status = 504, description = "Query timed out", body = ApiError)
    )
)]
async fn graph(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    params: Result<Query<GraphParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return bad_request(&trace_id, &rejection.body_text()),
    };

    let resource = params
        .resource_id
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "*".to_string());
    let metric = params.metric_key.unwrap_or_default();
    let aggregator = Aggregator::parse_or_default(params.aggregator.as_deref().unwrap_or(""));

    let query_config = &state.config.query;
    let window = match parse_optional_duration(params.window.as_deref(), query_config.default_window) {
        Ok(d) => d,
        Err(msg) => return bad_request(&trace_id, &format!("window: {msg}")),
    };
    let bucket = match parse_optional_duration(params.bucket.as_deref(), query_config.default_bucket) {
        Ok(d) => d,
        Err(msg) => return bad_request(&trace_id, &format!("bucket: {msg}")),
    };
    let delta = params.delta.or(params.change).unwrap_or(false);
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| query_config.timeout());

    let spec = QuerySpec {
        resource,
        metric,
        aggregator,
        window,
        bucket,
        delta,
    };

    match state.engine.query(&spec, timeout).await {
        Ok(buckets) => success_response(
            StatusCode::OK,
            &trace_id,
            GraphResponse {
                resource_id: spec.resource,
                metric_key: spec.metric,
                aggregator: aggregator.to_string(),
                delta,
                points: buckets
                    .iter()
                    .map(|b| GraphPoint {
                        x: b.unix_secs(),
                        y: b.value,
                    })
                    .collect(),
            },
        ),
        Err(e) => query_error_response(&trace_id, &e),
    }
}

fn parse_optional_duration(raw: Option<&str>, default: Duration) -> Result<Duration, String> {
    match raw {
        None | Some("") => Ok(default),
        Some(s) => parse_duration(s).map_err(|e| e.to_string()),
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "tallymon API",
        description = "Metric ingestion, aggregate queries and threshold alerts",
    ),
    paths(health, ingest_metrics, list_series, graph),
    components(schemas(
        ApiError,
        HealthResponse,
        IngestRequest,
        IngestReport,
        SeriesResponse,
        GraphPoint,
        GraphResponse
    )),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Metrics", description = "Ingestion and queries")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/metrics", post(ingest_metrics))
        .route("/metrics", post(ingest_metrics))
        .route("/v1/series", get(list_series))
        .route("/v1/graph", get(graph))
        .route("/v1/openapi.json", get(openapi_json))
}
