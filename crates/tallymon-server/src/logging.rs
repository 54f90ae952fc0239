use crate::api::error_response;
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Trace id of the current request, available to handlers as an extension.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

pub const TRACE_HEADER: &str = "X-Trace-Id";

/// POST bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_BODY_LOG_CHARS: usize = 200;

/// 16 hex characters from 8 random bytes.
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    bytes.iter().fold(String::with_capacity(16), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn snippet(bytes: &[u8]) -> String {
    let Ok(s) = std::str::from_utf8(bytes) else {
        return "<non-utf8 body>".to_string();
    };
    if s.len() <= MAX_BODY_LOG_CHARS {
        return s.to_string();
    }
    let mut end = MAX_BODY_LOG_CHARS;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

fn format_elapsed(elapsed_us: u128) -> String {
    match elapsed_us {
        0..=999 => format!("{elapsed_us}µs"),
        1_000..=999_999 => format!("{}ms", elapsed_us / 1000),
        _ => format!("{:.1}s", elapsed_us as f64 / 1_000_000.0),
    }
}

/// Assigns a trace id, logs the request line (with a body snippet for
/// metric submissions) and the response status, and echoes the id back in
/// the `X-Trace-Id` header.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let method = req.method().clone();
    let path = match req.uri().query() {
        Some(q) => format!("{}?{q}", req.uri().path()),
        None => req.uri().path().to_string(),
    };

    let start = Instant::now();
    let mut response = if method == Method::POST {
        let (parts, body) = req.into_parts();
        match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => {
                tracing::info!(
                    trace_id = %trace_id,
                    method = %method,
                    path = %path,
                    body = %snippet(&bytes),
                    "--> request"
                );
                next.run(Request::from_parts(parts, Body::from(bytes))).await
            }
            Err(e) => {
                tracing::warn!(
                    trace_id = %trace_id,
                    method = %method,
                    path = %path,
                    error = %e,
                    "--> request body rejected"
                );
                error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    &trace_id,
                    "payload_too_large",
                    &format!("request body must not exceed {MAX_BODY_BYTES} bytes"),
                )
            }
        }
    } else {
        tracing::info!(trace_id = %trace_id, method = %method, path = %path, "--> request");
        next.run(req).await
    };
    let elapsed = format_elapsed(start.elapsed().as_micros());
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        tracing::error!(trace_id = %trace_id, status, elapsed = %elapsed, "<-- response");
    } else if response.status().is_client_error() {
        tracing::warn!(trace_id = %trace_id, status, elapsed = %elapsed, "<-- response");
    } else {
        tracing::info!(trace_id = %trace_id, status, elapsed = %elapsed, "<-- response");
    }

    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, val);
    }
    response
}
