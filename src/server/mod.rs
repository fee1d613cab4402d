//! HTTP ingestion endpoints.
//!
//! Every submission is acknowledged as soon as it is decoded and mapped. The
//! acknowledgment says whether the payload could be parsed, never whether
//! the records reached the sink.

pub mod encoding;
pub mod health;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::events::EventQueue;
use crate::normalize::{
    decode_check_runs, decode_document, decode_series, DecodeError, MetricRecord, Normalizer,
};
use crate::sink::Forwarder;
use health::HealthMetrics;

/// User agent of the agent's liveness probe.
const STATUS_CHECK_AGENT: &str = "Datadog-Status-Check";
const STATUS_CHECK_REPLY: &str = "STILL-ALIVE\n";
const ACK_OK: &str = r#"{"status":"ok"}"#;
const ACK_FAILED: &str = r#"{"status":"failed"}"#;

/// Shared state for axum handlers.
pub struct AppState {
    pub normalizer: Normalizer,
    pub forwarder: Forwarder,
    pub events: EventQueue,
    pub health: Arc<HealthMetrics>,
    /// Required `api_key` query value; empty disables the check.
    pub api_key: String,
    /// Largest accepted body, before and after decompression.
    pub max_body_size: usize,
}

/// Builds the ingestion router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/intake", post(intake_handler))
        .route("/intake/", post(intake_handler))
        .route("/api/v1/series", post(series_handler))
        .route("/api/v1/series/", post(series_handler))
        .route("/api/v1/check_run", post(check_run_handler))
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        // Handlers read the body themselves against `max_body_size`.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Expands the `":port"` shorthand to a wildcard bind address.
pub fn bind_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Serves the ingestion router until `cancel` fires, then drains open requests.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> Result<()> {
    let local_addr = listener.local_addr().context("getting local address")?;
    tracing::info!(addr = %local_addr, "ingest server started");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("serving ingest endpoints")?;

    tracing::info!("ingest server stopped");
    Ok(())
}

/// POST /intake - generic agent submission.
async fn intake_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    const ROUTE: &str = "intake";
    if let Some(response) = gate(&state, ROUTE, &params, &headers) {
        return response;
    }

    let decoded = read_body(&state, &headers, body)
        .await
        .and_then(|bytes| decode_document(&bytes));
    let doc = match decoded {
        Ok(doc) => doc,
        Err(e) => return reject(&state, ROUTE, &e),
    };

    let mapped = state.normalizer.map_intake(doc);
    tracing::debug!(
        host = %mapped.host,
        records = mapped.records.len(),
        events = mapped.events.len(),
        "mapped intake submission",
    );
    state
        .health
        .residue_keys
        .inc_by(mapped.residue.len() as f64);

    for event in mapped.events {
        if let Err(e) = state.events.enqueue(event).await {
            tracing::warn!(error = %e, "dropping event");
        }
    }

    forward(&state, ROUTE, mapped.records);
    accept(&state, ROUTE)
}

/// POST /api/v1/series - statsd series envelope.
async fn series_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    const ROUTE: &str = "series";
    if let Some(response) = gate(&state, ROUTE, &params, &headers) {
        return response;
    }

    let decoded = read_body(&state, &headers, body)
        .await
        .and_then(|bytes| decode_series(&bytes));
    let series = match decoded {
        Ok(series) => series,
        Err(e) => return reject(&state, ROUTE, &e),
    };

    let records = state.normalizer.map_series(&series);
    forward(&state, ROUTE, records);
    accept(&state, ROUTE)
}

/// POST /api/v1/check_run - service check runs.
async fn check_run_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    const ROUTE: &str = "check_run";
    if let Some(response) = gate(&state, ROUTE, &params, &headers) {
        return response;
    }

    let decoded = read_body(&state, &headers, body)
        .await
        .and_then(|bytes| decode_check_runs(&bytes));
    let runs = match decoded {
        Ok(runs) => runs,
        Err(e) => return reject(&state, ROUTE, &e),
    };

    let records = state.normalizer.map_check_runs(&runs);
    forward(&state, ROUTE, records);
    accept(&state, ROUTE)
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.health.render() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// Answers liveness probes and enforces the API key. `None` lets the request through.
fn gate(
    state: &AppState,
    route: &str,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Option<Response> {
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
    if user_agent == Some(STATUS_CHECK_AGENT) {
        count(state, route, "status_check");
        return Some(STATUS_CHECK_REPLY.into_response());
    }

    if !state.api_key.is_empty() {
        let supplied = params.get("api_key").map(String::as_str).unwrap_or("");
        if supplied != state.api_key {
            tracing::warn!(route, "rejected submission with bad API key");
            count(state, route, "forbidden");
            return Some((StatusCode::FORBIDDEN, "Bad API Key").into_response());
        }
    }

    None
}

/// Buffers the body up to `max_body_size` and undoes its content encoding.
async fn read_body(
    state: &AppState,
    headers: &HeaderMap,
    body: Body,
) -> Result<Vec<u8>, DecodeError> {
    let limit = state.max_body_size;
    let content_encoding = match headers.get(CONTENT_ENCODING) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| DecodeError::UnsupportedEncoding(format!("{value:?}")))?,
        ),
        None => None,
    };

    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(DecodeError::TooLarge { limit });
    }

    // Chunked bodies have no declared length; `to_bytes` stops them at the limit.
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| DecodeError::Body(e.to_string()))?;
    encoding::decompress(content_encoding, bytes.to_vec(), limit)
}

fn forward(state: &AppState, route: &str, records: Vec<MetricRecord>) {
    state
        .health
        .records_mapped
        .with_label_values(&[route])
        .inc_by(records.len() as f64);
    state.forwarder.spawn_push(records);
}

fn accept(state: &AppState, route: &str) -> Response {
    count(state, route, "ok");
    ack(ACK_OK)
}

fn reject(state: &AppState, route: &str, err: &DecodeError) -> Response {
    tracing::warn!(route, error = %err, "failed to decode submission");
    state
        .health
        .decode_errors
        .with_label_values(&[decode_reason(err)])
        .inc();
    count(state, route, "failed");
    ack(ACK_FAILED)
}

fn ack(body: &'static str) -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, "application/json")], body).into_response()
}

fn count(state: &AppState, route: &str, status: &str) {
    state
        .health
        .requests
        .with_label_values(&[route, status])
        .inc();
}

fn decode_reason(err: &DecodeError) -> &'static str {
    match err {
        DecodeError::Body(_) => "body",
        DecodeError::TooLarge { .. } => "too_large",
        DecodeError::UnsupportedEncoding(_) => "unsupported_encoding",
        DecodeError::Decompress { .. } => "decompress",
        DecodeError::Json(_) => "json",
        DecodeError::NotAnObject { .. } => "not_an_object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr_shorthand() {
        assert_eq!(bind_addr(":8080"), "0.0.0.0:8080");
        assert_eq!(bind_addr("127.0.0.1:9000"), "127.0.0.1:9000");
    }

    #[test]
    fn test_decode_reason_labels() {
        let err = DecodeError::UnsupportedEncoding("br".to_string());
        assert_eq!(decode_reason(&err), "unsupported_encoding");
        let err = DecodeError::NotAnObject { found: "array" };
        assert_eq!(decode_reason(&err), "not_an_object");
        let err = DecodeError::TooLarge { limit: 1 };
        assert_eq!(decode_reason(&err), "too_large");
    }
}
