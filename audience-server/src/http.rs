//! Audience HTTP REST API
//!
//! Axum server for manual submissions, text analysis, history lookups and the Telegram
//! webhook. Each endpoint has a thin axum handler that delegates to an inner function;
//! the inner functions are tested directly without axum dispatch.
//!
//! Endpoints:
//! - GET  /health: health check with store / DB status
//! - GET  /version: server version info
//! - POST /submit: run one screenshot through the pipeline
//! - POST /analyze: classify and extract from raw text, no store access
//! - GET  /history: observations for one account and identity
//! - POST /webhook: Telegram update delivery

use std::sync::Arc;

use anyhow::Result;
use audience_core::protocol::{AudienceRequest, AudienceResponse};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::router::{handle_request, AppContext};
use crate::subsystems::intake::Intake;
use crate::telegram::Update;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub ctx: AppContext,
    /// Present when Telegram delivery is configured as webhook.
    pub intake: Option<Arc<Intake>>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/submit", post(submit_handler))
        .route("/analyze", post(analyze_handler))
        .route("/history", get(history_handler))
        .route("/webhook", post(webhook_handler))
        .with_state(state)
}

/// Start the HTTP server on `host:port`.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    host: &str,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Audience HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub identity: Option<String>,
    pub image_base64: Option<String>,
    pub date: Option<chrono::NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub account: Option<String>,
    pub identity: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

fn bad_request(msg: &str) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        serde_json::json!(ErrorResponse::new(msg)),
    )
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.trim().is_empty())
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(ctx: &AppContext) -> (StatusCode, serde_json::Value) {
    match response_to_http(handle_request(AudienceRequest::Health, ctx).await) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("version".to_string(), serde_json::json!(env!("CARGO_PKG_VERSION")));
            }
            (StatusCode::OK, data)
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e,
            }),
        ),
    }
}

/// Version info, no IO.
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "audience/1",
    })
}

pub async fn submit_inner(ctx: &AppContext, req: SubmitRequest) -> (StatusCode, serde_json::Value) {
    let identity = match non_empty(req.identity) {
        Some(i) => i,
        None => return bad_request("identity field is required"),
    };
    let image_base64 = match non_empty(req.image_base64) {
        Some(b) => b,
        None => return bad_request("image_base64 field is required"),
    };

    let request = AudienceRequest::Submit {
        identity,
        image_base64,
        date: req.date,
    };

    match response_to_http(handle_request(request, ctx).await) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => bad_request(&e),
    }
}

pub async fn analyze_inner(ctx: &AppContext, req: AnalyzeRequest) -> (StatusCode, serde_json::Value) {
    let text = match req.text {
        Some(t) => t,
        None => return bad_request("text field is required"),
    };

    match response_to_http(handle_request(AudienceRequest::Analyze { text }, ctx).await) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!(ErrorResponse::new(e)),
        ),
    }
}

pub async fn history_inner(ctx: &AppContext, query: HistoryQuery) -> (StatusCode, serde_json::Value) {
    let (account, identity) = match (non_empty(query.account), non_empty(query.identity)) {
        (Some(a), Some(i)) => (a, i),
        _ => return bad_request("account and identity query parameters are required"),
    };

    match response_to_http(handle_request(AudienceRequest::History { account, identity }, ctx).await) {
        Ok(data) => (StatusCode::OK, data),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!(ErrorResponse::new(e)),
        ),
    }
}

/// Acknowledge at once; Telegram redelivers on anything but 200, and OCR can be slow.
pub fn webhook_inner(intake: Option<Arc<Intake>>, update: Update) -> (StatusCode, serde_json::Value) {
    let intake = match intake {
        Some(i) => i,
        None => {
            return (
                StatusCode::NOT_FOUND,
                serde_json::json!(ErrorResponse::new("webhook delivery is not enabled")),
            )
        }
    };

    let update_id = update.update_id;
    tokio::spawn(async move {
        match intake.handle_update(&update).await {
            Ok(outcome) => tracing::debug!(update_id = update_id, outcome = ?outcome, "Webhook update handled"),
            Err(e) => tracing::error!(update_id = update_id, error = %e, "Webhook update failed"),
        }
    });

    (StatusCode::OK, serde_json::json!({ "accepted": true }))
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.ctx).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn submit_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    let (status, body) = submit_inner(&state.ctx, req).await;
    (status, Json(body))
}

pub async fn analyze_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<AnalyzeRequest>,
) -> impl IntoResponse {
    let (status, body) = analyze_inner(&state.ctx, req).await;
    (status, Json(body))
}

pub async fn history_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let (status, body) = history_inner(&state.ctx, query).await;
    (status, Json(body))
}

pub async fn webhook_handler(
    State(state): State<Arc<HttpState>>,
    Json(update): Json<Update>,
) -> impl IntoResponse {
    let (status, body) = webhook_inner(state.intake.clone(), update);
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert an `AudienceResponse` into an HTTP body value, or an error string.
pub fn response_to_http(response: AudienceResponse) -> std::result::Result<serde_json::Value, String> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err(response.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}

// ============================================================================
// Unit Tests: inner functions called directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::pipeline::Pipeline;
    use async_trait::async_trait;
    use audience_core::{InMemoryObservationStore, OcrEngine, OcrError};

    struct EmptyOcr;

    #[async_trait]
    impl OcrEngine for EmptyOcr {
        async fn recognize_text(&self, _png: &[u8]) -> Result<String, OcrError> {
            Ok(String::new())
        }

        fn name(&self) -> &str {
            "empty"
        }
    }

    fn ctx() -> AppContext {
        AppContext {
            pipeline: Arc::new(Pipeline::new(
                Arc::new(InMemoryObservationStore::new()),
                Arc::new(EmptyOcr),
            )),
            pool: None,
            timezone_offset_hours: 0,
        }
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "audience/1");
    }

    #[test]
    fn test_response_to_http_ok() {
        let resp = AudienceResponse::ok(serde_json::json!({"count": 0}));
        assert_eq!(response_to_http(resp).unwrap()["count"], 0);
    }

    #[test]
    fn test_response_to_http_error() {
        let resp = AudienceResponse::err("something went wrong");
        assert_eq!(response_to_http(resp).unwrap_err(), "something went wrong");
    }

    #[test]
    fn test_response_to_http_error_no_message() {
        let mut resp = AudienceResponse::err("x");
        resp.error = None;
        assert_eq!(response_to_http(resp).unwrap_err(), "unknown error");
    }

    #[tokio::test]
    async fn test_health_inner_in_memory() {
        let (status, body) = health_inner(&ctx()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_submit_inner_requires_identity() {
        let req = SubmitRequest {
            identity: Some("  ".into()),
            image_base64: Some("AAAA".into()),
            date: None,
        };
        let (status, body) = submit_inner(&ctx(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_submit_inner_requires_image() {
        let req = SubmitRequest {
            identity: Some("Lea".into()),
            image_base64: None,
            date: None,
        };
        let (status, _) = submit_inner(&ctx(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_inner_requires_text() {
        let (status, _) = analyze_inner(&ctx(), AnalyzeRequest { text: None }).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_history_inner_requires_both_params() {
        let query = HistoryQuery {
            account: Some("@brand".into()),
            identity: None,
        };
        let (status, _) = history_inner(&ctx(), query).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_inner_without_intake_is_not_found() {
        let update: Update = serde_json::from_value(serde_json::json!({"update_id": 1})).unwrap();
        let (status, _) = webhook_inner(None, update);
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
