//! JSON HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a question, optionally using session memory |
//! | `POST` | `/chat/clear?session_id=..` | Forget a session's conversation |
//! | `GET`  | `/health` | Index readiness and version |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid argument: question must not be empty" } }
//! ```
//!
//! | Code | Status | Cause |
//! |------|--------|-------|
//! | `bad_request` | 400 | empty question |
//! | `index_unavailable` | 503 | no index, or index/provider mismatch |
//! | `quota_exceeded` | 429 | provider rate or usage limit |
//! | `timeout` | 504 | request or provider timeout, network failure |
//! | `generation_failed` | 502 | the language model call failed |
//! | `internal` | 500 | anything else |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ragchat_core::error::GenerationFailure;
use ragchat_core::RagError;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::rag::RagService;

const DEFAULT_SESSION: &str = "default";
const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(service: Arc<RagService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/chat/clear", post(handle_clear))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(service)
}

/// Serve on `listener` until the process is terminated.
///
/// Also starts the task that evicts idle sessions once a minute.
pub async fn serve(listener: tokio::net::TcpListener, service: Arc<RagService>) -> anyhow::Result<()> {
    let gc = service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GC_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = gc.evict_idle_sessions();
            if evicted > 0 {
                tracing::info!(evicted, "evicted idle sessions");
            }
        }
    });

    axum::serve(listener, router(service)).await?;
    Ok(())
}

/// Bind to `[server].bind` and serve.
pub async fn run_server(service: Arc<RagService>) -> anyhow::Result<()> {
    let bind_addr = service.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    serve(listener, service).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = if err.is_index_inconsistency() {
            (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable")
        } else {
            match err.root() {
                RagError::InvalidArgument(_) | RagError::InvalidInput(_) => {
                    (StatusCode::BAD_REQUEST, "bad_request")
                }
                RagError::IndexNotReady => (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable"),
                RagError::QuotaExceeded(_)
                | RagError::Generation {
                    kind: GenerationFailure::Quota,
                    ..
                } => (StatusCode::TOO_MANY_REQUESTS, "quota_exceeded"),
                RagError::TransientNetwork(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                RagError::Generation { .. } => (StatusCode::BAD_GATEWAY, "generation_failed"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            }
        };
        if status.is_server_error() {
            tracing::error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ POST /chat ============

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default = "default_session")]
    session_id: String,
    #[serde(default = "default_true")]
    use_memory: bool,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<String>,
    session_id: String,
}

async fn handle_chat(
    State(service): State<Arc<RagService>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let answer = service
        .answer(&req.session_id, &req.question, req.use_memory)
        .await?;
    Ok(Json(ChatResponse {
        answer: answer.answer,
        sources: answer.sources.into_iter().collect(),
        session_id: req.session_id,
    }))
}

// ============ POST /chat/clear ============

#[derive(Deserialize)]
struct ClearParams {
    #[serde(default = "default_session")]
    session_id: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_clear(
    State(service): State<Arc<RagService>>,
    Query(params): Query<ClearParams>,
) -> Json<MessageResponse> {
    service.clear_session(&params.session_id);
    Json(MessageResponse {
        message: format!("Conversation history cleared for session {}", params.session_id),
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"healthy"` when an index is being served, `"unhealthy"` otherwise.
    status: &'static str,
    index_ready: bool,
    entries: usize,
    sessions: usize,
    version: &'static str,
}

async fn handle_health(State(service): State<Arc<RagService>>) -> Json<HealthResponse> {
    let health = service.health();
    Json(HealthResponse {
        status: if health.index_ready {
            "healthy"
        } else {
            "unhealthy"
        },
        index_ready: health.index_ready,
        entries: health.entries,
        sessions: health.sessions,
        version: env!("CARGO_PKG_VERSION"),
    })
}
