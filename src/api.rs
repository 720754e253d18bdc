//! HTTP API server for the chat companion.
//!
//! - `POST /chat {message}` → `{response}`
//! - `GET /parent-suggestions` → `{suggestions}`
//! - `POST /append-history` → `{success}`
//! - `GET /digest`, `GET /history-stats`, `GET /health`
//!
//! Internal failures return 500 with `{error}`; details only go to the log.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::Config;
use crate::gateway::{ChatModel, ModelGateway};
use crate::history::{HistoryLogger, HistoryStats};
use crate::summary::{conversation_digest, SummaryGenerator};
use crate::transcript::Session;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ModelGateway>,
    pub summaries: Arc<SummaryGenerator>,
    pub logger: Arc<HistoryLogger>,
    pub session: Session,
    pub recent_entries: usize,
}

impl AppState {
    pub fn new(model: Arc<dyn ChatModel>, config: &Config) -> Self {
        Self {
            gateway: Arc::new(ModelGateway::new(model.clone())),
            summaries: Arc::new(SummaryGenerator::new(model)),
            logger: Arc::new(HistoryLogger::new(config.history.path.clone())),
            session: Session::new(config.transcript.max_exchanges),
            recent_entries: config.history.recent_entries,
        }
    }
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
}

#[derive(Serialize)]
struct SuggestionsResponse {
    suggestions: String,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
struct DigestResponse {
    digest: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    exchanges: usize,
}

/// Logged internally, reported to clients as a generic 500.
struct ApiError(String);

impl<E: std::error::Error> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "Internal server error" })),
        )
            .into_response()
    }
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handle_chat))
        .route("/parent-suggestions", get(handle_parent_suggestions))
        .route("/append-history", post(handle_append_history))
        .route("/digest", get(handle_digest))
        .route("/history-stats", get(handle_history_stats))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve the API until ctrl-c.
pub async fn serve(state: AppState, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Chat API listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
}

// --- Handlers ---

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let preview: String = req.message.chars().take(80).collect();
    info!("HTTP /chat: \"{}\" ({} chars)", preview.replace('\n', " "), req.message.len());

    let response = state.gateway.chat(&state.session, &req.message).await;
    Json(ChatResponse { response })
}

async fn handle_parent_suggestions(
    State(state): State<AppState>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let suggestions = state
        .summaries
        .parent_suggestions(&state.session.snapshot())
        .await?;
    Ok(Json(SuggestionsResponse { suggestions }))
}

async fn handle_append_history(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .logger
        .append_session_record(&state.summaries, &state.session.snapshot())
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn handle_digest(State(state): State<AppState>) -> Json<DigestResponse> {
    Json(DigestResponse {
        digest: conversation_digest(&state.session.snapshot()),
    })
}

async fn handle_history_stats(
    State(state): State<AppState>,
) -> Result<Json<HistoryStats>, ApiError> {
    Ok(Json(state.logger.stats(state.recent_entries)?))
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        exchanges: state.session.len(),
    })
}
