//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search?query=<text>` | Answer a knowledge-base query |
//! | `POST` | `/events/object-finalized` | Storage upload notification (`{bucket, name}`) |
//! | `GET`  | `/health` | Health check (returns version and resolver) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "invalid argument: query must not be empty" }
//! ```
//!
//! `400` for invalid input, `500` for every broker failure (timeout,
//! indexing service error, change feed failure, store failure).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser front end
//! can call the API from any host.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::ScoreConvention;
use crate::context::AppContext;
use crate::error::QueryError;
use crate::ingest::{IngestionTrigger, UploadEvent};
use crate::models::QueryOutcome;
use crate::traits::QueryResolver;

/// Reported as `source_document` when nothing matched.
pub const NO_MATCH_DOCUMENT: &str = "no-match";
const NO_MATCH_SNIPPET: &str = "A keresett információ nem található a dokumentumokban.";

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<dyn QueryResolver>,
    pub ingestion: Arc<IngestionTrigger>,
}

impl AppState {
    pub fn from_context(ctx: &AppContext) -> Self {
        Self {
            resolver: ctx.resolver.clone(),
            ingestion: ctx.ingestion.clone(),
        }
    }
}

/// Builds the router with CORS applied. Separate from [`run_server`] so
/// tests can drive it without binding a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(handle_search))
        .route("/events/object-finalized", post(handle_object_finalized))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(AppState::from_context(&ctx));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, resolver = ctx.resolver.name(), "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError(QueryError);

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "search failed");
        } else {
            tracing::debug!(error = %self.0, "search rejected");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    query: Option<String>,
}

/// Body of a successful search, shared with `kdesk query`.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub source_document: String,
    pub content_snippet: String,
    pub confidence: f64,
}

impl SearchResponse {
    pub fn from_outcome(outcome: QueryOutcome, score: ScoreConvention) -> Self {
        match outcome {
            QueryOutcome::Match(m) => Self {
                confidence: score.confidence(m.distance_score),
                source_document: m.source_document_path,
                content_snippet: m.text_snippet,
            },
            QueryOutcome::NoMatch => Self {
                source_document: NO_MATCH_DOCUMENT.to_string(),
                content_snippet: NO_MATCH_SNIPPET.to_string(),
                confidence: 0.0,
            },
        }
    }
}

async fn handle_search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Query(params) =
        params.map_err(|rejection| QueryError::invalid_argument(rejection.body_text()))?;
    let query = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| QueryError::invalid_argument("query must not be empty"))?;

    let outcome = state.resolver.resolve(query).await?;
    let response = SearchResponse::from_outcome(outcome, state.resolver.score_convention());

    tracing::info!(
        resolver = state.resolver.name(),
        source_document = %response.source_document,
        "search answered"
    );
    Ok(Json(response))
}

// ============ POST /events/object-finalized ============

/// Acknowledges immediately; the upload is processed in a detached task
/// whose outcome is only logged.
async fn handle_object_finalized(
    State(state): State<AppState>,
    Json(event): Json<UploadEvent>,
) -> StatusCode {
    let ingestion = state.ingestion.clone();
    tokio::spawn(async move {
        let outcome = ingestion.handle(&event).await;
        tracing::debug!(bucket = %event.bucket, ?outcome, "upload event processed");
    });
    StatusCode::ACCEPTED
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    resolver: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        resolver: state.resolver.name().to_string(),
    })
}
