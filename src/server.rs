//! HTTP front end for a project's query session.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/manifests` | Manifest files in the output folder, plus the selection |
//! | `POST` | `/select_manifest` | `{"manifest": "sales.json"}` selects the active manifest |
//! | `POST` | `/query` | `{"question": "...", "execute": false}` returns `{"sql": "..."}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `no_manifest` (400),
//! `llm_error` (500), `query_error` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front ends can
//! call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::error::ManifestError;
use crate::manifest::Manifest;
use crate::models::Row;
use crate::session::QuerySession;

/// Shared state: the session plus the currently selected manifest.
pub struct AppState {
    session: QuerySession,
    selected: Mutex<Option<(String, Manifest)>>,
}

impl AppState {
    pub fn new(session: QuerySession) -> Self {
        Self {
            session,
            selected: Mutex::new(None),
        }
    }
}

/// Build the router without binding, for embedding and tests.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/manifests", get(handle_list_manifests))
        .route("/select_manifest", post(handle_select_manifest))
        .route("/query", post(handle_query))
        .layer(cors)
        .with_state(state)
}

/// Serve a project until the process is terminated.
pub async fn run_server(project: &Path, bind: &str) -> anyhow::Result<()> {
    let session = QuerySession::new(project)?;
    let state = Arc::new(AppState::new(session));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    println!("tabletalk server listening on http://{}", listener.local_addr()?);
    tracing::info!(bind, "server started");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
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
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    error(StatusCode::NOT_FOUND, "not_found", message)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /manifests ============

#[derive(Serialize)]
struct ManifestListResponse {
    manifests: Vec<String>,
    selected: Option<String>,
}

async fn handle_list_manifests(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ManifestListResponse>, AppError> {
    let manifests = state
        .session
        .list_manifests()
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:#}", e)))?;
    let selected = state.selected.lock().await.as_ref().map(|(n, _)| n.clone());
    Ok(Json(ManifestListResponse {
        manifests,
        selected,
    }))
}

// ============ POST /select_manifest ============

#[derive(Deserialize)]
struct SelectRequest {
    manifest: String,
}

#[derive(Serialize)]
struct SelectResponse {
    selected: String,
    context: String,
    tables: usize,
}

async fn handle_select_manifest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<SelectResponse>, AppError> {
    let name = req.manifest.trim().to_string();
    if name.is_empty() {
        return Err(bad_request("manifest must not be empty"));
    }

    let manifest = state.session.load_manifest(&name).map_err(|e| match e {
        ManifestError::NotFound(_) => not_found(e.to_string()),
        ManifestError::InvalidName(_) | ManifestError::Unreadable(_) => bad_request(e.to_string()),
    })?;

    let response = SelectResponse {
        selected: name.clone(),
        context: manifest.name.clone(),
        tables: manifest.table_count(),
    };
    *state.selected.lock().await = Some((name, manifest));
    Ok(Json(response))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    execute: bool,
}

#[derive(Serialize)]
struct QueryResponse {
    sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<Vec<Row>>,
}

async fn handle_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let manifest = match state.selected.lock().await.as_ref() {
        Some((_, manifest)) => manifest.clone(),
        None => {
            return Err(error(
                StatusCode::BAD_REQUEST,
                "no_manifest",
                "no manifest selected; POST /select_manifest first",
            ))
        }
    };

    let sql = state
        .session
        .generate_sql(&manifest, question)
        .await
        .map_err(|e| {
            tracing::warn!(error = %format!("{:#}", e), "sql generation failed");
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "llm_error",
                format!("Error generating SQL: {:#}", e),
            )
        })?;

    let rows = if req.execute {
        let rows = state.session.execute(&manifest, &sql).await.map_err(|e| {
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "query_error",
                format!("Error executing SQL: {:#}", e),
            )
        })?;
        Some(rows)
    } else {
        None
    };

    Ok(Json(QueryResponse { sql, rows }))
}
