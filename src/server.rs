//! HTTP server: query serving plus background index updates.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Index status, whether a run is active, last run stats |
//! | `POST` | `/search` | Semantic search: `{ "query": "...", "limit": 10, "filter": {...} }` |
//! | `POST` | `/update` | Start a background run: `{ "limit": N, "fulltext": bool, "force_rebuild": bool }` |
//!
//! `POST /update` answers `202 Accepted` when a run was started and `409`
//! with code `already_running` when one is in progress. On startup the
//! configured schedule decides whether a run is spawned immediately.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `already_running` (409), `internal` (500).
//!
//! # Shutdown
//!
//! Ctrl-C cancels the shared token: the HTTP listener drains and an
//! in-flight update stops before its next batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::extract::ExtractLimits;
use crate::guard::RunGuard;
use crate::models::RunStats;
use crate::pipeline::{UpdateOptions, UpdateOutcome};
use crate::progress::NoProgress;
use crate::schedule::UpdateSchedule;
use crate::search::{self, SearchResult};
use crate::source::{LibrarySource, ZoteroReader};
use crate::status::{self, IndexStatus};
use crate::store::{MetadataFilter, SqliteIndexStore};
use crate::update_cmd::execute_update;

const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    config_path: Arc<PathBuf>,
    store: Arc<SqliteIndexStore>,
    guard: RunGuard,
    cancel: CancellationToken,
    last_run: Arc<Mutex<Option<RunStats>>>,
}

/// Start the server on `[server].bind` and run until Ctrl-C.
pub async fn run_server(config: &Config, config_path: &Path) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let store = SqliteIndexStore::from_config(config).await?;

    let state = AppState {
        config: Arc::new(config.clone()),
        config_path: Arc::new(config_path.to_path_buf()),
        store: Arc::new(store),
        guard: RunGuard::new(),
        cancel: CancellationToken::new(),
        last_run: Arc::new(Mutex::new(None)),
    };

    let schedule = UpdateSchedule::from_config(&config.update);
    if schedule.should_update(Utc::now()) {
        tracing::info!(frequency = %schedule.frequency, "scheduled update due; starting in background");
        spawn_update(&state, UpdateOptions::from_config(config));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/search", post(handle_search))
        .route("/update", post(handle_update))
        .layer(cors)
        .with_state(state.clone());

    println!("zidx server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let cancel = state.cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down");
            }
            cancel.cancel();
        })
        .await?;

    // Let an in-flight run reach its next batch boundary.
    while state.guard.is_running() {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    state.store.pool().close().await;
    Ok(())
}

/// Start a background run unless one is already active. Returns whether
/// a run was started.
fn spawn_update(state: &AppState, opts: UpdateOptions) -> bool {
    let Some(ticket) = state.guard.try_acquire() else {
        return false;
    };
    let state = state.clone();
    tokio::spawn(async move {
        let _ticket = ticket;
        let outcome = execute_update(
            &state.config,
            &state.config_path,
            state.store.as_ref(),
            &opts,
            &NoProgress,
            state.cancel.clone(),
        )
        .await;
        match outcome {
            Ok(UpdateOutcome::Completed(stats)) => {
                if let Some(err) = &stats.error {
                    tracing::error!(run_id = %stats.run_id, error = %err, "background update failed");
                }
                *state.last_run.lock().await = Some(stats);
            }
            Ok(UpdateOutcome::AlreadyRunning) => {
                tracing::info!("index is being updated by another process");
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "background update could not start");
            }
        }
    });
    true
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

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn already_running() -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "already_running".to_string(),
        message: "an update is already in progress".to_string(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
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

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    index: IndexStatus,
    running: bool,
    last_run: Option<RunStats>,
}

/// `last_update` is re-read from the config file, since background runs
/// write it there after the server started.
async fn handle_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let mut config = (*state.config).clone();
    config.update.last_update = Config::load_or_default(&state.config_path)
        .update
        .last_update;

    let index = status::collect_status(&config, &state.store)
        .await
        .map_err(internal)?;
    Ok(Json(StatusResponse {
        index,
        running: state.guard.is_running(),
        last_run: state.last_run.lock().await.clone(),
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    filter: Option<MetadataFilter>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let limit = req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if limit == 0 {
        return Err(bad_request("limit must be at least 1"));
    }

    let reader = match ZoteroReader::open(
        &state.config.source,
        ExtractLimits::from(&state.config.extraction),
    )
    .await
    {
        Ok(r) => Some(r),
        Err(e) => {
            tracing::warn!(error = %e, "library unavailable; serving stored metadata");
            None
        }
    };

    let results = search::search(
        state.store.as_ref(),
        reader.as_ref().map(|r| r as &dyn LibrarySource),
        &req.query,
        limit,
        req.filter.as_ref(),
    )
    .await
    .map_err(internal)?;
    Ok(Json(SearchResponse { results }))
}

// ============ POST /update ============

#[derive(Deserialize, Default)]
#[serde(default)]
struct UpdateRequest {
    limit: Option<usize>,
    fulltext: Option<bool>,
    force_rebuild: bool,
}

#[derive(Serialize)]
struct UpdateAccepted {
    status: String,
}

async fn handle_update(
    State(state): State<AppState>,
    Json(req): Json<UpdateRequest>,
) -> Result<(StatusCode, Json<UpdateAccepted>), AppError> {
    let mut opts = UpdateOptions::from_config(&state.config);
    opts.limit = req.limit;
    opts.force_rebuild = req.force_rebuild;
    if let Some(fulltext) = req.fulltext {
        opts.extract_fulltext = fulltext;
    }

    if !spawn_update(&state, opts) {
        return Err(already_running());
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(UpdateAccepted {
            status: "started".to_string(),
        }),
    ))
}
