//! Linkboard Server - HTTP API for the bookmark board.
//!
//! Thin axum server wrapping the shared linkboard_lib board service. The
//! page renders whatever `/api/board` returns and re-fetches after every
//! failed mutation.
//!
//! Usage:
//!   LINKBOARD_DB=/path/to/linkboard.db LINKBOARD_BIND=0.0.0.0:8000 linkboard-server
//!
//! Or with args:
//!   linkboard-server --db /path/to/linkboard.db --bind 0.0.0.0:8000

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, patch, post},
    Router,
};
use linkboard_lib::board::{self, Board, BoardSnapshot};
use linkboard_lib::db::{Bookmark, Database, Group};
use linkboard_lib::icons::{IconChoices, LookupTable};
use linkboard_lib::ordering::BookmarkMove;
use linkboard_lib::settings::{ConnectionConfig, Settings};
use linkboard_lib::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ============================================================================
// AppState
// ============================================================================

#[derive(Clone)]
struct AppState {
    board: Arc<Board>,
    /// Lookup table of the last full fetch, used to resolve icons
    lookup: Arc<RwLock<Arc<LookupTable>>>,
    start_time: Instant,
}

impl AppState {
    /// Remember the snapshot's lookup table for later icon requests.
    async fn refresh(&self, snapshot: BoardSnapshot) -> BoardSnapshot {
        *self.lookup.write().await = snapshot.lookup.clone();
        snapshot
    }
}

// ============================================================================
// Error type
// ============================================================================

struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Invalid(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %e, "[Server] request failed");
        }
        AppError(status, e.to_string())
    }
}

fn bad_request(msg: impl Into<String>) -> AppError {
    AppError(StatusCode::BAD_REQUEST, msg.into())
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Deserialize)]
struct GroupRequest {
    name: String,
}

#[derive(Deserialize)]
struct CreateBookmarkRequest {
    name: String,
    url: String,
    icon: Option<String>,
    group_id: Option<String>,
}

#[derive(Deserialize)]
struct PatchBookmarkRequest {
    name: String,
    url: String,
    icon: Option<String>,
}

#[derive(Deserialize)]
struct OrderRequest {
    ids: Vec<String>,
}

#[derive(Deserialize)]
struct IconsQuery {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    selected: Option<String>,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct DeletedResponse {
    id: String,
    bookmarks_removed: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    groups: usize,
    bookmarks: usize,
    lookup_entries: usize,
    uptime_secs: u64,
}

// ============================================================================
// Handlers
// ============================================================================

// GET /config
async fn config_handler(State(state): State<AppState>) -> Json<ConnectionConfig> {
    Json(state.board.settings().connection())
}

// GET /api/board
async fn board_handler(State(state): State<AppState>) -> Result<Json<BoardSnapshot>, AppError> {
    let snapshot = state.board.load()?;
    info!(
        groups = snapshot.groups.len(),
        bookmarks = snapshot.bookmark_count(),
        lookup_entries = snapshot.lookup.len(),
        "[Server] board fetched"
    );
    Ok(Json(state.refresh(snapshot).await))
}

// POST /api/groups
async fn create_group_handler(
    State(state): State<AppState>,
    Json(req): Json<GroupRequest>,
) -> Result<(StatusCode, Json<Group>), AppError> {
    let group = state.board.add_group(&req.name)?;
    Ok((StatusCode::CREATED, Json(group)))
}

// PATCH /api/groups/{id}
async fn rename_group_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<GroupRequest>,
) -> Result<Json<Group>, AppError> {
    Ok(Json(state.board.rename_group(&id, &req.name)?))
}

// DELETE /api/groups/{id}
async fn delete_group_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, AppError> {
    let bookmarks_removed = state.board.remove_group(&id)?;
    Ok(Json(DeletedResponse { id, bookmarks_removed }))
}

// POST /api/groups/order
async fn group_order_handler(
    State(state): State<AppState>,
    Json(req): Json<OrderRequest>,
) -> Result<Json<BoardSnapshot>, AppError> {
    let snapshot = state.board.reorder_groups(&req.ids)?;
    Ok(Json(state.refresh(snapshot).await))
}

// POST /api/groups/{id}/order
async fn bookmark_order_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<OrderRequest>,
) -> Result<Json<BoardSnapshot>, AppError> {
    let snapshot = state.board.reorder_bookmarks(&id, &req.ids)?;
    Ok(Json(state.refresh(snapshot).await))
}

// POST /api/bookmarks
async fn create_bookmark_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateBookmarkRequest>,
) -> Result<(StatusCode, Json<Bookmark>), AppError> {
    let bookmark = state
        .board
        .add_bookmark(req.group_id.as_deref(), &req.name, &req.url, req.icon.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(bookmark)))
}

// PATCH /api/bookmarks/{id}
async fn patch_bookmark_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PatchBookmarkRequest>,
) -> Result<Json<Bookmark>, AppError> {
    let bookmark = state
        .board
        .edit_bookmark(&id, &req.name, &req.url, req.icon.as_deref())
        .await?;
    Ok(Json(bookmark))
}

// DELETE /api/bookmarks/{id}
async fn delete_bookmark_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.board.remove_bookmark(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/bookmarks/move
async fn move_bookmark_handler(
    State(state): State<AppState>,
    Json(mv): Json<BookmarkMove>,
) -> Result<Json<BoardSnapshot>, AppError> {
    let snapshot = state.board.move_bookmark(&mv)?;
    Ok(Json(state.refresh(snapshot).await))
}

// GET /api/icons?name=&url=&selected=
async fn icons_handler(
    State(state): State<AppState>,
    Query(q): Query<IconsQuery>,
) -> Json<IconChoices> {
    let lookup = state.lookup.read().await.clone();
    let choices = state
        .board
        .resolve_icons(&lookup, &q.name, &q.url, q.selected.as_deref())
        .await;
    Json(choices)
}

// GET /api/search?q=
async fn search_handler(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Redirect, AppError> {
    board::search_url(state.board.settings(), &q.q)
        .map(|url| Redirect::to(&url))
        .ok_or_else(|| bad_request("Search query is empty"))
}

// GET /health
async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let db = state.board.db();
    let groups = db.get_groups().map_err(Error::from)?.len();
    let bookmarks = db.get_bookmarks().map_err(Error::from)?.len();
    let lookup_entries = state.lookup.read().await.len();

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        groups,
        bookmarks,
        lookup_entries,
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("[Server] Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("[Server] Shutting down");
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse simple args (no clap to keep binary small)
    let args: Vec<String> = std::env::args().collect();
    let mut db_arg: Option<&str> = None;
    let mut bind_arg: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" if i + 1 < args.len() => {
                db_arg = Some(&args[i + 1]);
                i += 2;
            }
            "--bind" if i + 1 < args.len() => {
                bind_arg = Some(&args[i + 1]);
                i += 2;
            }
            "--help" | "-h" => {
                println!("linkboard-server - Bookmark board HTTP API");
                println!();
                println!("Usage: linkboard-server [--db PATH] [--bind ADDR:PORT]");
                println!();
                println!("Environment variables:");
                println!("  LINKBOARD_DB          Database path");
                println!("  LINKBOARD_BIND        Bind address (default: 127.0.0.1:8000)");
                println!("  PORT                  Port only, keeps the bind host");
                println!("  LINKBOARD_STORE_URL   Connection url served at /config");
                println!("  LINKBOARD_STORE_KEY   Connection key served at /config");
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    let settings = Settings::from_environment();
    let bind_addr = bind_arg
        .map(str::to_string)
        .unwrap_or_else(|| settings.bind_addr.clone());
    let db_path = settings.resolve_db_path(db_arg);
    info!("[Server] Database: {}", db_path.display());

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!("[Server] Failed to create {}: {}", parent.display(), e);
            std::process::exit(1);
        }
    }

    let db = match Database::new(&db_path) {
        Ok(db) => db,
        Err(e) => {
            error!("[Server] Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let board = match Board::open(db, settings) {
        Ok(board) => Arc::new(board),
        Err(e) => {
            error!("[Server] Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let lookup = Arc::new(board.lookup_table());
    info!(entries = lookup.len(), "[Server] icon lookup loaded");

    let state = AppState {
        board,
        lookup: Arc::new(RwLock::new(lookup)),
        start_time: Instant::now(),
    };

    let app = Router::new()
        .route("/config", get(config_handler))
        .route("/api/board", get(board_handler))
        .route("/api/groups", post(create_group_handler))
        .route("/api/groups/order", post(group_order_handler))
        .route("/api/groups/{id}", patch(rename_group_handler).delete(delete_group_handler))
        .route("/api/groups/{id}/order", post(bookmark_order_handler))
        .route("/api/bookmarks", post(create_bookmark_handler))
        .route("/api/bookmarks/move", post(move_bookmark_handler))
        .route("/api/bookmarks/{id}", patch(patch_bookmark_handler).delete(delete_bookmark_handler))
        .route("/api/icons", get(icons_handler))
        .route("/api/search", get(search_handler))
        .route("/health", get(health_handler))
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("[Server] Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    info!("[Server] Listening on {}", bind_addr);
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!("[Server] Server error: {}", e);
        std::process::exit(1);
    }
}
