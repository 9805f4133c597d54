use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use serde::Deserialize;

use super::channels::BroadcastHub;
use super::models::{ColumnPatch, ItemFields, ItemPatch, ItemStatus, NewColumn};
use super::service::BoardService;
use crate::errors::BoardError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: BoardService,
    pub hub: Arc<BroadcastHub>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct ListBoardsQuery {
    #[serde(default)]
    pub archived: bool,
}

#[derive(Deserialize)]
pub struct CreateBoardRequest {
    pub name: String,
    pub description: Option<String>,
    pub columns: Option<Vec<NewColumn>>,
}

#[derive(Deserialize)]
pub struct CreateItemRequest {
    #[serde(flatten)]
    pub fields: ItemFields,
    #[serde(default)]
    pub at_start: bool,
}

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    #[serde(flatten)]
    pub patch: ItemPatch,
    pub position: Option<i32>,
}

#[derive(Deserialize)]
pub struct PositionRequest {
    pub position: i32,
}

#[derive(Deserialize)]
pub struct MoveItemRequest {
    pub column_id: i64,
    pub position: i32,
}

#[derive(Deserialize)]
pub struct BulkStatusRequest {
    pub item_ids: Vec<i64>,
    pub status: ItemStatus,
}

#[derive(Deserialize)]
pub struct AttachItemRequest {
    pub column_id: i64,
    #[serde(default)]
    pub at_start: bool,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::InvalidArgument(msg) => ApiError::BadRequest(msg),
            e if e.is_not_found() => ApiError::NotFound(e.to_string()),
            e @ BoardError::ConcurrencyConflict(_) => ApiError::Conflict(e.to_string()),
            e => {
                tracing::error!(error = %e, "request failed");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/boards", get(list_boards).post(create_board))
        .route("/api/boards/{id}", get(get_board).delete(delete_board))
        .route("/api/boards/{id}/archive", put(archive_board))
        .route("/api/boards/{id}/unarchive", put(unarchive_board))
        .route("/api/boards/{id}/columns", post(create_column))
        .route(
            "/api/columns/{id}",
            patch(update_column).delete(delete_column),
        )
        .route(
            "/api/columns/{id}/items",
            get(list_column_items).post(create_item),
        )
        .route("/api/columns/{id}/repair", post(repair_column))
        .route(
            "/api/items/{id}",
            get(get_item).patch(update_item).delete(delete_item),
        )
        .route("/api/items/{id}/position", put(move_item_within))
        .route("/api/items/{id}/move", put(move_item_across))
        .route("/api/items/{id}/attach", post(attach_item))
        .route("/api/items/{id}/detach", post(detach_item))
        .route("/api/items/bulk/status", post(bulk_update_status))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_boards(
    State(state): State<SharedState>,
    Query(query): Query<ListBoardsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let boards = state.service.list_boards(query.archived).await?;
    Ok(Json(boards))
}

async fn create_board(
    State(state): State<SharedState>,
    Json(req): Json<CreateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .service
        .create_board(req.name, req.description, req.columns)
        .await?;
    Ok((StatusCode::CREATED, Json(board)))
}

async fn get_board(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.service.board_snapshot(id).await?;
    Ok(Json(snapshot))
}

async fn delete_board(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_board(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn archive_board(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state.service.set_archived(id, true).await?;
    Ok(Json(board))
}

async fn unarchive_board(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state.service.set_archived(id, false).await?;
    Ok(Json(board))
}

async fn create_column(
    State(state): State<SharedState>,
    Path(board_id): Path<i64>,
    Json(req): Json<NewColumn>,
) -> Result<impl IntoResponse, ApiError> {
    let column = state.service.create_column(board_id, req).await?;
    Ok((StatusCode::CREATED, Json(column)))
}

async fn update_column(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<ColumnPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let column = state.service.update_column(id, req).await?;
    Ok(Json(column))
}

async fn delete_column(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_column(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_column_items(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.service.column_items(id).await?;
    Ok(Json(items))
}

async fn create_item(
    State(state): State<SharedState>,
    Path(column_id): Path<i64>,
    Json(req): Json<CreateItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .service
        .create_item(column_id, req.fields, req.at_start)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn repair_column(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let repaired = state.service.repair_column(id).await?;
    Ok(Json(serde_json::json!({"column_id": id, "repaired": repaired})))
}

async fn get_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.service.get_item(id).await?;
    Ok(Json(item))
}

async fn update_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .service
        .update_item(id, req.patch, req.position)
        .await?;
    Ok(Json(item))
}

async fn delete_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_item(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_update_status(
    State(state): State<SharedState>,
    Json(req): Json<BulkStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.service.set_status(req.item_ids, req.status).await?;
    Ok(Json(items))
}

async fn move_item_within(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<PositionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.service.move_to(id, req.position).await?;
    Ok(Json(item))
}

async fn move_item_across(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<MoveItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .service
        .move_to_column(id, req.column_id, req.position)
        .await?;
    Ok(Json(item))
}

async fn attach_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<AttachItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = if req.at_start {
        state.service.add_to_start(id, req.column_id).await?
    } else {
        state.service.add_to_end(id, req.column_id).await?
    };
    Ok(Json(item))
}

async fn detach_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.service.remove(id).await?;
    Ok(Json(item))
}

// ── Tests ─────────────────────────────────────────────────────────────
