use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::block::Block;
use services::services::block::{BlockRequest, UnblockRequest};
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{error::ApiError, extract::ActingUser, state::AppState};

/// POST /api/referrals/blocks
/// Block a referrer; the caller is recorded as the blocking admin
pub async fn block_user(
    State(state): State<AppState>,
    ActingUser(actor_id): ActingUser,
    axum::Json(payload): axum::Json<BlockRequest>,
) -> Result<ResponseJson<ApiResponse<Block>>, ApiError> {
    let block = state.blocks.block(actor_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(block)))
}

/// POST /api/referrals/blocks/unblock
pub async fn unblock_user(
    State(state): State<AppState>,
    ActingUser(actor_id): ActingUser,
    axum::Json(payload): axum::Json<UnblockRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.blocks.unblock(actor_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

/// GET /api/referrals/blocks/{user_id}
/// The user's active block, `null` when not blocked
pub async fn get_block(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Option<Block>>>, ApiError> {
    let block = state.blocks.get_by_user(user_id).await?;
    Ok(ResponseJson(ApiResponse::success(block)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/blocks", post(block_user))
        .route("/blocks/unblock", post(unblock_user))
        .route("/blocks/{user_id}", get(get_block))
}
