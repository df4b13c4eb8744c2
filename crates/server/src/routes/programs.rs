use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use services::services::{
    program::{ProgramInfo, UpdateProgramStatus},
    validation::ProgramRequest,
};
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{error::ApiError, extract::ActingUser, state::AppState};

/// POST /api/referrals/programs
pub async fn create_program(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    axum::Json(payload): axum::Json<ProgramRequest>,
) -> Result<ResponseJson<ApiResponse<ProgramInfo>>, ApiError> {
    let program = state.programs.create(user_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(program)))
}

/// PUT /api/referrals/programs/{id}
/// The path id wins over any id in the body
pub async fn update_program(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<Uuid>,
    axum::Json(mut payload): axum::Json<ProgramRequest>,
) -> Result<ResponseJson<ApiResponse<ProgramInfo>>, ApiError> {
    payload.id = Some(id);
    let program = state.programs.update(user_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(program)))
}

/// GET /api/referrals/programs/{id}
pub async fn get_program(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ProgramInfo>>, ApiError> {
    let program = state.programs.get_by_id(id).await?;
    Ok(ResponseJson(ApiResponse::success(program)))
}

/// GET /api/referrals/programs/default
pub async fn get_default_program(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Option<ProgramInfo>>>, ApiError> {
    let program = state.programs.get_default().await?;
    Ok(ResponseJson(ApiResponse::success(program)))
}

/// POST /api/referrals/programs/{id}/default
pub async fn set_default_program(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ProgramInfo>>, ApiError> {
    let program = state.programs.set_as_default(id, user_id).await?;
    Ok(ResponseJson(ApiResponse::success(program)))
}

/// PUT /api/referrals/programs/{id}/status
pub async fn update_program_status(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateProgramStatus>,
) -> Result<ResponseJson<ApiResponse<ProgramInfo>>, ApiError> {
    let program = state
        .programs
        .update_status(id, payload.status, user_id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(program)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/programs", post(create_program))
        .route("/programs/default", get(get_default_program))
        .route("/programs/{id}", get(get_program).put(update_program))
        .route("/programs/{id}/default", post(set_default_program))
        .route("/programs/{id}/status", put(update_program_status))
}
