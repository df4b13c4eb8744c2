use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::referral_link::{CreateReferralLink, ReferralLink};
use services::services::link::UpdateReferralLink;
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{error::ApiError, extract::ActingUser, state::AppState};

/// POST /api/referrals/links
pub async fn create_link(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    axum::Json(payload): axum::Json<CreateReferralLink>,
) -> Result<ResponseJson<ApiResponse<ReferralLink>>, ApiError> {
    let link = state.links.create(user_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(link)))
}

/// GET /api/referrals/links
/// Links owned by the caller
pub async fn list_links(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
) -> Result<ResponseJson<ApiResponse<Vec<ReferralLink>>>, ApiError> {
    let links = state.links.list_by_user(user_id).await?;
    Ok(ResponseJson(ApiResponse::success(links)))
}

/// GET /api/referrals/links/{id}
pub async fn get_link(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ReferralLink>>, ApiError> {
    let link = state.links.get_by_id(id).await?;
    Ok(ResponseJson(ApiResponse::success(link)))
}

/// PUT /api/referrals/links/{id}
pub async fn update_link(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateReferralLink>,
) -> Result<ResponseJson<ApiResponse<ReferralLink>>, ApiError> {
    let link = state.links.update(id, user_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(link)))
}

/// POST /api/referrals/links/{id}/cancel
pub async fn cancel_link(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ReferralLink>>, ApiError> {
    let link = state.links.cancel(id, user_id).await?;
    Ok(ResponseJson(ApiResponse::success(link)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/links", post(create_link).get(list_links))
        .route("/links/{id}", get(get_link).put(update_link))
        .route("/links/{id}/cancel", post(cancel_link))
}
