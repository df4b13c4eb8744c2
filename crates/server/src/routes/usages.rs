use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::referral_link_usage::{
    ReferralLinkUsage, ReferralLinkUsageSearchFilter, ReferralLinkUsageSearchResults,
};
use services::services::link_usage::{ProgressSummary, ReferralLinkUsageInfo};
use uuid::Uuid;
use utils::response::ApiResponse;

use crate::{error::ApiError, extract::ActingUser, state::AppState};

/// POST /api/referrals/links/{id}/claim
/// The caller becomes the referee
pub async fn claim_link(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(link_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ReferralLinkUsage>>, ApiError> {
    let usage = state.usages.claim_as_referee(link_id, user_id).await?;
    Ok(ResponseJson(ApiResponse::success(usage)))
}

/// GET /api/referrals/programs/{id}/usage
/// The caller's own usage of a program
pub async fn get_usage_for_referee(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(program_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ReferralLinkUsageInfo>>, ApiError> {
    let usage = state
        .usages
        .get_by_program_as_referee(program_id, user_id)
        .await?;
    Ok(ResponseJson(ApiResponse::success(usage)))
}

/// GET /api/referrals/usages/{id}
/// Readable by the referee and by the referrer who owns the link
pub async fn get_usage(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ReferralLinkUsageInfo>>, ApiError> {
    let usage = state.usages.get_by_id_as_participant(id, user_id).await?;
    Ok(ResponseJson(ApiResponse::success(usage)))
}

/// POST /api/referrals/usages/search/referee
pub async fn search_as_referee(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    axum::Json(filter): axum::Json<ReferralLinkUsageSearchFilter>,
) -> Result<ResponseJson<ApiResponse<ReferralLinkUsageSearchResults>>, ApiError> {
    let results = state.usages.search_as_referee(user_id, filter).await?;
    Ok(ResponseJson(ApiResponse::success(results)))
}

/// POST /api/referrals/usages/search/referrer
pub async fn search_as_referrer(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    axum::Json(filter): axum::Json<ReferralLinkUsageSearchFilter>,
) -> Result<ResponseJson<ApiResponse<ReferralLinkUsageSearchResults>>, ApiError> {
    let results = state.usages.search_as_referrer(user_id, filter).await?;
    Ok(ResponseJson(ApiResponse::success(results)))
}

/// POST /api/referrals/progress
/// Completion trigger for the caller, called when something they did may have met a gate
pub async fn process_progress(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
) -> Result<ResponseJson<ApiResponse<ProgressSummary>>, ApiError> {
    let summary = state.usages.process_progress(user_id).await?;
    Ok(ResponseJson(ApiResponse::success(summary)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/links/{id}/claim", post(claim_link))
        .route("/programs/{id}/usage", get(get_usage_for_referee))
        .route("/usages/search/referee", post(search_as_referee))
        .route("/usages/search/referrer", post(search_as_referrer))
        .route("/usages/{id}", get(get_usage))
        .route("/progress", post(process_progress))
}
