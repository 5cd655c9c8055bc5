use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::Requester;
use crate::error::FittingError;
use crate::models::fitting::{
    DeleteResponse, FittingAccepted, FittingRequest, HistoryPage, HistoryQuery, JobStatusPayload,
};
use crate::routes::extract::{ApiJson, ApiPath, ApiQuery};

/// POST /api/v1/fittings — accept a fitting job; processing continues in the background.
pub async fn create_fitting(
    State(state): State<AppState>,
    Requester(owner_id): Requester,
    ApiJson(request): ApiJson<FittingRequest>,
) -> Result<(StatusCode, Json<FittingAccepted>), FittingError> {
    let accepted = state.fittings.start_fitting(owner_id, &request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /api/v1/fittings/{job_id} — poll a job.
pub async fn get_fitting_status(
    State(state): State<AppState>,
    Requester(requester): Requester,
    ApiPath(job_id): ApiPath<Uuid>,
) -> Result<Json<JobStatusPayload>, FittingError> {
    Ok(Json(state.fittings.job_status(requester, job_id).await?))
}

/// DELETE /api/v1/fittings/{job_id}
pub async fn delete_fitting(
    State(state): State<AppState>,
    Requester(requester): Requester,
    ApiPath(job_id): ApiPath<Uuid>,
) -> Result<Json<DeleteResponse>, FittingError> {
    Ok(Json(state.fittings.delete_job(requester, job_id).await?))
}

/// GET /api/v1/fittings?page=&limit=
pub async fn list_fittings(
    State(state): State<AppState>,
    Requester(owner_id): Requester,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<Json<HistoryPage>, FittingError> {
    Ok(Json(state.fittings.history(owner_id, &query).await?))
}
