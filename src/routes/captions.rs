use axum::extract::State;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::auth::Requester;
use crate::error::FittingError;
use crate::models::fitting::{CaptionRequest, CaptionResult};
use crate::routes::extract::ApiJson;

/// POST /api/v1/captions — caption a batch of stored images. Failed items carry `null`.
pub async fn caption_images(
    State(state): State<AppState>,
    Requester(_): Requester,
    ApiJson(request): ApiJson<CaptionRequest>,
) -> Result<Json<Vec<CaptionResult>>, FittingError> {
    request
        .validate()
        .map_err(|e| FittingError::Validation(e.to_string()))?;

    Ok(Json(state.captions.annotate(request.references).await))
}
