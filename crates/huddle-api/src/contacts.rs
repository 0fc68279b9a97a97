use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use huddle_core::Identity;

use crate::auth::AppState;
use crate::error::ApiError;

/// POST /athletes/{athlete_id}: the calling coach takes on an athlete.
pub async fn assign_athlete(
    State(state): State<AppState>,
    Path(athlete_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.coordinator.assign_athlete(&identity, athlete_id).await?;

    if created {
        info!("{} ({}) now coaches {}", identity.username, identity.user_id, athlete_id);
    }
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(serde_json::json!({ "created": created }))))
}

/// GET /contacts
pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.coordinator.contacts(identity.user_id).await?))
}
