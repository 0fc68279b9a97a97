use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;

use huddle_core::Identity;
use huddle_core::notify::feedback_transition;
use huddle_types::api::{MarkNotificationsReadRequest, NotifyResponse, WorkflowEvent};
use huddle_types::models::Role;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    #[serde(default)]
    pub unread_only: bool,
}

/// GET /notifications
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let notifications = state
        .notifications
        .list(identity.user_id, query.limit, query.unread_only)
        .await?;

    Ok(Json(notifications))
}

/// POST /notifications/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<MarkNotificationsReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .notifications
        .mark_read(identity.user_id, req.notification_ids)
        .await?;

    Ok(Json(serde_json::json!({ "updated": updated })))
}

/// POST /notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.notifications.mark_all_read(identity.user_id).await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

/// POST /workflow/events
///
/// Entry point for the plan/session/activity subsystems. The caller is the
/// actor of the event; the target is named in the payload. Transitions that
/// are not first occurrences answer `{"notification": null}`.
pub async fn workflow_event(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(event): Json<WorkflowEvent>,
) -> Result<impl IntoResponse, ApiError> {
    let notifications = &state.notifications;
    let actor = identity.user_id;

    let notification = match event {
        WorkflowEvent::PlanAssigned { athlete_id, plan_id } => {
            require_role(&identity, Role::Coach)?;
            state.coordinator.authorize_pair(actor, athlete_id).await?;
            notifications.notify_plan_assigned(athlete_id, &plan_id, actor).await?
        }
        WorkflowEvent::SessionStatusChanged {
            coach_id,
            session_id,
            previous_status,
            status,
        } => {
            require_role(&identity, Role::Athlete)?;
            state.coordinator.authorize_pair(actor, coach_id).await?;
            notifications
                .notify_session_transition(coach_id, &session_id, actor, previous_status, status)
                .await?
        }
        WorkflowEvent::FeedbackSaved {
            athlete_id,
            session_id,
            previous_feedback,
            feedback,
        } => {
            require_role(&identity, Role::Coach)?;
            state.coordinator.authorize_pair(actor, athlete_id).await?;
            if feedback_transition(previous_feedback.as_deref(), &feedback) {
                notifications.notify_coach_feedback(athlete_id, &session_id, actor).await?
            } else {
                debug!("Feedback on {} edited: no notification", session_id);
                None
            }
        }
        WorkflowEvent::ActivitySynced { user_id, activity_id } => {
            if user_id != actor {
                state.coordinator.authorize_pair(actor, user_id).await?;
            }
            notifications.notify_activity_synced(user_id, &activity_id).await?
        }
        WorkflowEvent::StreakMilestone { user_id, streak_days } => {
            if streak_days == 0 {
                return Err(ApiError::Validation("streak_days must be positive".into()));
            }
            if user_id != actor {
                state.coordinator.authorize_pair(actor, user_id).await?;
            }
            notifications.notify_streak_milestone(user_id, streak_days).await?
        }
    };

    Ok(Json(NotifyResponse { notification }))
}

fn require_role(identity: &Identity, role: Role) -> Result<(), ApiError> {
    if identity.role == role {
        Ok(())
    } else {
        Err(huddle_core::DeliveryError::Permission(format!("only a {} can report this event", role)).into())
    }
}
