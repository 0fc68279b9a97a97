use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, Message, Notification, Role, SessionStatus};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake, so both
/// entry points resolve a token to the same identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub token: String,
}

// -- Messages --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

/// One page of a conversation, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPage {
    pub messages: Vec<Message>,
    /// True when messages older than the first one in this page exist.
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    /// Ids that transitioned from unread to read in this call.
    pub updated: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadFromSender {
    pub user_id: Uuid,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnreadCounts {
    pub messages: u64,
    pub by_sender: Vec<UnreadFromSender>,
    pub notifications: u64,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkNotificationsReadRequest {
    pub notification_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    /// `None` when the event was suppressed as a repeat transition.
    pub notification: Option<Notification>,
}

/// Workflow events emitted by the plan/session services. The caller is the
/// originating user (`from_user_id` on the resulting notification).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum WorkflowEvent {
    PlanAssigned {
        athlete_id: Uuid,
        plan_id: String,
    },
    SessionStatusChanged {
        coach_id: Uuid,
        session_id: String,
        previous_status: SessionStatus,
        status: SessionStatus,
    },
    FeedbackSaved {
        athlete_id: Uuid,
        session_id: String,
        #[serde(default)]
        previous_feedback: Option<String>,
        feedback: String,
    },
    ActivitySynced {
        user_id: Uuid,
        activity_id: String,
    },
    StreakMilestone {
        user_id: Uuid,
        streak_days: u32,
    },
}
