use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Notification, Role};

/// Event names as they appear in the `type` field of a channel frame.
pub mod names {
    pub const READY: &str = "ready";
    pub const NEW_MESSAGE: &str = "new-message";
    pub const NOTIFICATION: &str = "notification";
    pub const TYPING: &str = "typing";
    pub const READ_RECEIPT: &str = "read-receipt";
    pub const REACTION_ADDED: &str = "reaction-added";

    pub const IDENTIFY: &str = "identify";
    pub const SEND_MESSAGE_INTENT: &str = "send-message-intent";
    pub const TYPING_START: &str = "typing-start";
    pub const TYPING_STOP: &str = "typing-stop";
    pub const MARK_READ: &str = "mark-read";
}

/// Events pushed from the server to every live connection of an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Handshake accepted
    Ready {
        user_id: Uuid,
        username: String,
        role: Role,
    },

    /// A message was durably stored
    NewMessage(Message),

    /// A workflow notification was durably stored
    Notification(Notification),

    /// The counterpart started or stopped typing
    Typing { from_user_id: Uuid, is_typing: bool },

    /// The receiver read some of our messages
    ReadReceipt {
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    ReactionAdded {
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => names::READY,
            Self::NewMessage(_) => names::NEW_MESSAGE,
            Self::Notification(_) => names::NOTIFICATION,
            Self::Typing { .. } => names::TYPING,
            Self::ReadReceipt { .. } => names::READ_RECEIPT,
            Self::ReactionAdded { .. } => names::REACTION_ADDED,
        }
    }
}

/// Raw `(event name, payload)` pair as it travels on the wire. Inbound frames
/// are decoded in two steps so a handler table can be keyed by name and each
/// handler owns its payload schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFrame {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

// -- Client command payloads --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentifyPayload {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypingPayload {
    pub receiver_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadPayload {
    pub message_ids: Vec<Uuid>,
}

/// Optimistic hint that a client is about to POST a message. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageIntentPayload {
    pub receiver_id: Uuid,
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_frame_shape() {
        let event = ServerEvent::Typing {
            from_user_id: Uuid::nil(),
            is_typing: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(json["data"]["is_typing"], true);

        let frame: ChannelFrame = serde_json::from_value(json).unwrap();
        assert_eq!(frame.event, names::TYPING);
    }

    #[test]
    fn frame_without_data_defaults_to_null() {
        let frame: ChannelFrame = serde_json::from_str(r#"{"type":"typing-stop"}"#).unwrap();
        assert!(frame.data.is_null());
    }
}
