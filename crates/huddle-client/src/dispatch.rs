use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_types::events::{ChannelFrame, names};
use huddle_types::models::{Message, Notification, Reaction, Role};

use crate::conversation::Conversation;
use crate::typing::TypingObserver;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
}

/// What an inbound event means for local state.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Ready { user_id: Uuid, username: String, role: Role },
    Message { counterpart: Uuid, message: Message },
    Notification(Notification),
    Typing { from_user_id: Uuid, is_typing: bool },
    ReadReceipt { reader_id: Uuid, message_ids: Vec<Uuid>, read_at: DateTime<Utc> },
    Reaction { message_id: Uuid, reaction: Reaction },
}

/// Pure handler: the local identity and the raw payload in, an update out.
pub type EventHandler = fn(Uuid, Value) -> Result<Update, serde_json::Error>;

/// Maps event names to handlers. Nothing here touches a socket, so each
/// handler can be exercised with a literal payload.
pub struct EventTable {
    handlers: HashMap<&'static str, EventHandler>,
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTable {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, EventHandler> = HashMap::new();
        handlers.insert(names::READY, on_ready);
        handlers.insert(names::NEW_MESSAGE, on_new_message);
        handlers.insert(names::NOTIFICATION, on_notification);
        handlers.insert(names::TYPING, on_typing);
        handlers.insert(names::READ_RECEIPT, on_read_receipt);
        handlers.insert(names::REACTION_ADDED, on_reaction_added);
        Self { handlers }
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn decode(&self, me: Uuid, frame: ChannelFrame) -> Result<Update, DispatchError> {
        let handler = self
            .handlers
            .get(frame.event.as_str())
            .ok_or(DispatchError::UnknownEvent(frame.event))?;
        Ok(handler(me, frame.data)?)
    }
}

fn payload<T: DeserializeOwned>(data: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}

fn on_ready(_me: Uuid, data: Value) -> Result<Update, serde_json::Error> {
    #[derive(serde::Deserialize)]
    struct Ready {
        user_id: Uuid,
        username: String,
        role: Role,
    }
    let Ready { user_id, username, role } = payload(data)?;
    Ok(Update::Ready { user_id, username, role })
}

fn on_new_message(me: Uuid, data: Value) -> Result<Update, serde_json::Error> {
    let message: Message = payload(data)?;
    Ok(Update::Message {
        counterpart: message.counterpart_of(me),
        message,
    })
}

fn on_notification(_me: Uuid, data: Value) -> Result<Update, serde_json::Error> {
    Ok(Update::Notification(payload(data)?))
}

fn on_typing(_me: Uuid, data: Value) -> Result<Update, serde_json::Error> {
    #[derive(serde::Deserialize)]
    struct Typing {
        from_user_id: Uuid,
        is_typing: bool,
    }
    let Typing { from_user_id, is_typing } = payload(data)?;
    Ok(Update::Typing { from_user_id, is_typing })
}

fn on_read_receipt(_me: Uuid, data: Value) -> Result<Update, serde_json::Error> {
    #[derive(serde::Deserialize)]
    struct ReadReceipt {
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    }
    let ReadReceipt { reader_id, message_ids, read_at } = payload(data)?;
    Ok(Update::ReadReceipt { reader_id, message_ids, read_at })
}

fn on_reaction_added(_me: Uuid, data: Value) -> Result<Update, serde_json::Error> {
    #[derive(serde::Deserialize)]
    struct ReactionAdded {
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    }
    let ReactionAdded { message_id, user_id, emoji } = payload(data)?;
    Ok(Update::Reaction {
        message_id,
        reaction: Reaction { emoji, user_id },
    })
}

/// Everything one signed-in client knows from its channel.
pub struct ClientState {
    me: Uuid,
    table: EventTable,
    conversations: HashMap<Uuid, Conversation>,
    notifications: Vec<Notification>,
    typing: TypingObserver,
}

impl ClientState {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            table: EventTable::new(),
            conversations: HashMap::new(),
            notifications: Vec::new(),
            typing: TypingObserver::default(),
        }
    }

    pub fn conversation(&mut self, counterpart: Uuid) -> &mut Conversation {
        let me = self.me;
        self.conversations
            .entry(counterpart)
            .or_insert_with(|| Conversation::new(me, counterpart))
    }

    /// Newest first.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread_notifications(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn typing(&self) -> &TypingObserver {
        &self.typing
    }

    pub fn typing_mut(&mut self) -> &mut TypingObserver {
        &mut self.typing
    }

    /// Decode and apply one text frame. Bad frames are logged and dropped;
    /// the returned error is for callers that want to count them.
    pub fn handle_text(&mut self, text: &str, now: Instant) -> Result<(), DispatchError> {
        let result = serde_json::from_str::<ChannelFrame>(text)
            .map_err(DispatchError::from)
            .and_then(|frame| self.table.decode(self.me, frame));

        match result {
            Ok(update) => {
                self.apply(update, now);
                Ok(())
            }
            Err(e) => {
                warn!("Dropping channel frame: {}", e);
                Err(e)
            }
        }
    }

    pub fn apply(&mut self, update: Update, now: Instant) {
        match update {
            Update::Ready { user_id, username, .. } => {
                if user_id != self.me {
                    warn!("Ready for {} but this client is {}", user_id, self.me);
                }
                debug!("Channel ready as {}", username);
            }
            Update::Message { counterpart, message } => {
                self.typing.clear(message.sender_id);
                self.conversation(counterpart).merge(message);
            }
            Update::Notification(notification) => {
                if self.notifications.iter().all(|n| n.id != notification.id) {
                    self.notifications.insert(0, notification);
                }
            }
            Update::Typing { from_user_id, is_typing } => {
                self.typing.observe(from_user_id, is_typing, now);
            }
            Update::ReadReceipt { reader_id, message_ids, read_at } => {
                self.conversation(reader_id).apply_read_receipt(&message_ids, read_at);
            }
            Update::Reaction { message_id, reaction } => {
                let applied = self
                    .conversations
                    .values_mut()
                    .any(|c| c.apply_reaction(message_id, reaction.clone()));
                if !applied {
                    debug!("Reaction on {} already applied or not loaded", message_id);
                }
            }
        }
    }
}
