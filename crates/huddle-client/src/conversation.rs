use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use huddle_types::api::ConversationPage;
use huddle_types::models::{Message, Reaction};

/// One side's view of a two-party conversation.
///
/// Messages arrive from two places: pages fetched over HTTP and live
/// `new-message` events. Both feed the same merge, which keys on the server
/// id so a message seen twice is kept once, and orders by the server's
/// `sent_at`, which the store keeps strictly increasing within a pair.
/// Arrival order is never trusted.
#[derive(Debug, Clone)]
pub struct Conversation {
    me: Uuid,
    counterpart: Uuid,
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
    has_more: bool,
}

impl Conversation {
    pub fn new(me: Uuid, counterpart: Uuid) -> Self {
        Self {
            me,
            counterpart,
            messages: Vec::new(),
            ids: HashSet::new(),
            has_more: true,
        }
    }

    pub fn counterpart(&self) -> Uuid {
        self.counterpart
    }

    /// Oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether older history may still be on the server.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Cursor for the next older page.
    pub fn oldest_id(&self) -> Option<Uuid> {
        self.messages.first().map(|m| m.id)
    }

    /// Merge a fetched page. Pages are fetched newest-to-oldest, so only
    /// the most recently fetched page decides `has_more`.
    pub fn merge_page(&mut self, page: ConversationPage) {
        for message in page.messages {
            self.merge(message);
        }
        self.has_more = page.has_more;
    }

    /// Merge one message. Returns true if it was not already present.
    /// Messages for other conversations are ignored.
    pub fn merge(&mut self, message: Message) -> bool {
        if !self.belongs_here(&message) {
            return false;
        }

        if self.ids.contains(&message.id) {
            if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
                reconcile(existing, message);
            }
            return false;
        }

        let key = (message.sent_at, message.id);
        let at = self
            .messages
            .partition_point(|m| (m.sent_at, m.id) < key);
        self.ids.insert(message.id);
        self.messages.insert(at, message);
        true
    }

    /// Apply a read receipt for messages we sent. Returns how many changed.
    pub fn apply_read_receipt(&mut self, message_ids: &[Uuid], read_at: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == self.me && message_ids.contains(&m.id))
        {
            if message.read_at.is_none() {
                message.read_at = Some(read_at);
                changed += 1;
            }
        }
        changed
    }

    /// Returns false if the message is unknown here or already carries the
    /// reaction.
    pub fn apply_reaction(&mut self, message_id: Uuid, reaction: Reaction) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        if message.reactions.contains(&reaction) {
            return false;
        }
        message.reactions.push(reaction);
        true
    }

    /// Ids of received messages not yet marked read, ready for a
    /// `mark-read` batch.
    pub fn unread_ids(&self) -> Vec<Uuid> {
        self.messages
            .iter()
            .filter(|m| m.receiver_id == self.me && m.read_at.is_none())
            .map(|m| m.id)
            .collect()
    }

    fn belongs_here(&self, message: &Message) -> bool {
        (message.sender_id == self.me && message.receiver_id == self.counterpart)
            || (message.sender_id == self.counterpart && message.receiver_id == self.me)
    }
}

/// Fold a second copy of a known message into the one we hold. `read_at`
/// only ever moves from unset to set and reactions only accumulate, so the
/// result is the same whichever copy arrived first.
fn reconcile(existing: &mut Message, incoming: Message) {
    if existing.read_at.is_none() {
        existing.read_at = incoming.read_at;
    }
    for reaction in incoming.reactions {
        if !existing.reactions.contains(&reaction) {
            existing.reactions.push(reaction);
        }
    }
}
