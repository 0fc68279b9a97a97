//! Row-to-model conversion. Corrupt columns are logged and replaced with
//! defaults rather than failing a whole page.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use huddle_db::models::{MessageRow, NotificationRow, ReactionRow, UserRow};
use huddle_types::models::{
    Attachment, Contact, Correlation, Message, Notification, NotificationKind, Reaction, Role,
};

pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(|| {
        warn!("Timestamp {} out of range", ms);
        DateTime::default()
    })
}

fn parse_uuid(raw: &str, column: &str, owner: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on '{}': {}", column, raw, owner, e);
        Uuid::default()
    })
}

/// Group reaction rows by message id.
pub fn reactions_by_message(rows: Vec<ReactionRow>) -> HashMap<String, Vec<Reaction>> {
    let mut map: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in rows {
        let user_id = parse_uuid(&r.user_id, "reaction user_id", &r.message_id);
        map.entry(r.message_id).or_default().push(Reaction {
            emoji: r.emoji,
            user_id,
        });
    }
    map
}

pub fn message_from_row(row: MessageRow, reactions: Vec<Reaction>) -> Message {
    let attachment = row.attachment.as_deref().and_then(|raw| {
        serde_json::from_str::<Attachment>(raw)
            .map_err(|e| warn!("Corrupt attachment on message '{}': {}", row.id, e))
            .ok()
    });

    Message {
        id: parse_uuid(&row.id, "id", &row.id),
        sender_id: parse_uuid(&row.sender_id, "sender_id", &row.id),
        receiver_id: parse_uuid(&row.receiver_id, "receiver_id", &row.id),
        content: row.content,
        attachment,
        sent_at: millis_to_datetime(row.sent_at),
        read_at: row.read_at.map(millis_to_datetime),
        reactions,
    }
}

pub fn notification_from_row(row: NotificationRow) -> Notification {
    let kind = row.kind.parse().unwrap_or_else(|e| {
        warn!("Corrupt kind on notification '{}': {}", row.id, e);
        NotificationKind::PlanAssigned
    });

    Notification {
        id: parse_uuid(&row.id, "id", &row.id),
        user_id: parse_uuid(&row.user_id, "user_id", &row.id),
        kind,
        correlation: Correlation {
            plan_id: row.plan_id,
            session_id: row.session_id,
            activity_id: row.activity_id,
            from_user_id: row
                .from_user_id
                .as_deref()
                .map(|raw| parse_uuid(raw, "from_user_id", &row.id)),
            streak_days: row.streak_days.and_then(|d| u32::try_from(d).ok()),
        },
        read: row.read,
        read_at: row.read_at.map(millis_to_datetime),
        created_at: millis_to_datetime(row.created_at),
    }
}

pub fn contact_from_row(row: UserRow) -> Contact {
    let role = row.role.parse().unwrap_or_else(|e| {
        warn!("Corrupt role on user '{}': {}", row.id, e);
        Role::Athlete
    });

    Contact {
        user_id: parse_uuid(&row.id, "id", &row.id),
        username: row.username,
        role,
    }
}
