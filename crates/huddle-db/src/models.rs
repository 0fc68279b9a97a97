/// Database row types. These map directly to SQLite rows.
/// Distinct from huddle-types API models to keep the DB layer independent.
/// Ids are stored as TEXT, timestamps as Unix milliseconds.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub created_at: i64,
}

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    /// JSON-encoded attachment descriptor
    pub attachment: Option<String>,
    pub sent_at: i64,
    pub read_at: Option<i64>,
}

pub struct NewMessage<'a> {
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub content: &'a str,
    pub attachment: Option<&'a str>,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: i64,
}

/// A message flipped from unread to read by a bulk update.
pub struct ReadMarker {
    pub id: String,
    pub sender_id: String,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub plan_id: Option<String>,
    pub session_id: Option<String>,
    pub activity_id: Option<String>,
    pub from_user_id: Option<String>,
    pub streak_days: Option<i64>,
    pub read: bool,
    pub read_at: Option<i64>,
    pub created_at: i64,
}

pub struct NewNotification<'a> {
    pub user_id: &'a str,
    pub kind: &'a str,
    pub plan_id: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub activity_id: Option<&'a str>,
    pub from_user_id: Option<&'a str>,
    pub streak_days: Option<i64>,
    /// Repeat inserts with the same (user, kind, dedup_key) are suppressed.
    pub dedup_key: &'a str,
}
