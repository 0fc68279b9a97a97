use crate::models::{MessageRow, NewMessage, ReactionRow, ReadMarker, UserRow};
use crate::{Database, now_millis};
use anyhow::Result;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

impl Database {
    // -- Users --

    /// Returns false if the username is already taken.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str, role: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, password, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(username) DO NOTHING",
                params![id, username, password_hash, role, now_millis()],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Coaching relationships --

    /// Pair a coach with an athlete. Returns false if they were already paired.
    pub fn add_coach_athlete(&self, coach_id: &str, athlete_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT INTO coach_athletes (coach_id, athlete_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (coach_id, athlete_id) DO NOTHING",
                params![coach_id, athlete_id, now_millis()],
            )?;
            Ok(changed == 1)
        })
    }

    /// True when the two users form a coach/athlete pair, in either direction.
    pub fn is_coaching_pair(&self, a: &str, b: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT EXISTS (
                    SELECT 1 FROM coach_athletes
                    WHERE (coach_id = ?1 AND athlete_id = ?2) OR (coach_id = ?2 AND athlete_id = ?1)
                 )",
                params![a, b],
                |row| row.get(0),
            )?;
            Ok(found == 1)
        })
    }

    /// Everyone `user_id` may message: their athletes if a coach, their coaches if an athlete.
    pub fn list_contacts(&self, user_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.password, u.role, u.created_at
                 FROM coach_athletes ca
                 JOIN users u ON u.id = CASE WHEN ca.coach_id = ?1 THEN ca.athlete_id ELSE ca.coach_id END
                 WHERE ca.coach_id = ?1 OR ca.athlete_id = ?1
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([user_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message, assigning its canonical id and `sent_at`.
    ///
    /// `sent_at` never goes backwards within a conversation: if the clock is
    /// behind the pair's latest message, the new one reuses that timestamp and
    /// the autoincrement `seq` orders the tie.
    pub fn insert_message(&self, new: &NewMessage<'_>) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let latest: Option<i64> = tx.query_row(
                "SELECT MAX(sent_at) FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)",
                params![new.sender_id, new.receiver_id],
                |row| row.get(0),
            )?;
            // Strictly after the pair's latest, so `sent_at` alone orders a
            // conversation the same way on every client.
            let now = now_millis();
            let sent_at = latest.map_or(now, |latest| now.max(latest + 1));
            let id = Uuid::new_v4().to_string();

            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, attachment, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, new.sender_id, new.receiver_id, new.content, new.attachment, sent_at],
            )?;
            let seq = tx.last_insert_rowid();
            tx.commit()?;

            Ok(MessageRow {
                seq,
                id,
                sender_id: new.sender_id.to_string(),
                receiver_id: new.receiver_id.to_string(),
                content: new.content.to_string(),
                attachment: new.attachment.map(str::to_string),
                sent_at,
                read_at: None,
            })
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    /// Position `(sent_at, seq)` of a message inside the a/b conversation,
    /// used as a pagination cursor.
    pub fn message_cursor(&self, a: &str, b: &str, message_id: &str) -> Result<Option<(i64, i64)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT sent_at, seq FROM messages
                 WHERE id = ?3
                   AND ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))",
                params![a, b, message_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    /// Fetch up to `limit` messages between a and b strictly older than
    /// `before`, returned oldest first, plus whether older ones remain.
    pub fn get_conversation(
        &self,
        a: &str,
        b: &str,
        limit: u32,
        before: Option<(i64, i64)>,
    ) -> Result<(Vec<MessageRow>, bool)> {
        self.with_conn(|conn| query_conversation(conn, a, b, limit, before))
    }

    /// Set `read_at` on the given messages addressed to `reader_id`.
    /// Rows already read, or belonging to someone else, are left untouched.
    pub fn mark_messages_read(&self, reader_id: &str, message_ids: &[String], read_at: i64) -> Result<Vec<ReadMarker>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE messages SET read_at = ?1
                 WHERE receiver_id = ?2 AND read_at IS NULL AND id IN ({})
                 RETURNING id, sender_id",
                placeholders(3, message_ids.len())
            );

            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&read_at, &reader_id];
            params.extend(message_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReadMarker {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Unread message counts addressed to `user_id`, grouped by sender.
    pub fn unread_by_sender(&self, user_id: &str) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND read_at IS NULL
                 GROUP BY sender_id
                 ORDER BY sender_id",
            )?;
            let rows = stmt
                .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    /// Add a reaction. Reactions form a set, so a repeat returns false.
    pub fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (message_id, user_id, emoji) DO NOTHING",
                params![message_id, user_id, emoji, now_millis()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id IN ({})
                 ORDER BY created_at",
                placeholders(1, message_ids.len())
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

const MESSAGE_COLUMNS: &str = "seq, id, sender_id, receiver_id, content, attachment, sent_at, read_at";

/// `?start, ?start+1, ...` for an IN clause of `count` items.
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        attachment: row.get(5)?,
        sent_at: row.get(6)?,
        read_at: row.get(7)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, password, role, created_at FROM users WHERE {} = ?1",
        column
    ))?;

    stmt.query_row([value], user_from_row).optional()
}

fn query_conversation(
    conn: &Connection,
    a: &str,
    b: &str,
    limit: u32,
    before: Option<(i64, i64)>,
) -> Result<(Vec<MessageRow>, bool)> {
    let (before_at, before_seq) = before.unzip();

    // One extra row tells us whether an older page exists.
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
           AND (?3 IS NULL OR sent_at < ?3 OR (sent_at = ?3 AND seq < ?4))
         ORDER BY sent_at DESC, seq DESC
         LIMIT ?5"
    ))?;

    let mut rows = stmt
        .query_map(
            params![a, b, before_at, before_seq, i64::from(limit) + 1],
            message_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let has_more = rows.len() > limit as usize;
    rows.truncate(limit as usize);
    rows.reverse();

    Ok((rows, has_more))
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
