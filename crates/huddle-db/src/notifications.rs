use anyhow::Result;
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::models::{NewNotification, NotificationRow};
use crate::queries::{OptionalExt, placeholders};
use crate::{Database, now_millis};

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, plan_id, session_id, activity_id, from_user_id, \
     streak_days, read, read_at, created_at";

impl Database {
    /// Insert a notification unless one with the same dedup key already
    /// exists for this user and kind. Returns `None` when suppressed.
    pub fn insert_notification(&self, new: &NewNotification<'_>) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            let id = Uuid::new_v4().to_string();
            let created_at = now_millis();

            let changed = conn.execute(
                "INSERT INTO notifications
                    (id, user_id, kind, plan_id, session_id, activity_id, from_user_id, streak_days, dedup_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT (user_id, kind, dedup_key) DO NOTHING",
                params![
                    id,
                    new.user_id,
                    new.kind,
                    new.plan_id,
                    new.session_id,
                    new.activity_id,
                    new.from_user_id,
                    new.streak_days,
                    new.dedup_key,
                    created_at,
                ],
            )?;

            if changed == 0 {
                return Ok(None);
            }

            Ok(Some(NotificationRow {
                id,
                user_id: new.user_id.to_string(),
                kind: new.kind.to_string(),
                plan_id: new.plan_id.map(str::to_string),
                session_id: new.session_id.map(str::to_string),
                activity_id: new.activity_id.map(str::to_string),
                from_user_id: new.from_user_id.map(str::to_string),
                streak_days: new.streak_days,
                read: false,
                read_at: None,
                created_at,
            }))
        })
    }

    pub fn get_notification(&self, id: &str) -> Result<Option<NotificationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                [id],
                notification_from_row,
            )
            .optional()
        })
    }

    /// Newest first.
    pub fn list_notifications(&self, user_id: &str, limit: u32, unread_only: bool) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE user_id = ?1 AND (?2 = 0 OR read = 0)
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(params![user_id, unread_only, limit], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark the given notifications of `user_id` read. Returns the ids that
    /// actually changed; already-read ones keep their original `read_at`.
    pub fn mark_notifications_read(&self, user_id: &str, ids: &[String], read_at: i64) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE notifications SET read = 1, read_at = ?1
                 WHERE user_id = ?2 AND read = 0 AND id IN ({})
                 RETURNING id",
                placeholders(3, ids.len())
            );

            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&read_at, &user_id];
            params.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: &str, read_at: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1, read_at = ?1 WHERE user_id = ?2 AND read = 0",
                params![read_at, user_id],
            )?;
            Ok(changed)
        })
    }

    pub fn unread_notification_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        plan_id: row.get(3)?,
        session_id: row.get(4)?,
        activity_id: row.get(5)?,
        from_user_id: row.get(6)?,
        streak_days: row.get(7)?,
        read: row.get(8)?,
        read_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}
