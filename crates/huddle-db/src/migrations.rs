use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            role        TEXT NOT NULL CHECK (role IN ('coach', 'athlete')),
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS coach_athletes (
            coach_id    TEXT NOT NULL REFERENCES users(id),
            athlete_id  TEXT NOT NULL REFERENCES users(id),
            created_at  INTEGER NOT NULL,
            PRIMARY KEY (coach_id, athlete_id)
        );

        CREATE INDEX IF NOT EXISTS idx_coach_athletes_athlete
            ON coach_athletes(athlete_id);

        -- seq breaks ties between messages sharing a millisecond
        CREATE TABLE IF NOT EXISTS messages (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            sender_id       TEXT NOT NULL REFERENCES users(id),
            receiver_id     TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            attachment      TEXT,
            sent_at         INTEGER NOT NULL,
            read_at         INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, sent_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, read_at);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            PRIMARY KEY (message_id, user_id, emoji)
        );

        CREATE TABLE IF NOT EXISTS notifications (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            user_id         TEXT NOT NULL REFERENCES users(id),
            kind            TEXT NOT NULL,
            plan_id         TEXT,
            session_id      TEXT,
            activity_id     TEXT,
            from_user_id    TEXT,
            streak_days     INTEGER,
            dedup_key       TEXT NOT NULL,
            read            INTEGER NOT NULL DEFAULT 0,
            read_at         INTEGER,
            created_at      INTEGER NOT NULL,
            UNIQUE (user_id, kind, dedup_key)
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
