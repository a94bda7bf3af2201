use rusqlite::{Connection, Result};

/// Initialise orchestrator tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_messages_table(conn)?;
    create_topic_tables(conn)?;
    create_archive_tables(conn)?;
    create_session_state_table(conn)?;
    Ok(())
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id      TEXT NOT NULL,
            session_id   TEXT NOT NULL,
            message_id   TEXT NOT NULL,
            role         TEXT NOT NULL,
            content      TEXT NOT NULL,
            timestamp    TEXT NOT NULL,
            token_count  INTEGER,
            is_archived  INTEGER NOT NULL DEFAULT 0,
            archived_topic_id  TEXT,
            archived_thread_id TEXT,
            UNIQUE(user_id, session_id, message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(user_id, session_id, id DESC);",
    )
}

fn create_topic_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS topics (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            session_id TEXT NOT NULL,
            topic_id   TEXT NOT NULL,
            title      TEXT NOT NULL,
            summary    TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            UNIQUE(user_id, session_id, topic_id)
        );
        CREATE TABLE IF NOT EXISTS threads (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            session_id TEXT NOT NULL,
            topic_id   TEXT NOT NULL,
            thread_id  TEXT NOT NULL,
            title      TEXT NOT NULL,
            summary    TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            UNIQUE(user_id, session_id, thread_id)
        );
        CREATE TABLE IF NOT EXISTS insights (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id            TEXT NOT NULL,
            session_id         TEXT NOT NULL,
            topic_id           TEXT NOT NULL,
            thread_id          TEXT NOT NULL,
            insight_id         TEXT NOT NULL,
            version            INTEGER NOT NULL,
            content            TEXT NOT NULL,
            source_message_ids TEXT NOT NULL DEFAULT '[]',
            evolution_note     TEXT NOT NULL DEFAULT '',
            created_at         TEXT NOT NULL,
            embedding          BLOB,
            UNIQUE(user_id, session_id, thread_id, insight_id)
        );
        CREATE INDEX IF NOT EXISTS idx_insights_thread
            ON insights(user_id, session_id, thread_id, version);",
    )
}

fn create_archive_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS archived_messages (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            session_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            topic_id   TEXT NOT NULL,
            thread_id  TEXT NOT NULL,
            role       TEXT NOT NULL,
            content    TEXT NOT NULL,
            UNIQUE(user_id, session_id, message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_archived_thread
            ON archived_messages(user_id, session_id, thread_id, id);",
    )
}

fn create_session_state_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_state (
            user_id                   TEXT NOT NULL,
            session_id                TEXT NOT NULL,
            insert_context_messages   TEXT NOT NULL DEFAULT '[]',
            insert_context_updated_at TEXT,
            updated_at                TEXT,
            PRIMARY KEY(user_id, session_id)
        );",
    )
}
