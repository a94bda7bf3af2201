use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use saga_core::error::PersistenceError;
use saga_core::ports::Persistence;
use saga_core::types::{
    ArchivedRow, InsightRow, NewInsight, NewMessage, PersistedMessage, Role, RoleContent,
    SessionState, ThreadRow, TopicRow,
};
use saga_core::vector::{bytes_to_embedding, embedding_to_bytes};

/// SQLite-backed [`Persistence`] adapter.
///
/// Thread-safe: wraps the connection in a `Mutex`. No statement suspends, so
/// the lock is never held across an await point.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self, PersistenceError> {
        crate::db::init_db(&conn).map_err(db_err)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Fresh in-memory store. Used by tests and local tooling.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::new(conn)
    }
}

fn db_err(e: rusqlite::Error) -> PersistenceError {
    PersistenceError::Database(e.to_string())
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedMessage> {
    let role_str: String = row.get(1)?;
    let token_count: Option<i64> = row.get(4)?;
    Ok(PersistedMessage {
        message_id: row.get(0)?,
        role: role_str.parse().unwrap_or(Role::User),
        content: row.get(2)?,
        timestamp: row.get(3)?,
        token_count: token_count.map(|t| t.max(0) as usize),
        is_archived: row.get::<_, i64>(5)? != 0,
    })
}

fn row_to_topic(row: &rusqlite::Row<'_>) -> rusqlite::Result<TopicRow> {
    Ok(TopicRow {
        topic_id: row.get(0)?,
        title: row.get(1)?,
        summary: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRow> {
    Ok(ThreadRow {
        thread_id: row.get(0)?,
        topic_id: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_insight(row: &rusqlite::Row<'_>) -> rusqlite::Result<InsightRow> {
    let source_json: String = row.get(5)?;
    let embedding: Option<Vec<u8>> = row.get(8)?;
    Ok(InsightRow {
        insight_id: row.get(0)?,
        topic_id: row.get(1)?,
        thread_id: row.get(2)?,
        version: row.get::<_, i64>(3)?.max(0) as u32,
        content: row.get(4)?,
        source_message_ids: serde_json::from_str(&source_json).unwrap_or_default(),
        evolution_note: row.get(6)?,
        created_at: row.get(7)?,
        embedding: embedding.map(|b| bytes_to_embedding(&b)),
    })
}

const INSIGHT_COLUMNS: &str = "insight_id, topic_id, thread_id, version, content,
            source_message_ids, evolution_note, created_at, embedding";

#[async_trait]
impl Persistence for SqliteStore {
    async fn get_recent_messages(
        &self,
        user: &str,
        session: &str,
        limit: usize,
    ) -> Result<Vec<PersistedMessage>, PersistenceError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT message_id, role, content, timestamp, token_count, is_archived
                 FROM messages
                 WHERE user_id = ?1 AND session_id = ?2
                 ORDER BY id DESC
                 LIMIT ?3",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params![user, session, limit as i64],
                row_to_message,
            )
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn add_message(
        &self,
        user: &str,
        session: &str,
        message_id: &str,
        msg: &NewMessage,
    ) -> Result<(), PersistenceError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO messages
             (user_id, session_id, message_id, role, content, timestamp, token_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                user,
                session,
                message_id,
                msg.role.to_string(),
                msg.content,
                msg.timestamp.to_rfc3339(),
                msg.token_count as i64,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_message_by_id(
        &self,
        user: &str,
        session: &str,
        message_id: &str,
    ) -> Result<Option<PersistedMessage>, PersistenceError> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT message_id, role, content, timestamp, token_count, is_archived
             FROM messages
             WHERE user_id = ?1 AND session_id = ?2 AND message_id = ?3",
            rusqlite::params![user, session, message_id],
            row_to_message,
        )
        .optional()
        .map_err(db_err)
    }

    async fn is_message_archived(
        &self,
        user: &str,
        session: &str,
        message_id: &str,
    ) -> Result<bool, PersistenceError> {
        let db = self.db.lock().unwrap();
        let archived: Option<i64> = db
            .query_row(
                "SELECT is_archived FROM messages
                 WHERE user_id = ?1 AND session_id = ?2 AND message_id = ?3",
                rusqlite::params![user, session, message_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(archived.unwrap_or(0) != 0)
    }

    async fn mark_messages_archived(
        &self,
        user: &str,
        session: &str,
        message_ids: &[String],
        topic_id: &str,
        thread_id: &str,
    ) -> Result<(), PersistenceError> {
        let db = self.db.lock().unwrap();
        for id in message_ids {
            db.execute(
                "UPDATE messages
                 SET is_archived = 1, archived_topic_id = ?4, archived_thread_id = ?5
                 WHERE user_id = ?1 AND session_id = ?2 AND message_id = ?3",
                rusqlite::params![user, session, id, topic_id, thread_id],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn update_session_timestamp(
        &self,
        user: &str,
        session: &str,
    ) -> Result<(), PersistenceError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO session_state (user_id, session_id, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, session_id) DO UPDATE SET updated_at = ?3",
            rusqlite::params![user, session, now_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_session_state(
        &self,
        user: &str,
        session: &str,
    ) -> Result<SessionState, PersistenceError> {
        let db = self.db.lock().unwrap();
        let row: Option<(String, Option<String>)> = db
            .query_row(
                "SELECT insert_context_messages, insert_context_updated_at
                 FROM session_state
                 WHERE user_id = ?1 AND session_id = ?2",
                rusqlite::params![user, session],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        let Some((messages_json, updated_at)) = row else {
            return Ok(SessionState::default());
        };
        let insert_context_messages: Vec<RoleContent> =
            serde_json::from_str(&messages_json).unwrap_or_default();
        Ok(SessionState {
            insert_context_messages,
            insert_context_updated_at: updated_at,
        })
    }

    async fn update_session_state(
        &self,
        user: &str,
        session: &str,
        state: &SessionState,
    ) -> Result<(), PersistenceError> {
        let messages_json = serde_json::to_string(&state.insert_context_messages)
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO session_state
             (user_id, session_id, insert_context_messages, insert_context_updated_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, session_id) DO UPDATE SET
                insert_context_messages = ?3,
                insert_context_updated_at = ?4,
                updated_at = ?5",
            rusqlite::params![
                user,
                session,
                messages_json,
                state.insert_context_updated_at,
                now_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_topic(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        title: &str,
    ) -> Result<(), PersistenceError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO topics (user_id, session_id, topic_id, title, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![user, session, topic_id, title, now_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_all_topics(
        &self,
        user: &str,
        session: &str,
    ) -> Result<Vec<TopicRow>, PersistenceError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT topic_id, title, summary, created_at
                 FROM topics
                 WHERE user_id = ?1 AND session_id = ?2
                 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![user, session], row_to_topic)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn create_thread(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
        title: &str,
    ) -> Result<(), PersistenceError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO threads
             (user_id, session_id, topic_id, thread_id, title, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![user, session, topic_id, thread_id, title, now_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_topic_threads(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
    ) -> Result<Vec<ThreadRow>, PersistenceError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT thread_id, topic_id, title, summary, created_at
                 FROM threads
                 WHERE user_id = ?1 AND session_id = ?2 AND topic_id = ?3
                 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![user, session, topic_id], row_to_thread)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn update_thread_summary(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
        summary: &str,
    ) -> Result<(), PersistenceError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE threads SET summary = ?5
             WHERE user_id = ?1 AND session_id = ?2 AND topic_id = ?3 AND thread_id = ?4",
            rusqlite::params![user, session, topic_id, thread_id, summary],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_insight(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
        insight: &NewInsight,
    ) -> Result<(), PersistenceError> {
        let source_json = serde_json::to_string(&insight.source_message_ids)
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO insights
             (user_id, session_id, topic_id, thread_id, insight_id, version, content,
              source_message_ids, evolution_note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                user,
                session,
                topic_id,
                thread_id,
                insight.insight_id,
                insight.version as i64,
                insight.content,
                source_json,
                insight.evolution_note,
                now_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_thread_insights(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
    ) -> Result<Vec<InsightRow>, PersistenceError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {INSIGHT_COLUMNS}
                 FROM insights
                 WHERE user_id = ?1 AND session_id = ?2 AND topic_id = ?3 AND thread_id = ?4
                 ORDER BY version ASC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params![user, session, topic_id, thread_id],
                row_to_insight,
            )
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn get_latest_insight(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
    ) -> Result<Option<InsightRow>, PersistenceError> {
        let db = self.db.lock().unwrap();
        db.query_row(
            &format!(
                "SELECT {INSIGHT_COLUMNS}
                 FROM insights
                 WHERE user_id = ?1 AND session_id = ?2 AND topic_id = ?3 AND thread_id = ?4
                 ORDER BY version DESC
                 LIMIT 1"
            ),
            rusqlite::params![user, session, topic_id, thread_id],
            row_to_insight,
        )
        .optional()
        .map_err(db_err)
    }

    async fn update_insight_embedding(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
        insight_id: &str,
        embedding: &[f32],
    ) -> Result<(), PersistenceError> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE insights SET embedding = ?6
             WHERE user_id = ?1 AND session_id = ?2 AND topic_id = ?3
               AND thread_id = ?4 AND insight_id = ?5",
            rusqlite::params![
                user,
                session,
                topic_id,
                thread_id,
                insight_id,
                embedding_to_bytes(embedding),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_archived_message(
        &self,
        user: &str,
        session: &str,
        message_id: &str,
        topic_id: &str,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), PersistenceError> {
        let db = self.db.lock().unwrap();
        // Upsert keeps the original row id, preserving persistence order for
        // thread reads even when a crashed archive run is replayed.
        db.execute(
            "INSERT INTO archived_messages
             (user_id, session_id, message_id, topic_id, thread_id, role, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, session_id, message_id) DO UPDATE SET
                topic_id = ?4, thread_id = ?5, role = ?6, content = ?7",
            rusqlite::params![
                user,
                session,
                message_id,
                topic_id,
                thread_id,
                role.to_string(),
                content,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_archived_messages_by_thread(
        &self,
        user: &str,
        session: &str,
        thread_id: &str,
    ) -> Result<Vec<ArchivedRow>, PersistenceError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT message_id, topic_id, thread_id, role, content
                 FROM archived_messages
                 WHERE user_id = ?1 AND session_id = ?2 AND thread_id = ?3
                 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![user, session, thread_id], |row| {
                let role_str: String = row.get(3)?;
                Ok(ArchivedRow {
                    message_id: row.get(0)?,
                    topic_id: row.get(1)?,
                    thread_id: row.get(2)?,
                    role: role_str.parse().unwrap_or(Role::User),
                    content: row.get(4)?,
                })
            })
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
