use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use saga_archive::SharedStream;
use saga_core::ports::Persistence;
use saga_core::retry::retry_once;
use saga_core::token::TokenCounter;
use saga_core::types::{ApiMessage, RoleContent, SessionState};
use saga_stream::MessageStream;

use crate::error::Result;

/// In-memory cache of live streams and insert-message blocks, backed by
/// persistence.
///
/// All maps are keyed by session ID; the dashmap shard locks are held only
/// for lookup/insert. Data access is serialized by the per-session mutex
/// handed out by [`Self::session_lock`]; callers take it around the critical
/// sections described in the gateway, not here.
pub struct SessionContextStore {
    persistence: Arc<dyn Persistence>,
    counter: TokenCounter,
    ttl: Duration,
    load_limit: usize,
    streams: DashMap<String, SharedStream>,
    insert_messages: DashMap<String, Vec<RoleContent>>,
    last_access: DashMap<String, Instant>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionContextStore {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        counter: TokenCounter,
        ttl: Duration,
        load_limit: usize,
    ) -> Self {
        Self {
            persistence,
            counter,
            ttl,
            load_limit,
            streams: DashMap::new(),
            insert_messages: DashMap::new(),
            last_access: DashMap::new(),
            session_locks: DashMap::new(),
        }
    }

    /// Per-session mutex, lazily created and never removed.
    pub fn session_lock(&self, session: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn touch(&self, session: &str) {
        self.last_access.insert(session.to_string(), Instant::now());
    }

    fn is_expired(&self, session: &str) -> bool {
        match self.last_access.get(session) {
            Some(last) => last.elapsed() > self.ttl,
            None => false,
        }
    }

    /// The session's live stream, hydrating from persistence when absent or
    /// TTL-expired. The caller-supplied window budget is re-applied on every
    /// access so a cached stream honours the current request's override.
    pub async fn get_stream(
        &self,
        user: &str,
        session: &str,
        window_tokens: usize,
    ) -> Result<SharedStream> {
        if !self.is_expired(session) {
            if let Some(stream) = self.streams.get(session).map(|s| Arc::clone(s.value())) {
                stream.lock().await.set_window_budget(window_tokens);
                self.touch(session);
                return Ok(stream);
            }
        }

        let rows = retry_once(|| {
            self.persistence
                .get_recent_messages(user, session, self.load_limit)
        })
        .await?;

        let mut stream = MessageStream::new(session, window_tokens);
        // Rows arrive newest-first; reverse to chronological order.
        for row in rows.into_iter().rev() {
            let token_count = row
                .token_count
                .unwrap_or_else(|| self.counter.count(&row.content));
            let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let message_id = row.message_id.clone();
            let msg = ApiMessage {
                message_id: row.message_id,
                role: row.role,
                content: row.content,
                timestamp,
                token_count,
            };
            if stream.append(msg).is_ok() && row.is_archived {
                stream.mark_archived([message_id]);
            }
        }
        debug!(
            session = %session,
            messages = stream.message_count(),
            tokens = stream.total_tokens(),
            "stream hydrated from persistence"
        );

        let shared: SharedStream = Arc::new(Mutex::new(stream));
        self.streams.insert(session.to_string(), shared.clone());
        self.touch(session);
        Ok(shared)
    }

    /// Cached insert block, reloading persisted session state when absent or
    /// expired.
    pub async fn get_insert_messages(&self, user: &str, session: &str) -> Result<Vec<RoleContent>> {
        if !self.is_expired(session) {
            if let Some(cached) = self.insert_messages.get(session) {
                let messages = cached.value().clone();
                drop(cached);
                self.touch(session);
                return Ok(messages);
            }
        }

        let state = retry_once(|| self.persistence.get_session_state(user, session)).await?;
        self.insert_messages
            .insert(session.to_string(), state.insert_context_messages.clone());
        self.touch(session);
        Ok(state.insert_context_messages)
    }

    /// Update the cached insert block and write it through to persistence.
    pub async fn set_insert_messages(
        &self,
        user: &str,
        session: &str,
        messages: Vec<RoleContent>,
    ) -> Result<()> {
        self.insert_messages
            .insert(session.to_string(), messages.clone());
        self.touch(session);
        let state = SessionState {
            insert_context_messages: messages,
            insert_context_updated_at: Some(Utc::now().to_rfc3339()),
        };
        retry_once(|| self.persistence.update_session_state(user, session, &state)).await?;
        Ok(())
    }
}
