//! Adapter boundaries: durable storage, LLM generation, and embeddings.
//!
//! The orchestrator calls these traits and nothing else; mocking them is
//! enough to run the whole suite offline. Implementations own their per-call
//! deadlines; the orchestrator propagates cancellation but sets no timers.

use async_trait::async_trait;

use crate::error::{EmbeddingError, LlmError, PersistenceError};
use crate::types::{
    ArchivedRow, InsightRow, NewInsight, NewMessage, PersistedMessage, Role, SessionState,
    ThreadRow, TopicRow,
};

/// Durable key/value/collection store for one `(user, session)` namespace.
///
/// Ordering contract: a read after a completed write on the same key observes
/// that write. No cross-key transactionality is assumed.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Most recent messages, sorted newest-first.
    async fn get_recent_messages(
        &self,
        user: &str,
        session: &str,
        limit: usize,
    ) -> Result<Vec<PersistedMessage>, PersistenceError>;

    async fn add_message(
        &self,
        user: &str,
        session: &str,
        message_id: &str,
        msg: &NewMessage,
    ) -> Result<(), PersistenceError>;

    async fn get_message_by_id(
        &self,
        user: &str,
        session: &str,
        message_id: &str,
    ) -> Result<Option<PersistedMessage>, PersistenceError>;

    async fn is_message_archived(
        &self,
        user: &str,
        session: &str,
        message_id: &str,
    ) -> Result<bool, PersistenceError>;

    async fn mark_messages_archived(
        &self,
        user: &str,
        session: &str,
        message_ids: &[String],
        topic_id: &str,
        thread_id: &str,
    ) -> Result<(), PersistenceError>;

    async fn update_session_timestamp(
        &self,
        user: &str,
        session: &str,
    ) -> Result<(), PersistenceError>;

    async fn get_session_state(
        &self,
        user: &str,
        session: &str,
    ) -> Result<SessionState, PersistenceError>;

    async fn update_session_state(
        &self,
        user: &str,
        session: &str,
        state: &SessionState,
    ) -> Result<(), PersistenceError>;

    async fn create_topic(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        title: &str,
    ) -> Result<(), PersistenceError>;

    async fn get_all_topics(
        &self,
        user: &str,
        session: &str,
    ) -> Result<Vec<TopicRow>, PersistenceError>;

    async fn create_thread(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
        title: &str,
    ) -> Result<(), PersistenceError>;

    async fn get_topic_threads(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
    ) -> Result<Vec<ThreadRow>, PersistenceError>;

    async fn update_thread_summary(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
        summary: &str,
    ) -> Result<(), PersistenceError>;

    async fn create_insight(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
        insight: &NewInsight,
    ) -> Result<(), PersistenceError>;

    /// All insight versions for a thread, sorted oldest-first.
    async fn get_thread_insights(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
    ) -> Result<Vec<InsightRow>, PersistenceError>;

    async fn get_latest_insight(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
    ) -> Result<Option<InsightRow>, PersistenceError>;

    async fn update_insight_embedding(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
        insight_id: &str,
        embedding: &[f32],
    ) -> Result<(), PersistenceError>;

    /// Upserts by `message_id`: reprocessing the same batch after a crash
    /// must not duplicate index rows.
    #[allow(clippy::too_many_arguments)]
    async fn save_archived_message(
        &self,
        user: &str,
        session: &str,
        message_id: &str,
        topic_id: &str,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), PersistenceError>;

    /// Archived messages for a thread, in persistence order.
    async fn get_archived_messages_by_thread(
        &self,
        user: &str,
        session: &str,
        thread_id: &str,
    ) -> Result<Vec<ArchivedRow>, PersistenceError>;
}

/// Text and JSON generation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-form text generation.
    async fn generate_simple(&self, prompt: &str) -> Result<String, LlmError>;

    /// Best-effort JSON generation. `Ok(None)` when the model's output could
    /// not be parsed as JSON; transport failures are `Err`.
    async fn generate_json(&self, prompt: &str) -> Result<Option<serde_json::Value>, LlmError>;

    /// Classification call used by the archiver. Same contract as
    /// [`Self::generate_json`]; split out so adapters can route it to a
    /// cheaper model.
    async fn classify_for_archive(
        &self,
        prompt: &str,
    ) -> Result<Option<serde_json::Value>, LlmError> {
        self.generate_json(prompt).await
    }
}

/// Text embedding. Vectors have a fixed dimension per adapter.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Slice the outermost JSON object out of a model response that may be
/// wrapped in code fences or prose, and parse it. Adapters implementing
/// [`LlmClient::generate_json`] over raw text can use this directly.
pub fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    let raw = raw.trim();
    let sliced = match (raw.find('{'), raw.rfind('}')) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    };
    serde_json::from_str(sliced).ok()
}
