use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::TokenCounter;

/// Message role. The stream only ever holds these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single immutable message in a session's stream.
///
/// The token count is computed once at construction and cached; the stream's
/// running total is a sum over these cached values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: usize,
}

impl ApiMessage {
    /// Build a message stamped `now`, counting tokens with `counter`.
    pub fn new(message_id: String, role: Role, content: String, counter: &TokenCounter) -> Self {
        let token_count = counter.count(&content);
        Self {
            message_id,
            role,
            content,
            timestamp: Utc::now(),
            token_count,
        }
    }
}

/// A `{role, content}` pair, the shape of insert-block and assembled
/// messages on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleContent {
    pub role: Role,
    pub content: String,
}

impl RoleContent {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// A message as stored by the persistence adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub message_id: String,
    pub role: Role,
    pub content: String,
    /// RFC 3339.
    pub timestamp: String,
    /// Absent for rows written before token caching; recomputed on hydration.
    pub token_count: Option<usize>,
    pub is_archived: bool,
}

/// Payload for [`crate::ports::Persistence::add_message`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: usize,
}

/// Coarse category in the Topic → Thread → Insight hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRow {
    pub topic_id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub created_at: String,
}

/// A specific discussion point within a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRow {
    pub thread_id: String,
    pub topic_id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub created_at: String,
}

/// One versioned distillation of a thread. Versions are dense per thread:
/// 1, 2, …, N, and `evolution_note` is `"initial"` exactly for version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightRow {
    pub insight_id: String,
    pub topic_id: String,
    pub thread_id: String,
    pub version: u32,
    pub content: String,
    pub source_message_ids: Vec<String>,
    pub evolution_note: String,
    pub created_at: String,
    /// Computed lazily on first retrieval need; may be absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Payload for [`crate::ports::Persistence::create_insight`].
#[derive(Debug, Clone)]
pub struct NewInsight {
    pub insight_id: String,
    pub version: u32,
    pub content: String,
    pub source_message_ids: Vec<String>,
    pub evolution_note: String,
}

/// Index row for raw-message retrieval by thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedRow {
    pub message_id: String,
    pub topic_id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
}

/// Persisted per-session state: the last assembled insert block, so a
/// snapshot can reproduce context without re-running retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub insert_context_messages: Vec<RoleContent>,
    #[serde(default)]
    pub insert_context_updated_at: Option<String>,
}
