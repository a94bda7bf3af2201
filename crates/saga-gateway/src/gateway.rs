use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use saga_archive::{ArchiveScheduler, TruncateArchiver};
use saga_core::config::MemoryConfig;
use saga_core::ids;
use saga_core::ports::{EmbeddingClient, LlmClient, Persistence};
use saga_core::retry::retry_once;
use saga_core::token::TokenCounter;
use saga_core::types::{ApiMessage, ArchivedRow, NewMessage, Role, RoleContent};
use saga_retrieve::{MemoryRetriever, MemoryRouter};
use saga_stream::StreamStats;

use crate::assemble;
use crate::error::Result;
use crate::store::SessionContextStore;

const SYSTEM_PROMPT: &str = "You are the main assistant. Use memory sections as supplemental \
     context. If memory conflicts with recent messages, prioritize the recent messages.";

/// One incoming message for `memory_commit`. Entries with an empty role or
/// content are dropped; an omitted ID gets a generated one.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Active-window message as exposed in snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct WindowMessage {
    pub message_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

/// Cross-session retrieval is not implemented; the stub shape is part of the
/// wire contract.
#[derive(Debug, Clone, Serialize)]
pub struct TodoStub {
    pub status: &'static str,
    pub data: Vec<serde_json::Value>,
}

impl Default for TodoStub {
    fn default() -> Self {
        Self {
            status: "todo",
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotContext {
    pub system_message: RoleContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_window_messages: Option<Vec<WindowMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<RoleContent>,
    pub current_session_topic_summaries: String,
    pub retrieved_memory_summary: String,
    pub retrieved_raw_messages: Vec<ArchivedRow>,
    pub other_sessions_topic_summaries: TodoStub,
}

/// Response of `session_snapshot` and `memory_request`.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub session_id: String,
    pub context: SnapshotContext,
    pub insert_messages: Vec<RoleContent>,
    pub assembled_messages: Vec<RoleContent>,
    pub trace: serde_json::Value,
}

/// Response of `memory_commit`.
#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    pub session_id: String,
    pub stored_message_ids: Vec<String>,
    pub stream_stats: StreamStats,
}

/// Public entry point. Owns the session cache, the router/retriever pair,
/// and the archive scheduler.
pub struct MemoryGateway {
    persistence: Arc<dyn Persistence>,
    store: Arc<SessionContextStore>,
    router: MemoryRouter,
    retriever: MemoryRetriever,
    scheduler: ArchiveScheduler,
    counter: TokenCounter,
    config: MemoryConfig,
}

impl MemoryGateway {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        llm: Arc<dyn LlmClient>,
        embedding: Arc<dyn EmbeddingClient>,
        config: MemoryConfig,
    ) -> Self {
        let counter = TokenCounter::default();
        let store = Arc::new(SessionContextStore::new(
            Arc::clone(&persistence),
            counter,
            Duration::from_secs(config.session_ttl_seconds),
            config.stream_load_limit,
        ));
        let archiver = Arc::new(TruncateArchiver::new(
            Arc::clone(&persistence),
            Arc::clone(&llm),
        ));
        let scheduler = ArchiveScheduler::new(archiver);
        let router = MemoryRouter::new(Arc::clone(&llm), &config);
        let retriever = MemoryRetriever::new(Arc::clone(&persistence), llm, embedding);
        Self {
            persistence,
            store,
            router,
            retriever,
            scheduler,
            counter,
            config,
        }
    }

    /// The session cache, exposed for hosts that want direct stream access.
    pub fn context_store(&self) -> &Arc<SessionContextStore> {
        &self.store
    }

    /// Reproduce the current context without re-running retrieval: cached
    /// insert block (trimmed to budget) plus the live active window.
    pub async fn session_snapshot(
        &self,
        user: &str,
        session: &str,
        window_tokens: Option<usize>,
        insert_budget_tokens: Option<usize>,
    ) -> Result<Snapshot> {
        let window_tokens = window_tokens.unwrap_or(self.config.window_tokens);
        let insert_budget = insert_budget_tokens.unwrap_or(self.config.insert_budget_tokens);

        let lock = self.store.session_lock(session);
        let (stream, insert_messages) = {
            let _guard = lock.lock().await;
            let stream = self.store.get_stream(user, session, window_tokens).await?;
            let insert_messages = self.store.get_insert_messages(user, session).await?;
            (stream, insert_messages)
        };

        let window = { stream.lock().await.active_window() };
        let current_window: Vec<WindowMessage> = window
            .iter()
            .map(|m| WindowMessage {
                message_id: m.message_id.clone(),
                role: m.role,
                content: m.content.clone(),
                timestamp: m.timestamp.to_rfc3339(),
            })
            .collect();
        let window_messages: Vec<RoleContent> = window
            .iter()
            .map(|m| RoleContent {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();

        let topic_summaries = self.build_topic_summaries(user, session).await?;
        let (insert_trimmed, insert_tokens) =
            assemble::trim_insert_messages(&self.counter, &insert_messages, insert_budget);

        let mut assembled = Vec::with_capacity(1 + insert_trimmed.len() + window_messages.len());
        assembled.push(RoleContent::system(SYSTEM_PROMPT));
        assembled.extend(insert_trimmed.iter().cloned());
        assembled.extend(window_messages);

        Ok(Snapshot {
            session_id: session.to_string(),
            context: SnapshotContext {
                system_message: RoleContent::system(SYSTEM_PROMPT),
                current_window_messages: Some(current_window.clone()),
                user_message: None,
                current_session_topic_summaries: topic_summaries,
                retrieved_memory_summary: String::new(),
                retrieved_raw_messages: Vec::new(),
                other_sessions_topic_summaries: TodoStub::default(),
            },
            insert_messages: insert_trimmed,
            assembled_messages: assembled,
            trace: json!({
                "window_tokens": window_tokens,
                "insert_budget_tokens": insert_budget,
                "insert_tokens": insert_tokens,
                "window_message_count": current_window.len(),
            }),
        })
    }

    /// Route a need, retrieve memory, build and persist a fresh insert
    /// block, and schedule archival.
    pub async fn memory_request(
        &self,
        user: &str,
        session: &str,
        need: &str,
        user_message: Option<&str>,
        window_tokens: Option<usize>,
        insert_budget_tokens: Option<usize>,
    ) -> Result<Snapshot> {
        let window_tokens = window_tokens.unwrap_or(self.config.window_tokens);
        let insert_budget = insert_budget_tokens.unwrap_or(self.config.insert_budget_tokens);

        // Retrieval and assembly run before the critical section; no LLM or
        // embedding call ever holds the session mutex.
        let route = self.router.route(need).await;
        let retrieval = self.retriever.retrieve(user, session, &route).await?;
        let topic_summaries = self.build_topic_summaries(user, session).await?;

        let insert_messages = assemble::build_insert_messages(
            &self.counter,
            &topic_summaries,
            &retrieval.summary,
            &retrieval.raw_messages,
            insert_budget,
        );

        let lock = self.store.session_lock(session);
        let stream = {
            let _guard = lock.lock().await;
            self.store
                .set_insert_messages(user, session, insert_messages.clone())
                .await?;
            self.store.get_stream(user, session, window_tokens).await?
        };
        self.scheduler.schedule(user, session, stream);

        let mut assembled = Vec::with_capacity(1 + insert_messages.len());
        assembled.push(RoleContent::system(SYSTEM_PROMPT));
        assembled.extend(insert_messages.iter().cloned());

        debug!(
            session = %session,
            matched = retrieval.matched_threads.len(),
            raw = retrieval.raw_messages.len(),
            "memory request assembled"
        );

        Ok(Snapshot {
            session_id: session.to_string(),
            context: SnapshotContext {
                system_message: RoleContent::system(SYSTEM_PROMPT),
                current_window_messages: None,
                user_message: user_message.map(|content| RoleContent {
                    role: Role::User,
                    content: content.to_string(),
                }),
                current_session_topic_summaries: topic_summaries,
                retrieved_memory_summary: retrieval.summary.clone(),
                retrieved_raw_messages: retrieval.raw_messages.clone(),
                other_sessions_topic_summaries: TodoStub::default(),
            },
            insert_messages,
            assembled_messages: assembled,
            trace: json!({
                "route": route,
                "matched_threads": retrieval.matched_threads,
                "thread_scores": retrieval.thread_scores,
                "window_tokens": window_tokens,
                "insert_budget_tokens": insert_budget,
            }),
        })
    }

    /// Append messages to the session. Idempotent per message ID; empty
    /// role/content entries are dropped. Archival is scheduled after the
    /// critical section.
    pub async fn memory_commit(
        &self,
        user: &str,
        session: &str,
        messages: Vec<CommitMessage>,
        window_tokens: Option<usize>,
    ) -> Result<CommitReport> {
        let window_tokens = window_tokens.unwrap_or(self.config.window_tokens);

        let lock = self.store.session_lock(session);
        let (stream, stored_ids, stats) = {
            let _guard = lock.lock().await;
            let stream = self.store.get_stream(user, session, window_tokens).await?;
            let mut stored_ids = Vec::new();
            {
                let mut live = stream.lock().await;
                for incoming in messages {
                    let Ok(role) = incoming.role.parse::<Role>() else {
                        debug!(role = %incoming.role, "dropping message with invalid role");
                        continue;
                    };
                    if incoming.content.is_empty() {
                        continue;
                    }
                    let message_id = incoming
                        .message_id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(ids::message_id);
                    if live.contains(&message_id) {
                        continue;
                    }
                    let existing = retry_once(|| {
                        self.persistence.get_message_by_id(user, session, &message_id)
                    })
                    .await?;
                    if existing.is_some() {
                        continue;
                    }

                    let msg = ApiMessage::new(
                        message_id.clone(),
                        role,
                        incoming.content,
                        &self.counter,
                    );
                    let record = NewMessage {
                        role: msg.role,
                        content: msg.content.clone(),
                        timestamp: msg.timestamp,
                        token_count: msg.token_count,
                    };
                    retry_once(|| {
                        self.persistence.add_message(user, session, &message_id, &record)
                    })
                    .await?;
                    live.append(msg)?;
                    stored_ids.push(message_id);
                }
            }
            retry_once(|| self.persistence.update_session_timestamp(user, session)).await?;
            let stats = stream.lock().await.stats();
            (stream, stored_ids, stats)
        };

        self.scheduler.schedule(user, session, stream);

        info!(
            session = %session,
            stored = stored_ids.len(),
            total_tokens = stats.total_tokens,
            has_overflow = stats.has_overflow,
            "commit complete"
        );

        Ok(CommitReport {
            session_id: session.to_string(),
            stored_message_ids: stored_ids,
            stream_stats: stats,
        })
    }

    /// Render every topic with its threads into the "Current Session Topics"
    /// block.
    async fn build_topic_summaries(&self, user: &str, session: &str) -> Result<String> {
        let topics = retry_once(|| self.persistence.get_all_topics(user, session)).await?;
        if topics.is_empty() {
            return Ok(String::new());
        }

        let mut blocks = Vec::with_capacity(topics.len());
        for topic in topics {
            let title = if topic.title.is_empty() {
                "Untitled"
            } else {
                topic.title.as_str()
            };
            let summary = if topic.summary.is_empty() {
                "None"
            } else {
                topic.summary.as_str()
            };
            let threads = retry_once(|| {
                self.persistence
                    .get_topic_threads(user, session, &topic.topic_id)
            })
            .await?;
            let thread_list: Vec<String> = threads
                .iter()
                .map(|t| format!("{} (ID: {})", t.title, t.thread_id))
                .collect();
            if thread_list.is_empty() {
                blocks.push(format!("### {title}\nSummary: {summary}"));
            } else {
                blocks.push(format!(
                    "### {title}\nThreads: {}\nSummary: {summary}",
                    thread_list.join(", ")
                ));
            }
        }
        Ok(blocks.join("\n\n"))
    }
}
