use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use saga_core::ids;
use saga_core::ports::{LlmClient, Persistence};
use saga_core::types::{ApiMessage, NewInsight, ThreadRow, TopicRow};

use crate::error::Result;
use crate::SharedStream;

/// Per-message content cap inside classification prompts. Storage and
/// insight extraction always see the full content.
const CLASSIFY_CONTENT_CHARS: usize = 500;
/// Fallback-summary cap: first user message, clipped.
const FALLBACK_SUMMARY_CHARS: usize = 200;
/// Stored thread summaries are clipped to this many chars.
const THREAD_SUMMARY_CHARS: usize = 100;

/// What one archive run produced.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub archived_message_ids: Vec<String>,
    pub topic_id: String,
    pub thread_id: String,
    pub insight_id: String,
    pub insight_version: u32,
}

#[derive(Debug)]
struct Classification {
    topic_id: String,
    topic_title: String,
    thread_id: String,
    thread_title: String,
    is_new_topic: bool,
    is_new_thread: bool,
}

/// Something the scheduler can drive. [`TruncateArchiver`] is the production
/// implementation; tests substitute counting stubs.
#[async_trait]
pub trait ArchiveRunner: Send + Sync {
    async fn run(
        &self,
        stream: &SharedStream,
        user: &str,
        session: &str,
    ) -> Result<Option<ArchiveOutcome>>;
}

/// Consumes a stream's unarchived overflow: classifies it into the
/// Topic → Thread hierarchy, appends a new Insight version, indexes the raw
/// messages, and marks everything archived.
///
/// The stream lock is held only to read the overflow snapshot and to mark
/// IDs afterwards, never across an LLM call.
pub struct TruncateArchiver {
    persistence: Arc<dyn Persistence>,
    llm: Arc<dyn LlmClient>,
}

impl TruncateArchiver {
    pub fn new(persistence: Arc<dyn Persistence>, llm: Arc<dyn LlmClient>) -> Self {
        Self { persistence, llm }
    }

    /// Archive whatever overflow the stream currently has. Returns `None`
    /// when there is nothing to do.
    pub async fn process(
        &self,
        stream: &SharedStream,
        user: &str,
        session: &str,
    ) -> Result<Option<ArchiveOutcome>> {
        let overflow = { stream.lock().await.unarchived_overflow() };
        if overflow.is_empty() {
            return Ok(None);
        }

        // A crash between persisting marks and updating the in-memory set
        // can leave messages that look unarchived locally but are already
        // archived durably. Filter them out before spending LLM calls.
        let mut batch = Vec::with_capacity(overflow.len());
        for msg in overflow {
            if !self
                .persistence
                .is_message_archived(user, session, &msg.message_id)
                .await?
            {
                batch.push(msg);
            }
        }
        if batch.is_empty() {
            return Ok(None);
        }

        let classification = self.classify(&batch, user, session).await?;

        if classification.is_new_topic {
            self.persistence
                .create_topic(
                    user,
                    session,
                    &classification.topic_id,
                    &classification.topic_title,
                )
                .await?;
        }
        if classification.is_new_thread {
            self.persistence
                .create_thread(
                    user,
                    session,
                    &classification.topic_id,
                    &classification.thread_id,
                    &classification.thread_title,
                )
                .await?;
        }

        let existing = self
            .persistence
            .get_thread_insights(
                user,
                session,
                &classification.topic_id,
                &classification.thread_id,
            )
            .await?;
        let version = existing.len() as u32 + 1;
        let content = self.extract_insight(&batch).await;
        let evolution_note = match existing.last() {
            Some(previous) => self.generate_evolution_note(&previous.content, &content).await,
            None => "initial".to_string(),
        };

        let insight_id = ids::insight_id();
        let message_ids: Vec<String> = batch.iter().map(|m| m.message_id.clone()).collect();
        self.persistence
            .create_insight(
                user,
                session,
                &classification.topic_id,
                &classification.thread_id,
                &NewInsight {
                    insight_id: insight_id.clone(),
                    version,
                    content,
                    source_message_ids: message_ids.clone(),
                    evolution_note,
                },
            )
            .await?;

        for msg in &batch {
            self.persistence
                .save_archived_message(
                    user,
                    session,
                    &msg.message_id,
                    &classification.topic_id,
                    &classification.thread_id,
                    msg.role,
                    &msg.content,
                )
                .await?;
        }

        self.persistence
            .mark_messages_archived(
                user,
                session,
                &message_ids,
                &classification.topic_id,
                &classification.thread_id,
            )
            .await?;
        stream.lock().await.mark_archived(message_ids.iter().cloned());

        // Summary refresh is cosmetic; a failure here must not undo the
        // archive that already happened.
        self.refresh_thread_summary(
            user,
            session,
            &classification.topic_id,
            &classification.thread_id,
        )
        .await;

        info!(
            session = %session,
            topic = %classification.topic_id,
            thread = %classification.thread_id,
            version,
            messages = message_ids.len(),
            "archived overflow batch"
        );

        Ok(Some(ArchiveOutcome {
            archived_message_ids: message_ids,
            topic_id: classification.topic_id,
            thread_id: classification.thread_id,
            insight_id,
            insight_version: version,
        }))
    }

    async fn classify(
        &self,
        messages: &[ApiMessage],
        user: &str,
        session: &str,
    ) -> Result<Classification> {
        let topics = self.persistence.get_all_topics(user, session).await?;
        let mut topics_with_threads = Vec::with_capacity(topics.len());
        for topic in topics {
            let threads = self
                .persistence
                .get_topic_threads(user, session, &topic.topic_id)
                .await?;
            topics_with_threads.push((topic, threads));
        }

        let prompt = build_classification_prompt(messages, &topics_with_threads);
        let raw = match self.llm.classify_for_archive(&prompt).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, session = %session, "classification call failed, using fallback");
                None
            }
        };

        let mut classification = parse_classification(raw).unwrap_or_else(|| {
            debug!(session = %session, "classification unparsable, using fallback");
            fallback_classification()
        });
        if classification.topic_id.is_empty() {
            classification.topic_id = ids::topic_id();
        }
        if classification.thread_id.is_empty() {
            classification.thread_id = ids::thread_id();
        }
        Ok(classification)
    }

    async fn extract_insight(&self, messages: &[ApiMessage]) -> String {
        let transcript: String = messages
            .iter()
            .map(|m| format!("[{}]: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Extract the key insights from this conversation:\n\n{transcript}\n\n\
             Summarize:\n\
             1. The main content discussed\n\
             2. Conclusions or shared understanding reached\n\
             3. Key knowledge points\n\
             4. The user's open questions or concerns\n\n\
             Answer in concise Markdown."
        );

        match self.llm.generate_simple(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => simple_summary(messages),
            Err(e) => {
                warn!(error = %e, "insight extraction failed, using trivial summary");
                simple_summary(messages)
            }
        }
    }

    async fn generate_evolution_note(&self, previous: &str, current: &str) -> String {
        let prompt = format!(
            "Compare these two versions of an understanding and state briefly what changed:\n\n\
             ## Previous understanding\n{previous}\n\n\
             ## Current understanding\n{current}\n\n\
             In one or two sentences, describe how the understanding evolved \
             (e.g. deepened, corrected an earlier mistake, expanded into a new area):"
        );
        match self.llm.generate_simple(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => "Understanding updated.".to_string(),
        }
    }

    /// Regenerate the thread summary from all insight versions. Best effort:
    /// any failure is logged and swallowed, the archive itself stands.
    async fn refresh_thread_summary(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
    ) {
        let insights = match self
            .persistence
            .get_thread_insights(user, session, topic_id, thread_id)
            .await
        {
            Ok(insights) if !insights.is_empty() => insights,
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, thread = %thread_id, "summary refresh: insight load failed");
                return;
            }
        };

        let insights_text: String = insights
            .iter()
            .map(|i| format!("### Version {}\n{}", i.version, i.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Based on these insight versions, write one short thread summary \
             (under 100 characters):\n\n{insights_text}\n\nSummary:"
        );

        let summary = match self.llm.generate_simple(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, thread = %thread_id, "summary refresh: generation failed");
                return;
            }
        };
        let clipped: String = summary.trim().chars().take(THREAD_SUMMARY_CHARS).collect();
        if let Err(e) = self
            .persistence
            .update_thread_summary(user, session, topic_id, thread_id, &clipped)
            .await
        {
            warn!(error = %e, thread = %thread_id, "summary refresh: store failed");
        }
    }
}

#[async_trait]
impl ArchiveRunner for TruncateArchiver {
    async fn run(
        &self,
        stream: &SharedStream,
        user: &str,
        session: &str,
    ) -> Result<Option<ArchiveOutcome>> {
        self.process(stream, user, session).await
    }
}

fn build_classification_prompt(
    messages: &[ApiMessage],
    topics_with_threads: &[(TopicRow, Vec<ThreadRow>)],
) -> String {
    let topics_desc = if topics_with_threads.is_empty() {
        "None (this is the first archive for the session)".to_string()
    } else {
        topics_with_threads
            .iter()
            .map(|(topic, threads)| {
                let mut desc = format!(
                    "- {} (ID: {}): {}",
                    topic.title, topic.topic_id, topic.summary
                );
                for thread in threads {
                    desc.push_str(&format!(
                        "\n    - {} (ID: {})",
                        thread.title, thread.thread_id
                    ));
                }
                desc
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let messages_text: String = messages
        .iter()
        .map(|m| format!("[{}]: {}", m.role, clip_chars(&m.content, CLASSIFY_CONTENT_CHARS)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze the conversation below and decide its topic and thread.\n\n\
         ## Existing topics and threads\n{topics_desc}\n\n\
         ## Conversation to classify\n{messages_text}\n\n\
         ## Rules\n\
         1. If the conversation belongs to an existing topic, use that topic's ID.\n\
         2. If it belongs to an existing thread under that topic, use that thread's ID.\n\
         3. For a brand-new topic or thread, set the matching is_new_* flag to true.\n\
         4. Topics are broad categories; threads are specific discussion points.\n\n\
         Return JSON only (no other text):\n\
         {{\n\
             \"topic_id\": \"existing topic ID, or null for a new topic\",\n\
             \"topic_title\": \"topic title\",\n\
             \"thread_id\": \"existing thread ID, or null for a new thread\",\n\
             \"thread_title\": \"thread title\",\n\
             \"is_new_topic\": true or false,\n\
             \"is_new_thread\": true or false\n\
         }}"
    )
}

fn parse_classification(value: Option<serde_json::Value>) -> Option<Classification> {
    let obj = value?;
    let obj = obj.as_object()?;
    let str_field = |key: &str| -> String {
        obj.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    Some(Classification {
        topic_id: str_field("topic_id"),
        topic_title: {
            let title = str_field("topic_title");
            if title.is_empty() {
                "Unclassified".to_string()
            } else {
                title
            }
        },
        thread_id: str_field("thread_id"),
        thread_title: {
            let title = str_field("thread_title");
            if title.is_empty() {
                "General".to_string()
            } else {
                title
            }
        },
        is_new_topic: obj.get("is_new_topic").and_then(|v| v.as_bool()).unwrap_or(true),
        is_new_thread: obj.get("is_new_thread").and_then(|v| v.as_bool()).unwrap_or(true),
    })
}

fn fallback_classification() -> Classification {
    Classification {
        topic_id: String::new(),
        topic_title: "Unclassified".to_string(),
        thread_id: String::new(),
        thread_title: "General".to_string(),
        is_new_topic: true,
        is_new_thread: true,
    }
}

fn simple_summary(messages: &[ApiMessage]) -> String {
    let first_user = messages
        .iter()
        .find(|m| m.role == saga_core::types::Role::User);
    match first_user {
        Some(msg) => format!(
            "User discussed: {}...",
            msg.content
                .chars()
                .take(FALLBACK_SUMMARY_CHARS)
                .collect::<String>()
        ),
        None => "Conversation log".to_string(),
    }
}

fn clip_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(max_chars).collect();
        format!("{clipped}...")
    }
}
