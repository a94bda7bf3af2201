use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use saga_core::ports::{EmbeddingClient, LlmClient, Persistence};
use saga_core::retry::retry_once;
use saga_core::types::{ArchivedRow, InsightRow};
use saga_core::vector::cosine_similarity;

use crate::error::Result;
use crate::router::MemoryRoute;

/// Weight of the lexical component when an embedding score is available.
const LEXICAL_BLEND_WEIGHT: f64 = 0.1;

/// One scored `(topic, thread)` candidate.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadCandidate {
    pub topic_id: String,
    pub topic_title: String,
    pub thread_id: String,
    pub thread_title: String,
    pub thread_summary: String,
    pub latest_insight: Option<InsightRow>,
    pub score: f64,
}

/// Outcome of one retrieval pass.
#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    pub matched_threads: Vec<String>,
    pub thread_scores: HashMap<String, f64>,
    pub summary: String,
    pub raw_messages: Vec<ArchivedRow>,
    pub threads: Vec<ThreadCandidate>,
}

/// Ranks threads against a route and distills the winners.
///
/// Scoring is hybrid: cosine similarity between the query embedding and the
/// thread's latest-insight embedding, blended with a lexical keyword-hit
/// ratio. Insight embeddings are computed lazily (only for threads being
/// scored right now) and written back best-effort.
pub struct MemoryRetriever {
    persistence: Arc<dyn Persistence>,
    llm: Arc<dyn LlmClient>,
    embedding: Arc<dyn EmbeddingClient>,
}

impl MemoryRetriever {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        llm: Arc<dyn LlmClient>,
        embedding: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            persistence,
            llm,
            embedding,
        }
    }

    pub async fn retrieve(
        &self,
        user: &str,
        session: &str,
        route: &MemoryRoute,
    ) -> Result<Retrieval> {
        let query_embedding = self.embed_query(&route.keywords).await;

        let topics = retry_once(|| self.persistence.get_all_topics(user, session)).await?;
        let mut candidates: Vec<ThreadCandidate> = Vec::new();
        for topic in &topics {
            let threads = retry_once(|| {
                self.persistence
                    .get_topic_threads(user, session, &topic.topic_id)
            })
            .await?;
            for thread in threads {
                let latest_insight = retry_once(|| {
                    self.persistence.get_latest_insight(
                        user,
                        session,
                        &topic.topic_id,
                        &thread.thread_id,
                    )
                })
                .await?;

                let latest_insight = match latest_insight {
                    Some(insight) => Some(
                        self.ensure_embedding(user, session, &topic.topic_id, &thread.thread_id, insight)
                            .await,
                    ),
                    None => None,
                };

                let insight_content = latest_insight
                    .as_ref()
                    .map(|i| i.content.as_str())
                    .unwrap_or_default();
                let insight_embedding = latest_insight.as_ref().and_then(|i| i.embedding.as_deref());

                let score = score_thread(
                    &route.keywords,
                    &thread.title,
                    &thread.summary,
                    insight_content,
                    query_embedding.as_deref(),
                    insight_embedding,
                );

                candidates.push(ThreadCandidate {
                    topic_id: topic.topic_id.clone(),
                    topic_title: topic.title.clone(),
                    thread_id: thread.thread_id.clone(),
                    thread_title: thread.title,
                    thread_summary: thread.summary,
                    latest_insight,
                    score,
                });
            }
        }

        // Stable sort: equal scores keep their insertion order, so results
        // are deterministic run to run.
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        candidates.truncate(route.max_threads);

        let raw_messages = if route.include_raw {
            self.load_raw_messages(user, session, &candidates, route.max_raw_messages)
                .await?
        } else {
            Vec::new()
        };

        let summary = self.summarize_threads(&route.keywords, &candidates).await;

        Ok(Retrieval {
            matched_threads: candidates.iter().map(|c| c.thread_id.clone()).collect(),
            thread_scores: candidates
                .iter()
                .map(|c| (c.thread_id.clone(), c.score))
                .collect(),
            summary,
            raw_messages,
            threads: candidates,
        })
    }

    /// Embed the joined keywords. Empty keyword sets skip the call; failures
    /// degrade to lexical-only scoring.
    async fn embed_query(&self, keywords: &[String]) -> Option<Vec<f32>> {
        let query = keywords.join(" ");
        if query.is_empty() {
            return None;
        }
        match self.embedding.embed_text(&query).await {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "query embedding failed, falling back to lexical scoring");
                None
            }
        }
    }

    /// Make sure a scored insight carries an embedding, computing and
    /// writing it back when absent. Both steps are best effort.
    async fn ensure_embedding(
        &self,
        user: &str,
        session: &str,
        topic_id: &str,
        thread_id: &str,
        mut insight: InsightRow,
    ) -> InsightRow {
        if insight.embedding.is_some() || insight.content.is_empty() {
            return insight;
        }
        let vector = match self.embedding.embed_text(&insight.content).await {
            Ok(vector) if !vector.is_empty() => vector,
            Ok(_) => return insight,
            Err(e) => {
                debug!(error = %e, thread = %thread_id, "insight embedding failed");
                return insight;
            }
        };
        if let Err(e) = self
            .persistence
            .update_insight_embedding(user, session, topic_id, thread_id, &insight.insight_id, &vector)
            .await
        {
            debug!(error = %e, thread = %thread_id, "embedding write-back failed");
        }
        insight.embedding = Some(vector);
        insight
    }

    async fn load_raw_messages(
        &self,
        user: &str,
        session: &str,
        threads: &[ThreadCandidate],
        limit: usize,
    ) -> Result<Vec<ArchivedRow>> {
        let mut raw = Vec::new();
        if limit == 0 {
            return Ok(raw);
        }
        for thread in threads {
            let archived = retry_once(|| {
                self.persistence
                    .get_archived_messages_by_thread(user, session, &thread.thread_id)
            })
            .await?;
            for msg in archived {
                raw.push(msg);
                if raw.len() >= limit {
                    return Ok(raw);
                }
            }
        }
        Ok(raw)
    }

    async fn summarize_threads(&self, keywords: &[String], threads: &[ThreadCandidate]) -> String {
        if threads.is_empty() {
            return "No matching memory found.".to_string();
        }

        let parts: Vec<String> = threads
            .iter()
            .map(|t| {
                format!(
                    "Topic: {}\nThread: {}\nSummary: {}\nInsight: {}",
                    t.topic_title,
                    t.thread_title,
                    t.thread_summary,
                    t.latest_insight
                        .as_ref()
                        .map(|i| i.content.as_str())
                        .unwrap_or_default(),
                )
            })
            .collect();

        let prompt = format!(
            "Summarize the following memory for the user request.\n\
             Keywords: {}\n\n\
             Memory:\n{}\n\n\
             Return a concise summary.",
            keywords.join(", "),
            parts.join("\n\n")
        );

        match self.llm.generate_simple(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => parts.join("\n"),
            Err(e) => {
                warn!(error = %e, "memory summary failed, returning concatenation");
                parts.join("\n")
            }
        }
    }
}

/// Hybrid score: cosine + 0.1 × lexical when both embeddings exist, plain
/// lexical otherwise. Degenerate cosine inputs score 0.0 rather than erroring.
fn score_thread(
    keywords: &[String],
    thread_title: &str,
    thread_summary: &str,
    insight_content: &str,
    query_embedding: Option<&[f32]>,
    insight_embedding: Option<&[f32]>,
) -> f64 {
    let haystack = format!("{thread_title} {thread_summary} {insight_content}");
    let lexical = lexical_score(keywords, &haystack);
    match (query_embedding, insight_embedding) {
        (Some(query), Some(insight)) => {
            cosine_similarity(query, insight) + lexical * LEXICAL_BLEND_WEIGHT
        }
        _ => lexical,
    }
}

/// Fraction of keywords present (case-insensitively) in `text`.
fn lexical_score(keywords: &[String], text: &str) -> f64 {
    if keywords.is_empty() || text.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = keywords
        .iter()
        .filter(|kw| lower.contains(&kw.to_lowercase()))
        .count();
    hits as f64 / keywords.len().max(1) as f64
}
