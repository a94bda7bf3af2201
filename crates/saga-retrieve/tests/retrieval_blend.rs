// Retrieval against a real in-memory store: hybrid score ordering, lazy
// embedding write-back, raw-message caps, and full-degradation fallbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use saga_core::config::MemoryConfig;
use saga_core::error::{EmbeddingError, LlmError};
use saga_core::ports::{EmbeddingClient, LlmClient, Persistence};
use saga_core::types::{NewInsight, Role};
use saga_retrieve::{MemoryRetriever, MemoryRouter};
use saga_store::SqliteStore;

struct MockLlm {
    fail: AtomicBool,
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate_simple(&self, _prompt: &str) -> Result<String, LlmError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(LlmError::Transport("llm offline".to_string()))
        } else {
            Ok("A concise memory summary.".to_string())
        }
    }

    async fn generate_json(&self, _prompt: &str) -> Result<Option<serde_json::Value>, LlmError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(LlmError::Transport("llm offline".to_string()))
        } else {
            Ok(None)
        }
    }
}

/// Always returns the fixed query vector [1, 0].
struct MockEmbedding {
    fail: AtomicBool,
}

#[async_trait]
impl EmbeddingClient for MockEmbedding {
    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(EmbeddingError::Transport("embeddings offline".to_string()))
        } else {
            Ok(vec![1.0, 0.0])
        }
    }
}

fn clients() -> (Arc<MockLlm>, Arc<MockEmbedding>) {
    (
        Arc::new(MockLlm {
            fail: AtomicBool::new(false),
        }),
        Arc::new(MockEmbedding {
            fail: AtomicBool::new(false),
        }),
    )
}

/// Seed a topic with three threads whose stored insight embeddings give
/// cosine scores 0.9 / 0.3 / 0.1 against the query [1, 0], while only the
/// second thread matches the keyword "dragon" lexically.
async fn seed_three_threads(store: &SqliteStore) {
    store.create_topic("u", "s", "topic_1", "World lore").await.unwrap();
    let specs = [
        ("thread_1", "Sunken citadel", [0.9f32, 0.435_889_87]),
        ("thread_2", "Elder dragon pact", [0.3f32, 0.953_939_2]),
        ("thread_3", "Harvest festival", [0.1f32, 0.994_987_44]),
    ];
    for (thread_id, title, embedding) in specs {
        store
            .create_thread("u", "s", "topic_1", thread_id, title)
            .await
            .unwrap();
        store
            .create_insight(
                "u",
                "s",
                "topic_1",
                thread_id,
                &NewInsight {
                    insight_id: format!("insight_{thread_id}"),
                    version: 1,
                    content: format!("Notes about {title}"),
                    source_message_ids: vec![],
                    evolution_note: "initial".to_string(),
                },
            )
            .await
            .unwrap();
        store
            .update_insight_embedding("u", "s", "topic_1", thread_id, &format!("insight_{thread_id}"), &embedding)
            .await
            .unwrap();
    }
}

fn route_with(keywords: &[&str], max_threads: usize, include_raw: bool) -> saga_retrieve::MemoryRoute {
    saga_retrieve::MemoryRoute {
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        include_raw,
        max_threads,
        max_raw_messages: 10,
        scope: "current_session".to_string(),
    }
}

#[tokio::test]
async fn hybrid_blend_orders_threads_by_cosine_plus_lexical() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seed_three_threads(&store).await;
    let (llm, embedding) = clients();
    let retriever = MemoryRetriever::new(store.clone(), llm, embedding);

    let result = retriever
        .retrieve("u", "s", &route_with(&["dragon"], 2, false))
        .await
        .unwrap();

    // thread_1: 0.9 + 0.0, thread_2: 0.3 + 0.1, thread_3: 0.1 (dropped).
    assert_eq!(result.matched_threads, vec!["thread_1", "thread_2"]);
    assert!((result.thread_scores["thread_1"] - 0.9).abs() < 1e-6);
    assert!((result.thread_scores["thread_2"] - 0.4).abs() < 1e-6);
    assert_eq!(result.summary, "A concise memory summary.");
}

#[tokio::test]
async fn missing_insight_embedding_is_computed_and_written_back() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.create_topic("u", "s", "topic_1", "World lore").await.unwrap();
    store
        .create_thread("u", "s", "topic_1", "thread_1", "Sunken citadel")
        .await
        .unwrap();
    store
        .create_insight(
            "u",
            "s",
            "topic_1",
            "thread_1",
            &NewInsight {
                insight_id: "insight_1".to_string(),
                version: 1,
                content: "The citadel sank beneath the lake.".to_string(),
                source_message_ids: vec![],
                evolution_note: "initial".to_string(),
            },
        )
        .await
        .unwrap();

    let (llm, embedding) = clients();
    let retriever = MemoryRetriever::new(store.clone(), llm, embedding);
    let result = retriever
        .retrieve("u", "s", &route_with(&["citadel"], 3, false))
        .await
        .unwrap();
    assert_eq!(result.matched_threads, vec!["thread_1"]);

    let insight = store
        .get_latest_insight("u", "s", "topic_1", "thread_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(insight.embedding, Some(vec![1.0, 0.0]));
}

#[tokio::test]
async fn max_threads_zero_returns_no_matching_memory() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seed_three_threads(&store).await;
    let (llm, embedding) = clients();
    let retriever = MemoryRetriever::new(store.clone(), llm, embedding);

    let result = retriever
        .retrieve("u", "s", &route_with(&["dragon"], 0, true))
        .await
        .unwrap();
    assert!(result.matched_threads.is_empty());
    assert_eq!(result.summary, "No matching memory found.");
    assert!(result.raw_messages.is_empty());
}

#[tokio::test]
async fn empty_keywords_fall_back_to_lexical_zero() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seed_three_threads(&store).await;
    let (llm, embedding) = clients();
    embedding.fail.store(true, Ordering::SeqCst);
    let retriever = MemoryRetriever::new(store.clone(), llm, embedding);

    let result = retriever
        .retrieve("u", "s", &route_with(&[], 2, false))
        .await
        .unwrap();
    // No keywords, no embeddings: all scores are 0, selection keeps
    // insertion order deterministically.
    assert_eq!(result.matched_threads, vec!["thread_1", "thread_2"]);
    assert!(result.thread_scores.values().all(|s| *s == 0.0));
}

#[tokio::test]
async fn raw_messages_are_gathered_per_thread_up_to_the_cap() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seed_three_threads(&store).await;
    for i in 0..4 {
        store
            .save_archived_message(
                "u",
                "s",
                &format!("msg_{i}"),
                "topic_1",
                "thread_1",
                Role::User,
                &format!("archived {i}"),
            )
            .await
            .unwrap();
    }

    let (llm, embedding) = clients();
    let retriever = MemoryRetriever::new(store.clone(), llm, embedding);
    let mut route = route_with(&["dragon"], 2, true);
    route.max_raw_messages = 3;
    let result = retriever.retrieve("u", "s", &route).await.unwrap();

    assert_eq!(result.raw_messages.len(), 3);
    assert_eq!(result.raw_messages[0].message_id, "msg_0");
    assert_eq!(result.raw_messages[0].thread_id, "thread_1");
}

#[tokio::test]
async fn total_llm_failure_still_yields_summary_and_route() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seed_three_threads(&store).await;
    let (llm, embedding) = clients();
    llm.fail.store(true, Ordering::SeqCst);
    embedding.fail.store(true, Ordering::SeqCst);

    let config = MemoryConfig::default();
    let router = MemoryRouter::new(llm.clone(), &config);
    let route = router.route("what pact binds the elder dragon?").await;
    assert_eq!(route.keywords, vec!["what", "pact", "binds", "the", "elder", "dragon"]);
    assert!(route.include_raw);
    assert_eq!(route.max_threads, config.max_threads);

    let retriever = MemoryRetriever::new(store.clone(), llm, embedding);
    let result = retriever.retrieve("u", "s", &route).await.unwrap();
    // Lexical-only scoring: thread_2 mentions "dragon" in its title.
    assert_eq!(result.matched_threads[0], "thread_2");
    // Summary degrades to the concatenation of the selected threads.
    assert!(result.summary.contains("Topic: World lore"));
    assert!(result.summary.contains("Thread: Elder dragon pact"));
}
