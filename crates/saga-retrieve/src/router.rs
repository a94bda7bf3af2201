use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use saga_core::config::MemoryConfig;
use saga_core::ports::LlmClient;

/// How many fallback keywords to extract from the raw need.
const FALLBACK_KEYWORD_CAP: usize = 6;
/// A routed cap may exceed the configured one by at most this factor;
/// a malformed plan must not turn retrieval into a full-store scan.
const ROUTED_CAP_FACTOR: usize = 4;

/// Retrieval hints derived from a natural-language need.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryRoute {
    pub keywords: Vec<String>,
    pub include_raw: bool,
    pub max_threads: usize,
    pub max_raw_messages: usize,
    pub scope: String,
}

/// Converts a memory need ("what does the party know about the citadel?")
/// into a [`MemoryRoute`]. Never fails: when the LLM is unreachable or
/// returns garbage, keywords are extracted lexically and the configured caps
/// apply.
pub struct MemoryRouter {
    llm: Arc<dyn LlmClient>,
    max_threads: usize,
    max_raw_messages: usize,
}

impl MemoryRouter {
    pub fn new(llm: Arc<dyn LlmClient>, config: &MemoryConfig) -> Self {
        Self {
            llm,
            max_threads: config.max_threads,
            max_raw_messages: config.max_raw_messages,
        }
    }

    pub async fn route(&self, need: &str) -> MemoryRoute {
        let prompt = format!(
            "You are a memory router. Convert the request into JSON only.\n\n\
             Request:\n{need}\n\n\
             Return JSON:\n\
             {{\n\
               \"keywords\": [\"keyword1\", \"keyword2\"],\n\
               \"include_raw\": true,\n\
               \"max_threads\": {},\n\
               \"max_raw_messages\": {},\n\
               \"scope\": \"current_session\"\n\
             }}",
            self.max_threads, self.max_raw_messages
        );

        let value = match self.llm.generate_json(&prompt).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!("router response unparsable, using fallback route");
                return self.fallback(need);
            }
            Err(e) => {
                debug!(error = %e, "router call failed, using fallback route");
                return self.fallback(need);
            }
        };

        let Some(obj) = value.as_object() else {
            return self.fallback(need);
        };

        let keywords = {
            let normalized = normalize_keywords(obj.get("keywords"));
            if normalized.is_empty() {
                fallback_keywords(need)
            } else {
                normalized
            }
        };
        let cap = |value: Option<&serde_json::Value>, configured: usize| -> usize {
            let routed = value
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(configured);
            routed.min(configured * ROUTED_CAP_FACTOR)
        };

        MemoryRoute {
            keywords,
            include_raw: obj
                .get("include_raw")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            max_threads: cap(obj.get("max_threads"), self.max_threads),
            max_raw_messages: cap(obj.get("max_raw_messages"), self.max_raw_messages),
            scope: obj
                .get("scope")
                .and_then(|v| v.as_str())
                .unwrap_or("current_session")
                .to_string(),
        }
    }

    fn fallback(&self, need: &str) -> MemoryRoute {
        MemoryRoute {
            keywords: fallback_keywords(need),
            include_raw: true,
            max_threads: self.max_threads,
            max_raw_messages: self.max_raw_messages,
            scope: "current_session".to_string(),
        }
    }
}

/// Accept either an array of strings or one comma-separated string; trim
/// whitespace, drop empties.
fn normalize_keywords(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Lexical keyword extraction: alphanumeric runs of length >= 2, capped.
fn fallback_keywords(need: &str) -> Vec<String> {
    need.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .take(FALLBACK_KEYWORD_CAP)
        .map(str::to_string)
        .collect()
}
