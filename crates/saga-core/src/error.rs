use thiserror::Error;

/// Failure at the durable-storage boundary.
///
/// Adapters map their native errors into these variants; the orchestrator
/// treats both as transient (one silent retry on the request path, logged and
/// swallowed in archival paths).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Database(String),
}

/// Failure at the LLM boundary. Parse failures are not errors: see
/// [`crate::ports::LlmClient::generate_json`], which returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm transport error: {0}")]
    Transport(String),
}

/// Failure at the embedding boundary. Callers fall back to lexical scoring.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding transport error: {0}")]
    Transport(String),
}

/// Configuration could not be loaded or parsed.
#[derive(Debug, Error)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);
