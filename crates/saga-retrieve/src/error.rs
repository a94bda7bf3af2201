use thiserror::Error;

use saga_core::error::PersistenceError;

/// Retrieval failure. Embedding and LLM trouble never surface here (both
/// have lexical / concatenation fallbacks), so only storage errors remain.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("retrieval storage error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, RetrieveError>;
