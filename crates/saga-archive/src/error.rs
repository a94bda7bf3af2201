use thiserror::Error;

use saga_core::error::PersistenceError;

/// Archival failure. LLM trouble never surfaces here (classification,
/// insight extraction, and summaries all degrade to fallbacks), so the only
/// hard failures are storage ones.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive storage error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
