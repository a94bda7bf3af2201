use thiserror::Error;

use saga_core::error::PersistenceError;
use saga_retrieve::RetrieveError;
use saga_stream::StreamError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway storage error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Retrieve(#[from] RetrieveError),

    /// A stream invariant broke on the request path. This is a bug, not a
    /// recoverable condition: the commit loop dedupes before appending.
    #[error("stream invariant violation: {0}")]
    Stream(#[from] StreamError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
