use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Appending an ID the stream already holds is a programming error, not
    /// a recoverable condition. Commit paths must dedupe before appending.
    #[error("duplicate message id: {id}")]
    DuplicateId { id: String },
}

pub type Result<T> = std::result::Result<T, StreamError>;
