//! `saga-stream` — per-session append-only message log with a bounded
//! active window.
//!
//! The stream never drops messages; it partitions them. The *active window*
//! is the maximal suffix whose token sum fits the configured budget and is
//! the only part passed verbatim to the LLM. Everything older is *overflow*,
//! which the archiver distills into topics, threads, and insights.

pub mod error;
pub mod stream;

pub use error::{Result, StreamError};
pub use stream::{MessageStream, StreamStats};
