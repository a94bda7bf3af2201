//! `saga-retrieve` — turning a natural-language memory need into ranked,
//! summarized memory.
//!
//! Two stages: the [`router::MemoryRouter`] converts the need into retrieval
//! hints (keywords, caps, flags), and the [`retriever::MemoryRetriever`]
//! ranks threads by a hybrid embedding + lexical score, gathers raw archived
//! messages, and produces a summary. Both degrade gracefully: with the LLM
//! and embedding service down, routing falls back to keyword extraction and
//! scoring falls back to lexical matching.

pub mod error;
pub mod retriever;
pub mod router;

pub use error::{Result, RetrieveError};
pub use retriever::{MemoryRetriever, Retrieval, ThreadCandidate};
pub use router::{MemoryRoute, MemoryRouter};
