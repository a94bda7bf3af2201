//! `saga-core` — shared types and interfaces for the saga memory orchestrator.
//!
//! Everything the other crates agree on lives here: the domain model
//! (messages, topics, threads, insights), the adapter traits for storage /
//! LLM / embeddings, the token counter that all budgeting goes through, and
//! the configuration surface.

pub mod config;
pub mod error;
pub mod ids;
pub mod ports;
pub mod retry;
pub mod token;
pub mod types;
pub mod vector;

pub use config::{MemoryConfig, SagaConfig};
pub use error::{EmbeddingError, LlmError, PersistenceError};
pub use ports::{EmbeddingClient, LlmClient, Persistence};
pub use token::TokenCounter;
pub use types::{ApiMessage, Role, RoleContent};
