//! `saga-store` — SQLite implementation of the [`saga_core::Persistence`]
//! boundary.
//!
//! One table per collection, everything keyed by `(user_id, session_id)`.
//! A single connection behind a mutex is sufficient for the single-node
//! target; swap in a pool if that ever changes.

pub mod db;
pub mod store;

pub use store::SqliteStore;
