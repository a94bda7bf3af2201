//! `saga-archive` — background distillation of stream overflow.
//!
//! When a session's stream outgrows its token window, the overflow is
//! classified into a Topic → Thread hierarchy and condensed into a new
//! Insight version. Archival never runs on the request path: the
//! [`scheduler::ArchiveScheduler`] coalesces requests so each session has at
//! most one run in flight, with a pending flag that triggers exactly one
//! follow-up run for anything that arrived meanwhile.

pub mod archiver;
pub mod error;
pub mod scheduler;

use std::sync::Arc;

use saga_stream::MessageStream;

/// A session's live stream, shared between the request path and the detached
/// archival task.
pub type SharedStream = Arc<tokio::sync::Mutex<MessageStream>>;

pub use archiver::{ArchiveOutcome, ArchiveRunner, TruncateArchiver};
pub use error::{ArchiveError, Result};
pub use scheduler::ArchiveScheduler;
