use std::collections::HashSet;

use serde::Serialize;

use saga_core::types::{ApiMessage, RoleContent};

use crate::error::{Result, StreamError};

/// Append-only message log for one session.
///
/// Maintains a running token total so window and overflow queries never
/// re-count content. Messages are immutable once appended; archival only
/// marks IDs, it never removes anything.
#[derive(Debug)]
pub struct MessageStream {
    session_id: String,
    window_budget: usize,
    messages: Vec<ApiMessage>,
    ids: HashSet<String>,
    total_tokens: usize,
    archived_ids: HashSet<String>,
}

/// Point-in-time stream statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub session_id: String,
    pub total_messages: usize,
    pub total_tokens: usize,
    pub active_window_messages: usize,
    pub active_window_tokens: usize,
    pub overflow_messages: usize,
    pub overflow_tokens: usize,
    pub archived_count: usize,
    pub has_overflow: bool,
    pub active_window_limit: usize,
}

impl MessageStream {
    pub fn new(session_id: impl Into<String>, window_budget: usize) -> Self {
        Self {
            session_id: session_id.into(),
            window_budget,
            messages: Vec::new(),
            ids: HashSet::new(),
            total_tokens: 0,
            archived_ids: HashSet::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn window_budget(&self) -> usize {
        self.window_budget
    }

    /// Re-apply a caller-supplied window override. Cached streams keep their
    /// message history but honour the budget of the current request.
    pub fn set_window_budget(&mut self, tokens: usize) {
        self.window_budget = tokens;
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.ids.contains(message_id)
    }

    pub fn get_message_by_id(&self, message_id: &str) -> Option<&ApiMessage> {
        if !self.ids.contains(message_id) {
            return None;
        }
        self.messages.iter().find(|m| m.message_id == message_id)
    }

    /// Append a message. O(1); fails only on a duplicate ID.
    pub fn append(&mut self, msg: ApiMessage) -> Result<()> {
        if !self.ids.insert(msg.message_id.clone()) {
            return Err(StreamError::DuplicateId {
                id: msg.message_id,
            });
        }
        self.total_tokens += msg.token_count;
        self.messages.push(msg);
        Ok(())
    }

    /// Defensive copy of the full stream.
    pub fn get_all(&self) -> Vec<ApiMessage> {
        self.messages.clone()
    }

    /// Index where the active window begins. Walks newest-to-oldest,
    /// stopping before the first message that would blow the budget, so the
    /// window is the maximal suffix under it.
    fn window_start(&self) -> usize {
        if self.total_tokens <= self.window_budget {
            return 0;
        }
        let mut accumulated = 0;
        let mut start = self.messages.len();
        for (i, msg) in self.messages.iter().enumerate().rev() {
            if accumulated + msg.token_count > self.window_budget {
                break;
            }
            accumulated += msg.token_count;
            start = i;
        }
        start
    }

    /// The maximal suffix whose token sum fits the window budget, in
    /// original order.
    pub fn active_window(&self) -> Vec<ApiMessage> {
        self.messages[self.window_start()..].to_vec()
    }

    pub fn active_window_tokens(&self) -> usize {
        self.messages[self.window_start()..]
            .iter()
            .map(|m| m.token_count)
            .sum()
    }

    /// The prefix that fell out of the active window. Together with the
    /// window this partitions the stream: disjoint, union = everything.
    pub fn overflow(&self) -> Vec<ApiMessage> {
        self.messages[..self.window_start()].to_vec()
    }

    pub fn overflow_tokens(&self) -> usize {
        self.messages[..self.window_start()]
            .iter()
            .map(|m| m.token_count)
            .sum()
    }

    pub fn has_overflow(&self) -> bool {
        self.total_tokens > self.window_budget
    }

    /// Overflow minus anything already marked archived: the archiver's
    /// work list.
    pub fn unarchived_overflow(&self) -> Vec<ApiMessage> {
        self.messages[..self.window_start()]
            .iter()
            .filter(|m| !self.archived_ids.contains(&m.message_id))
            .cloned()
            .collect()
    }

    /// Idempotent union into the archived set.
    pub fn mark_archived<I, S>(&mut self, message_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.archived_ids.extend(message_ids.into_iter().map(Into::into));
    }

    pub fn is_archived(&self, message_id: &str) -> bool {
        self.archived_ids.contains(message_id)
    }

    pub fn archived_count(&self) -> usize {
        self.archived_ids.len()
    }

    /// Active window as `{role, content}` pairs, ready for prompt assembly.
    pub fn to_api_format(&self) -> Vec<RoleContent> {
        self.messages[self.window_start()..]
            .iter()
            .map(|m| RoleContent {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    pub fn stats(&self) -> StreamStats {
        let start = self.window_start();
        let window = &self.messages[start..];
        let overflow = &self.messages[..start];
        StreamStats {
            session_id: self.session_id.clone(),
            total_messages: self.messages.len(),
            total_tokens: self.total_tokens,
            active_window_messages: window.len(),
            active_window_tokens: window.iter().map(|m| m.token_count).sum(),
            overflow_messages: overflow.len(),
            overflow_tokens: overflow.iter().map(|m| m.token_count).sum(),
            archived_count: self.archived_ids.len(),
            has_overflow: self.has_overflow(),
            active_window_limit: self.window_budget,
        }
    }
}
