//! Insert-block assembly under a hard token budget.
//!
//! Sections are an ordered list run through a single packer; there is no
//! per-section logic. When a section does not fit, its content is truncated
//! to the remaining budget and packing stops.

use saga_core::token::TokenCounter;
use saga_core::types::{ArchivedRow, RoleContent};

struct Section {
    title: &'static str,
    content: String,
}

/// Build the insert block from retrieval output. Empty inputs skip their
/// section; the result's total token count never exceeds `budget_tokens`.
pub fn build_insert_messages(
    counter: &TokenCounter,
    topic_summaries: &str,
    memory_summary: &str,
    raw_messages: &[ArchivedRow],
    budget_tokens: usize,
) -> Vec<RoleContent> {
    let mut sections = Vec::new();
    if !topic_summaries.is_empty() {
        sections.push(Section {
            title: "Current Session Topics",
            content: topic_summaries.to_string(),
        });
    }
    if !memory_summary.is_empty() {
        sections.push(Section {
            title: "Retrieved Memory Summary",
            content: memory_summary.to_string(),
        });
    }
    if !raw_messages.is_empty() {
        let formatted: Vec<String> = raw_messages
            .iter()
            .map(|m| format!("[{}] {}: {}", m.message_id, m.role, m.content))
            .collect();
        sections.push(Section {
            title: "Retrieved Raw Messages",
            content: formatted.join("\n"),
        });
    }
    pack_sections(counter, sections, budget_tokens)
}

fn pack_sections(
    counter: &TokenCounter,
    sections: Vec<Section>,
    budget_tokens: usize,
) -> Vec<RoleContent> {
    let mut messages = Vec::new();
    let mut used = 0;
    for Section { title, content } in sections {
        let section_text = format!("## {title}\n{content}");
        let section_tokens = counter.count(&section_text);
        if used + section_tokens > budget_tokens {
            let header_tokens = counter.count(&format!("## {title}\n"));
            let available = budget_tokens.saturating_sub(used + header_tokens);
            if available == 0 {
                break;
            }
            let truncated = counter.truncate_to_tokens(&content, available);
            messages.push(RoleContent::system(format!("## {title}\n{truncated}")));
            break;
        }
        messages.push(RoleContent::system(section_text));
        used += section_tokens;
        if used >= budget_tokens {
            break;
        }
    }
    messages
}

/// Re-trim a previously built insert block to a (possibly smaller) budget.
/// Used on the snapshot path. Returns the trimmed block and its token total.
pub fn trim_insert_messages(
    counter: &TokenCounter,
    messages: &[RoleContent],
    budget_tokens: usize,
) -> (Vec<RoleContent>, usize) {
    let mut trimmed = Vec::new();
    let mut used = 0;
    for msg in messages {
        let mut content = msg.content.clone();
        let mut tokens = counter.count(&content);
        if used + tokens > budget_tokens {
            let available = budget_tokens.saturating_sub(used);
            if available == 0 {
                break;
            }
            content = counter.truncate_to_tokens(&content, available);
            tokens = counter.count(&content);
        }
        trimmed.push(RoleContent {
            role: msg.role,
            content,
        });
        used += tokens;
        if used >= budget_tokens {
            break;
        }
    }
    (trimmed, used)
}
