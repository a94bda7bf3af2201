//! Deterministic token counting.
//!
//! The orchestrator never sees raw tokenizer output from a model; it budgets
//! text itself. All counting, truncation, and window math goes through a
//! single [`TokenCounter`] instance so the active window, the insert block,
//! and the assembler always agree on what a token is.

use serde::Serialize;

/// Identity of the counting scheme. Recorded so persisted token counts can be
/// invalidated if the scheme ever changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenizerKind {
    /// GPT-4 / Claude-family BPE, approximated at ~3.7 chars per token.
    Cl100kBase,
    /// Newer OpenAI vocabularies, ~3.9 chars per token.
    O200kBase,
    /// Conservative default: 3.5 chars per token (overestimates slightly).
    Heuristic,
}

impl TokenizerKind {
    fn chars_per_token(self) -> f32 {
        match self {
            TokenizerKind::Cl100kBase => 3.7,
            TokenizerKind::O200kBase => 3.9,
            TokenizerKind::Heuristic => 3.5,
        }
    }
}

/// Character-ratio token estimator.
///
/// Counts are deterministic and stateless: `count("") == 0`, non-empty text
/// costs at least one token, and for any split `count(a ++ b) <=
/// count(a) + count(b) + 1`. Char count (not byte count) keeps CJK and emoji
/// text from being overcounted.
#[derive(Debug, Clone, Copy)]
pub struct TokenCounter {
    kind: TokenizerKind,
}

impl TokenCounter {
    pub fn new(kind: TokenizerKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> TokenizerKind {
        self.kind
    }

    /// Count the tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count();
        let estimated = (chars as f32 / self.kind.chars_per_token()).ceil() as usize;
        estimated.max(1)
    }

    /// Truncate `text` to fit `max_tokens`, appending `…` when anything was
    /// cut. Returns the empty string when the budget is zero.
    ///
    /// The character-ratio cut is only an estimate, so after cutting we trim
    /// one character at a time until the result (ellipsis included) actually
    /// fits. The result is always a prefix of `text` followed by `…`, or
    /// `text` itself when it already fits.
    pub fn truncate_to_tokens(&self, text: &str, max_tokens: usize) -> String {
        if max_tokens == 0 {
            return String::new();
        }
        if self.count(text) <= max_tokens {
            return text.to_string();
        }

        let max_chars = (max_tokens as f32 * self.kind.chars_per_token()) as usize;
        let mut end = max_chars.min(text.len());
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }

        let mut prefix = &text[..end];
        loop {
            let candidate_len = prefix.chars().count() + 1;
            let candidate_tokens =
                ((candidate_len as f32 / self.kind.chars_per_token()).ceil() as usize).max(1);
            if candidate_tokens <= max_tokens || prefix.is_empty() {
                break;
            }
            let mut cut = prefix.len() - 1;
            while cut > 0 && !prefix.is_char_boundary(cut) {
                cut -= 1;
            }
            prefix = &prefix[..cut];
        }

        format!("{prefix}…")
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new(TokenizerKind::Heuristic)
    }
}
