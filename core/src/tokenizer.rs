//! Token counting for budget enforcement.
//!
//! One fixed vocabulary (cl100k_base) for everything: read budgets, shell
//! output caps and the repo map. The tokenizer is expensive to build, so a
//! process-wide instance is shared.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;
use tiktoken_rs::cl100k_base;

static GLOBAL_TOKENIZER: Lazy<Arc<Tokenizer>> = Lazy::new(|| {
    Arc::new(Tokenizer::new().expect("cl100k_base tokenizer failed to initialize"))
});

pub struct Tokenizer {
    bpe: CoreBPE,
}

impl Tokenizer {
    /// Shared process-wide instance. Panics only if the embedded vocabulary
    /// itself is unloadable, which is a build defect rather than a runtime
    /// condition.
    pub fn shared() -> Arc<Tokenizer> {
        Arc::clone(&GLOBAL_TOKENIZER)
    }

    /// Standalone instance for isolated use.
    pub fn new() -> Result<Self, String> {
        let bpe = cl100k_base().map_err(|e| format!("failed to load cl100k_base: {e}"))?;
        Ok(Self { bpe })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Keep the head of `text`, at most `max_tokens` tokens, appending a
    /// truncation marker when anything was dropped.
    pub fn truncate_head(&self, text: &str, max_tokens: usize) -> (String, bool) {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return (text.to_string(), false);
        }
        let keep = max_tokens.saturating_sub(5);
        let head = self
            .bpe
            .decode(tokens[..keep].to_vec())
            // Token slices can end mid-codepoint; fall back to a rough
            // character cut.
            .unwrap_or_else(|_| text.chars().take(keep * 3).collect());
        (format!("{head}\n...(truncated)"), true)
    }

    /// Keep the tail of `text`, at most `max_tokens` tokens. Used for shell
    /// output, where the most recent lines matter.
    pub fn truncate_tail(&self, text: &str, max_tokens: usize) -> (String, bool) {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() < max_tokens {
            return (text.to_string(), false);
        }
        let keep = max_tokens.saturating_sub(1);
        let start = tokens.len() - keep;
        let tail = self.bpe.decode(tokens[start..].to_vec()).unwrap_or_else(|_| {
            let chars: Vec<char> = text.chars().collect();
            chars[chars.len().saturating_sub(keep * 3)..].iter().collect()
        });
        (format!("(...truncated)\n{tail}"), true)
    }

    /// The longest prefix of `lines` whose joined text fits in `max_tokens`.
    /// Returns the number of lines kept.
    pub fn fit_lines(&self, lines: &[&str], max_tokens: usize) -> usize {
        let mut used = 0usize;
        for (i, line) in lines.iter().enumerate() {
            // +1 for the joining newline
            let cost = self.count(line) + 1;
            if used + cost > max_tokens {
                return i;
            }
            used += cost;
        }
        lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_stable_and_nonzero() {
        let tok = Tokenizer::shared();
        let n = tok.count("fn main() { println!(\"hello\"); }");
        assert!(n > 0);
        assert_eq!(n, tok.count("fn main() { println!(\"hello\"); }"));
        assert_eq!(tok.count(""), 0);
    }

    #[test]
    fn truncate_head_keeps_prefix() {
        let tok = Tokenizer::shared();
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let (out, truncated) = tok.truncate_head(text, 6);
        assert!(truncated);
        assert!(out.ends_with("...(truncated)"));
        assert!(out.starts_with("alpha"));

        let (same, truncated) = tok.truncate_head("short", 100);
        assert!(!truncated);
        assert_eq!(same, "short");
    }

    #[test]
    fn truncate_tail_keeps_suffix() {
        let tok = Tokenizer::shared();
        let text = "line one\nline two\nline three\nline four\nline five";
        let (out, truncated) = tok.truncate_tail(text, 6);
        assert!(truncated);
        assert!(out.starts_with("(...truncated)\n"));
        assert!(out.ends_with("five"));
    }

    #[test]
    fn fit_lines_respects_budget() {
        let tok = Tokenizer::shared();
        let lines: Vec<&str> = vec!["one two three", "four five six", "seven eight nine"];
        assert_eq!(tok.fit_lines(&lines, 1_000), 3);
        assert_eq!(tok.fit_lines(&lines, 0), 0);
        let partial = tok.fit_lines(&lines, 5);
        assert!(partial < 3);
    }
}
