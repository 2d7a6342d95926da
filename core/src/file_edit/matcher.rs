//! Tolerant matching of SEARCH blocks against file lines.
//!
//! Matching proceeds through widening tolerance levels:
//! exact, trailing-whitespace-only (silent), and indentation-tolerant
//! (warned). When nothing matches, a closest candidate is located by
//! line-level edit distance so the caller can correct its block.

use crate::error::ToolError;

/// How a block matched. Ordered by increasing tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    /// Lines equal after stripping trailing whitespace.
    TrailingWhitespace,
    /// Lines equal after stripping leading and trailing whitespace; the
    /// replacement is re-indented by the first line's indentation delta.
    Indentation,
}

/// A located match: `[start, end)` indices into the file's line vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMatch {
    pub start: usize,
    pub end: usize,
    pub kind: MatchKind,
    /// Leading whitespace of the matched first line minus the search's.
    /// Positive means the file is indented deeper than the search text.
    pub indent_delta: isize,
    /// Indent characters to prepend when `indent_delta > 0`.
    pub indent_fill: String,
}

/// Find a match for `search` in `lines`, never looking before `cursor`.
pub fn find_match(
    lines: &[String],
    cursor: usize,
    search: &[String],
    block_index: usize,
) -> Result<BlockMatch, ToolError> {
    if let Some(m) = first_match(lines, cursor, search, line_identity) {
        return Ok(BlockMatch {
            kind: MatchKind::Exact,
            ..m
        });
    }

    if let Some(m) = first_match(lines, cursor, search, |l| l.trim_end().to_string()) {
        return Ok(BlockMatch {
            kind: MatchKind::TrailingWhitespace,
            ..m
        });
    }

    let tolerant = all_matches(lines, cursor, search, |l| l.trim().to_string());
    match tolerant.len() {
        1 => {
            let m = tolerant.into_iter().next().expect("one element");
            Ok(BlockMatch {
                kind: MatchKind::Indentation,
                ..m
            })
        }
        0 => Err(closest_candidate(lines, cursor, search, block_index)),
        _ => Err(ToolError::Ambiguous {
            block_index,
            offsets: tolerant.iter().map(|m| m.start + 1).collect(),
        }),
    }
}

/// Re-indent `replace` lines by the match's indentation delta. Empty lines
/// stay empty; a negative delta strips only whitespace that is present.
pub fn reindent(replace: &[String], m: &BlockMatch) -> Vec<String> {
    if m.kind != MatchKind::Indentation || m.indent_delta == 0 {
        return replace.to_vec();
    }
    replace
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                return line.clone();
            }
            if m.indent_delta > 0 {
                format!("{}{}", m.indent_fill, line)
            } else {
                let strip = (-m.indent_delta) as usize;
                let ws_len = leading_ws_len(line).min(strip);
                line[ws_len..].to_string()
            }
        })
        .collect()
}

fn line_identity(line: &str) -> String {
    line.to_string()
}

fn leading_ws_len(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// All `[start, end)` windows where every processed line pair is equal.
fn all_matches(
    lines: &[String],
    cursor: usize,
    search: &[String],
    process: impl Fn(&str) -> String,
) -> Vec<BlockMatch> {
    let n = search.len();
    if n == 0 || cursor + n > lines.len() {
        return Vec::new();
    }
    let processed_search: Vec<String> = search.iter().map(|l| process(l)).collect();
    let mut found = Vec::new();
    for start in cursor..=(lines.len() - n) {
        let is_match = (0..n).all(|j| process(&lines[start + j]) == processed_search[j]);
        if is_match {
            let file_indent = leading_ws(&lines[start]);
            let search_indent = leading_ws(&search[0]);
            let delta = file_indent.len() as isize - search_indent.len() as isize;
            let fill = if delta > 0 {
                file_indent[search_indent.len().min(file_indent.len())..].to_string()
            } else {
                String::new()
            };
            found.push(BlockMatch {
                start,
                end: start + n,
                kind: MatchKind::Exact,
                indent_delta: delta,
                indent_fill: fill,
            });
        }
    }
    found
}

/// Earliest window at/after the cursor; edits proceed top-to-bottom, so the
/// first hit is the right one even when later duplicates exist.
fn first_match(
    lines: &[String],
    cursor: usize,
    search: &[String],
    process: impl Fn(&str) -> String,
) -> Option<BlockMatch> {
    all_matches(lines, cursor, search, process).into_iter().next()
}

fn leading_ws(line: &str) -> &str {
    &line[..leading_ws_len(line)]
}

/// Build the `NoMatch` error carrying the most similar region of the file.
fn closest_candidate(
    lines: &[String],
    cursor: usize,
    search: &[String],
    block_index: usize,
) -> ToolError {
    // Compare trimmed non-empty lines only; blank lines carry no signal.
    let mut content: Vec<&str> = Vec::new();
    let mut content_to_original: Vec<usize> = Vec::new();
    for (i, line) in lines.iter().enumerate().skip(cursor) {
        if !line.trim().is_empty() {
            content.push(line.trim());
            content_to_original.push(i);
        }
    }
    let needle: Vec<&str> = search
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    if content.is_empty() || needle.is_empty() {
        return ToolError::NoMatch {
            block_index,
            candidate_start: cursor + 1,
            candidate_end: cursor + 1,
            candidate: String::new(),
        };
    }

    let mut best_score = f64::MIN;
    let mut best_start = 0usize;
    let windows = content.len().saturating_sub(needle.len()) + 1;
    for i in 0..windows {
        let mut score = 0.0;
        for (j, want) in needle.iter().enumerate() {
            if let Some(have) = content.get(i + j) {
                score += similarity(have, want);
            }
        }
        if score > best_score {
            best_score = score;
            best_start = i;
        }
    }

    let orig_start = content_to_original[best_start];
    let orig_end = content_to_original
        .get(best_start + needle.len() - 1)
        .copied()
        .unwrap_or(lines.len() - 1);
    // Widen by a few lines of context so the caller sees the surroundings.
    let context_start = orig_start.saturating_sub(5);
    let context_end = (orig_end + 5).min(lines.len() - 1);
    let candidate = lines[context_start..=context_end].join("\n");

    ToolError::NoMatch {
        block_index,
        candidate_start: context_start + 1,
        candidate_end: context_end + 1,
        candidate,
    }
}

/// Normalized similarity in `[0, 1]` from character-level edit distance.
fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - (edit_distance(a, b) as f64 / longest as f64)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}
