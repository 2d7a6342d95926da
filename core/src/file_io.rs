//! File reading with token-budgeted chunking, and write-if-empty.
//!
//! Reads are the only way content enters the ReadLedger, which in turn
//! gates every mutation. A read request is an absolute path with an
//! optional trailing `:start-end` line range (`:start-`, `:-end` also
//! accepted, 1-based inclusive).

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use tracing::debug;

use crate::error::Result;
use crate::error::ToolError;
use crate::file_edit::write_atomic;
use crate::syntax;
use crate::tokenizer::Tokenizer;
use crate::tracker::ReadLedger;

static RANGE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*):(\d*)-(\d*)$").expect("range suffix regex"));

/// A parsed read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub path: PathBuf,
    /// 1-based inclusive; `None` bounds mean start/end of file.
    pub start: Option<usize>,
    pub end: Option<usize>,
}

/// Split an optional `:start-end` suffix off a raw path string.
pub fn parse_read_request(raw: &str) -> Result<ReadRequest> {
    if let Some(captures) = RANGE_SUFFIX.captures(raw) {
        let start_raw = &captures[2];
        let end_raw = &captures[3];
        if !start_raw.is_empty() || !end_raw.is_empty() {
            let path = PathBuf::from(&captures[1]);
            let start = if start_raw.is_empty() {
                None
            } else {
                Some(start_raw.parse::<usize>().map_err(|_| ToolError::BadRange {
                    path: path.clone(),
                    spec: format!("{start_raw}-{end_raw}"),
                })?)
            };
            let end = if end_raw.is_empty() {
                None
            } else {
                Some(end_raw.parse::<usize>().map_err(|_| ToolError::BadRange {
                    path: path.clone(),
                    spec: format!("{start_raw}-{end_raw}"),
                })?)
            };
            if start == Some(0)
                || matches!((start, end), (Some(s), Some(e)) if s > e)
            {
                return Err(ToolError::BadRange {
                    path,
                    spec: format!("{start_raw}-{end_raw}"),
                });
            }
            return Ok(ReadRequest { path, start, end });
        }
    }
    Ok(ReadRequest {
        path: PathBuf::from(raw),
        start: None,
        end: None,
    })
}

/// Read a batch of files under a shared token budget.
///
/// When a file does not fit in the remaining budget, its first chunk (the
/// longest line prefix that fits) is returned and the rest is advertised
/// with the `path:start-` range to request next. Each shown range is
/// recorded in the ledger against the hash of the full on-disk bytes.
pub fn read_files(
    raw_paths: &[String],
    show_line_numbers: bool,
    max_tokens: usize,
    tokenizer: &Tokenizer,
    ledger: &mut ReadLedger,
) -> Result<String> {
    if raw_paths.is_empty() {
        return Err(ToolError::InvalidArgument(
            "file_paths cannot be empty".to_string(),
        ));
    }

    let mut out = String::new();
    let mut remaining = max_tokens;
    for (i, raw) in raw_paths.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let request = parse_read_request(raw)?;
        if !request.path.is_absolute() {
            return Err(ToolError::InvalidArgument(format!(
                "file paths must be absolute, got {}",
                request.path.display()
            )));
        }
        match read_one(&request, show_line_numbers, remaining, tokenizer, ledger) {
            Ok(one) => {
                remaining = remaining.saturating_sub(one.tokens_used);
                out.push_str(&one.text);
                if remaining == 0 && i + 1 < raw_paths.len() {
                    out.push_str(
                        "\nToken budget exhausted; request the remaining files in another call.\n",
                    );
                    break;
                }
            }
            Err(ToolError::Io(err)) => {
                // A missing or unreadable file should not sink the batch.
                out.push_str(&format!("{}\nError: {err}\n", request.path.display()));
            }
            Err(other) => return Err(other),
        }
    }
    Ok(out)
}

struct SingleRead {
    text: String,
    tokens_used: usize,
}

fn read_one(
    request: &ReadRequest,
    show_line_numbers: bool,
    budget: usize,
    tokenizer: &Tokenizer,
    ledger: &mut ReadLedger,
) -> Result<SingleRead> {
    // Resolve symlinks so the ledger keys one canonical path per file.
    let path = fs::canonicalize(&request.path).unwrap_or_else(|_| request.path.clone());
    let bytes = fs::read(&path)?;
    let content = String::from_utf8_lossy(&bytes);
    let all_lines: Vec<&str> = if content.is_empty() {
        Vec::new()
    } else {
        let mut lines: Vec<&str> = content.split('\n').collect();
        if content.ends_with('\n') {
            lines.pop();
        }
        lines
    };
    let total_lines = all_lines.len();

    let start = request.start.unwrap_or(1);
    let end = request.end.unwrap_or(total_lines.max(1)).min(total_lines.max(1));
    if total_lines > 0 && start > total_lines {
        return Err(ToolError::BadRange {
            path: path.clone(),
            spec: format!(
                "{}-{} (file has {} lines)",
                start,
                request.end.map(|e| e.to_string()).unwrap_or_default(),
                total_lines
            ),
        });
    }

    let selected: Vec<&str> = if total_lines == 0 {
        Vec::new()
    } else {
        all_lines[start - 1..end].to_vec()
    };

    let keep = tokenizer.fit_lines(&selected, budget.max(1));
    let truncated = keep < selected.len();
    // Always show at least one line so progress is possible even when a
    // single line exceeds the remaining budget.
    let keep = if truncated { keep.max(1) } else { keep };
    let shown_end = if total_lines == 0 { 0 } else { start + keep - 1 };

    let mut body = String::new();
    for (offset, line) in selected[..keep.min(selected.len())].iter().enumerate() {
        if show_line_numbers {
            body.push_str(&format!("{} {}\n", start + offset, line));
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }

    let mut text = format!("{}\n```\n{body}```\n", path.display());
    if truncated {
        text.push_str(&format!(
            "(...truncated) Only lines {start}-{shown_end} of {total_lines} shown; \
             request {}:{}-{total_lines} to continue.\n",
            path.display(),
            shown_end + 1,
        ));
    }

    let recorded_range = if total_lines == 0 {
        (1, 1)
    } else {
        (start, shown_end)
    };
    ledger.record_read(&path, &bytes, recorded_range);
    debug!(
        path = %path.display(),
        start,
        shown_end,
        truncated,
        "file read"
    );

    Ok(SingleRead {
        tokens_used: tokenizer.count(&text),
        text,
    })
}

/// Create a file that does not exist (or exists empty). Refuses to touch a
/// non-empty file; FileEdit is the tool for that.
pub fn write_if_empty(path: &Path, content: &str, ledger: &mut ReadLedger) -> Result<String> {
    if !path.is_absolute() {
        return Err(ToolError::InvalidArgument(format!(
            "file_path must be absolute, got {}",
            path.display()
        )));
    }
    if path.exists() {
        let existing = fs::metadata(path)?;
        if existing.is_dir() {
            return Err(ToolError::InvalidArgument(format!(
                "{} is a directory",
                path.display()
            )));
        }
        if existing.len() > 0 {
            return Err(ToolError::FileExists {
                path: path.to_path_buf(),
            });
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // Key the ledger by canonical path, consistent with reads and edits.
    let path = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    };
    let path = path.as_path();
    write_atomic(path, content.as_bytes())?;
    ledger.record_full(path, content.as_bytes());
    debug!(path = %path.display(), bytes = content.len(), "file created");

    let mut result = format!("Created {}", path.display());
    let diag_text = syntax::render(&syntax::check(path, content));
    if !diag_text.is_empty() {
        result.push('\n');
        result.push_str(&diag_text);
    }
    Ok(result)
}
