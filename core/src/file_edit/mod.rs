//! Multi-block SEARCH/REPLACE editing with tolerant matching.
//!
//! Blocks apply in order, each scanning only past the end of the previous
//! block's replacement, so edits proceed top-to-bottom. A failed block
//! aborts the whole call with the file untouched on disk.

mod matcher;
mod parser;

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;
use crate::error::ToolError;
use crate::syntax;
use crate::syntax::SyntaxDiagnostic;
use crate::tracker::ReadLedger;
use crate::tracker::WriteGate;

pub use matcher::MatchKind;
pub use parser::EditBlock;
pub use parser::parse_blocks;

/// Result of a successful edit.
#[derive(Debug)]
pub struct EditReport {
    pub blocks_applied: usize,
    /// Non-fatal per-block warnings (indentation-tolerant matches).
    pub warnings: Vec<String>,
    pub diagnostics: Vec<SyntaxDiagnostic>,
}

impl EditReport {
    pub fn render(&self) -> String {
        let mut out = format!("Edited successfully ({} block(s) applied).", self.blocks_applied);
        if !self.warnings.is_empty() {
            out.push_str("\nWarnings generated while matching search blocks:\n");
            for warning in &self.warnings {
                out.push_str(&format!("  {warning}\n"));
            }
        }
        let diag_text = syntax::render(&self.diagnostics);
        if !diag_text.is_empty() {
            out.push('\n');
            out.push_str(&diag_text);
        }
        out
    }
}

/// Apply the block body to in-memory content. Pure; used by `edit_file` and
/// directly testable.
pub fn apply_search_replace(original: &str, body: &str) -> Result<(String, Vec<String>)> {
    let blocks = parse_blocks(body)?;
    apply_blocks(original, &blocks)
}

fn apply_blocks(original: &str, blocks: &[EditBlock]) -> Result<(String, Vec<String>)> {
    let had_trailing_newline = original.ends_with('\n');
    // Work on a line vector without the phantom line a trailing \n creates.
    let mut lines: Vec<String> = original.split('\n').map(str::to_string).collect();
    if had_trailing_newline {
        lines.pop();
    }

    let mut warnings = Vec::new();
    let mut cursor = 0usize;
    for (index, block) in blocks.iter().enumerate() {
        let m = matcher::find_match(&lines, cursor, &block.search, index)?;
        let replacement = matcher::reindent(&block.replace, &m);
        if m.kind == MatchKind::Indentation {
            warnings.push(format!(
                "block #{index}: matched without considering indentation; the replacement \
                 was re-indented to the file's level"
            ));
        }
        let replacement_len = replacement.len();
        lines.splice(m.start..m.end, replacement);
        cursor = m.start + replacement_len;
    }

    let mut edited = lines.join("\n");
    if had_trailing_newline {
        edited.push('\n');
    }
    Ok((edited, warnings))
}

/// Gate, apply, atomically write, syntax-check, and update the ledger.
pub fn edit_file(path: &Path, body: &str, ledger: &mut ReadLedger) -> Result<EditReport> {
    if !path.is_absolute() {
        return Err(ToolError::InvalidArgument(format!(
            "file_path must be absolute, got {}",
            path.display()
        )));
    }
    if !path.exists() {
        return Err(ToolError::InvalidArgument(format!(
            "file {} does not exist; use WriteIfEmpty to create it",
            path.display()
        )));
    }

    let current = fs::read(path)?;
    match ledger.check_write(path, &current) {
        WriteGate::Eligible => {}
        WriteGate::NeverRead => {
            return Err(ToolError::NotRead {
                path: path.to_path_buf(),
                detail: "you must read the file with ReadFiles before editing it".to_string(),
            });
        }
        WriteGate::StaleHash => {
            return Err(ToolError::NotRead {
                path: path.to_path_buf(),
                detail: "the file changed on disk since you last read it; read it again"
                    .to_string(),
            });
        }
        WriteGate::ReadTooLittle { unread } => {
            let ranges: Vec<String> = unread
                .iter()
                .map(|(start, end)| format!("{start}-{end}"))
                .collect();
            return Err(ToolError::NotRead {
                path: path.to_path_buf(),
                detail: format!(
                    "only part of the file was read; read the remaining line ranges first: {}",
                    ranges.join(", ")
                ),
            });
        }
    }

    let original = String::from_utf8_lossy(&current).into_owned();
    let blocks = parse_blocks(body)?;
    let (edited, warnings) = apply_blocks(&original, &blocks)?;

    write_atomic(path, edited.as_bytes())?;
    debug!(path = %path.display(), blocks = blocks.len(), "file edited");

    let diagnostics = syntax::check(path, &edited);
    ledger.record_full(path, edited.as_bytes());

    Ok(EditReport {
        blocks_applied: blocks.len(),
        warnings,
        diagnostics,
    })
}

/// Temp file in the target's directory, then rename into place.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        ToolError::InvalidArgument(format!("{} has no parent directory", path.display()))
    })?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| ToolError::Io(e.error))?;
    Ok(())
}
