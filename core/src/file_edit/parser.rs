//! SEARCH/REPLACE block parsing.
//!
//! The body is one or more blocks in the exact delimited form
//! `<<<<<<< SEARCH` ... `=======` ... `>>>>>>> REPLACE`, applied in order.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::error::ToolError;

static SEARCH_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<{6,}\s*SEARCH\s*$").expect("search marker regex"));
static DIVIDER_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^={6,}\s*$").expect("divider marker regex"));
static REPLACE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^>{6,}\s*REPLACE\s*$").expect("replace marker regex"));

/// One parsed block. Lines carry no terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBlock {
    pub search: Vec<String>,
    pub replace: Vec<String>,
}

/// Parse the full edit body into ordered blocks.
pub fn parse_blocks(body: &str) -> Result<Vec<EditBlock>, ToolError> {
    let lines: Vec<&str> = body.trim().split('\n').collect();
    if lines.is_empty() || !SEARCH_MARKER.is_match(lines[0]) {
        return Err(ToolError::MalformedEdit(
            "first line must be `<<<<<<< SEARCH` to open a search/replace block".to_string(),
        ));
    }

    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if !SEARCH_MARKER.is_match(lines[i]) {
            i += 1;
            continue;
        }
        i += 1;
        let mut search = Vec::new();
        while i < lines.len() && !DIVIDER_MARKER.is_match(lines[i]) {
            search.push(lines[i].to_string());
            i += 1;
        }
        if i >= lines.len() {
            return Err(ToolError::MalformedEdit(
                "search block not closed with `=======`".to_string(),
            ));
        }
        i += 1;
        if search.is_empty() {
            return Err(ToolError::MalformedEdit(
                "SEARCH block cannot be empty".to_string(),
            ));
        }
        let mut replace = Vec::new();
        let mut closed = false;
        while i < lines.len() {
            if REPLACE_MARKER.is_match(lines[i]) {
                closed = true;
                i += 1;
                break;
            }
            replace.push(lines[i].to_string());
            i += 1;
        }
        if !closed {
            return Err(ToolError::MalformedEdit(
                "replace block not closed with `>>>>>>> REPLACE`".to_string(),
            ));
        }
        blocks.push(EditBlock { search, replace });
    }

    if blocks.is_empty() {
        return Err(ToolError::MalformedEdit(
            "no valid search/replace blocks found; check the block delimiters".to_string(),
        ));
    }
    Ok(blocks)
}
