//! Language-detected syntax checking.
//!
//! After a write or edit, the new content is parsed with the grammar picked
//! from the file extension and any error nodes are reported back alongside
//! the successful result, so the agent can immediately repair what it broke.
//! A file without a known grammar yields no diagnostics, never an error.

use std::path::Path;

use tracing::debug;
use tree_sitter::Node;
use tree_sitter::Parser;

/// Cap on reported diagnostics per file; beyond this the list is noise.
const MAX_DIAGNOSTICS: usize = 5;

/// One parse problem, positioned 1-based for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxDiagnostic {
    pub line: usize,
    pub column: usize,
    pub snippet: String,
}

/// Languages with a grammar wired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grammar {
    Bash,
    C,
    Cpp,
    Go,
    Java,
    Json,
    Python,
    Rust,
    TypeScript,
    Tsx,
    Toml,
}

impl Grammar {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "sh" | "bash" | "zsh" => Some(Self::Bash),
            "c" | "h" => Some(Self::C),
            "cpp" | "cxx" | "cc" | "hpp" | "hxx" | "hh" => Some(Self::Cpp),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "json" => Some(Self::Json),
            "py" | "pyw" | "pyi" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            "ts" | "js" | "jsx" | "mjs" | "cjs" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Self::Bash => Some(tree_sitter_bash::LANGUAGE.into()),
            Self::C => Some(tree_sitter_c::LANGUAGE.into()),
            Self::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Self::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Self::Json => Some(tree_sitter_json::LANGUAGE.into()),
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Self::Toml => None,
        }
    }
}

/// Check `source` as the language implied by `path`'s extension.
pub fn check(path: &Path, source: &str) -> Vec<SyntaxDiagnostic> {
    let Some(grammar) = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(Grammar::from_extension)
    else {
        return Vec::new();
    };

    match grammar {
        Grammar::Toml => check_toml(source),
        _ => check_tree_sitter(grammar, source),
    }
}

/// Render diagnostics the way tool results embed them. Empty input renders
/// to an empty string.
pub fn render(diagnostics: &[SyntaxDiagnostic]) -> String {
    if diagnostics.is_empty() {
        return String::new();
    }
    let mut out = String::from("Warning: syntax errors in the edited file:\n");
    for d in diagnostics {
        out.push_str(&format!(
            "  line {}, col {}: near `{}`\n",
            d.line, d.column, d.snippet
        ));
    }
    out.push_str("The file was still written; fix the syntax if it is unintended.");
    out
}

fn check_tree_sitter(grammar: Grammar, source: &str) -> Vec<SyntaxDiagnostic> {
    let Some(language) = grammar.tree_sitter_language() else {
        return Vec::new();
    };
    let mut parser = Parser::new();
    if parser.set_language(&language).is_err() {
        debug!(?grammar, "grammar/version mismatch, skipping syntax check");
        return Vec::new();
    }
    let Some(tree) = parser.parse(source, None) else {
        return Vec::new();
    };
    let root = tree.root_node();
    if !root.has_error() {
        return Vec::new();
    }

    let mut diagnostics = Vec::new();
    collect_error_nodes(root, source, &mut diagnostics);
    diagnostics.truncate(MAX_DIAGNOSTICS);
    diagnostics
}

fn collect_error_nodes(node: Node, source: &str, out: &mut Vec<SyntaxDiagnostic>) {
    if out.len() >= MAX_DIAGNOSTICS {
        return;
    }
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        out.push(SyntaxDiagnostic {
            line: pos.row + 1,
            column: pos.column + 1,
            snippet: snippet_at(source, pos.row),
        });
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_error_nodes(child, source, out);
    }
}

fn check_toml(source: &str) -> Vec<SyntaxDiagnostic> {
    match toml::from_str::<toml::Value>(source) {
        Ok(_) => Vec::new(),
        Err(err) => {
            let offset = err.span().map(|s| s.start).unwrap_or(0);
            let (line, column) = line_col_at(source, offset);
            vec![SyntaxDiagnostic {
                line,
                column,
                snippet: snippet_at(source, line.saturating_sub(1)),
            }]
        }
    }
}

fn snippet_at(source: &str, row: usize) -> String {
    let line = source.lines().nth(row).unwrap_or("");
    let trimmed = line.trim();
    if trimmed.len() > 80 {
        let cut: String = trimmed.chars().take(77).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}

fn line_col_at(source: &str, offset: usize) -> (usize, usize) {
    let clamped = offset.min(source.len());
    let before = &source[..clamped];
    let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
    let column = before.bytes().rev().take_while(|&b| b != b'\n').count() + 1;
    (line, column)
}
