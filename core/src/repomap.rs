//! Deterministic, token-budgeted picker of important workspace files.
//!
//! Builds the first-turn context for the agent: walk the workspace with
//! gitignore semantics, rank files by a cheap static score, then render a
//! compact directory tree with the winners expanded, cut so the whole text
//! stays under the token budget. Never mutates disk.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use ignore::WalkBuilder;
use tracing::debug;

use crate::tokenizer::Tokenizer;

/// Manifest/doc names that anchor a repository; boosted when at the root.
const ROOT_IMPORTANT_FILES: &[&str] = &[
    "README", "README.md", "README.rst", "LICENSE", "CHANGELOG.md", "CONTRIBUTING.md",
    "Cargo.toml", "Cargo.lock", "rust-toolchain.toml", "package.json", "tsconfig.json",
    "pyproject.toml", "setup.py", "requirements.txt", "go.mod", "go.sum", "pom.xml",
    "build.gradle", "Gemfile", "composer.json", "mix.exs", "CMakeLists.txt", "Makefile",
    "justfile", "Dockerfile", "docker-compose.yml", ".gitignore",
];

/// Top-level directories that conventionally hold the interesting code.
const CONVENTIONAL_ROOTS: &[&str] = &[
    "src", "lib", "app", "core", "crates", "cmd", "pkg", "include", "tests", "test",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "ts", "tsx", "js", "jsx", "go", "java", "c", "h", "cpp", "hpp", "cc",
    "rb", "php", "swift", "kt", "scala", "sh", "sql", "proto",
];

/// Files larger than this are never lexically scanned for references.
const REFERENCE_SCAN_MAX_BYTES: u64 = 16 * 1024;
/// At most this many files are lexically scanned.
const REFERENCE_SCAN_MAX_FILES: usize = 300;

#[derive(Debug, Clone)]
pub struct RepoMapConfig {
    pub max_files: usize,
    pub token_budget: usize,
    pub max_depth: usize,
}

impl Default for RepoMapConfig {
    fn default() -> Self {
        Self {
            max_files: 200,
            token_budget: 4_000,
            max_depth: 10,
        }
    }
}

/// Build the repo map text for `workspace`.
pub fn build(workspace: &Path, config: &RepoMapConfig, tokenizer: &Tokenizer) -> String {
    let files = collect_files(workspace, config.max_depth);
    if files.is_empty() {
        return format!("{}\n  (empty workspace)", workspace.display());
    }

    let references = count_references(workspace, &files);
    let mut scored: Vec<(f64, &String)> = files
        .iter()
        .map(|rel| (score_file(rel, references.get(rel.as_str()).copied().unwrap_or(0)), rel))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });

    let mut tree = DirectoryTree::new(workspace);
    for (_, rel) in scored.iter().take(config.max_files) {
        tree.expand(rel);
    }
    let rendered = tree.display();

    // Cut at the token budget: stop before the line that would overflow.
    let lines: Vec<&str> = rendered.lines().collect();
    let keep = tokenizer.fit_lines(&lines, config.token_budget);
    debug!(
        workspace = %workspace.display(),
        files = files.len(),
        shown_lines = keep,
        "repo map built"
    );
    lines[..keep].join("\n")
}

/// All non-ignored files under `workspace`, workspace-relative with `/`
/// separators, in walk order.
fn collect_files(workspace: &Path, max_depth: usize) -> Vec<String> {
    let walker = WalkBuilder::new(workspace)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .require_git(false)
        .follow_links(false)
        .max_depth(Some(max_depth))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(workspace) else {
            continue;
        };
        files.push(rel.to_string_lossy().replace('\\', "/"));
        if files.len() >= 10_000 {
            break;
        }
    }
    files
}

/// How many *other* small files mention this file's stem. A cheap lexical
/// stand-in for an import graph; no language-specific resolution.
fn count_references<'a>(workspace: &Path, files: &'a [String]) -> HashMap<&'a str, usize> {
    let mut stems: HashMap<&str, Vec<&'a str>> = HashMap::new();
    for rel in files {
        let stem = Path::new(rel)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        // Short or generic stems produce pure noise.
        if stem.len() >= 4 && stem != "index" && stem != "main" && stem != "mod" {
            stems.entry(stem).or_default().push(rel.as_str());
        }
    }

    let mut counts: HashMap<&'a str, usize> = HashMap::new();
    let mut scanned = 0usize;
    for rel in files {
        if scanned >= REFERENCE_SCAN_MAX_FILES {
            break;
        }
        let abs = workspace.join(rel);
        let small = fs::metadata(&abs)
            .map(|m| m.len() <= REFERENCE_SCAN_MAX_BYTES)
            .unwrap_or(false);
        if !small {
            continue;
        }
        let Ok(content) = fs::read_to_string(&abs) else {
            continue;
        };
        scanned += 1;
        let tokens: HashSet<&str> = content
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.len() >= 4)
            .collect();
        for (stem, owners) in &stems {
            if owners.iter().any(|owner| *owner == rel.as_str()) {
                continue;
            }
            if tokens.contains(stem) {
                for owner in owners {
                    *counts.entry(*owner).or_insert(0) += 1;
                }
            }
        }
    }
    counts
}

fn score_file(rel: &str, reference_count: usize) -> f64 {
    let path = Path::new(rel);
    let depth = path.components().count().saturating_sub(1);
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let mut score = 0.0;
    if depth == 0 && ROOT_IMPORTANT_FILES.contains(&file_name) {
        score += 8.0;
    } else if ROOT_IMPORTANT_FILES.contains(&file_name) {
        score += 2.0;
    }
    if let Some(first) = path.components().next().and_then(|c| c.as_os_str().to_str()) {
        if depth > 0 && CONVENTIONAL_ROOTS.contains(&first) {
            score += 1.5;
        }
    }
    if SOURCE_EXTENSIONS.contains(&extension) {
        score += 2.0;
    }
    score -= depth as f64 * 0.5;
    score += (reference_count as f64).ln_1p() * 1.5;
    score
}

/// Compact tree renderer: only expanded files and their ancestor chains are
/// shown; the rest collapses into a `... hidden` summary per directory.
struct DirectoryTree {
    root: PathBuf,
    expanded_files: BTreeSet<PathBuf>,
    expanded_dirs: BTreeSet<PathBuf>,
}

impl DirectoryTree {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            expanded_files: BTreeSet::new(),
            expanded_dirs: BTreeSet::new(),
        }
    }

    fn expand(&mut self, rel_path: &str) {
        let abs = self.root.join(rel_path);
        self.expanded_files.insert(abs.clone());
        let mut current = abs.parent();
        while let Some(dir) = current {
            if !dir.starts_with(&self.root) || dir == self.root {
                break;
            }
            self.expanded_dirs.insert(dir.to_path_buf());
            current = dir.parent();
        }
    }

    fn display(&self) -> String {
        let mut out = String::new();
        self.display_dir(&self.root.clone(), 0, 0, &mut out);
        out
    }

    fn display_dir(&self, dir: &Path, indent: usize, depth: usize, out: &mut String) {
        if dir == self.root {
            out.push_str(&format!("{}\n", dir.display()));
        } else {
            let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("?");
            out.push_str(&format!("{}{name}\n", " ".repeat(indent)));
        }
        if depth > 0 && !self.expanded_dirs.contains(dir) {
            return;
        }

        let mut entries: Vec<(bool, PathBuf)> = match fs::read_dir(dir) {
            Ok(iter) => iter
                .filter_map(|e| e.ok())
                .map(|e| (e.path().is_dir(), e.path()))
                .collect(),
            Err(_) => return,
        };
        entries.sort_by_key(|(is_dir, path)| {
            (
                !is_dir,
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("")
                    .to_lowercase(),
            )
        });

        let mut hidden_files = 0usize;
        let mut hidden_dirs = 0usize;
        for (is_dir, path) in &entries {
            let shown = if *is_dir {
                self.expanded_dirs.contains(path)
            } else {
                self.expanded_files.contains(path)
            };
            if shown {
                if *is_dir {
                    self.display_dir(path, indent + 2, depth + 1, out);
                } else {
                    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
                    out.push_str(&format!("{}{name}\n", " ".repeat(indent + 2)));
                }
            } else if *is_dir {
                hidden_dirs += 1;
            } else {
                hidden_files += 1;
            }
        }

        if hidden_files > 0 || hidden_dirs > 0 {
            let mut parts = Vec::new();
            if hidden_dirs > 0 {
                let plural = if hidden_dirs == 1 { "y" } else { "ies" };
                parts.push(format!("{hidden_dirs} director{plural}"));
            }
            if hidden_files > 0 {
                let plural = if hidden_files == 1 { "" } else { "s" };
                parts.push(format!("{hidden_files} file{plural}"));
            }
            out.push_str(&format!(
                "{}... {} hidden\n",
                " ".repeat(indent + 2),
                parts.join(" and ")
            ));
        }
    }
}
