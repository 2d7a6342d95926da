//! Task snapshots: save a description plus a bundle of relevant files,
//! reload them later to resume the task in a fresh session.
//!
//! One snapshot is one UTF-8 document keyed by a client-chosen id. Saving
//! over an existing id overwrites it.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use globset::Glob;
use globset::GlobSetBuilder;
use ignore::WalkBuilder;
use tracing::info;

use crate::error::Result;
use crate::error::ToolError;

const ID_HEADER: &str = "# TASK ID = ";
const ROOT_HEADER: &str = "# PROJECT ROOT = ";
const GLOBS_HEADER: &str = "# RELEVANT GLOBS = ";

/// A parsed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: String,
    pub workspace_path: PathBuf,
    pub description: String,
    pub globs: Vec<String>,
    /// Captured files: absolute path and raw contents.
    pub files: Vec<(PathBuf, String)>,
}

pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    /// Store rooted at an explicit directory; used directly by tests.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Store under the platform data directory
    /// (`$XDG_DATA_HOME/shellbox/tasks` on Linux).
    pub fn default_location() -> Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            ToolError::InvalidArgument("no data directory available on this system".to_string())
        })?;
        Ok(Self::new(base.join("shellbox").join("tasks")))
    }

    fn snapshot_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() {
            return Err(ToolError::InvalidArgument(
                "task id cannot be empty".to_string(),
            ));
        }
        if id.contains('/') || id.contains("..") {
            return Err(ToolError::InvalidArgument(format!(
                "task id {id:?} must not contain path separators"
            )));
        }
        Ok(self.root.join(format!("{id}.txt")))
    }

    /// Collect files matching `globs` under `workspace` and write the
    /// bundle. Returns the snapshot path and how many files were captured.
    pub fn save(
        &self,
        id: &str,
        workspace: &Path,
        description: &str,
        globs: &[String],
    ) -> Result<(PathBuf, usize)> {
        let path = self.snapshot_path(id)?;
        let files = collect_matching(workspace, globs)?;

        let mut doc = String::new();
        doc.push_str(&format!("{ID_HEADER}{id}\n"));
        doc.push_str(&format!("{ROOT_HEADER}{}\n", workspace.display()));
        doc.push_str(&format!("{GLOBS_HEADER}{}\n", globs.join(", ")));
        doc.push('\n');
        doc.push_str(description.trim_end());
        doc.push('\n');
        for file in &files {
            let Ok(content) = fs::read_to_string(file) else {
                continue;
            };
            doc.push_str(&format!("\n=== {} ===\n", file.display()));
            doc.push_str(&content);
            if !content.ends_with('\n') {
                doc.push('\n');
            }
        }

        fs::create_dir_all(&self.root)?;
        fs::write(&path, &doc)?;
        info!(id, files = files.len(), path = %path.display(), "task snapshot saved");
        Ok((path, files.len()))
    }

    pub fn load(&self, id: &str) -> Result<TaskSnapshot> {
        let path = self.snapshot_path(id)?;
        let doc = fs::read_to_string(&path).map_err(|_| ToolError::NoSuchTask {
            id: id.to_string(),
        })?;
        parse_snapshot(id, &doc)
    }
}

fn collect_matching(workspace: &Path, globs: &[String]) -> Result<Vec<PathBuf>> {
    if globs.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in globs {
        let anchored = if pattern.starts_with('/') {
            pattern.clone()
        } else {
            workspace.join(pattern).display().to_string()
        };
        let glob = Glob::new(&anchored).map_err(|e| {
            ToolError::InvalidArgument(format!("invalid glob {pattern:?}: {e}"))
        })?;
        builder.add(glob);
    }
    let set = builder.build().map_err(|e| {
        ToolError::InvalidArgument(format!("failed to compile glob set: {e}"))
    })?;

    let walker = WalkBuilder::new(workspace)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .follow_links(false)
        .build();
    let mut matched = Vec::new();
    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if set.is_match(entry.path()) {
            matched.push(entry.path().to_path_buf());
        }
    }
    matched.sort();
    Ok(matched)
}

fn parse_snapshot(id: &str, doc: &str) -> Result<TaskSnapshot> {
    let mut lines = doc.lines();
    let id_line = lines.next().unwrap_or("");
    let root_line = lines.next().unwrap_or("");
    let globs_line = lines.next().unwrap_or("");
    if !id_line.starts_with(ID_HEADER) || !root_line.starts_with(ROOT_HEADER) {
        return Err(ToolError::InvalidArgument(format!(
            "task snapshot {id:?} has a malformed header"
        )));
    }
    let workspace_path = PathBuf::from(root_line[ROOT_HEADER.len()..].trim());
    let globs: Vec<String> = globs_line
        .strip_prefix(GLOBS_HEADER)
        .unwrap_or("")
        .split(',')
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect();

    let mut description = String::new();
    let mut files: Vec<(PathBuf, String)> = Vec::new();
    let mut current: Option<(PathBuf, String)> = None;
    for line in lines {
        if line.starts_with("=== ") && line.ends_with(" ===") {
            if let Some(done) = current.take() {
                files.push(done);
            }
            let file_path = &line[4..line.len() - 4];
            current = Some((PathBuf::from(file_path), String::new()));
        } else if let Some((_, content)) = current.as_mut() {
            content.push_str(line);
            content.push('\n');
        } else {
            description.push_str(line);
            description.push('\n');
        }
    }
    if let Some(done) = current.take() {
        files.push(done);
    }

    Ok(TaskSnapshot {
        id: id.to_string(),
        workspace_path,
        description: description.trim().to_string(),
        globs,
        files,
    })
}
