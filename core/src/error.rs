//! Structured failures surfaced to tool callers.
//!
//! Every boundary operation returns `Result<_, ToolError>`; nothing in the
//! engine unwinds across a tool call. Hosts format the variant into the
//! text shown to the model, so messages are written for the model to act
//! on, not for humans debugging the engine.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = ToolError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ToolError {
    /// A mode policy denied the operation. `rule` names the rule that fired.
    #[error("Forbidden by mode policy ({rule}): {detail}")]
    Forbidden { rule: &'static str, detail: String },

    /// Write/edit attempted on a file the agent has not (sufficiently) read.
    #[error("{} not read: {detail}", path.display())]
    NotRead { path: PathBuf, detail: String },

    /// WriteIfEmpty on an existing, non-empty file.
    #[error(
        "file {} already exists and is non-empty; read it and use FileEdit to modify it",
        path.display()
    )]
    FileExists { path: PathBuf },

    /// No acceptable match for a SEARCH block; carries the closest candidate
    /// so the caller can correct the block.
    #[error(
        "no match found for search block #{block_index}. Closest match in the file \
         (lines {candidate_start}-{candidate_end}):\n```\n{candidate}\n```\nFile not edited"
    )]
    NoMatch {
        block_index: usize,
        candidate_start: usize,
        candidate_end: usize,
        candidate: String,
    },

    /// A SEARCH block matched more than once and ordering could not pick one.
    #[error(
        "search block #{block_index} matched at multiple places (line offsets {offsets:?}); \
         add surrounding context lines to disambiguate. File not edited"
    )]
    Ambiguous {
        block_index: usize,
        offsets: Vec<usize>,
    },

    /// The SEARCH/REPLACE body itself is malformed.
    #[error("malformed search/replace blocks: {0}")]
    MalformedEdit(String),

    /// A command is already pending; includes the current screen snapshot.
    #[error(
        "a command is already running. Use status_check to wait for it, send_text/send_specials \
         to interact with it, or send Ctrl-c to kill it.\nCurrent screen:\n{screen}"
    )]
    Busy { screen: String },

    /// Interrupt gave up before the shell returned to its prompt.
    #[error("the running command did not stop after interrupt; it is still running")]
    StillRunning,

    /// The PTY child is gone; only a `reset_shell` Initialize recovers.
    #[error("shell process has died; call Initialize with type=reset_shell to restart it")]
    ShellDead,

    /// A `path:start-end` range suffix did not parse or is out of order.
    #[error("invalid line range {spec:?} for {}", path.display())]
    BadRange { path: PathBuf, spec: String },

    /// TaskStore.load miss.
    #[error("no saved task found with id {id:?}")]
    NoSuchTask { id: String },

    /// Caller-side argument problem (empty input, relative path, ...).
    #[error("{0}")]
    InvalidArgument(String),

    /// Terminal-level failure (spawn, resize, writer).
    #[error("terminal failure: {0}")]
    Terminal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Stable kind tag, used in logs and host-side metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Forbidden { .. } => "forbidden",
            ToolError::NotRead { .. } => "not_read",
            ToolError::FileExists { .. } => "file_exists",
            ToolError::NoMatch { .. } => "no_match",
            ToolError::Ambiguous { .. } => "ambiguous",
            ToolError::MalformedEdit(_) => "malformed_edit",
            ToolError::Busy { .. } => "busy",
            ToolError::StillRunning => "still_running",
            ToolError::ShellDead => "shell_dead",
            ToolError::BadRange { .. } => "bad_range",
            ToolError::NoSuchTask { .. } => "no_such_task",
            ToolError::InvalidArgument(_) => "invalid_argument",
            ToolError::Terminal(_) => "terminal",
            ToolError::Io(_) => "io",
        }
    }
}
