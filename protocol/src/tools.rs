//! Argument types for the six tool operations.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de::Error as DeError;
use strum_macros::Display;

use crate::modes::CodeWriterConfig;
use crate::modes::ModeName;

/// Why Initialize is being called. Everything except `first_call` operates
/// on an engine that already has a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, JsonSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InitType {
    FirstCall,
    UserAskedModeChange,
    ResetShell,
    UserAskedChangeWorkspace,
}

/// Arguments of the `Initialize` tool. All fields are required at the
/// boundary; emptiness is the "not provided" signal, matching the hosts'
/// schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Initialize {
    #[serde(rename = "type")]
    pub init_type: InitType,
    pub any_workspace_path: String,
    pub initial_files_to_read: Vec<String>,
    pub task_id_to_resume: String,
    pub mode_name: ModeName,
    #[serde(default)]
    pub code_writer_config: Option<CodeWriterConfig>,
}

/// Symbolic keys accepted by `send_specials`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Special {
    Enter,
    #[serde(rename = "Key-up")]
    KeyUp,
    #[serde(rename = "Key-down")]
    KeyDown,
    #[serde(rename = "Key-left")]
    KeyLeft,
    #[serde(rename = "Key-right")]
    KeyRight,
    #[serde(rename = "Ctrl-c")]
    CtrlC,
    #[serde(rename = "Ctrl-d")]
    CtrlD,
}

/// The five shapes `action_json` can take. Variants are distinguished by
/// their unique field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum BashAction {
    Command { command: String },
    StatusCheck { status_check: bool },
    SendText { send_text: String },
    SendSpecials { send_specials: Vec<Special> },
    SendAscii { send_ascii: Vec<u8> },
}

/// Arguments of the `BashCommand` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BashCommand {
    #[serde(deserialize_with = "action_object_or_string")]
    pub action_json: BashAction,
    #[serde(default)]
    pub wait_for_seconds: Option<f64>,
}

/// Some hosts double-encode `action_json` as a JSON string; accept both.
fn action_object_or_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BashAction, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    let value = match value {
        serde_json::Value::String(inner) => {
            serde_json::from_str(&inner).map_err(D::Error::custom)?
        }
        other => other,
    };
    serde_json::from_value(value).map_err(D::Error::custom)
}

/// Arguments of the `ReadFiles` tool. Paths may carry a trailing
/// `:start-end` line-range suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadFiles {
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub show_line_numbers_reason: Option<String>,
}

/// Arguments of the `WriteIfEmpty` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WriteIfEmpty {
    pub file_path: String,
    pub file_content: String,
}

/// Arguments of the `FileEdit` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileEdit {
    pub file_path: String,
    pub file_edit_using_search_replace_blocks: String,
}

/// Arguments of the `ContextSave` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ContextSave {
    pub id: String,
    pub project_root_path: String,
    pub description: String,
    pub relevant_file_globs: Vec<String>,
}

/// Union of all tool calls, tagged by tool name. This is what hosts hand to
/// the engine's dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args")]
pub enum ToolCall {
    Initialize(Initialize),
    BashCommand(BashCommand),
    ReadFiles(ReadFiles),
    WriteIfEmpty(WriteIfEmpty),
    FileEdit(FileEdit),
    ContextSave(ContextSave),
}

impl ToolCall {
    /// The stable tool name, for logging and host routing.
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Initialize(_) => "Initialize",
            ToolCall::BashCommand(_) => "BashCommand",
            ToolCall::ReadFiles(_) => "ReadFiles",
            ToolCall::WriteIfEmpty(_) => "WriteIfEmpty",
            ToolCall::FileEdit(_) => "FileEdit",
            ToolCall::ContextSave(_) => "ContextSave",
        }
    }
}
