//! Wire-level types for the shellbox tool surface.
//!
//! Hosts (an MCP-style server, a websocket relay) deserialize incoming tool
//! calls into these types and hand them to `shellbox-core`'s engine. The
//! argument shapes are stable; renaming a field here is a breaking protocol
//! change.

mod modes;
mod tools;

pub use modes::AllowedItems;
pub use modes::BashPolicy;
pub use modes::CodeWriterConfig;
pub use modes::CommandPolicy;
pub use modes::ModeName;
pub use modes::ModePolicy;
pub use tools::BashAction;
pub use tools::BashCommand;
pub use tools::ContextSave;
pub use tools::FileEdit;
pub use tools::InitType;
pub use tools::Initialize;
pub use tools::ReadFiles;
pub use tools::Special;
pub use tools::ToolCall;
pub use tools::WriteIfEmpty;
