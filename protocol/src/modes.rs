//! Operating modes and the policies derived from them.

use schemars::JsonSchema;
use schemars::gen::SchemaGenerator;
use schemars::schema::InstanceType;
use schemars::schema::Schema;
use schemars::schema::SchemaObject;
use schemars::schema::SubschemaValidation;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as DeError;
use strum_macros::Display;

/// Name of an operating mode as it appears at the tool boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, JsonSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModeName {
    /// Unrestricted: all commands, writes and edits allowed.
    Wcgw,
    /// Read-only exploration: no file mutation, read-only commands only.
    Architect,
    /// Writes and commands gated by caller-supplied allowlists.
    CodeWriter,
}

/// Either the sentinel `"all"` or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedItems {
    All,
    List(Vec<String>),
}

impl AllowedItems {
    pub fn is_all(&self) -> bool {
        matches!(self, AllowedItems::All)
    }

    /// Empty list means "nothing is allowed"; `"all"` is never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            AllowedItems::All => false,
            AllowedItems::List(items) => items.is_empty(),
        }
    }
}

impl Serialize for AllowedItems {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AllowedItems::All => serializer.serialize_str("all"),
            AllowedItems::List(items) => items.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AllowedItems {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            List(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) if s == "all" => Ok(AllowedItems::All),
            Raw::Text(other) => Err(D::Error::custom(format!(
                "expected \"all\" or a list, got string {other:?}"
            ))),
            Raw::List(items) => Ok(AllowedItems::List(items)),
        }
    }
}

impl JsonSchema for AllowedItems {
    fn schema_name() -> String {
        "AllowedItems".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        let all = SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            enum_values: Some(vec!["all".into()]),
            ..Default::default()
        };
        let list = gen.subschema_for::<Vec<String>>();
        Schema::Object(SchemaObject {
            subschemas: Some(Box::new(SubschemaValidation {
                any_of: Some(vec![Schema::Object(all), list]),
                ..Default::default()
            })),
            ..Default::default()
        })
    }
}

/// Extra configuration carried by `code_writer` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CodeWriterConfig {
    pub allowed_globs: AllowedItems,
    pub allowed_commands: AllowedItems,
}

impl CodeWriterConfig {
    /// Anchor relative globs at the workspace root so policy checks can
    /// match against absolute paths.
    pub fn resolve_relative_globs(&mut self, workspace_root: &std::path::Path) {
        if let AllowedItems::List(globs) = &mut self.allowed_globs {
            for glob in globs.iter_mut() {
                if !glob.starts_with('/') {
                    *glob = workspace_root.join(glob.as_str()).display().to_string();
                }
            }
        }
    }
}

/// How shell commands are treated under a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPolicy {
    /// Any command may run.
    Normal,
    /// Only commands on the read-only allowlist may run.
    ReadOnly,
}

/// Shell half of a mode's policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BashPolicy {
    pub command_policy: CommandPolicy,
    pub allowed_commands: AllowedItems,
}

/// The full policy a mode resolves to. Pure data; enforcement lives in the
/// core's mode gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModePolicy {
    pub mode_name: ModeName,
    pub bash: BashPolicy,
    pub file_edit_globs: AllowedItems,
    pub write_if_empty_globs: AllowedItems,
}

impl ModePolicy {
    /// Resolve a mode name plus optional code-writer config into a policy.
    ///
    /// `code_writer` without its config is a caller error and is rejected at
    /// the dispatch layer before this is reached.
    pub fn resolve(mode_name: ModeName, config: Option<&CodeWriterConfig>) -> ModePolicy {
        match (mode_name, config) {
            (ModeName::Wcgw, _) => ModePolicy {
                mode_name,
                bash: BashPolicy {
                    command_policy: CommandPolicy::Normal,
                    allowed_commands: AllowedItems::All,
                },
                file_edit_globs: AllowedItems::All,
                write_if_empty_globs: AllowedItems::All,
            },
            (ModeName::Architect, _) => ModePolicy {
                mode_name,
                bash: BashPolicy {
                    command_policy: CommandPolicy::ReadOnly,
                    allowed_commands: AllowedItems::All,
                },
                file_edit_globs: AllowedItems::List(Vec::new()),
                write_if_empty_globs: AllowedItems::List(Vec::new()),
            },
            (ModeName::CodeWriter, Some(config)) => ModePolicy {
                mode_name,
                bash: BashPolicy {
                    command_policy: CommandPolicy::Normal,
                    allowed_commands: config.allowed_commands.clone(),
                },
                file_edit_globs: config.allowed_globs.clone(),
                write_if_empty_globs: config.allowed_globs.clone(),
            },
            (ModeName::CodeWriter, None) => ModePolicy {
                mode_name,
                bash: BashPolicy {
                    command_policy: CommandPolicy::Normal,
                    allowed_commands: AllowedItems::List(Vec::new()),
                },
                file_edit_globs: AllowedItems::List(Vec::new()),
                write_if_empty_globs: AllowedItems::List(Vec::new()),
            },
        }
    }

    /// Short, mode-specific instructions included in Initialize results.
    pub fn summary(&self) -> String {
        match self.mode_name {
            ModeName::Wcgw => "Mode: wcgw (unrestricted). \
                 All shell commands, file writes and edits are allowed."
                .to_string(),
            ModeName::Architect => "Mode: architect (read-only). \
                 File writes and edits are disabled; only read-only shell commands are allowed."
                .to_string(),
            ModeName::CodeWriter => {
                let globs = match &self.file_edit_globs {
                    AllowedItems::All => "any path".to_string(),
                    AllowedItems::List(globs) if globs.is_empty() => "no path".to_string(),
                    AllowedItems::List(globs) => format!("paths matching {}", globs.join(", ")),
                };
                let commands = match &self.bash.allowed_commands {
                    AllowedItems::All => "any command".to_string(),
                    AllowedItems::List(cmds) if cmds.is_empty() => "no command".to_string(),
                    AllowedItems::List(cmds) => format!("only: {}", cmds.join(", ")),
                };
                format!("Mode: code_writer. Writes/edits allowed for {globs}; commands: {commands}.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn allowed_items_roundtrip() {
        let all: AllowedItems = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(all, AllowedItems::All);
        assert_eq!(serde_json::to_string(&all).unwrap(), "\"all\"");

        let list: AllowedItems = serde_json::from_str(r#"["src/**/*.rs"]"#).unwrap();
        assert_eq!(list, AllowedItems::List(vec!["src/**/*.rs".to_string()]));
        assert_eq!(
            serde_json::to_string(&list).unwrap(),
            r#"["src/**/*.rs"]"#
        );
    }

    #[test]
    fn allowed_items_rejects_other_strings() {
        let err = serde_json::from_str::<AllowedItems>("\"some\"");
        assert!(err.is_err());
    }

    #[test]
    fn mode_names_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ModeName::CodeWriter).unwrap(),
            "\"code_writer\""
        );
        assert_eq!(ModeName::Wcgw.to_string(), "wcgw");
    }

    #[test]
    fn architect_policy_disables_mutation() {
        let policy = ModePolicy::resolve(ModeName::Architect, None);
        assert_eq!(policy.bash.command_policy, CommandPolicy::ReadOnly);
        assert!(policy.file_edit_globs.is_empty());
        assert!(policy.write_if_empty_globs.is_empty());
    }

    #[test]
    fn code_writer_policy_carries_config() {
        let config = CodeWriterConfig {
            allowed_globs: AllowedItems::List(vec!["/w/src/**".to_string()]),
            allowed_commands: AllowedItems::All,
        };
        let policy = ModePolicy::resolve(ModeName::CodeWriter, Some(&config));
        assert_eq!(policy.bash.command_policy, CommandPolicy::Normal);
        assert_eq!(
            policy.file_edit_globs,
            AllowedItems::List(vec!["/w/src/**".to_string()])
        );
    }

    #[test]
    fn relative_globs_are_anchored_at_workspace() {
        let mut config = CodeWriterConfig {
            allowed_globs: AllowedItems::List(vec![
                "src/**/*.rs".to_string(),
                "/abs/already".to_string(),
            ]),
            allowed_commands: AllowedItems::All,
        };
        config.resolve_relative_globs(std::path::Path::new("/workspace"));
        assert_eq!(
            config.allowed_globs,
            AllowedItems::List(vec![
                "/workspace/src/**/*.rs".to_string(),
                "/abs/already".to_string(),
            ])
        );
    }
}
