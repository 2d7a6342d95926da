//! Policy enforcement for modes.
//!
//! A pure check layer: given the resolved `ModePolicy` and an operation's
//! target (command text or path), answer allow/deny. Denials carry the name
//! of the rule that fired so the agent can explain itself to the user.

use std::path::Path;

use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use shellbox_protocol::AllowedItems;
use shellbox_protocol::CommandPolicy;
use shellbox_protocol::ModePolicy;

use crate::error::Result;
use crate::error::ToolError;

/// First tokens allowed under the architect read-only heuristic. Anything
/// not listed is denied by default.
const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "less", "more", "grep", "rg", "find", "fd", "wc", "stat",
    "file", "du", "df", "pwd", "echo", "printf", "env", "printenv", "which", "type",
    "whereis", "whoami", "id", "uname", "date", "uptime", "tree", "realpath", "readlink",
    "basename", "dirname", "sort", "uniq", "cut", "diff", "cmp", "md5sum", "sha256sum",
    "ps", "jobs", "history",
];

/// Read-only `git` subcommands permitted under architect.
const READ_ONLY_GIT_SUBCOMMANDS: &[&str] = &[
    "status", "log", "diff", "show", "branch", "remote", "blame", "shortlog", "describe",
    "rev-parse", "ls-files", "ls-tree", "grep",
];

/// Mode gate with compiled glob sets, rebuilt whenever the mode changes.
pub struct ModeGate {
    policy: ModePolicy,
    edit_globs: Option<GlobSet>,
    write_globs: Option<GlobSet>,
}

impl ModeGate {
    pub fn new(policy: ModePolicy) -> Result<Self> {
        let edit_globs = compile_globs(&policy.file_edit_globs)?;
        let write_globs = compile_globs(&policy.write_if_empty_globs)?;
        Ok(Self {
            policy,
            edit_globs,
            write_globs,
        })
    }

    pub fn policy(&self) -> &ModePolicy {
        &self.policy
    }

    /// Check a shell command before it is sent to the terminal.
    pub fn check_command(&self, command: &str) -> Result<()> {
        let trimmed = command.trim();
        let first_token = trimmed.split_whitespace().next().unwrap_or("");

        if self.policy.bash.command_policy == CommandPolicy::ReadOnly {
            if !READ_ONLY_COMMANDS.contains(&first_token) && first_token != "git" {
                return Err(ToolError::Forbidden {
                    rule: "architect-read-only-commands",
                    detail: format!(
                        "`{first_token}` is not on the read-only command allowlist"
                    ),
                });
            }
            if first_token == "git" {
                let sub = trimmed.split_whitespace().nth(1).unwrap_or("");
                if !READ_ONLY_GIT_SUBCOMMANDS.contains(&sub) {
                    return Err(ToolError::Forbidden {
                        rule: "architect-read-only-git",
                        detail: format!("`git {sub}` is not a read-only git subcommand"),
                    });
                }
            }
        }

        match &self.policy.bash.allowed_commands {
            AllowedItems::All => Ok(()),
            AllowedItems::List(allowed) => {
                if allowed.iter().any(|a| a == first_token || a == trimmed) {
                    Ok(())
                } else {
                    Err(ToolError::Forbidden {
                        rule: "code-writer-allowed-commands",
                        detail: format!("`{first_token}` is not in the allowed command list"),
                    })
                }
            }
        }
    }

    pub fn check_edit_path(&self, path: &Path) -> Result<()> {
        check_path(&self.edit_globs, path, "file-edit-allowed-globs")
    }

    pub fn check_write_path(&self, path: &Path) -> Result<()> {
        check_path(&self.write_globs, path, "write-if-empty-allowed-globs")
    }

    /// Whether reads must stay inside the workspace (`code_writer` with a
    /// restricted glob list).
    pub fn restricts_reads_to_workspace(&self) -> bool {
        self.edit_globs.is_some()
            && self.policy.mode_name == shellbox_protocol::ModeName::CodeWriter
    }
}

fn compile_globs(items: &AllowedItems) -> Result<Option<GlobSet>> {
    match items {
        AllowedItems::All => Ok(None),
        AllowedItems::List(globs) => {
            let mut builder = GlobSetBuilder::new();
            for pattern in globs {
                let glob = Glob::new(pattern).map_err(|e| {
                    ToolError::InvalidArgument(format!("invalid glob {pattern:?}: {e}"))
                })?;
                builder.add(glob);
            }
            let set = builder.build().map_err(|e| {
                ToolError::InvalidArgument(format!("failed to compile glob set: {e}"))
            })?;
            Ok(Some(set))
        }
    }
}

fn check_path(globs: &Option<GlobSet>, path: &Path, rule: &'static str) -> Result<()> {
    match globs {
        None => Ok(()),
        Some(set) if set.is_match(path) => Ok(()),
        Some(_) => Err(ToolError::Forbidden {
            rule,
            detail: format!("{} does not match any allowed glob", path.display()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use shellbox_protocol::CodeWriterConfig;
    use shellbox_protocol::ModeName;

    use super::*;

    fn gate(mode: ModeName, config: Option<CodeWriterConfig>) -> ModeGate {
        ModeGate::new(ModePolicy::resolve(mode, config.as_ref())).unwrap()
    }

    #[test]
    fn wcgw_allows_everything() {
        let gate = gate(ModeName::Wcgw, None);
        gate.check_command("rm -rf build/").unwrap();
        gate.check_edit_path(Path::new("/anywhere/file.rs")).unwrap();
        gate.check_write_path(Path::new("/anywhere/new.rs")).unwrap();
    }

    #[test]
    fn architect_denies_mutating_commands() {
        let gate = gate(ModeName::Architect, None);
        let err = gate.check_command("rm -rf /").unwrap_err();
        match err {
            ToolError::Forbidden { rule, .. } => {
                assert_eq!(rule, "architect-read-only-commands")
            }
            other => panic!("expected Forbidden, got {other:?}"),
        }
        gate.check_command("ls -la").unwrap();
        gate.check_command("grep -rn pattern src").unwrap();
        gate.check_command("git status").unwrap();
        assert!(gate.check_command("git push origin main").is_err());
        assert!(gate.check_command("cargo build").is_err());
    }

    #[test]
    fn architect_denies_all_edits() {
        let gate = gate(ModeName::Architect, None);
        assert!(gate.check_edit_path(Path::new("/w/a.rs")).is_err());
        assert!(gate.check_write_path(Path::new("/w/b.rs")).is_err());
    }

    #[test]
    fn code_writer_globs_gate_paths() {
        let config = CodeWriterConfig {
            allowed_globs: AllowedItems::List(vec!["/w/src/**/*.rs".to_string()]),
            allowed_commands: AllowedItems::All,
        };
        let gate = gate(ModeName::CodeWriter, Some(config));
        gate.check_edit_path(Path::new("/w/src/lib.rs")).unwrap();
        gate.check_edit_path(Path::new("/w/src/nested/mod.rs")).unwrap();
        let err = gate.check_edit_path(Path::new("/w/Cargo.toml")).unwrap_err();
        assert!(matches!(err, ToolError::Forbidden { .. }));
        assert!(gate.restricts_reads_to_workspace());
    }

    #[test]
    fn code_writer_all_globs_skip_check() {
        let config = CodeWriterConfig {
            allowed_globs: AllowedItems::All,
            allowed_commands: AllowedItems::All,
        };
        let gate = gate(ModeName::CodeWriter, Some(config));
        gate.check_edit_path(Path::new("/elsewhere/x.c")).unwrap();
        assert!(!gate.restricts_reads_to_workspace());
    }

    #[test]
    fn code_writer_command_list_matches_first_token_or_full() {
        let config = CodeWriterConfig {
            allowed_globs: AllowedItems::All,
            allowed_commands: AllowedItems::List(vec![
                "cargo".to_string(),
                "npm run lint".to_string(),
            ]),
        };
        let gate = gate(ModeName::CodeWriter, Some(config));
        gate.check_command("cargo test --workspace").unwrap();
        gate.check_command("npm run lint").unwrap();
        let err = gate.check_command("npm install leftpad").unwrap_err();
        match err {
            ToolError::Forbidden { rule, .. } => {
                assert_eq!(rule, "code-writer-allowed-commands")
            }
            other => panic!("expected Forbidden, got {other:?}"),
        }
    }

    #[test]
    fn invalid_glob_is_reported() {
        let config = CodeWriterConfig {
            allowed_globs: AllowedItems::List(vec!["[unclosed".to_string()]),
            allowed_commands: AllowedItems::All,
        };
        let err = ModeGate::new(ModePolicy::resolve(ModeName::CodeWriter, Some(&config)));
        assert!(err.is_err());
    }
}
