//! The tool dispatcher: binds modes, ledger, shell, files and tasks into
//! the six boundary operations.
//!
//! One engine serves one workspace. Tool calls are strictly serialized
//! (`&mut self`); there is no reentrancy. Every result ends with the shell
//! status footer so the model always knows the cwd and whether something
//! is still running.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use shellbox_protocol::BashAction;
use shellbox_protocol::BashCommand;
use shellbox_protocol::ContextSave;
use shellbox_protocol::FileEdit;
use shellbox_protocol::InitType;
use shellbox_protocol::Initialize;
use shellbox_protocol::ModeName;
use shellbox_protocol::ModePolicy;
use shellbox_protocol::ReadFiles;
use shellbox_protocol::ToolCall;
use shellbox_protocol::WriteIfEmpty;
use tracing::info;
use tracing::warn;

use crate::error::Result;
use crate::error::ToolError;
use crate::file_edit;
use crate::file_io;
use crate::mode::ModeGate;
use crate::repomap;
use crate::repomap::RepoMapConfig;
use crate::shell::ShellConfig;
use crate::shell::ShellSession;
use crate::task_store::TaskStore;
use crate::terminal::TerminalConfig;
use crate::tokenizer::Tokenizer;
use crate::tracker::ReadLedger;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shared token budget for one ReadFiles batch.
    pub read_token_budget: usize,
    pub repo_map: RepoMapConfig,
    pub shell: ShellConfig,
    pub terminal: TerminalConfig,
    /// Task snapshot directory; `None` uses the platform data dir.
    pub task_store_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_token_budget: 8_000,
            repo_map: RepoMapConfig::default(),
            shell: ShellConfig::default(),
            terminal: TerminalConfig::default(),
            task_store_root: None,
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    tokenizer: Arc<Tokenizer>,
    workspace: Option<PathBuf>,
    gate: ModeGate,
    ledger: ReadLedger,
    shell: Option<ShellSession>,
    task_store: TaskStore,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let task_store = match &config.task_store_root {
            Some(root) => TaskStore::new(root.clone()),
            None => TaskStore::default_location()?,
        };
        Ok(Self {
            config,
            tokenizer: Tokenizer::shared(),
            workspace: None,
            gate: ModeGate::new(ModePolicy::resolve(ModeName::Wcgw, None))?,
            ledger: ReadLedger::new(),
            shell: None,
            task_store,
        })
    }

    /// Route one tool call. The single entry point hosts use.
    pub fn dispatch(&mut self, call: ToolCall) -> Result<String> {
        info!(tool = call.name(), "tool call");
        match call {
            ToolCall::Initialize(args) => self.initialize(args),
            ToolCall::BashCommand(args) => self.bash_command(args),
            ToolCall::ReadFiles(args) => self.read_files(args),
            ToolCall::WriteIfEmpty(args) => self.write_if_empty(args),
            ToolCall::FileEdit(args) => self.file_edit(args),
            ToolCall::ContextSave(args) => self.context_save(args),
        }
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }

    pub fn initialize(&mut self, args: Initialize) -> Result<String> {
        if args.mode_name == ModeName::CodeWriter && args.code_writer_config.is_none() {
            return Err(ToolError::InvalidArgument(
                "code_writer_config is required when mode_name is code_writer".to_string(),
            ));
        }

        // Resolve the workspace; a file path means "its parent, and read it".
        let mut initial_files = args.initial_files_to_read.clone();
        let raw_workspace = args.any_workspace_path.trim();
        if raw_workspace.is_empty() {
            return Err(ToolError::InvalidArgument(
                "any_workspace_path cannot be empty".to_string(),
            ));
        }
        let raw_workspace = PathBuf::from(raw_workspace);
        if !raw_workspace.is_absolute() {
            return Err(ToolError::InvalidArgument(format!(
                "any_workspace_path must be absolute, got {}",
                raw_workspace.display()
            )));
        }
        let mut workspace = if raw_workspace.is_file() {
            initial_files.push(raw_workspace.display().to_string());
            raw_workspace
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or(raw_workspace.clone())
        } else {
            raw_workspace
        };

        // Resume before anything else: the snapshot may move the workspace.
        let mut resumed = None;
        if !args.task_id_to_resume.is_empty() {
            let snapshot = self.task_store.load(&args.task_id_to_resume)?;
            if snapshot.workspace_path.is_dir() {
                workspace = snapshot.workspace_path.clone();
            } else {
                warn!(
                    saved = %snapshot.workspace_path.display(),
                    "saved workspace no longer exists, keeping the requested one"
                );
            }
            resumed = Some(snapshot);
        }

        std::fs::create_dir_all(&workspace)?;
        let workspace = workspace
            .canonicalize()
            .unwrap_or(workspace);

        // Mode policy.
        let mut code_writer_config = args.code_writer_config.clone();
        if let Some(config) = code_writer_config.as_mut() {
            config.resolve_relative_globs(&workspace);
        }
        let policy = ModePolicy::resolve(args.mode_name, code_writer_config.as_ref());
        self.gate = ModeGate::new(policy)?;

        // Shell lifecycle.
        match args.init_type {
            InitType::ResetShell => self.restart_shell(&workspace)?,
            _ => {
                let workspace_changed = self.workspace.as_deref() != Some(workspace.as_path());
                let needs_restart = match self.shell.as_ref() {
                    None => true,
                    Some(shell) => workspace_changed || shell.is_dead(),
                };
                if needs_restart {
                    self.restart_shell(&workspace)?;
                }
            }
        }
        self.workspace = Some(workspace.clone());

        // Fresh session view of files.
        self.ledger.clear();
        if let Some(snapshot) = &resumed {
            for (path, _) in &snapshot.files {
                let path = path.canonicalize().unwrap_or_else(|_| path.clone());
                if let Ok(bytes) = std::fs::read(&path) {
                    self.ledger.record_full(&path, &bytes);
                }
            }
        }

        let repo_map = repomap::build(&workspace, &self.config.repo_map, &self.tokenizer);

        let mut out = format!("Workspace: {}\n", workspace.display());
        out.push_str(&self.gate.policy().summary());
        out.push_str("\n\n# Repository structure\n");
        out.push_str(&repo_map);
        out.push('\n');

        if !initial_files.is_empty() {
            match file_io::read_files(
                &initial_files,
                false,
                self.config.read_token_budget,
                &self.tokenizer,
                &mut self.ledger,
            ) {
                Ok(contents) => {
                    out.push_str("\n# Requested files\n");
                    out.push_str(&contents);
                }
                Err(err) => {
                    out.push_str(&format!("\n# Requested files\nError: {err}\n"));
                }
            }
        }

        if let Some(snapshot) = resumed {
            out.push_str(&format!(
                "\n# Resumed task {}\n{}\n({} file(s) from the snapshot are now readable)\n",
                snapshot.id,
                snapshot.description,
                snapshot.files.len()
            ));
        }

        out.push_str(&self.footer());
        Ok(out)
    }

    fn restart_shell(&mut self, workspace: &Path) -> Result<()> {
        if let Some(shell) = self.shell.as_mut() {
            if shell.is_running() {
                if let Err(err) = shell.interrupt() {
                    warn!(error = %err, "interrupt before reset failed, killing shell");
                }
            }
            shell.shutdown();
        }
        self.shell = Some(ShellSession::start(
            self.config.terminal.clone(),
            self.config.shell.clone(),
            workspace,
            Arc::clone(&self.tokenizer),
        )?);
        Ok(())
    }

    fn bash_command(&mut self, args: BashCommand) -> Result<String> {
        self.ensure_initialized()?;
        // Mode gating first; only then touch the shell.
        if let BashAction::Command { command } = &args.action_json {
            self.gate.check_command(command)?;
        }
        let shell = self
            .shell
            .as_mut()
            .ok_or(ToolError::ShellDead)?;
        match &args.action_json {
            BashAction::Command { command } => shell.run(command, args.wait_for_seconds),
            BashAction::StatusCheck { status_check } => {
                if !*status_check {
                    return Err(ToolError::InvalidArgument(
                        "status_check must be true".to_string(),
                    ));
                }
                shell.status_check(args.wait_for_seconds)
            }
            BashAction::SendText { send_text } => {
                shell.send_text(send_text, args.wait_for_seconds)
            }
            BashAction::SendSpecials { send_specials } => {
                shell.send_specials(send_specials, args.wait_for_seconds)
            }
            BashAction::SendAscii { send_ascii } => {
                shell.send_ascii(send_ascii, args.wait_for_seconds)
            }
        }
    }

    fn read_files(&mut self, args: ReadFiles) -> Result<String> {
        self.ensure_initialized()?;
        if let (true, Some(workspace)) = (
            self.gate.restricts_reads_to_workspace(),
            self.workspace.clone(),
        ) {
            for raw in &args.file_paths {
                let request = file_io::parse_read_request(raw)?;
                let resolved = request
                    .path
                    .canonicalize()
                    .unwrap_or_else(|_| request.path.clone());
                if !resolved.starts_with(&workspace) {
                    return Err(ToolError::Forbidden {
                        rule: "code-writer-workspace-reads",
                        detail: format!(
                            "{} is outside the workspace {}",
                            resolved.display(),
                            workspace.display()
                        ),
                    });
                }
            }
        }
        let show_line_numbers = args
            .show_line_numbers_reason
            .as_deref()
            .is_some_and(|reason| !reason.is_empty());
        let mut out = file_io::read_files(
            &args.file_paths,
            show_line_numbers,
            self.config.read_token_budget,
            &self.tokenizer,
            &mut self.ledger,
        )?;
        out.push_str(&self.footer());
        Ok(out)
    }

    fn write_if_empty(&mut self, args: WriteIfEmpty) -> Result<String> {
        self.ensure_initialized()?;
        let path = PathBuf::from(&args.file_path);
        self.gate.check_write_path(&path)?;
        let mut out = file_io::write_if_empty(&path, &args.file_content, &mut self.ledger)?;
        out.push_str(&self.footer());
        Ok(out)
    }

    fn file_edit(&mut self, args: FileEdit) -> Result<String> {
        self.ensure_initialized()?;
        let path = PathBuf::from(&args.file_path);
        self.gate.check_edit_path(&path)?;
        // Edits key the ledger by canonical path, the same way reads do.
        let path = path.canonicalize().unwrap_or(path);
        let report = file_edit::edit_file(
            &path,
            &args.file_edit_using_search_replace_blocks,
            &mut self.ledger,
        )?;
        let mut out = report.render();
        out.push_str(&self.footer());
        Ok(out)
    }

    fn context_save(&mut self, args: ContextSave) -> Result<String> {
        self.ensure_initialized()?;
        let root = PathBuf::from(&args.project_root_path);
        if !root.is_absolute() || !root.is_dir() {
            return Err(ToolError::InvalidArgument(format!(
                "project_root_path must be an existing absolute directory, got {}",
                root.display()
            )));
        }
        let root = root.canonicalize().unwrap_or(root);
        let (path, count) = self.task_store.save(
            &args.id,
            &root,
            &args.description,
            &args.relevant_file_globs,
        )?;
        let mut out = format!(
            "Saved task {} with {} file(s) to {}\nResume it later with Initialize(task_id_to_resume={})",
            args.id,
            count,
            path.display(),
            args.id
        );
        out.push_str(&self.footer());
        Ok(out)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.workspace.is_none() {
            return Err(ToolError::InvalidArgument(
                "no workspace; call Initialize with type=first_call before other tools"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Status footer for non-shell tools; shell operations already carry
    /// theirs from the wait heuristic.
    fn footer(&mut self) -> String {
        match self.shell.as_mut() {
            Some(shell) => shell.status_footer(),
            None => {
                let cwd = self
                    .workspace
                    .as_ref()
                    .map(|w| w.display().to_string())
                    .unwrap_or_else(|| "(unset)".to_string());
                format!("\n\n---\n\nstatus = shell not started\ncwd = {cwd}")
            }
        }
    }
}
