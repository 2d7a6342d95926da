//! The command state machine over the terminal.
//!
//! Exactly one command can be in flight. `run` starts one, `status_check`
//! waits on it, and the send operations inject input into whatever is
//! running. All of them funnel through the same wait heuristic: poll in
//! small quanta, return early on the prompt sentinel, and otherwise return
//! at the caller's deadline with a still-running status.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use shellbox_protocol::Special;
use tracing::debug;
use tracing::info;

use crate::error::Result;
use crate::error::ToolError;
use crate::terminal::Terminal;
use crate::terminal::TerminalConfig;
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Internal polling quantum of the wait heuristic.
    pub poll_quantum: Duration,
    /// How long output must stay silent at the deadline to be treated as
    /// "not streaming". Tuned empirically; exposed so hosts can adapt it
    /// to slow machines.
    pub freshness_window: Duration,
    /// Wait used when the caller does not pass `wait_for_seconds`.
    pub default_wait: Duration,
    /// Token cap on a single return's output; the head is dropped.
    pub max_output_tokens: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let poll_quantum = Duration::from_millis(100);
        Self {
            poll_quantum,
            freshness_window: poll_quantum * 4,
            default_wait: Duration::from_secs(5),
            max_output_tokens: 8_000,
        }
    }
}

#[derive(Debug)]
enum ShellState {
    Idle,
    Running(PendingCommand),
}

#[derive(Debug)]
struct PendingCommand {
    /// Literal command text for `run`; `None` for injected input.
    command: Option<String>,
    started: Instant,
}

/// How a wait ended.
#[derive(Debug, PartialEq, Eq)]
enum WaitOutcome {
    Finished,
    TimedOutQuiet,
    TimedOutStreaming,
}

pub struct ShellSession {
    terminal: Terminal,
    state: ShellState,
    config: ShellConfig,
    tokenizer: Arc<Tokenizer>,
    last_cwd: String,
    last_exit: Option<i32>,
    /// Most recent `run` command; its echo is stripped from output heads.
    last_command: Option<String>,
}

impl ShellSession {
    pub fn start(
        terminal_config: TerminalConfig,
        config: ShellConfig,
        cwd: &std::path::Path,
        tokenizer: Arc<Tokenizer>,
    ) -> Result<Self> {
        let terminal = Terminal::start(terminal_config, cwd, &[])?;
        let last_cwd = terminal
            .last_cwd()
            .unwrap_or_else(|| cwd.display().to_string());
        info!(cwd = %last_cwd, "shell session started");
        Ok(Self {
            terminal,
            state: ShellState::Idle,
            config,
            tokenizer,
            last_cwd,
            last_exit: None,
            last_command: None,
        })
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ShellState::Running(_))
    }

    pub fn is_dead(&self) -> bool {
        self.terminal.is_dead()
    }

    pub fn cwd(&self) -> &str {
        &self.last_cwd
    }

    pub fn screen_snapshot(&self) -> String {
        self.terminal.screen_text()
    }

    /// Run one command. Refuses when a command is already pending.
    pub fn run(&mut self, command: &str, wait_for_seconds: Option<f64>) -> Result<String> {
        if let ShellState::Running(pending) = &self.state {
            let mut screen = self.terminal.screen_text();
            if let Some(running) = &pending.command {
                screen = format!("$ {running}\n{screen}");
            }
            return Err(ToolError::Busy { screen });
        }
        let command = command.trim();
        if command.is_empty() {
            return Err(ToolError::InvalidArgument(
                "command cannot be empty".to_string(),
            ));
        }
        if contains_unquoted_newline(command) {
            return Err(ToolError::InvalidArgument(
                "command contains multiple statements (unescaped newline); run one statement \
                 at a time, or use send_text for heredocs and multi-line input"
                    .to_string(),
            ));
        }

        debug!(%command, "run");
        self.terminal.send_text(&format!("{command}\n"))?;
        self.last_command = Some(command.to_string());
        self.state = ShellState::Running(PendingCommand {
            command: Some(command.to_string()),
            started: Instant::now(),
        });
        self.wait_and_collect(self.resolve_wait(wait_for_seconds))
    }

    /// Wait on the pending command without sending anything.
    pub fn status_check(&mut self, wait_for_seconds: Option<f64>) -> Result<String> {
        if !self.is_running() {
            let footer = self.status_footer();
            return Ok(format!("No running command to check status of{footer}"));
        }
        self.wait_and_collect(self.resolve_wait(wait_for_seconds))
    }

    /// Inject literal text; a trailing newline is added so heredoc lines
    /// and REPL input execute.
    pub fn send_text(&mut self, text: &str, wait_for_seconds: Option<f64>) -> Result<String> {
        if text.is_empty() {
            return Err(ToolError::InvalidArgument(
                "send_text cannot be empty".to_string(),
            ));
        }
        debug!(bytes = text.len(), "send_text");
        self.terminal.send_text(text)?;
        self.terminal.send_text("\n")?;
        self.mark_running_for_input();
        self.wait_and_collect(self.resolve_wait(wait_for_seconds))
    }

    /// Send symbolic keys. Ctrl-c here is a plain keystroke, not the
    /// engine-level interrupt.
    pub fn send_specials(
        &mut self,
        specials: &[Special],
        wait_for_seconds: Option<f64>,
    ) -> Result<String> {
        if specials.is_empty() {
            return Err(ToolError::InvalidArgument(
                "send_specials cannot be empty".to_string(),
            ));
        }
        debug!(?specials, "send_specials");
        self.terminal.send_specials(specials)?;
        self.mark_running_for_input();
        self.wait_and_collect(self.resolve_wait(wait_for_seconds))
    }

    /// Send raw byte codes.
    pub fn send_ascii(&mut self, codes: &[u8], wait_for_seconds: Option<f64>) -> Result<String> {
        if codes.is_empty() {
            return Err(ToolError::InvalidArgument(
                "send_ascii cannot be empty".to_string(),
            ));
        }
        debug!(?codes, "send_ascii");
        self.terminal.send_ascii(codes)?;
        self.mark_running_for_input();
        self.wait_and_collect(self.resolve_wait(wait_for_seconds))
    }

    /// Engine-level interrupt: used by `reset_shell`, never by keystrokes.
    pub fn interrupt(&mut self) -> Result<()> {
        self.terminal.interrupt()?;
        self.state = ShellState::Idle;
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.terminal.shutdown();
    }

    /// The footer every tool result ends with: status word plus cwd.
    pub fn status_footer(&mut self) -> String {
        let mut footer = String::from("\n\n---\n\n");
        match &self.state {
            ShellState::Running(pending) => {
                footer.push_str("status = still running\n");
                footer.push_str(&format!(
                    "running for = {} seconds\n",
                    pending.started.elapsed().as_secs()
                ));
            }
            ShellState::Idle => match self.last_exit {
                Some(code) => {
                    footer.push_str(&format!("status = process exited with code {code}\n"));
                }
                None => footer.push_str("status = shell idle\n"),
            },
        }
        footer.push_str(&format!("cwd = {}", self.last_cwd));
        footer
    }

    fn resolve_wait(&self, wait_for_seconds: Option<f64>) -> Duration {
        match wait_for_seconds {
            Some(seconds) if seconds >= 0.0 => Duration::from_secs_f64(seconds),
            _ => self.config.default_wait,
        }
    }

    fn mark_running_for_input(&mut self) {
        if !self.is_running() {
            self.state = ShellState::Running(PendingCommand {
                command: None,
                started: Instant::now(),
            });
        }
    }

    /// The wait heuristic. Polls in quanta until the sentinel or the
    /// deadline; the sentinel flips the state back to idle.
    fn wait_and_collect(&mut self, wait: Duration) -> Result<String> {
        let deadline = Instant::now() + wait;
        let mut accumulated = String::new();
        let mut last_output = Instant::now();

        let outcome = loop {
            let poll = match self.terminal.poll(self.config.poll_quantum) {
                Ok(poll) => poll,
                Err(ToolError::ShellDead) => {
                    self.state = ShellState::Idle;
                    return Err(ToolError::ShellDead);
                }
                Err(other) => return Err(other),
            };
            if !poll.delta.is_empty() {
                accumulated.push_str(&poll.delta);
                last_output = Instant::now();
            }
            if poll.idle {
                self.last_exit = poll.exit_code;
                if let Some(cwd) = poll.cwd {
                    self.last_cwd = cwd;
                }
                self.state = ShellState::Idle;
                break WaitOutcome::Finished;
            }
            let now = Instant::now();
            if now >= deadline {
                if now.duration_since(last_output) < self.config.freshness_window {
                    break WaitOutcome::TimedOutStreaming;
                }
                break WaitOutcome::TimedOutQuiet;
            }
        };

        let mut output = self.strip_command_echo(accumulated);
        let (capped, truncated) = self
            .tokenizer
            .truncate_tail(&output, self.config.max_output_tokens);
        if truncated {
            debug!("shell output hit the token cap");
        }
        output = capped;

        if outcome == WaitOutcome::TimedOutStreaming {
            output.push_str("\n(still running, output streaming)");
        }
        output.push_str(&self.status_footer());
        Ok(output)
    }

    /// Drop the echoed command from the head of the output.
    fn strip_command_echo(&self, output: String) -> String {
        match &self.last_command {
            Some(command) if output.starts_with(command.as_str()) => output
                [command.len()..]
                .trim_start_matches('\n')
                .to_string(),
            _ => output,
        }
    }
}

/// True when `command` holds a newline outside single/double quotes: more
/// than one statement, which `run` refuses.
fn contains_unquoted_newline(command: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    for c in command.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if !in_single => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '\n' if !in_single && !in_double => return true,
            _ => {}
        }
    }
    false
}
