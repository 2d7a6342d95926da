//! The persistent pseudo-terminal.
//!
//! Owns one PTY child running the user's shell, a reader thread draining
//! the master into a shared byte buffer, and a virtual screen used to turn
//! raw bytes (ANSI escapes, cursor movement, line rewrites) into stable
//! text. Command completion is detected purely through a sentinel line the
//! shell prints with every prompt:
//!
//! `__WCGW_END__<nonce>__<exit>__<pwd>__`
//!
//! The sentinel is the only completion signal; it also carries the exit
//! status and working directory, and is stripped from all returned text.

use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use portable_pty::Child;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use regex_lite::Regex;
use shellbox_protocol::Special;
use tracing::debug;
use tracing::warn;

use crate::error::Result;
use crate::error::ToolError;

/// Default virtual screen geometry: wide and tall enough that ordinary
/// command output never scrolls out of the emulated screen between polls.
pub const DEFAULT_COLS: u16 = 160;
pub const DEFAULT_ROWS: u16 = 500;

/// Keystrokes are written in chunks this size; large pastes otherwise
/// overflow the PTY input buffer on some platforms.
const WRITE_CHUNK: usize = 128;

/// Raw-stream retention cap. Rendering only ever looks at this tail.
const RAW_TAIL_BYTES: usize = 200_000;

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub rows: u16,
    pub cols: u16,
    /// Shell binary; `None` picks `$SHELL` when it is bash, else /bin/bash.
    pub shell_program: Option<String>,
    /// How long `start` waits for the first sentinel.
    pub start_timeout: Duration,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            shell_program: None,
            start_timeout: Duration::from_secs(10),
        }
    }
}

/// One bounded read pass over the terminal.
#[derive(Debug, Default)]
pub struct TerminalPoll {
    /// Rendered text that appeared since the previous poll, with sentinel
    /// lines stripped.
    pub delta: String,
    /// True when the sentinel terminated the delta: the shell is back at
    /// its prompt.
    pub idle: bool,
    /// Exit status parsed from the sentinel, when `idle`.
    pub exit_code: Option<i32>,
    /// Working directory parsed from the sentinel, when `idle`.
    pub cwd: Option<String>,
}

#[derive(Default)]
struct RawStream {
    bytes: Vec<u8>,
    /// Total bytes ever appended; survives front-draining.
    total: u64,
    eof: bool,
}

pub struct Terminal {
    config: TerminalConfig,
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send>,
    writer: Box<dyn Write + Send>,
    stream: Arc<Mutex<RawStream>>,
    reader_thread: Option<JoinHandle<()>>,
    /// Screen snapshot of the previous poll; deltas chain off it.
    last_rendered: Vec<String>,
    seen_total: u64,
    nonce: String,
    sentinel_prefix: String,
    sentinel_regex: Regex,
    /// Exit status and cwd from the most recent sentinel.
    last_exit: Option<i32>,
    last_cwd: Option<String>,
    dead: bool,
}

impl Terminal {
    /// Fork the shell in `cwd` and wait for the first sentinel prompt.
    pub fn start(config: TerminalConfig, cwd: &Path, env: &[(String, String)]) -> Result<Self> {
        std::fs::create_dir_all(cwd)?;

        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ToolError::Terminal(format!("failed to allocate pty: {e}")))?;

        let program = config
            .shell_program
            .clone()
            .unwrap_or_else(default_shell);
        let mut builder = CommandBuilder::new(&program);
        builder.cwd(cwd);
        builder.env("TERM", "xterm-256color");
        for (key, value) in env {
            builder.env(key, value);
        }

        let child = match pair.slave.spawn_command(builder) {
            Ok(child) => child,
            Err(first_err) => {
                // Retry bare-bones; a broken rc file must not take the
                // whole engine down.
                warn!(%program, error = %first_err, "shell spawn failed, retrying without rc");
                let mut retry = CommandBuilder::new(&program);
                retry.arg("--noprofile");
                retry.arg("--norc");
                retry.cwd(cwd);
                retry.env("TERM", "xterm-256color");
                pair.slave
                    .spawn_command(retry)
                    .map_err(|e| ToolError::Terminal(format!("failed to spawn shell: {e}")))?
            }
        };
        drop(pair.slave);

        let master = pair.master;
        let mut reader = master
            .try_clone_reader()
            .map_err(|e| ToolError::Terminal(format!("failed to clone pty reader: {e}")))?;
        let writer = master
            .take_writer()
            .map_err(|e| ToolError::Terminal(format!("failed to take pty writer: {e}")))?;

        let stream = Arc::new(Mutex::new(RawStream::default()));
        let stream_for_reader = Arc::clone(&stream);
        let reader_thread = thread::Builder::new()
            .name("shellbox-pty-reader".to_string())
            .spawn(move || {
                let mut buffer = [0u8; 4096];
                loop {
                    match reader.read(&mut buffer) {
                        Ok(0) => {
                            let mut stream = match stream_for_reader.lock() {
                                Ok(guard) => guard,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            stream.eof = true;
                            break;
                        }
                        Ok(n) => {
                            let mut stream = match stream_for_reader.lock() {
                                Ok(guard) => guard,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            stream.bytes.extend_from_slice(&buffer[..n]);
                            stream.total += n as u64;
                            let overflow = stream.bytes.len().saturating_sub(RAW_TAIL_BYTES);
                            if overflow > 0 {
                                stream.bytes.drain(..overflow);
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => {
                            let mut stream = match stream_for_reader.lock() {
                                Ok(guard) => guard,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            stream.eof = true;
                            break;
                        }
                    }
                }
            })
            .map_err(|e| ToolError::Terminal(format!("failed to spawn reader thread: {e}")))?;

        let nonce = generate_nonce();
        let sentinel_prefix = format!("__WCGW_END__{nonce}__");
        let sentinel_regex = Regex::new(&format!(r"^__WCGW_END__{nonce}__(\d+)__(.*)__$"))
            .map_err(|e| ToolError::Terminal(format!("sentinel regex: {e}")))?;

        let mut terminal = Self {
            config,
            master,
            child,
            writer,
            stream,
            reader_thread: Some(reader_thread),
            last_rendered: Vec::new(),
            seen_total: 0,
            nonce,
            sentinel_prefix,
            sentinel_regex,
            last_exit: None,
            last_cwd: None,
            dead: false,
        };
        terminal.arm_sentinel()?;
        Ok(terminal)
    }

    /// Install the one-shot `PROMPT_COMMAND` that prints the sentinel with
    /// every prompt, then wait for the first one.
    fn arm_sentinel(&mut self) -> Result<()> {
        let nonce = self.nonce.clone();
        let setup = format!(
            " export PAGER=cat GIT_PAGER=cat PS1='' \
             PROMPT_COMMAND='printf \"__WCGW_END__{nonce}__%d__%s__\\n\" \"$?\" \"$PWD\"'\n"
        );
        self.send_text(&setup)?;

        let deadline = Instant::now() + self.config.start_timeout;
        loop {
            let poll = self.poll(Duration::from_millis(200))?;
            if poll.idle {
                debug!(nonce = %self.nonce, "shell ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ToolError::Terminal(
                    "shell did not print its first prompt in time".to_string(),
                ));
            }
        }
    }

    /// Write literal bytes to the master. No newline is added.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_bytes(text.as_bytes())
    }

    /// Map symbolic keys to their byte sequences and write them.
    pub fn send_specials(&mut self, specials: &[Special]) -> Result<()> {
        for special in specials {
            let bytes: &[u8] = match special {
                Special::Enter => b"\n",
                Special::KeyUp => b"\x1b[A",
                Special::KeyDown => b"\x1b[B",
                Special::KeyLeft => b"\x1b[D",
                Special::KeyRight => b"\x1b[C",
                Special::CtrlC => b"\x03",
                Special::CtrlD => b"\x04",
            };
            self.send_bytes(bytes)?;
        }
        Ok(())
    }

    /// Write raw byte codes.
    pub fn send_ascii(&mut self, codes: &[u8]) -> Result<()> {
        self.send_bytes(codes)
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        for chunk in bytes.chunks(WRITE_CHUNK) {
            self.writer
                .write_all(chunk)
                .map_err(|e| ToolError::Terminal(format!("pty write failed: {e}")))?;
        }
        self.writer
            .flush()
            .map_err(|e| ToolError::Terminal(format!("pty flush failed: {e}")))?;
        Ok(())
    }

    /// One bounded read pass: wait up to `max_wait` for new output, feed it
    /// through the screen, and return the rendered delta.
    pub fn poll(&mut self, max_wait: Duration) -> Result<TerminalPoll> {
        self.ensure_alive()?;
        let deadline = Instant::now() + max_wait;
        let snapshot: Vec<u8> = loop {
            {
                let stream = match self.stream.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if stream.total > self.seen_total {
                    self.seen_total = stream.total;
                    break stream.bytes.clone();
                }
                if stream.eof {
                    self.dead = true;
                    return Err(ToolError::ShellDead);
                }
            }
            if Instant::now() >= deadline {
                return Ok(TerminalPoll::default());
            }
            thread::sleep(Duration::from_millis(10));
        };

        let rendered = render_screen(&snapshot, self.config.rows, self.config.cols);
        let delta_lines = incremental_delta(&self.last_rendered, &rendered);
        self.last_rendered = rendered;
        Ok(self.analyze_delta(delta_lines))
    }

    /// The full current screen, sentinel-stripped. Used for Busy snapshots.
    pub fn screen_text(&self) -> String {
        self.last_rendered
            .iter()
            .filter(|line| !line.contains(self.sentinel_prefix.as_str()))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Working directory reported by the most recent sentinel.
    pub fn last_cwd(&self) -> Option<String> {
        self.last_cwd.clone()
    }

    /// Exit status reported by the most recent sentinel.
    pub fn last_exit(&self) -> Option<i32> {
        self.last_exit
    }

    fn analyze_delta(&mut self, delta_lines: Vec<String>) -> TerminalPoll {
        let mut idle = false;
        let mut exit_code = None;
        let mut cwd = None;
        if let Some(last) = delta_lines.iter().rev().find(|l| !l.trim().is_empty()) {
            if let Some(captures) = self.sentinel_regex.captures(last.trim_end()) {
                idle = true;
                exit_code = captures[1].parse::<i32>().ok();
                cwd = Some(captures[2].to_string());
                self.last_exit = exit_code;
                self.last_cwd = cwd.clone();
            }
        }

        // Partial sentinel fragments must never leak into output text, so
        // stripping is by prefix, not by full-line match.
        let cleaned: Vec<&String> = delta_lines
            .iter()
            .filter(|line| !line.contains(self.sentinel_prefix.as_str()))
            .collect();
        let mut delta = cleaned
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n");
        if !delta.is_empty() {
            delta.push('\n');
        }

        TerminalPoll {
            delta,
            idle,
            exit_code,
            cwd,
        }
    }

    /// Send Ctrl-c and wait (twice) for the prompt to come back.
    pub fn interrupt(&mut self) -> Result<()> {
        for attempt in 0..2 {
            self.send_bytes(&[0x03])?;
            let deadline = Instant::now() + Duration::from_secs(3);
            while Instant::now() < deadline {
                match self.poll(Duration::from_millis(200)) {
                    Ok(poll) if poll.idle => return Ok(()),
                    Ok(_) => {}
                    Err(ToolError::ShellDead) => return Err(ToolError::ShellDead),
                    Err(other) => return Err(other),
                }
            }
            debug!(attempt, "interrupt did not reach prompt, retrying");
        }
        Err(ToolError::StillRunning)
    }

    /// Resize the PTY and the virtual screen together.
    pub fn geometry(&mut self, rows: u16, cols: u16) -> Result<()> {
        self.ensure_alive()?;
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ToolError::Terminal(format!("pty resize failed: {e}")))?;
        self.config.rows = rows;
        self.config.cols = cols;
        // The next poll re-renders the retained raw tail at the new size.
        self.last_rendered.clear();
        Ok(())
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    fn ensure_alive(&mut self) -> Result<()> {
        if self.dead {
            return Err(ToolError::ShellDead);
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            self.dead = true;
            return Err(ToolError::ShellDead);
        }
        Ok(())
    }

    /// Kill the child and reap the reader. Restart is a fresh `start`.
    pub fn shutdown(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
        self.dead = true;
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn default_shell() -> String {
    match std::env::var("SHELL") {
        Ok(shell) if shell.ends_with("bash") => shell,
        _ => "/bin/bash".to_string(),
    }
}

fn generate_nonce() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos ^ process::id().rotate_left(16))
}

/// Render raw terminal bytes into displayed lines: escape codes resolved,
/// trailing whitespace stripped, trailing blank rows dropped.
pub(crate) fn render_screen(raw: &[u8], rows: u16, cols: u16) -> Vec<String> {
    let mut parser = vt100::Parser::new(rows, cols, 0);
    parser.process(raw);
    let contents = parser.screen().contents();
    let mut lines: Vec<String> = contents.lines().map(|l| l.trim_end().to_string()).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Lines of `new` that come after the longest suffix of `old` found in it.
/// Both sides are rendered screens; this is what turns two snapshots into
/// "what got printed in between".
pub(crate) fn get_incremental_output(old: &[String], new: &[String]) -> Vec<String> {
    if old.is_empty() {
        return new.to_vec();
    }
    let last_old = &old[old.len() - 1];
    for i in (0..new.len()).rev() {
        if &new[i] != last_old {
            continue;
        }
        let mut aligned = true;
        for j in (0..i).rev() {
            let old_idx = old.len() as isize - 1 + j as isize - i as isize;
            if old_idx < 0 || new[j] != old[old_idx as usize] {
                aligned = false;
                break;
            }
        }
        if aligned {
            return new[i + 1..].to_vec();
        }
    }
    new.to_vec()
}

/// Delta between the previous screen and the current one, tolerating an
/// in-place rewrite of the previous last line (progress bars, REPL echo).
pub(crate) fn incremental_delta(old: &[String], new: &[String]) -> Vec<String> {
    if old.is_empty() {
        return new.to_vec();
    }
    let anchor = &old[..old.len() - 1];
    let mut delta = get_incremental_output(anchor, new);
    if delta.first() == old.last() {
        delta.remove(0);
    }
    delta
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn render_resolves_ansi_and_cr_rewrites() {
        let raw = b"plain\n\x1b[31mred\x1b[0m\nprogress 10%\rprogress 99%\n";
        let rendered = render_screen(raw, 50, 80);
        assert_eq!(rendered, lines(&["plain", "red", "progress 99%"]));
    }

    #[test]
    fn render_drops_trailing_blank_rows() {
        let rendered = render_screen(b"one\n\n\n", 50, 80);
        assert_eq!(rendered, lines(&["one"]));
    }

    #[test]
    fn incremental_output_returns_suffix_after_old_tail() {
        let old = lines(&["a", "b", "c"]);
        let new = lines(&["a", "b", "c", "d", "e"]);
        assert_eq!(get_incremental_output(&old, &new), lines(&["d", "e"]));
    }

    #[test]
    fn incremental_output_handles_scrolled_screens() {
        // The screen scrolled: old lines partially fell off the top.
        let old = lines(&["b", "c", "d"]);
        let new = lines(&["c", "d", "e", "f"]);
        assert_eq!(get_incremental_output(&old, &new), lines(&["e", "f"]));
    }

    #[test]
    fn incremental_output_with_no_overlap_returns_everything() {
        let old = lines(&["x"]);
        let new = lines(&["p", "q"]);
        assert_eq!(get_incremental_output(&old, &new), lines(&["p", "q"]));
    }

    #[test]
    fn incremental_delta_tolerates_rewritten_last_line() {
        let old = lines(&["build started", "progress 10%"]);
        let new = lines(&["build started", "progress 99%", "done"]);
        assert_eq!(
            incremental_delta(&old, &new),
            lines(&["progress 99%", "done"])
        );
    }

    #[test]
    fn incremental_delta_drops_unchanged_last_line() {
        let old = lines(&["a", "b"]);
        let new = lines(&["a", "b", "c"]);
        assert_eq!(incremental_delta(&old, &new), lines(&["c"]));
    }

    #[test]
    fn nonce_is_hex_and_nonempty() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 8);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[cfg(unix)]
    mod live {
        use std::path::PathBuf;

        use super::*;
        use pretty_assertions::assert_eq;

        fn start_terminal() -> (tempfile::TempDir, Terminal) {
            let dir = tempfile::TempDir::new().unwrap();
            let terminal =
                Terminal::start(TerminalConfig::default(), dir.path(), &[]).unwrap();
            (dir, terminal)
        }

        fn run_to_idle(terminal: &mut Terminal, command: &str) -> (String, TerminalPoll) {
            terminal.send_text(&format!("{command}\n")).unwrap();
            let mut output = String::new();
            let deadline = Instant::now() + Duration::from_secs(10);
            loop {
                let poll = terminal.poll(Duration::from_millis(200)).unwrap();
                output.push_str(&poll.delta);
                if poll.idle {
                    return (output, poll);
                }
                assert!(Instant::now() < deadline, "command did not finish: {output}");
            }
        }

        #[test]
        fn echo_round_trip_reports_exit_and_cwd() {
            let (dir, mut terminal) = start_terminal();
            let (output, poll) = run_to_idle(&mut terminal, "echo terminal-works");
            assert!(output.contains("terminal-works"), "output: {output}");
            assert_eq!(poll.exit_code, Some(0));
            let reported = PathBuf::from(poll.cwd.unwrap());
            let expected = dir.path().canonicalize().unwrap();
            assert_eq!(reported.canonicalize().unwrap(), expected);
        }

        #[test]
        fn failing_command_reports_nonzero_exit() {
            let (_dir, mut terminal) = start_terminal();
            let (_, poll) = run_to_idle(&mut terminal, "false");
            assert_eq!(poll.exit_code, Some(1));
        }

        #[test]
        fn sentinel_lines_never_appear_in_output() {
            let (_dir, mut terminal) = start_terminal();
            let (output, _) = run_to_idle(&mut terminal, "echo one && echo two");
            assert!(!output.contains("__WCGW_END__"), "output: {output}");
        }

        #[test]
        fn interrupt_stops_a_sleep() {
            let (_dir, mut terminal) = start_terminal();
            terminal.send_text("sleep 60\n").unwrap();
            // Give the command a moment to start.
            let _ = terminal.poll(Duration::from_millis(300)).unwrap();
            terminal.interrupt().unwrap();
            let (output, poll) = run_to_idle(&mut terminal, "echo after-interrupt");
            assert!(poll.idle);
            assert!(output.contains("after-interrupt"));
        }

        #[test]
        fn dead_shell_surfaces_shell_dead() {
            let (_dir, mut terminal) = start_terminal();
            terminal.send_text("exit\n").unwrap();
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                match terminal.poll(Duration::from_millis(100)) {
                    Err(ToolError::ShellDead) => break,
                    Ok(_) => {}
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
                assert!(Instant::now() < deadline, "shell never died");
            }
            assert!(matches!(
                terminal.send_text("echo nope\n"),
                Err(ToolError::ShellDead)
            ));
        }
    }
}
