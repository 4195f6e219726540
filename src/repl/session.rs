//! One live shell session: the prompt-synchronized command/response
//! cycle, interrupts, and transparent restart.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use portable_pty::{Child, MasterPty};
use regex::bytes::Regex;
use tracing::{debug, info, warn};

use crate::complete::{self, ShellQuery};
use crate::config::Config;
use crate::content::{ContentBody, ContentExtractor, DisplayRegistry, DisplayRoute};
use crate::error::SessionError;
use crate::protocol::{
    CompletionReply, EventSink, ExecuteOutcome, ExitStatus, KernelEvent, SecretProvider,
};
use crate::repl::credentials::{classify, run_exchange, CommandClass, CredentialExchange};
use crate::repl::driver::{
    stream_until_prompt, wait_prompt, PromptKind, PromptPatterns, StreamError,
};
use crate::repl::expect::{ExpectError, Expecter, PatternSet, Wait};
use crate::repl::prompt::PromptToken;
use crate::repl::spawn::{spawn_shell, InitFile, SpawnedShell};

/// Session lifecycle states. EOF on the child walks
/// Running → Dead → Starting → Idle rather than surfacing an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Idle,
    Running,
    Interrupted,
    Dead,
}

/// Prompt drawn by the generated rc file before synchronization.
static RC_PROMPT: Lazy<PatternSet> =
    Lazy::new(|| PatternSet::new(vec![Regex::new(r"[$#]").unwrap()]));

const BRACKETED_PASTE_OFF: &str = "bind 'set enable-bracketed-paste off' 2>/dev/null || true";

/// A long-lived shell driven through a pty on behalf of a
/// request/response caller.
///
/// All per-session state (prompt token, display registry, capability
/// table) lives here, tied to one process handle; concurrent sessions
/// never interfere.
pub struct Session {
    config: Config,
    state: SessionState,
    token: PromptToken,
    patterns: PromptPatterns,
    child: Box<dyn Child + Send + Sync>,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    child_pid: Arc<Mutex<Option<u32>>>,
    writer: Box<dyn Write + Send>,
    expecter: Expecter,
    reader_handle: Option<thread::JoinHandle<()>>,
    extractor: ContentExtractor,
    registry: DisplayRegistry,
    secrets: Box<dyn SecretProvider + Send>,
    interrupted: Arc<AtomicBool>,
}

/// How a run phase ended, before exit-status retrieval.
enum RunEnd {
    Completed { status: Option<ExitStatus> },
    Died { pending: String },
}

/// Terminal condition of one streaming loop.
enum LoopEnd {
    Prompt(PromptKind),
    Died(String),
}

impl Session {
    /// Spawn the configured shell and synchronize its prompt.
    pub fn start(
        config: Config,
        secrets: Box<dyn SecretProvider + Send>,
    ) -> Result<Self, SessionError> {
        let token = PromptToken::generate();
        let patterns = PromptPatterns::new(&token);
        let SpawnedShell {
            child,
            master,
            writer,
            reader_rx,
            reader_handle,
            init,
        } = spawn_shell(&config.shell)?;
        let child_pid = child.process_id();
        let temp_dir = config.content.temp_dir.clone();
        let mut session = Session {
            state: SessionState::Starting,
            token,
            patterns,
            master: Arc::new(Mutex::new(master)),
            child_pid: Arc::new(Mutex::new(child_pid)),
            child,
            writer,
            expecter: Expecter::new(reader_rx),
            reader_handle: Some(reader_handle),
            extractor: ContentExtractor::new(temp_dir),
            registry: DisplayRegistry::default(),
            secrets,
            interrupted: Arc::new(AtomicBool::new(false)),
            config,
        };
        session.synchronize(init)?;
        session.apply_setup()?;
        session.state = SessionState::Idle;
        info!("shell session ready");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Comma-joined rich-content capability list advertised to the child.
    pub fn capabilities(&self) -> String {
        self.extractor.capabilities()
    }

    /// Execute one command, streaming output through `sink`.
    ///
    /// Concludes `Ok`, `Error { code }`, or `Abort`. Silent mode runs the
    /// command but emits nothing.
    pub fn execute(
        &mut self,
        code: &str,
        silent: bool,
        sink: &mut dyn EventSink,
    ) -> Result<ExecuteOutcome, SessionError> {
        if code.trim().is_empty() {
            return Ok(ExecuteOutcome::Ok);
        }
        self.ensure_ready()?;
        self.interrupted.store(false, Ordering::SeqCst);
        self.state = SessionState::Running;
        let result = self.execute_inner(code, silent, sink);
        self.state = match &result {
            Err(SessionError::ShellExited) => SessionState::Dead,
            _ => SessionState::Idle,
        };
        result
    }

    fn execute_inner(
        &mut self,
        code: &str,
        silent: bool,
        sink: &mut dyn EventSink,
    ) -> Result<ExecuteOutcome, SessionError> {
        let class = if self.config.credentials.enabled {
            classify(code)
        } else {
            None
        };
        let end = match class {
            Some(class) => self.run_credentials(code, class, silent, sink)?,
            None => self.run_streaming(code, silent, sink)?,
        };
        let mut captured = None;
        match end {
            RunEnd::Completed { status } => captured = status,
            RunEnd::Died { pending } => {
                let notice = format!("{}Restarting {}", pending, self.shell_name());
                self.emit(&notice, silent, sink)?;
                self.restart()?;
            }
        }
        if self.interrupted.swap(false, Ordering::SeqCst) {
            debug!("command aborted by interrupt");
            return Ok(ExecuteOutcome::Abort);
        }
        let status = match captured {
            Some(status) => status,
            None => self.exit_status(),
        };
        Ok(if status.is_success() {
            ExecuteOutcome::Ok
        } else {
            ExecuteOutcome::Error {
                code: status.to_string(),
            }
        })
    }

    /// Complete `code` at `cursor` using the live shell's namespaces.
    pub fn complete(
        &mut self,
        code: &str,
        cursor: usize,
    ) -> Result<CompletionReply, SessionError> {
        self.ensure_ready()?;
        complete::complete(self, code, cursor)
    }

    /// A cloneable handle that can interrupt this session from another
    /// thread, even while a read is blocked.
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            master: Arc::clone(&self.master),
            child_pid: Arc::clone(&self.child_pid),
            interrupted: Arc::clone(&self.interrupted),
        }
    }

    /// Interrupt the foreground command and resynchronize: platform
    /// interrupt to the child's process group, a non-incremental wait for
    /// the next prompt, pending text forwarded. Always `Abort`; a
    /// restart happens only if the child also died.
    pub fn interrupt(&mut self, sink: &mut dyn EventSink) -> Result<ExecuteOutcome, SessionError> {
        self.state = SessionState::Interrupted;
        self.interrupter().interrupt();
        let result = self.interrupt_inner(sink);
        self.interrupted.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                self.state = SessionState::Idle;
                Ok(ExecuteOutcome::Abort)
            }
            Err(err) => {
                self.state = SessionState::Dead;
                Err(err)
            }
        }
    }

    fn interrupt_inner(&mut self, sink: &mut dyn EventSink) -> Result<(), SessionError> {
        let timeout = self.prompt_timeout();
        match wait_prompt(&mut self.expecter, &self.patterns, Wait::For(timeout)) {
            Ok((_, text)) => {
                if !text.is_empty() {
                    self.emit(&text, false, sink)?;
                }
            }
            Err(ExpectError::Eof { pending }) => {
                let notice = format!("{}Restarting {}", pending, self.shell_name());
                self.emit(&notice, false, sink)?;
                self.restart()?;
            }
            Err(ExpectError::Timeout) => warn!("no prompt appeared after interrupt"),
        }
        Ok(())
    }

    // -- run phases ----------------------------------------------------------

    fn run_streaming(
        &mut self,
        code: &str,
        silent: bool,
        sink: &mut dyn EventSink,
    ) -> Result<RunEnd, SessionError> {
        let prompt_timeout = self.prompt_timeout();
        let text = code.trim_end();
        let mut lines = text.lines();
        let first = lines.next().unwrap_or("");
        let rest: Vec<&str> = lines.collect();
        if self.send_line(first).is_err() {
            return Ok(RunEnd::Died {
                pending: String::new(),
            });
        }

        let Session {
            expecter,
            patterns,
            extractor,
            registry,
            writer,
            ..
        } = self;
        let mut on_chunk = |chunk: &str| emit_chunk(extractor, registry, chunk, silent, sink);

        // Multi-line input goes line by line, waiting for a prompt
        // (usually the continuation prompt) between lines.
        for line in rest {
            match drive_stream(expecter, patterns, &mut on_chunk, prompt_timeout)? {
                LoopEnd::Prompt(_) => {}
                LoopEnd::Died(pending) => return Ok(RunEnd::Died { pending }),
            }
            if write_line(writer, line).is_err() {
                return Ok(RunEnd::Died {
                    pending: String::new(),
                });
            }
        }
        match drive_stream(expecter, patterns, &mut on_chunk, prompt_timeout)? {
            LoopEnd::Prompt(PromptKind::Primary) => Ok(RunEnd::Completed { status: None }),
            LoopEnd::Prompt(PromptKind::Continuation) => Err(SessionError::IncompleteInput),
            LoopEnd::Died(pending) => Ok(RunEnd::Died { pending }),
        }
    }

    fn run_credentials(
        &mut self,
        code: &str,
        class: CommandClass,
        silent: bool,
        sink: &mut dyn EventSink,
    ) -> Result<RunEnd, SessionError> {
        debug!(?class, "running credential-class command");
        if self.send_line(code.trim_end()).is_err() {
            return Ok(RunEnd::Died {
                pending: String::new(),
            });
        }
        let prompt_change = self.token.change_command();
        if class.replaces_shell() {
            // A no-password replacement (same-user su) would otherwise
            // leave the new layer with an unknown prompt.
            let _ = write_line(&mut self.writer, &prompt_change);
        }
        let first_timeout = Duration::from_secs(self.config.credentials.first_prompt_timeout_secs);
        let settle_timeout = Duration::from_millis(self.config.credentials.settle_timeout_ms);

        let outcome = {
            let Session {
                expecter,
                patterns,
                extractor,
                registry,
                writer,
                secrets,
                ..
            } = self;
            let mut on_output =
                |chunk: &str| emit_chunk(extractor, registry, chunk, silent, sink);
            run_exchange(CredentialExchange {
                expecter,
                writer: &mut **writer,
                patterns,
                class,
                prompt_change,
                first_timeout,
                settle_timeout,
                secrets: &mut **secrets,
                on_output: &mut on_output,
            })
        };
        match outcome {
            Ok(()) => {}
            Err(StreamError::Expect(ExpectError::Eof { pending })) => {
                return Ok(RunEnd::Died { pending })
            }
            Err(StreamError::Expect(ExpectError::Timeout)) => {
                return Err(SessionError::PromptTimeout(first_timeout))
            }
            Err(StreamError::Session(err)) => return Err(err),
        }

        // Capture the command's status before setup commands clobber $?.
        let status = self.exit_status();
        // A newly entered shell layer must retain the same capabilities.
        if let Err(error) = self.apply_setup() {
            warn!(%error, "setup re-application after credential command failed");
        }
        Ok(RunEnd::Completed {
            status: Some(status),
        })
    }

    // -- bookkeeping ---------------------------------------------------------

    /// Non-incremental mode: run a command and return its full buffered
    /// output without streaming anything to the caller.
    fn run_quiet(&mut self, code: &str) -> Result<String, SessionError> {
        let timeout = self.prompt_timeout();
        let mut lines = code.lines();
        let first = lines.next().unwrap_or("");
        self.send_line(first)?;
        let mut output = String::new();
        for line in lines {
            let (_, text) = wait_prompt(&mut self.expecter, &self.patterns, Wait::For(timeout))
                .map_err(|err| quiet_error(err, timeout))?;
            output.push_str(&text);
            self.send_line(line)?;
        }
        let (kind, text) = wait_prompt(&mut self.expecter, &self.patterns, Wait::For(timeout))
            .map_err(|err| quiet_error(err, timeout))?;
        output.push_str(&text);
        if kind == PromptKind::Continuation {
            return Err(SessionError::IncompleteInput);
        }
        Ok(output)
    }

    /// `echo $?` after a normal command; parse failures collapse into the
    /// opaque nonzero status rather than propagating.
    fn exit_status(&mut self) -> ExitStatus {
        match self.run_quiet("echo $?") {
            Ok(output) => parse_exit_status(&output),
            Err(error) => {
                warn!(%error, "exit-status retrieval failed");
                ExitStatus::Unknown
            }
        }
    }

    fn emit(
        &mut self,
        chunk: &str,
        silent: bool,
        sink: &mut dyn EventSink,
    ) -> Result<(), SessionError> {
        emit_chunk(&self.extractor, &mut self.registry, chunk, silent, sink)
    }

    fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        write_line(&mut self.writer, line)?;
        Ok(())
    }

    fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.config.shell.prompt_timeout_secs)
    }

    fn shell_name(&self) -> String {
        Path::new(&self.config.shell.path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.shell.path.clone())
    }

    fn ensure_ready(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::Dead => self.restart(),
            _ => Err(SessionError::Busy),
        }
    }

    // -- lifecycle -----------------------------------------------------------

    /// Expect the rc prompt, install the token prompts, and wait for the
    /// first synchronized prompt. The generated init file is removed once
    /// the exchange completes.
    fn synchronize(&mut self, init: InitFile) -> Result<(), SessionError> {
        let timeout = Duration::from_secs(self.config.shell.startup_timeout_secs);
        let result = self.synchronize_inner(timeout);
        init.cleanup();
        result
    }

    fn synchronize_inner(&mut self, timeout: Duration) -> Result<(), SessionError> {
        self.expecter
            .expect(&RC_PROMPT, Wait::For(timeout))
            .map_err(|err| quiet_error(err, timeout))?;
        let change = self.token.change_command();
        self.send_line(&change)?;
        wait_prompt(&mut self.expecter, &self.patterns, Wait::For(timeout))
            .map_err(|err| quiet_error(err, timeout))?;
        debug!("prompt synchronized");
        Ok(())
    }

    /// The two idempotent setup commands every (re)started or newly
    /// entered shell layer needs: bracketed paste corrupts prompt
    /// matching, and the rich-content helpers must exist before anything
    /// can pipe into them.
    fn apply_setup(&mut self) -> Result<(), SessionError> {
        self.run_quiet(BRACKETED_PASTE_OFF)?;
        let script = self.extractor.setup_script();
        self.run_quiet(&script)?;
        Ok(())
    }

    /// EOF recovery: kill what's left, spawn a fresh shell with a fresh
    /// token, reset the display registry, resynchronize.
    fn restart(&mut self) -> Result<(), SessionError> {
        info!(shell = %self.config.shell.path, "restarting shell");
        self.state = SessionState::Dead;
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
        self.state = SessionState::Starting;
        self.token = PromptToken::generate();
        self.patterns = PromptPatterns::new(&self.token);
        self.registry.reset();
        let SpawnedShell {
            child,
            master,
            writer,
            reader_rx,
            reader_handle,
            init,
        } = spawn_shell(&self.config.shell)?;
        *self.master.lock() = master;
        *self.child_pid.lock() = child.process_id();
        self.child = child;
        self.writer = writer;
        self.expecter = Expecter::new(reader_rx);
        self.reader_handle = Some(reader_handle);
        self.synchronize(init)?;
        self.apply_setup()?;
        self.state = SessionState::Idle;
        Ok(())
    }
}

impl ShellQuery for Session {
    fn query(&mut self, command: &str) -> Result<String, SessionError> {
        self.run_quiet(command)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Interrupts a session's foreground process group from any thread; the
/// only operation that is safe while a read is in flight.
#[derive(Clone)]
pub struct Interrupter {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    child_pid: Arc<Mutex<Option<u32>>>,
    interrupted: Arc<AtomicBool>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        // Job control puts the running command in its own foreground
        // group; signaling only the shell's group would miss it.
        let pgid = self
            .master
            .lock()
            .process_group_leader()
            .or_else(|| (*self.child_pid.lock()).map(|pid| pid as libc::pid_t));
        if let Some(pgid) = pgid {
            if pgid > 0 {
                let _ = unsafe { libc::killpg(pgid, libc::SIGINT) };
            }
        }
    }
}

fn write_line<W: Write + ?Sized>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn drive_stream(
    expecter: &mut Expecter,
    patterns: &PromptPatterns,
    on_chunk: &mut dyn FnMut(&str) -> Result<(), SessionError>,
    prompt_timeout: Duration,
) -> Result<LoopEnd, SessionError> {
    match stream_until_prompt(expecter, patterns, on_chunk) {
        Ok(kind) => Ok(LoopEnd::Prompt(kind)),
        Err(StreamError::Expect(ExpectError::Eof { pending })) => Ok(LoopEnd::Died(pending)),
        Err(StreamError::Expect(ExpectError::Timeout)) => {
            Err(SessionError::PromptTimeout(prompt_timeout))
        }
        Err(StreamError::Session(err)) => Err(err),
    }
}

fn quiet_error(err: ExpectError, timeout: Duration) -> SessionError {
    match err {
        ExpectError::Timeout => SessionError::PromptTimeout(timeout),
        ExpectError::Eof { .. } => SessionError::ShellExited,
    }
}

fn parse_exit_status(output: &str) -> ExitStatus {
    output
        .lines()
        .next()
        .map(str::trim)
        .and_then(|line| line.parse::<i32>().ok())
        .map(ExitStatus::Code)
        .unwrap_or(ExitStatus::Unknown)
}

/// Route one flushed chunk: extraction, then stream and display events.
fn emit_chunk(
    extractor: &ContentExtractor,
    registry: &mut DisplayRegistry,
    chunk: &str,
    silent: bool,
    sink: &mut dyn EventSink,
) -> Result<(), SessionError> {
    if silent {
        return Ok(());
    }
    let extraction = extractor.extract(chunk)?;
    if !extraction.text.is_empty() {
        sink.send(KernelEvent::Stream {
            text: extraction.text,
        });
    }
    for content in extraction.contents {
        match content.body {
            ContentBody::DecodeError(message) => {
                sink.send(KernelEvent::Stream {
                    text: format!("{}\n", message),
                });
            }
            ContentBody::Data(data) => {
                let route = registry.route(content.display_id.as_deref());
                match (route, content.display_id) {
                    (DisplayRoute::Update, Some(display_id)) => {
                        sink.send(KernelEvent::UpdateDisplay {
                            kind: content.kind,
                            data,
                            display_id,
                        });
                    }
                    (_, display_id) => {
                        sink.send(KernelEvent::Display {
                            kind: content.kind,
                            data,
                            display_id,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_parses_first_line() {
        assert_eq!(parse_exit_status("0\r\n"), ExitStatus::Code(0));
        assert_eq!(parse_exit_status("17\r\nnoise"), ExitStatus::Code(17));
        assert_eq!(parse_exit_status("-1\r\n"), ExitStatus::Code(-1));
    }

    #[test]
    fn exit_status_parse_failures_are_opaque_nonzero() {
        assert_eq!(parse_exit_status(""), ExitStatus::Unknown);
        assert_eq!(parse_exit_status("garbage"), ExitStatus::Unknown);
        assert_eq!(parse_exit_status("1.5"), ExitStatus::Unknown);
        assert!(!parse_exit_status("garbage").is_success());
    }

    #[test]
    fn decode_errors_render_as_stream_text() {
        let extractor = ContentExtractor::new(None);
        let mut registry = DisplayRegistry::default();
        let mut events: Vec<KernelEvent> = Vec::new();
        let line = "shellbridge: saved image data to: /nonexistent/file\n";
        emit_chunk(&extractor, &mut registry, line, false, &mut events).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            KernelEvent::Stream { text } => {
                assert!(text.contains("could not read image data"))
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn silent_mode_emits_nothing() {
        let extractor = ContentExtractor::new(None);
        let mut registry = DisplayRegistry::default();
        let mut events: Vec<KernelEvent> = Vec::new();
        emit_chunk(&extractor, &mut registry, "hello\n", true, &mut events).unwrap();
        assert!(events.is_empty());
    }
}
