//! Interactive-secret handling for privilege-class commands.
//!
//! Commands that may demand a password (`su`, `sudo`, `passwd`) cannot go
//! through the plain incremental loop: the secret prompt never ends in a
//! newline, and the secret itself must never be echoed back as output.
//! A closed classifier table decides which commands get the extended
//! treatment; everything else runs as an ordinary command even when it
//! happens to print something password-shaped.

use std::io::Write;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use regex::Regex as TextRegex;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::protocol::SecretProvider;
use crate::repl::driver::{wait_prompt, PromptKind, PromptPatterns, StreamError};
use crate::repl::expect::{ExpectError, Expecter, PatternSet, Wait};

/// The closed set of command classes that receive credential handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandClass {
    /// `su -` / `su -l` / `su --login`: replaces the shell and overrides
    /// the environment.
    LoginShell,
    /// Plain `su`: replaces the shell, keeps the environment.
    SwitchUser,
    /// `passwd`: prompts repeatedly, never replaces the shell.
    PasswordChange,
    /// `sudo ...`: elevated execution in the same shell.
    Elevated,
}

impl CommandClass {
    /// Classes that leave a brand-new shell layer reading our pty, with
    /// no idea what the synchronization prompt looks like.
    pub(crate) fn replaces_shell(self) -> bool {
        matches!(self, CommandClass::LoginShell | CommandClass::SwitchUser)
    }
}

static CLASSIFIERS: Lazy<Vec<(TextRegex, CommandClass)>> = Lazy::new(|| {
    // Priority order: more specific forms first.
    vec![
        (
            TextRegex::new(r"^\s*su\s+(-|-l|--login)(\s|$)").unwrap(),
            CommandClass::LoginShell,
        ),
        (TextRegex::new(r"^\s*su(\s|$)").unwrap(), CommandClass::SwitchUser),
        (
            TextRegex::new(r"^\s*passwd(\s|$)").unwrap(),
            CommandClass::PasswordChange,
        ),
        (TextRegex::new(r"^\s*sudo(\s|$)").unwrap(), CommandClass::Elevated),
    ]
});

/// First classifier that matches wins; unmatched commands are ordinary.
pub(crate) fn classify(command: &str) -> Option<CommandClass> {
    CLASSIFIERS
        .iter()
        .find(|(pattern, _)| pattern.is_match(command))
        .map(|(_, class)| *class)
}

const SECRET_PROMPTS: &[&str] = &[
    r"(?i)password[^\r\n]*:[ \t]*",
    r"(?i)passphrase[^\r\n]*:[ \t]*",
];

const FAILURE_PHRASES: &[&str] = &[
    r"(?i)sorry, try again",
    r"(?i)authentication failure",
    r"(?i)incorrect password attempt",
    r"(?i)authentication token manipulation error",
];

const BENIGN_PHRASES: &[&str] = &[
    r"(?i)password updated successfully",
    r"(?i)authentication tokens updated successfully",
];

static SECRET_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| compile(SECRET_PROMPTS));
static FAILURE_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| compile(FAILURE_PHRASES));
static BENIGN_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| compile(BENIGN_PHRASES));

fn compile(sources: &[&str]) -> Vec<Regex> {
    sources
        .iter()
        .map(|source| Regex::new(source).unwrap())
        .collect()
}

/// What a match index in the extended table means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialMatch {
    Prompt(PromptKind),
    Secret,
    Failure,
    Benign,
}

/// The extended pattern set: both prompts first, then secret prompts,
/// failure phrasings, and benign terminal phrasings.
pub(crate) struct CredentialPatterns {
    pub(crate) set: PatternSet,
    secret_end: usize,
    failure_end: usize,
}

impl CredentialPatterns {
    pub(crate) fn new(primary: &str, continuation: &str) -> Self {
        let mut patterns = vec![
            PatternSet::literal(primary),
            PatternSet::literal(continuation),
        ];
        patterns.extend(SECRET_REGEXES.iter().cloned());
        let secret_end = patterns.len();
        patterns.extend(FAILURE_REGEXES.iter().cloned());
        let failure_end = patterns.len();
        patterns.extend(BENIGN_REGEXES.iter().cloned());
        Self {
            set: PatternSet::new(patterns),
            secret_end,
            failure_end,
        }
    }

    fn classify(&self, index: usize) -> CredentialMatch {
        if index < 2 {
            CredentialMatch::Prompt(PromptKind::from_index(index))
        } else if index < self.secret_end {
            CredentialMatch::Secret
        } else if index < self.failure_end {
            CredentialMatch::Failure
        } else {
            CredentialMatch::Benign
        }
    }
}

/// Borrowed session state for one credential exchange.
pub(crate) struct CredentialExchange<'a> {
    pub expecter: &'a mut Expecter,
    pub writer: &'a mut (dyn Write + Send),
    pub patterns: &'a PromptPatterns,
    pub class: CommandClass,
    pub prompt_change: String,
    pub first_timeout: Duration,
    pub settle_timeout: Duration,
    pub secrets: &'a mut dyn SecretProvider,
    pub on_output: &'a mut dyn FnMut(&str) -> Result<(), SessionError>,
}

/// Nested expect loop for one credential-class command.
///
/// The command itself has already been written; this loop answers secret
/// prompts until a prompt, failure phrase, or benign ending appears.
/// Authentication failure is reported as text, never raised — the real
/// exit status flows through normal retrieval afterwards.
pub(crate) fn run_exchange(mut exchange: CredentialExchange<'_>) -> Result<(), StreamError> {
    let mut first = true;
    let mut resynchronized = false;
    loop {
        let wait = if first {
            Wait::For(exchange.first_timeout)
        } else {
            Wait::Unbounded
        };
        let result = exchange
            .expecter
            .expect(&exchange.patterns.credential.set, wait);
        first = false;
        let m = match result {
            Ok(m) => m,
            Err(ExpectError::Timeout) => continue,
            Err(ExpectError::Eof { pending }) => {
                if resynchronized {
                    return Err(ExpectError::Eof { pending }.into());
                }
                resynchronized = true;
                warn!("credential exchange lost synchronization; resending prompt change");
                if !pending.is_empty() {
                    (exchange.on_output)(&pending)?;
                }
                send_line(exchange.writer, &exchange.prompt_change);
                continue;
            }
        };
        match exchange.patterns.credential.classify(m.index) {
            CredentialMatch::Prompt(kind) => {
                debug!(?kind, "credential exchange reached a prompt");
                if !m.before.is_empty() {
                    (exchange.on_output)(&m.before)?;
                }
                return Ok(());
            }
            CredentialMatch::Secret => {
                let mut echoed = m.before;
                echoed.push_str(&m.matched);
                (exchange.on_output)(&echoed)?;
                let secret = exchange.secrets.get_secret(&m.matched);
                send_line(exchange.writer, &secret);
                if exchange.class.replaces_shell() {
                    // The replacement layer does not know our prompt yet.
                    send_line(exchange.writer, &exchange.prompt_change);
                }
            }
            CredentialMatch::Failure | CredentialMatch::Benign => {
                let mut text = m.before;
                text.push_str(&m.matched);
                (exchange.on_output)(&text)?;
                absorb_banner(&mut exchange)?;
                return Ok(());
            }
        }
    }
}

/// Two short best-effort prompt waits soaking up residual banner text
/// after an authentication verdict.
fn absorb_banner(exchange: &mut CredentialExchange<'_>) -> Result<(), SessionError> {
    for _ in 0..2 {
        match wait_prompt(
            exchange.expecter,
            exchange.patterns,
            Wait::For(exchange.settle_timeout),
        ) {
            Ok((_, text)) => {
                if !text.is_empty() {
                    (exchange.on_output)(&text)?;
                }
                break;
            }
            Err(_) => {}
        }
    }
    Ok(())
}

/// Best-effort write; a dead child surfaces as EOF on the next read.
fn send_line(writer: &mut (dyn Write + Send), line: &str) {
    let _ = writer.write_all(line.as_bytes());
    let _ = writer.write_all(b"\n");
    let _ = writer.flush();
}
