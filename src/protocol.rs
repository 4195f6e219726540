//! Types exchanged with the upstream caller.
//!
//! The outer message envelope and transport are not this crate's concern;
//! the caller supplies an [`EventSink`] for outgoing events and a
//! [`SecretProvider`] for the one blocking inbound request a command can
//! make (an interactive secret).

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::content::ContentKind;

/// Events emitted toward the caller while a command runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEvent {
    /// Plain output text, forwarded incrementally.
    Stream { text: String },
    /// Rich content not yet seen under its display id (or carrying none).
    Display {
        kind: ContentKind,
        data: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_id: Option<String>,
    },
    /// Replacement for rich content previously emitted under the same id.
    UpdateDisplay {
        kind: ContentKind,
        data: Value,
        display_id: String,
    },
}

/// How a command execution concluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecuteOutcome {
    Ok,
    Error { code: String },
    Abort,
}

/// Exit status of the most recent shell command.
///
/// Parse failures never surface as errors; they collapse into `Unknown`,
/// which is treated as nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Unknown,
}

impl ExitStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "{}", code),
            ExitStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reply to a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReply {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
}

impl CompletionReply {
    /// The distinct "no completions" outcome: not an error, just nothing
    /// to offer.
    pub fn empty(cursor_end: usize) -> Self {
        Self {
            matches: Vec::new(),
            cursor_start: 0,
            cursor_end,
        }
    }
}

/// Receives events produced while a command runs.
pub trait EventSink {
    fn send(&mut self, event: KernelEvent);
}

impl EventSink for Vec<KernelEvent> {
    fn send(&mut self, event: KernelEvent) {
        self.push(event);
    }
}

/// Blocking source for interactive secrets.
///
/// Invoked only after the triggering prompt text has already been
/// forwarded to the caller, and never when credential handling is
/// disabled.
pub trait SecretProvider {
    fn get_secret(&mut self, prompt: &str) -> String;
}
