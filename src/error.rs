//! Error types for bridge sessions.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by session operations.
///
/// Recoverable conditions (child EOF, decode failures, exit-status parse
/// failures, interrupts) are handled inside the session and never appear
/// here; these variants are the structural failures a caller must see.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The shell process could not be created.
    #[error("failed to spawn shell '{shell}': {source}")]
    Spawn {
        shell: String,
        #[source]
        source: anyhow::Error,
    },

    /// I/O failure on the pty.
    #[error("pty i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// No prompt appeared within the allotted time.
    #[error("no shell prompt within {0:?}")]
    PromptTimeout(Duration),

    /// The shell exited and could not be brought back.
    #[error("shell exited unexpectedly")]
    ShellExited,

    /// The final input line left the shell at a continuation prompt.
    #[error("continuation prompt found: input was incomplete")]
    IncompleteInput,

    /// A sentinel line carried an unmatched display-id delimiter.
    #[error("malformed rich-content line: {line:?}")]
    MalformedSentinel { line: String },

    /// A command is already in flight on this session.
    #[error("session is busy")]
    Busy,
}
