//! shellbridge — drive a long-lived POSIX shell through a pty on behalf
//! of a request/response caller.
//!
//! The session streams output incrementally as a command runs, recovers
//! rich-media payloads smuggled through the plain-text channel via
//! sentinel lines, and can answer interactive secret prompts (`su`,
//! `sudo`, `passwd`) without echoing the secret. The outer transport is
//! the caller's concern: supply an [`EventSink`] for outgoing events and
//! a [`SecretProvider`] for the one blocking inbound request.
//!
//! ```no_run
//! use shellbridge::{Config, KernelEvent, SecretProvider, Session};
//!
//! struct NoSecrets;
//! impl SecretProvider for NoSecrets {
//!     fn get_secret(&mut self, _prompt: &str) -> String {
//!         String::new()
//!     }
//! }
//!
//! # fn main() -> Result<(), shellbridge::SessionError> {
//! let mut session = Session::start(Config::default(), Box::new(NoSecrets))?;
//! let mut events: Vec<KernelEvent> = Vec::new();
//! let outcome = session.execute("echo hello", false, &mut events)?;
//! println!("{:?} -> {:?}", outcome, events);
//! # Ok(())
//! # }
//! ```

pub mod complete;
pub mod config;
pub mod content;
pub mod error;
pub mod protocol;
pub mod repl;

pub use complete::ShellQuery;
pub use config::{Config, ConfigError};
pub use content::{
    ContentBody, ContentExtractor, ContentKind, ContentSpec, DisplayRegistry, DisplayRoute,
    Extraction, RichContent, CAPABILITIES_ENV,
};
pub use error::SessionError;
pub use protocol::{
    CompletionReply, EventSink, ExecuteOutcome, ExitStatus, KernelEvent, SecretProvider,
};
pub use repl::{Interrupter, Session, SessionState};
