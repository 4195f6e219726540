//! Prompt-synchronizing read loops.
//!
//! Two modes share the expect primitive: the incremental loop streams
//! output line by line until a prompt appears, and the quiet loop waits
//! for a prompt and hands back everything before it in one piece. The
//! quiet loop serves internal bookkeeping (exit-status retrieval,
//! completion queries, setup commands) that must never reach the caller
//! as stream events.

use crate::error::SessionError;
use crate::repl::credentials::CredentialPatterns;
use crate::repl::expect::{ExpectError, Expecter, Matched, PatternSet, Wait};
use crate::repl::prompt::PromptToken;

/// Which prompt ended a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromptKind {
    Primary,
    Continuation,
}

/// Pattern tables compiled once per prompt token.
///
/// Index layout is load-bearing: every table starts with
/// [primary, continuation] so `PromptKind::from_index` works across them.
pub(crate) struct PromptPatterns {
    /// [primary, continuation]
    pub quiet: PatternSet,
    /// [primary, continuation, "\r\n", "\n", "\r"]
    pub incremental: PatternSet,
    /// [primary, continuation, secret prompts, failures, benign endings]
    pub credential: CredentialPatterns,
}

impl PromptPatterns {
    pub(crate) fn new(token: &PromptToken) -> Self {
        let primary = token.primary();
        let continuation = token.continuation();
        let quiet = PatternSet::new(vec![
            PatternSet::literal(&primary),
            PatternSet::literal(&continuation),
        ]);
        // "\r\n" is listed before its halves so a CRLF pair collapses into
        // a single end-of-line match.
        let incremental = PatternSet::new(vec![
            PatternSet::literal(&primary),
            PatternSet::literal(&continuation),
            PatternSet::literal("\r\n"),
            PatternSet::literal("\n"),
            PatternSet::literal("\r"),
        ]);
        let credential = CredentialPatterns::new(&primary, &continuation);
        Self {
            quiet,
            incremental,
            credential,
        }
    }
}

impl PromptKind {
    pub(crate) fn from_index(index: usize) -> Self {
        if index == 0 {
            PromptKind::Primary
        } else {
            PromptKind::Continuation
        }
    }
}

/// Failures inside a streaming loop: either the expect machinery or the
/// chunk consumer.
#[derive(Debug)]
pub(crate) enum StreamError {
    Expect(ExpectError),
    Session(SessionError),
}

impl From<ExpectError> for StreamError {
    fn from(err: ExpectError) -> Self {
        StreamError::Expect(err)
    }
}

impl From<SessionError> for StreamError {
    fn from(err: SessionError) -> Self {
        StreamError::Session(err)
    }
}

/// Incremental mode: flush each completed line (or carriage-return
/// redraw) to `on_chunk` as it lands, ending at the first prompt. A
/// trailing unterminated fragment is flushed as-is before returning.
pub(crate) fn stream_until_prompt(
    expecter: &mut Expecter,
    patterns: &PromptPatterns,
    on_chunk: &mut dyn FnMut(&str) -> Result<(), SessionError>,
) -> Result<PromptKind, StreamError> {
    loop {
        let m = expecter.expect(&patterns.incremental, Wait::Unbounded)?;
        match m.index {
            0 | 1 => {
                if !m.before.is_empty() {
                    on_chunk(&m.before)?;
                }
                return Ok(PromptKind::from_index(m.index));
            }
            2 | 3 => {
                let mut chunk = m.before;
                chunk.push('\n');
                on_chunk(&chunk)?;
            }
            _ => {
                // Bare carriage return: progress indicators redraw in place.
                let mut chunk = m.before;
                chunk.push('\r');
                on_chunk(&chunk)?;
            }
        }
    }
}

/// Non-incremental mode: wait for either prompt, returning everything
/// buffered before it.
pub(crate) fn wait_prompt(
    expecter: &mut Expecter,
    patterns: &PromptPatterns,
    wait: Wait,
) -> Result<(PromptKind, String), ExpectError> {
    let Matched { index, before, .. } = expecter.expect(&patterns.quiet, wait)?;
    Ok((PromptKind::from_index(index), before))
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn fixture() -> (mpsc::Sender<Vec<u8>>, Expecter, PromptPatterns, PromptToken) {
        let token = PromptToken::generate();
        let patterns = PromptPatterns::new(&token);
        let (tx, rx) = mpsc::channel();
        (tx, Expecter::new(rx), patterns, token)
    }

    fn collect_chunks(
        expecter: &mut Expecter,
        patterns: &PromptPatterns,
    ) -> (Vec<String>, PromptKind) {
        let mut chunks = Vec::new();
        let kind = stream_until_prompt(expecter, patterns, &mut |chunk| {
            chunks.push(chunk.to_string());
            Ok(())
        })
        .unwrap();
        (chunks, kind)
    }

    #[test]
    fn crlf_flushes_one_line_and_cr_redraws() {
        let (tx, mut expecter, patterns, token) = fixture();
        tx.send(format!("abc\r\n50%\r100%\r\n{}", token.primary()).into_bytes())
            .unwrap();
        let (chunks, kind) = collect_chunks(&mut expecter, &patterns);
        assert_eq!(chunks, vec!["abc\n", "50%\r", "100%\n"]);
        assert_eq!(kind, PromptKind::Primary);
    }

    #[test]
    fn trailing_fragment_is_flushed_before_prompt() {
        let (tx, mut expecter, patterns, token) = fixture();
        tx.send(format!("no newline{}", token.primary()).into_bytes())
            .unwrap();
        let (chunks, kind) = collect_chunks(&mut expecter, &patterns);
        assert_eq!(chunks, vec!["no newline"]);
        assert_eq!(kind, PromptKind::Primary);
    }

    #[test]
    fn raw_prompt_bytes_reach_the_chunk_callback() {
        // A password prompt with handling disabled is just an unterminated
        // fragment; it must be forwarded verbatim when the prompt lands.
        let (tx, mut expecter, patterns, token) = fixture();
        tx.send(format!("Password: {}", token.primary()).into_bytes())
            .unwrap();
        let (chunks, _) = collect_chunks(&mut expecter, &patterns);
        assert_eq!(chunks, vec!["Password: "]);
    }

    #[test]
    fn continuation_prompt_terminates_the_loop() {
        let (tx, mut expecter, patterns, token) = fixture();
        tx.send(token.continuation().into_bytes()).unwrap();
        let (chunks, kind) = collect_chunks(&mut expecter, &patterns);
        assert!(chunks.is_empty());
        assert_eq!(kind, PromptKind::Continuation);
    }

    #[test]
    fn quiet_wait_returns_everything_before_the_prompt() {
        let (tx, mut expecter, patterns, token) = fixture();
        tx.send(format!("0\r\nnoise\r\n{}", token.primary()).into_bytes())
            .unwrap();
        let (kind, before) = wait_prompt(
            &mut expecter,
            &patterns,
            Wait::For(Duration::from_millis(100)),
        )
        .unwrap();
        assert_eq!(kind, PromptKind::Primary);
        assert_eq!(before, "0\r\nnoise\r\n");
    }

    #[test]
    fn chunk_errors_abort_the_stream() {
        let (tx, mut expecter, patterns, _token) = fixture();
        tx.send(b"bad\n".to_vec()).unwrap();
        let result = stream_until_prompt(&mut expecter, &patterns, &mut |_| {
            Err(SessionError::MalformedSentinel {
                line: "bad".to_string(),
            })
        });
        assert!(matches!(result, Err(StreamError::Session(_))));
    }
}
