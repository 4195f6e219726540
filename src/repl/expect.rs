//! Earliest-match primitive shared by the session driver and the
//! credential prompt handler.
//!
//! The pty byte stream is unframed; the only way to know where a command's
//! output ends is to search the accumulating buffer for the earliest
//! occurrence among an ordered set of alternatives. Both loops in this
//! crate go through [`Expecter::expect`] so the semantics exist exactly
//! once.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use regex::bytes::Regex;

/// Ordered pattern alternatives. The match starting earliest in the
/// stream wins; ties are broken by table order.
pub(crate) struct PatternSet {
    patterns: Vec<Regex>,
}

impl PatternSet {
    pub(crate) fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    /// Compile an exact (escaped) byte-string alternative.
    pub(crate) fn literal(text: &str) -> Regex {
        Regex::new(&regex::escape(text)).expect("escaped literal is a valid pattern")
    }

    pub(crate) fn find_earliest(&self, haystack: &[u8]) -> Option<(usize, usize, usize)> {
        let mut best: Option<(usize, usize, usize)> = None;
        for (index, pattern) in self.patterns.iter().enumerate() {
            if let Some(found) = pattern.find(haystack) {
                let candidate = (found.start(), index, found.end());
                match best {
                    Some((start, idx, _)) if (start, idx) <= (candidate.0, candidate.1) => {}
                    _ => best = Some(candidate),
                }
            }
        }
        best.map(|(start, index, end)| (index, start, end))
    }
}

/// One successful match: which alternative fired, everything that came
/// before it, and the matched text itself.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Matched {
    pub index: usize,
    pub before: String,
    pub matched: String,
}

/// How long to block for more output.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Wait {
    Unbounded,
    For(Duration),
}

#[derive(Debug)]
pub(crate) enum ExpectError {
    /// No alternative matched within the wait. Buffered bytes stay put.
    Timeout,
    /// The reader thread hung up (child exited). Carries whatever was
    /// buffered so pending output is never lost.
    Eof { pending: String },
}

/// Match loop over the chunk channel fed by the session's reader thread.
pub(crate) struct Expecter {
    rx: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
}

impl Expecter {
    pub(crate) fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buffer: Vec::new(),
        }
    }

    /// Block until the earliest alternative matches, the wait expires, or
    /// the stream ends. Consumes the buffer through the end of the match.
    pub(crate) fn expect(
        &mut self,
        patterns: &PatternSet,
        wait: Wait,
    ) -> Result<Matched, ExpectError> {
        let deadline = match wait {
            Wait::Unbounded => None,
            Wait::For(duration) => Some(Instant::now() + duration),
        };

        loop {
            // Drain whatever is already queued before searching.
            let mut disconnected = false;
            loop {
                match self.rx.try_recv() {
                    Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }

            if let Some((index, start, end)) = patterns.find_earliest(&self.buffer) {
                return Ok(self.take(index, start, end));
            }

            if disconnected {
                return Err(ExpectError::Eof {
                    pending: self.take_pending(),
                });
            }

            match deadline {
                None => match self.rx.recv() {
                    Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                    Err(_) => {
                        return Err(ExpectError::Eof {
                            pending: self.take_pending(),
                        })
                    }
                },
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ExpectError::Timeout);
                    }
                    match self.rx.recv_timeout(remaining) {
                        Ok(chunk) => self.buffer.extend_from_slice(&chunk),
                        Err(RecvTimeoutError::Timeout) => return Err(ExpectError::Timeout),
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(ExpectError::Eof {
                                pending: self.take_pending(),
                            })
                        }
                    }
                }
            }
        }
    }

    fn take(&mut self, index: usize, start: usize, end: usize) -> Matched {
        let before = String::from_utf8_lossy(&self.buffer[..start]).into_owned();
        let matched = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
        self.buffer.drain(..end);
        Matched {
            index,
            before,
            matched,
        }
    }

    fn take_pending(&mut self) -> String {
        let pending = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        pending
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn literals(parts: &[&str]) -> PatternSet {
        PatternSet::new(parts.iter().map(|p| PatternSet::literal(p)).collect())
    }

    #[test]
    fn earliest_offset_wins_over_table_order() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"xxabyy".to_vec()).unwrap();
        let mut expecter = Expecter::new(rx);
        // "b" is listed first but "a" occurs earlier in the stream.
        let m = expecter
            .expect(&literals(&["b", "a"]), Wait::For(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(m.index, 1);
        assert_eq!(m.before, "xx");
        assert_eq!(m.matched, "a");
    }

    #[test]
    fn table_order_breaks_ties() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"abc".to_vec()).unwrap();
        let mut expecter = Expecter::new(rx);
        let m = expecter
            .expect(&literals(&["ab", "a"]), Wait::For(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(m.matched, "ab");
    }

    #[test]
    fn buffer_drains_exactly_through_match() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"one\ntwo\n".to_vec()).unwrap();
        let mut expecter = Expecter::new(rx);
        let set = literals(&["\n"]);
        let first = expecter.expect(&set, Wait::Unbounded).unwrap();
        assert_eq!(first.before, "one");
        let second = expecter.expect(&set, Wait::Unbounded).unwrap();
        assert_eq!(second.before, "two");
    }

    #[test]
    fn match_spanning_chunks() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"PROM".to_vec()).unwrap();
        tx.send(b"PT> tail".to_vec()).unwrap();
        let mut expecter = Expecter::new(rx);
        let m = expecter
            .expect(&literals(&["PROMPT>"]), Wait::For(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(m.matched, "PROMPT>");
        assert_eq!(m.before, "");
    }

    #[test]
    fn timeout_preserves_buffer() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"partial".to_vec()).unwrap();
        let mut expecter = Expecter::new(rx);
        let set = literals(&["\n"]);
        assert!(matches!(
            expecter.expect(&set, Wait::For(Duration::from_millis(10))),
            Err(ExpectError::Timeout)
        ));
        // Data arrives later; the earlier bytes are still there.
        tx.send(b" line\n".to_vec()).unwrap();
        let m = expecter.expect(&set, Wait::Unbounded).unwrap();
        assert_eq!(m.before, "partial line");
    }

    #[test]
    fn eof_carries_pending_output() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"last words".to_vec()).unwrap();
        drop(tx);
        let mut expecter = Expecter::new(rx);
        match expecter.expect(&literals(&["\n"]), Wait::Unbounded) {
            Err(ExpectError::Eof { pending }) => assert_eq!(pending, "last words"),
            other => panic!("expected Eof, got {:?}", other.map(|m| m.before)),
        }
    }
}
