//! Tab-completion heuristics issued as `compgen` queries to the live
//! shell.
//!
//! Only the last token before the cursor matters. Variable tokens go
//! through the variable namespaces; everything else unions directories,
//! plain files, and (when the token could still name a command)
//! executables and functions.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::SessionError;
use crate::protocol::CompletionReply;

/// Executes a bookkeeping command in the live shell and returns its raw
/// output. Implemented by `Session` via the non-incremental loop; tests
/// substitute a scripted shell.
pub trait ShellQuery {
    fn query(&mut self, command: &str) -> Result<String, SessionError>;
}

/// Token boundaries: whitespace, separators, assignment, quotes, and
/// redirection.
const DELIMITERS: &[char] = &[' ', '\t', '\n', ';', '=', '"', '\'', '<', '>'];

/// Complete `code` at byte offset `cursor`.
///
/// An empty match set is a distinct "no completions" outcome, never an
/// error.
pub fn complete(
    shell: &mut dyn ShellQuery,
    code: &str,
    cursor: usize,
) -> Result<CompletionReply, SessionError> {
    let mut cursor = cursor.min(code.len());
    while !code.is_char_boundary(cursor) {
        cursor -= 1;
    }
    let head = &code[..cursor];
    let token = last_token(head);
    if token.is_empty() {
        return Ok(CompletionReply::empty(cursor));
    }

    let mut matches: BTreeSet<String> = BTreeSet::new();
    if let Some(name) = token.strip_prefix('$') {
        let output = shell.query(&format!(
            "compgen -A arrayvar -A export -A variable {}",
            name
        ))?;
        for word in output.split_whitespace() {
            if word.starts_with(name) {
                matches.insert(format!("${}", word));
            }
        }
    } else {
        let has_separator = token.contains('/');

        let mut directories: BTreeSet<String> = BTreeSet::new();
        for word in shell.query(&format!("compgen -d {}", token))?.split_whitespace() {
            if word.starts_with(token) {
                directories.insert(word.to_string());
            }
        }
        for dir in &directories {
            matches.insert(format!("{}/", dir));
        }

        for word in shell.query(&format!("compgen -f {}", token))?.split_whitespace() {
            if !word.starts_with(token) || directories.contains(word) {
                continue;
            }
            if has_separator {
                matches.insert(word.to_string());
            } else {
                // Mark bare filenames explicitly relative so they cannot
                // be mistaken for command names at the prompt.
                matches.insert(format!("./{}", word));
            }
        }

        // A token with a path separator, or one opened inside a quote,
        // can no longer name a command.
        if !has_separator && !inside_unterminated_quote(head) {
            let output = shell.query(&format!("compgen -c -A function {}", token))?;
            for word in output.split_whitespace() {
                if word.starts_with(token) {
                    matches.insert(word.to_string());
                }
            }
        }
    }

    if matches.is_empty() {
        return Ok(CompletionReply::empty(cursor));
    }
    debug!(token, count = matches.len(), "completion matches");
    Ok(CompletionReply {
        matches: matches.into_iter().collect(),
        cursor_start: cursor - token.len(),
        cursor_end: cursor,
    })
}

fn last_token(head: &str) -> &str {
    match head.rfind(DELIMITERS) {
        // Every delimiter is one byte of ASCII.
        Some(index) => &head[index + 1..],
        None => head,
    }
}

fn inside_unterminated_quote(head: &str) -> bool {
    let mut quote: Option<char> = None;
    for c in head.chars() {
        match quote {
            Some(open) if c == open => quote = None,
            None if c == '"' || c == '\'' => quote = Some(c),
            _ => {}
        }
    }
    quote.is_some()
}
