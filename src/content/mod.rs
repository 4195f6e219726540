//! Rich-content recovery from the plain-text output channel.
//!
//! Programs running in the shell emit rich output by piping bytes into a
//! helper function (installed at session start) that buffers them to a
//! temp file and prints a sentinel line naming it. The extractor splits
//! every flushed chunk into lines, recognizes sentinel prefixes, decodes
//! the named file, and passes everything else through untouched.

mod decoders;
mod helpers;
mod registry;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::SessionError;

pub use helpers::CAPABILITIES_ENV;
pub use registry::{DisplayRegistry, DisplayRoute};

const SAVED_IMAGE_PREFIX: &str = "shellbridge: saved image data to: ";
const SAVED_HTML_PREFIX: &str = "shellbridge: saved html data to: ";

/// Recognized rich-content kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Html,
}

/// One entry in the extraction table: a sentinel prefix, the helper
/// function that produces it, and the decoder for the named file.
#[derive(Clone)]
pub struct ContentSpec {
    pub kind: ContentKind,
    /// Sentinel line prefix on the wire.
    pub prefix: &'static str,
    /// Name advertised in the capability list.
    pub capability: &'static str,
    /// Shell function installed in the child.
    pub helper: &'static str,
    pub decode: fn(&[u8]) -> Result<Value, String>,
}

/// The built-in table. Order doubles as prefix-test order.
pub fn default_specs() -> Vec<ContentSpec> {
    vec![
        ContentSpec {
            kind: ContentKind::Image,
            prefix: SAVED_IMAGE_PREFIX,
            capability: "image",
            helper: "display",
            decode: decoders::decode_image,
        },
        ContentSpec {
            kind: ContentKind::Html,
            prefix: SAVED_HTML_PREFIX,
            capability: "html",
            helper: "displayHTML",
            decode: decoders::decode_html,
        },
    ]
}

/// A recovered rich-content record.
#[derive(Debug, Clone)]
pub struct RichContent {
    pub kind: ContentKind,
    pub display_id: Option<String>,
    pub body: ContentBody,
}

/// Decoded payload, or the diagnostic text a failed decode turns into.
#[derive(Debug, Clone)]
pub enum ContentBody {
    Data(Value),
    DecodeError(String),
}

/// What one chunk split into: pass-through text and content records, each
/// preserving original order within its stream.
#[derive(Debug)]
pub struct Extraction {
    pub text: String,
    pub contents: Vec<RichContent>,
}

/// How a fragment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    Newline,
    CarriageReturn,
    None,
}

impl Terminator {
    fn as_str(self) -> &'static str {
        match self {
            Terminator::Newline => "\n",
            Terminator::CarriageReturn => "\r",
            Terminator::None => "",
        }
    }
}

/// Split a chunk into (content, terminator) fragments. A CRLF pair
/// collapses into a single end-of-line terminator; a trailing fragment
/// carries no terminator at all.
fn split_segments(text: &str) -> Vec<(&str, Terminator)> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                segments.push((&text[start..i], Terminator::Newline));
                i += 1;
                start = i;
            }
            b'\r' => {
                if bytes.get(i + 1) == Some(&b'\n') {
                    segments.push((&text[start..i], Terminator::Newline));
                    i += 2;
                } else {
                    segments.push((&text[start..i], Terminator::CarriageReturn));
                    i += 1;
                }
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < bytes.len() {
        segments.push((&text[start..], Terminator::None));
    }
    segments
}

/// Sentinel-line extractor for one session.
pub struct ContentExtractor {
    specs: Vec<ContentSpec>,
    temp_dir: PathBuf,
}

impl ContentExtractor {
    /// Build with the default table. Files under `temp_dir` (defaulting
    /// to `$TMPDIR`, then `/tmp`) are deleted after reading.
    pub fn new(temp_dir: Option<PathBuf>) -> Self {
        Self::with_specs(default_specs(), temp_dir)
    }

    pub fn with_specs(specs: Vec<ContentSpec>, temp_dir: Option<PathBuf>) -> Self {
        let temp_dir = temp_dir
            .or_else(|| std::env::var_os("TMPDIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        Self { specs, temp_dir }
    }

    /// Comma-joined capability list, de-duplicated so repeated
    /// registration yields an identical string.
    pub fn capabilities(&self) -> String {
        helpers::capabilities(&self.specs)
    }

    /// Shell script installing one helper function per kind plus the
    /// capability-list export. Idempotent by construction.
    pub fn setup_script(&self) -> String {
        helpers::setup_script(&self.specs)
    }

    /// Split `chunk` into plain text and content records.
    ///
    /// Decode failures become diagnostic records and never abort the
    /// pass; an unmatched display-id delimiter is the one hard failure.
    pub fn extract(&self, chunk: &str) -> Result<Extraction, SessionError> {
        let mut text = String::new();
        let mut contents = Vec::new();
        for (fragment, terminator) in split_segments(chunk) {
            match self.match_sentinel(fragment)? {
                Some(record) => contents.push(record),
                None => {
                    text.push_str(fragment);
                    text.push_str(terminator.as_str());
                }
            }
        }
        Ok(Extraction { text, contents })
    }

    fn match_sentinel(&self, line: &str) -> Result<Option<RichContent>, SessionError> {
        for spec in &self.specs {
            if let Some(rest) = line.strip_prefix(spec.prefix) {
                let (display_id, path) = parse_target(line, rest)?;
                return Ok(Some(self.decode_file(spec, display_id, Path::new(path))));
            }
        }
        Ok(None)
    }

    fn decode_file(
        &self,
        spec: &ContentSpec,
        display_id: Option<String>,
        path: &Path,
    ) -> RichContent {
        let data = fs::read(path);
        // Delete before decoding so cleanup happens even when the decode
        // fails. Only files the helpers put under the temp dir are ours
        // to remove.
        if path.starts_with(&self.temp_dir) {
            let _ = fs::remove_file(path);
        }
        let body = match data {
            Ok(bytes) => match (spec.decode)(&bytes) {
                Ok(value) => ContentBody::Data(value),
                Err(message) => ContentBody::DecodeError(format!(
                    "shellbridge: could not decode {} data from {}: {}",
                    spec.capability,
                    path.display(),
                    message
                )),
            },
            Err(err) => ContentBody::DecodeError(format!(
                "shellbridge: could not read {} data from {}: {}",
                spec.capability,
                path.display(),
                err
            )),
        };
        if matches!(body, ContentBody::DecodeError(_)) {
            debug!(path = %path.display(), kind = ?spec.kind, "rich-content decode failed");
        }
        RichContent {
            kind: spec.kind,
            display_id,
            body,
        }
    }
}

/// Parse `["(" display_id ") "]<path>` after a recognized prefix.
fn parse_target<'a>(line: &str, rest: &'a str) -> Result<(Option<String>, &'a str), SessionError> {
    match rest.strip_prefix('(') {
        Some(tagged) => match tagged.find(") ") {
            Some(end) => Ok((Some(tagged[..end].to_string()), &tagged[end + 2..])),
            None => Err(SessionError::MalformedSentinel {
                line: line.to_string(),
            }),
        },
        None => Ok((None, rest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(text: &str) -> Vec<(String, &'static str)> {
        split_segments(text)
            .into_iter()
            .map(|(content, terminator)| (content.to_string(), terminator.as_str()))
            .collect()
    }

    #[test]
    fn crlf_is_one_newline_terminator() {
        assert_eq!(segments("a\r\n"), vec![("a".to_string(), "\n")]);
    }

    #[test]
    fn bare_cr_is_kept_distinct() {
        assert_eq!(
            segments("25%\r50%\r\n"),
            vec![("25%".to_string(), "\r"), ("50%".to_string(), "\n")]
        );
    }

    #[test]
    fn trailing_fragment_has_no_terminator() {
        assert_eq!(
            segments("one\ntwo"),
            vec![("one".to_string(), "\n"), ("two".to_string(), "")]
        );
    }

    #[test]
    fn empty_lines_survive() {
        assert_eq!(
            segments("\n\n"),
            vec![("".to_string(), "\n"), ("".to_string(), "\n")]
        );
    }

    #[test]
    fn display_id_parses_out_of_the_target() {
        let (id, path) = parse_target("line", "(chart-1) /tmp/x.png").unwrap();
        assert_eq!(id.as_deref(), Some("chart-1"));
        assert_eq!(path, "/tmp/x.png");
    }

    #[test]
    fn target_without_id_is_all_path() {
        let (id, path) = parse_target("line", "/tmp/x.png").unwrap();
        assert!(id.is_none());
        assert_eq!(path, "/tmp/x.png");
    }

    #[test]
    fn unmatched_delimiter_is_a_hard_failure() {
        let err = parse_target("whole line", "(chart-1 /tmp/x.png").unwrap_err();
        assert!(matches!(err, SessionError::MalformedSentinel { .. }));
    }

    #[test]
    fn capability_list_is_idempotent() {
        let mut specs = default_specs();
        specs.extend(default_specs());
        let doubled = ContentExtractor::with_specs(specs, None);
        let single = ContentExtractor::new(None);
        assert_eq!(doubled.capabilities(), single.capabilities());
        assert_eq!(single.capabilities(), "image,html");
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        let extractor = ContentExtractor::new(None);
        let extraction = extractor.extract("hello\r\nworld\n").unwrap();
        assert_eq!(extraction.text, "hello\nworld\n");
        assert!(extraction.contents.is_empty());
    }

    #[test]
    fn missing_file_becomes_a_decode_error_record() {
        let extractor = ContentExtractor::new(None);
        let line = format!("{}/tmp/shellbridge-definitely-missing\n", SAVED_IMAGE_PREFIX);
        let extraction = extractor.extract(&line).unwrap();
        assert!(extraction.text.is_empty());
        assert_eq!(extraction.contents.len(), 1);
        assert!(matches!(
            extraction.contents[0].body,
            ContentBody::DecodeError(_)
        ));
    }
}
