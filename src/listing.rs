//! LIST and FETCH response-line parsing
//!
//! Turns raw listing/fetch response lines into typed records. Listing lines
//! are handled by a small scanner over the two accepted shapes; fetch
//! metadata fields are located anywhere in the line by per-field anchors so
//! no ordering is assumed and each field is independently optional.

use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;

use crate::models::{MailboxDescriptor, MessageMetadata};

static UID_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bUID (\d+)").expect("UID anchor regex"));
static FLAGS_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bFLAGS \(([^)]*)\)").expect("FLAGS anchor regex"));
static INTERNALDATE_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bINTERNALDATE "([^"]+)""#).expect("INTERNALDATE anchor regex"));
static SIZE_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bRFC822\.SIZE (\d+)").expect("RFC822.SIZE anchor regex"));

/// INTERNALDATE format used by legacy servers, e.g. `17-Jul-1996 02:44:25 -0700`
const INTERNALDATE_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";

/// Parse a LIST response into mailbox descriptors
///
/// Accepts the two shapes observed in the wild:
///
/// ```text
/// (\HasNoChildren \UnMarked) "/" Good
/// (\Noselect) "/" Archive/2024
/// (\HasNoChildren) NIL INBOX
/// ```
///
/// Lines matching neither shape are dropped with a warning, never fatal.
/// Entries whose name is a bare delimiter character are noise emitted by some
/// servers and are excluded here so they can never surface as mailboxes.
pub fn parse_listing(lines: &[String]) -> Vec<MailboxDescriptor> {
    let mut mailboxes = Vec::new();
    for line in lines {
        match parse_listing_line(line) {
            Some(desc) if is_delimiter_noise(&desc.name) => {
                tracing::debug!(name = %desc.name, "ignoring delimiter placeholder in listing");
            }
            Some(desc) => mailboxes.push(desc),
            None => {
                tracing::warn!(line = %line, "dropped listing line matching no known shape");
            }
        }
    }
    mailboxes
}

/// Parse one listing line: `(flags) "delim" name` or `(flags) NIL name`
fn parse_listing_line(line: &str) -> Option<MailboxDescriptor> {
    let mut scanner = LineScanner::new(line);
    let flags = scanner.flag_group()?;
    scanner.skip_spaces();
    scanner.delimiter()?;
    scanner.skip_spaces();
    let name = scanner.name()?;
    Some(MailboxDescriptor { name, flags })
}

fn is_delimiter_noise(name: &str) -> bool {
    matches!(name, "/" | "." | "\\")
}

/// Cursor over one listing line
///
/// Each method consumes one grammar element and returns `None` on a shape
/// mismatch, leaving the caller to drop the whole line.
struct LineScanner<'a> {
    rest: &'a str,
}

impl<'a> LineScanner<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            rest: line.trim_start(),
        }
    }

    fn skip_spaces(&mut self) {
        self.rest = self.rest.trim_start();
    }

    /// `(` atoms `)`; an empty group yields an empty flag set
    fn flag_group(&mut self) -> Option<Vec<String>> {
        let inner = self.rest.strip_prefix('(')?;
        let end = inner.find(')')?;
        let flags = inner[..end]
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        self.rest = &inner[end + 1..];
        Some(flags)
    }

    /// Quoted hierarchy delimiter (`"/"`) or the `NIL` atom
    fn delimiter(&mut self) -> Option<()> {
        if let Some(inner) = self.rest.strip_prefix('"') {
            let end = inner.find('"')?;
            self.rest = &inner[end + 1..];
            return Some(());
        }
        let after = self.rest.strip_prefix("NIL")?;
        if !after.starts_with(char::is_whitespace) {
            return None;
        }
        self.rest = after;
        Some(())
    }

    /// Remainder of the line, stripping one layer of surrounding quotes
    fn name(&mut self) -> Option<String> {
        let raw = self.rest.trim();
        self.rest = "";
        if raw.is_empty() {
            return None;
        }
        Some(unquote(raw).to_owned())
    }
}

/// Strip exactly one layer of surrounding double quotes, if present
fn unquote(raw: &str) -> &str {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

/// Extract per-message metadata from a FETCH response line
///
/// The four sub-fields (`UID`, `FLAGS (...)`, `INTERNALDATE "..."`,
/// `RFC822.SIZE`) are located by anchors anywhere in the line; servers do not
/// agree on their order. A missing anchor yields `None` for that field
/// without affecting the others, and an INTERNALDATE that fails to parse
/// degrades to `None` rather than an error.
pub fn parse_fetch_meta(line: &str) -> MessageMetadata {
    let uid = UID_ANCHOR
        .captures(line)
        .map(|c| c[1].to_owned());

    let flags = FLAGS_ANCHOR
        .captures(line)
        .map(|c| {
            c[1].split_whitespace()
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let internal_date = INTERNALDATE_ANCHOR.captures(line).and_then(|c| {
        let raw = &c[1];
        match DateTime::parse_from_str(raw, INTERNALDATE_FORMAT) {
            Ok(dt) => Some(dt),
            Err(err) => {
                tracing::warn!(raw, %err, "unparseable INTERNALDATE, storing NULL");
                None
            }
        }
    });

    let size = SIZE_ANCHOR
        .captures(line)
        .and_then(|c| c[1].parse::<u64>().ok());

    MessageMetadata {
        uid,
        flags,
        internal_date,
        size,
    }
}
