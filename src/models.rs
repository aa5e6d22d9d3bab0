//! Core data model for the scan pipeline
//!
//! Plain data types passed between the parser, diff engine, analyzer, and
//! serializer. All of them are immutable once created except
//! [`ScanStatistics`], the run-scoped accumulator owned by the scan loop.

use chrono::{DateTime, FixedOffset};

/// Mailbox entry parsed from a LIST response line
///
/// Produced by the response parser; consumed by the scan loop, which only
/// descends into selectable mailboxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxDescriptor {
    /// Mailbox name with one layer of surrounding quotes stripped
    pub name: String,
    /// Flags exactly as enumerated inside the parenthesized group
    pub flags: Vec<String>,
}

impl MailboxDescriptor {
    /// Whether the mailbox can be selected and scanned
    ///
    /// Hierarchy placeholders carry `\Noselect`; some servers also emit
    /// entries whose name is empty or a bare path delimiter. None of these
    /// hold messages.
    pub fn is_selectable(&self) -> bool {
        if self
            .flags
            .iter()
            .any(|f| f.eq_ignore_ascii_case("\\Noselect"))
        {
            return false;
        }
        let name = self.name.trim();
        !name.is_empty() && !matches!(name, "/" | "." | "\\")
    }
}

/// Durable identity of a message instance
///
/// `(mailbox, uid)` is the primary key of the target table; the UID is kept
/// as the exact server-issued string, never normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    /// Mailbox name as used for selection
    pub mailbox: String,
    /// Server-issued UID string
    pub uid: String,
}

impl MessageKey {
    /// Build a key from owned or borrowed parts
    pub fn new(mailbox: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            uid: uid.into(),
        }
    }
}

/// Message discovered by the cheap UID-only first pass
///
/// Pairs the protocol sequence number (needed for the later full fetch) with
/// the durable key used for diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidCandidate {
    /// Server message sequence number within the selected mailbox
    pub seq: u32,
    /// Durable key for this message instance
    pub key: MessageKey,
}

/// Per-message protocol metadata from a FETCH response line
///
/// Every field is independently optional: partial or malformed server
/// responses degrade to `None` (rendered as SQL `NULL`) instead of aborting
/// the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Server-issued UID, absent when the UID anchor is missing
    pub uid: Option<String>,
    /// IMAP flags in source order (e.g. `\Seen`, `\Flagged`)
    pub flags: Vec<String>,
    /// INTERNALDATE converted from the legacy server format
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// RFC822.SIZE in bytes
    pub size: Option<u64>,
}

/// Run-scoped statistics accumulator
///
/// Owned exclusively by the scan loop for the duration of one run; reset at
/// run start and read-only after the run. The trailing statistics block in
/// the output script is rendered from these exact counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStatistics {
    /// Mailboxes the run attempted to scan
    pub mailboxes: u64,
    /// Messages analyzed and emitted as records
    pub processed: u64,
    /// Messages skipped because their UID was already in the known set
    pub skipped: u64,
    /// Repeated `(mailbox, uid)` pairs discarded within this run
    pub duplicates: u64,
    /// Recoverable mailbox- and message-level failures
    pub errors: u64,
    /// Cumulative decoded body bytes over processed messages
    pub body_bytes: u64,
    /// Cumulative attachment count over processed messages
    pub attachments: u64,
    /// Cumulative decoded attachment bytes over processed messages
    pub attachment_bytes: u64,
}

impl ScanStatistics {
    /// Fold one analyzed message into the totals
    pub fn record_processed(&mut self, body_length: u64, count: u32, total_size: u64) {
        self.processed += 1;
        self.body_bytes += body_length;
        self.attachments += u64::from(count);
        self.attachment_bytes += total_size;
    }

    /// Log the end-of-run summary to the diagnostic stream
    pub fn log_summary(&self, incremental: bool) {
        tracing::info!(
            mailboxes = self.mailboxes,
            processed = self.processed,
            duplicates = self.duplicates,
            errors = self.errors,
            body_bytes = self.body_bytes,
            attachments = self.attachments,
            attachment_bytes = self.attachment_bytes,
            "scan complete"
        );
        if incremental {
            tracing::info!(skipped = self.skipped, "already-known messages skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MailboxDescriptor, ScanStatistics};

    fn descriptor(name: &str, flags: &[&str]) -> MailboxDescriptor {
        MailboxDescriptor {
            name: name.to_owned(),
            flags: flags.iter().map(|f| (*f).to_owned()).collect(),
        }
    }

    #[test]
    fn noselect_flag_blocks_selection_case_insensitively() {
        assert!(!descriptor("Archive", &["\\Noselect"]).is_selectable());
        assert!(!descriptor("Archive", &["\\NoSelect"]).is_selectable());
        assert!(descriptor("Archive", &["\\HasChildren"]).is_selectable());
    }

    #[test]
    fn delimiter_and_empty_names_are_not_selectable() {
        for name in ["", "  ", "/", ".", "\\"] {
            assert!(!descriptor(name, &[]).is_selectable(), "name: {name:?}");
        }
        assert!(descriptor("INBOX", &[]).is_selectable());
    }

    #[test]
    fn record_processed_accumulates_totals() {
        let mut stats = ScanStatistics::default();
        stats.record_processed(5, 1, 1000);
        stats.record_processed(10, 2, 500);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.body_bytes, 15);
        assert_eq!(stats.attachments, 3);
        assert_eq!(stats.attachment_bytes, 1500);
    }
}
