//! Structured-record serialization
//!
//! Renders analyzed messages into injection-safe PostgreSQL statements and
//! emits the schema and framing around them. Two escaping regimes coexist
//! and must not be mixed: plain string literals double both quotes and
//! backslashes, while the JSONB document literal doubles only quotes. The
//! JSON encoder has already produced correct backslash escapes there, and
//! doubling them again corrupts embedded control sequences.

use crate::message::AnalyzedMessage;
use crate::models::{MessageKey, MessageMetadata, ScanStatistics};

/// Target table creation, tolerant of an existing table (incremental mode)
pub const CREATE_TABLE_IF_NOT_EXISTS: &str = "CREATE TABLE IF NOT EXISTS email_messages (
    mailbox TEXT NOT NULL,
    uid TEXT NOT NULL,
    message_id TEXT NOT NULL,
    flags TEXT[],
    internal_date TIMESTAMP,
    rfc822_size BIGINT,
    headers JSONB NOT NULL,
    body_length INTEGER NOT NULL DEFAULT 0,
    attachment_count INTEGER NOT NULL DEFAULT 0,
    attachment_total_size BIGINT NOT NULL DEFAULT 0,
    scan_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (mailbox, uid)
);";

/// Indexes for common queries, tolerant of existing indexes
pub const INDEX_STATEMENTS: [&str; 6] = [
    "CREATE INDEX IF NOT EXISTS idx_email_messages_message_id ON email_messages(message_id);",
    "CREATE INDEX IF NOT EXISTS idx_email_messages_mailbox ON email_messages(mailbox);",
    "CREATE INDEX IF NOT EXISTS idx_email_messages_internal_date ON email_messages(internal_date);",
    "CREATE INDEX IF NOT EXISTS idx_email_messages_flags ON email_messages USING GIN(flags);",
    "CREATE INDEX IF NOT EXISTS idx_email_messages_scan_date ON email_messages(scan_date);",
    "CREATE INDEX IF NOT EXISTS idx_email_messages_headers ON email_messages USING GIN(headers);",
];

/// Escape a free-text value into a quoted SQL string literal
///
/// Single quotes and backslashes are doubled.
pub fn escape_string(value: &str) -> String {
    let escaped = value.replace('\'', "''").replace('\\', "\\\\");
    format!("'{escaped}'")
}

/// Format a flag list as a PostgreSQL array constructor
///
/// An empty list renders as a typed empty array, never as NULL or an empty
/// string; each element is individually string-escaped.
pub fn format_text_array(values: &[String]) -> String {
    if values.is_empty() {
        return "ARRAY[]::TEXT[]".to_owned();
    }
    let escaped: Vec<String> = values.iter().map(|v| escape_string(v)).collect();
    format!("ARRAY[{}]", escaped.join(", "))
}

/// Format the header map as a quoted JSONB document literal
///
/// The map is serialized to compact JSON preserving all Unicode, then only
/// the quote character is escaped for embedding. Backslashes are left alone:
/// the JSON encoder already emitted the correct escape sequences.
pub fn format_jsonb(headers: &[(String, Vec<String>)]) -> String {
    let mut root = serde_json::Map::new();
    for (name, values) in headers {
        let array = values
            .iter()
            .map(|v| serde_json::Value::String(v.clone()))
            .collect();
        root.insert(name.clone(), serde_json::Value::Array(array));
    }
    let document = serde_json::Value::Object(root).to_string();
    format!("'{}'", document.replace('\'', "''"))
}

/// Render one message as an INSERT statement
///
/// Column order matches the table definition; absent numeric and timestamp
/// metadata renders as explicit NULL.
pub fn render_insert(
    key: &MessageKey,
    meta: &MessageMetadata,
    message: &AnalyzedMessage,
    scan_timestamp: &str,
) -> String {
    let internal_date = match meta.internal_date {
        Some(dt) => format!("'{}'", dt.to_rfc3339()),
        None => "NULL".to_owned(),
    };
    let size = match meta.size {
        Some(n) => n.to_string(),
        None => "NULL".to_owned(),
    };
    format!(
        "INSERT INTO email_messages (mailbox, uid, message_id, flags, internal_date, \
         rfc822_size, headers, body_length, attachment_count, attachment_total_size, scan_date)\n\
         VALUES ({}, {}, {}, {}, {}, {}, {}::jsonb, {}, {}, {}, '{}');\n",
        escape_string(&key.mailbox),
        escape_string(&key.uid),
        escape_string(&message.message_id),
        format_text_array(&meta.flags),
        internal_date,
        size,
        format_jsonb(&message.headers),
        message.body_length,
        message.attachment_count,
        message.attachment_total_size,
        scan_timestamp,
    )
}

/// Leading comment block and transaction opener
pub fn script_header(incremental: bool, generated: &str) -> String {
    let mode = if incremental {
        "Incremental (only new messages)"
    } else {
        "Full scan"
    };
    format!(
        "-- IMAP Mailbox Analysis\n-- Generated: {generated}\n-- Mode: {mode}\n--\n\nBEGIN;\n\n"
    )
}

/// Full-mode schema: drop and recreate the table and its indexes
pub fn full_schema() -> String {
    let mut out = String::from("DROP TABLE IF EXISTS email_messages CASCADE;\n\n");
    out.push_str(CREATE_TABLE_IF_NOT_EXISTS);
    out.push_str("\n\n-- Create indexes for common queries\n");
    for index in INDEX_STATEMENTS {
        out.push_str(index);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Incremental-mode schema: create-if-absent only
///
/// Written when the live table is missing so the generated script documents
/// what `ensure_schema` created.
pub fn incremental_schema() -> String {
    let mut out = String::from("-- Creating email_messages table\n");
    out.push_str(CREATE_TABLE_IF_NOT_EXISTS);
    out.push_str("\n\n-- Create indexes for common queries\n");
    for index in INDEX_STATEMENTS {
        out.push_str(index);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Transaction close plus the trailing statistics comment block
///
/// Counts come straight from the run's accumulator; nothing here is
/// recomputed or estimated.
pub fn script_footer(stats: &ScanStatistics, incremental: bool) -> String {
    let mut out = String::from("\nCOMMIT;\n\n-- Scan Statistics\n");
    out.push_str(&format!(
        "-- Total mailboxes scanned: {}\n",
        stats.mailboxes
    ));
    out.push_str(&format!(
        "-- Total messages processed: {}\n",
        stats.processed
    ));
    if incremental {
        out.push_str(&format!("-- Known messages skipped: {}\n", stats.skipped));
    }
    out.push_str(&format!(
        "-- Duplicate messages skipped: {}\n",
        stats.duplicates
    ));
    out.push_str(&format!(
        "-- Total body size: {} bytes ({:.2} MB)\n",
        group_thousands(stats.body_bytes),
        megabytes(stats.body_bytes)
    ));
    out.push_str(&format!("-- Total attachments: {}\n", stats.attachments));
    out.push_str(&format!(
        "-- Total attachment size: {} bytes ({:.2} MB)\n",
        group_thousands(stats.attachment_bytes),
        megabytes(stats.attachment_bytes)
    ));
    out.push_str(&format!("-- Errors encountered: {}\n", stats.errors));
    out
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Group digits in threes for the human-readable byte totals
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
