//! Message analysis and MIME handling
//!
//! Parses RFC822 messages using `mailparse`, extracts all headers with
//! duplicates preserved, and walks the MIME part tree to compute body length
//! and attachment statistics. Analysis fails only on structurally
//! undecodable input; individual part decode failures are isolated.

use std::collections::HashMap;

use mailparse::{DispositionType, MailHeader, MailHeaderMap, ParsedMail};

use crate::errors::{AppError, AppResult};

/// Sentinel stored when a message carries no Message-ID header
pub const NO_MESSAGE_ID: &str = "<no-message-id>";

/// Analyzed message representation
///
/// Derived once per raw message blob and never mutated afterwards. Holds the
/// metadata and statistics destined for one output record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedMessage {
    /// Message-ID header value, or [`NO_MESSAGE_ID`] if absent
    pub message_id: String,
    /// All headers in first-occurrence order, duplicates preserved per name
    ///
    /// Names are grouped case-insensitively and displayed under the spelling
    /// of their first occurrence; repeated trace headers such as `Received`
    /// keep their original order within the group.
    pub headers: Vec<(String, Vec<String>)>,
    /// Total decoded bytes of plain-text and HTML parts
    pub body_length: u64,
    /// Number of parts classified as attachments
    pub attachment_count: u32,
    /// Total decoded bytes of attachment payloads
    pub attachment_total_size: u64,
}

/// Analyze a raw RFC822 message
///
/// Extracts headers and computes body/attachment statistics by walking the
/// full MIME part tree. Single-part messages are treated as one part of
/// their declared type.
///
/// # Errors
///
/// - `Parse` if `mailparse` cannot decode the message structure. A failure
///   in an individual part's payload decoding is logged and that part
///   contributes 0 bytes instead.
pub fn analyze(raw: &[u8]) -> AppResult<AnalyzedMessage> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AppError::Parse(format!("failed to parse RFC822 message: {e}")))?;

    let message_id = parsed
        .headers
        .get_first_value("Message-ID")
        .unwrap_or_else(|| NO_MESSAGE_ID.to_owned());
    let headers = collect_headers(&parsed.headers);

    let mut tally = PartTally::default();
    walk_parts(&parsed, &mut tally);

    Ok(AnalyzedMessage {
        message_id,
        headers,
        body_length: tally.body_length,
        attachment_count: tally.attachment_count,
        attachment_total_size: tally.attachment_total_size,
    })
}

/// Running totals over the MIME part tree
#[derive(Debug, Default)]
struct PartTally {
    body_length: u64,
    attachment_count: u32,
    attachment_total_size: u64,
}

/// Group header occurrences by name, preserving order and duplicates
///
/// Grouping is case-insensitive; the first-seen spelling of each name is the
/// one recorded. `mailparse` decodes encoded-word values, falling back to
/// replacement characters on undecodable input rather than dropping the
/// header.
fn collect_headers(headers: &[MailHeader<'_>]) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for header in headers {
        let key = header.get_key();
        let slot = *slots.entry(key.to_ascii_lowercase()).or_insert_with(|| {
            grouped.push((key.clone(), Vec::new()));
            grouped.len() - 1
        });
        grouped[slot].1.push(header.get_value());
    }
    grouped
}

/// Walk the MIME part tree recursively
///
/// Multipart containers contribute nothing directly; every non-container
/// node is inspected for body and attachment accounting.
fn walk_parts(part: &ParsedMail<'_>, tally: &mut PartTally) {
    if !part.ctype.mimetype.to_ascii_lowercase().starts_with("multipart/") {
        inspect_part(part, tally);
    }
    for sub in &part.subparts {
        walk_parts(sub, tally);
    }
}

/// Account one non-container part toward body and attachment totals
///
/// A part is an attachment if any of: its disposition is `attachment`; its
/// disposition is `inline` and it carries a filename; it carries a filename,
/// has no disposition header at all, and is neither plain text nor HTML.
/// Mail clients tag inline images and attachments inconsistently and all
/// three patterns occur in real mailboxes.
fn inspect_part(part: &ParsedMail<'_>, tally: &mut PartTally) {
    let ctype = part.ctype.mimetype.to_ascii_lowercase();
    let is_text = ctype == "text/plain" || ctype == "text/html";

    let disposition = part.get_content_disposition();
    let has_disposition_header = part
        .headers
        .get_first_value("Content-Disposition")
        .is_some();
    let filename = attachment_filename(part, &disposition);

    let is_attachment = if has_disposition_header {
        disposition.disposition == DispositionType::Attachment
            || (disposition.disposition == DispositionType::Inline && filename.is_some())
    } else {
        filename.is_some() && !is_text
    };

    let payload_len = match part.get_body_raw() {
        Ok(bytes) => Some(bytes.len() as u64),
        Err(err) => {
            tracing::warn!(content_type = %ctype, %err, "undecodable part payload, sized as 0");
            None
        }
    };

    if is_text && let Some(len) = payload_len {
        tally.body_length += len;
    }
    if is_attachment {
        tally.attachment_count += 1;
        if let Some(len) = payload_len {
            tally.attachment_total_size += len;
        }
    }
}

/// Extract attachment filename from part
///
/// Checks the Content-Disposition `filename` parameter first, falls back to
/// the Content-Type `name` parameter.
fn attachment_filename(
    part: &ParsedMail<'_>,
    disposition: &mailparse::ParsedContentDisposition,
) -> Option<String> {
    disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
}

#[cfg(test)]
mod tests {
    use super::{NO_MESSAGE_ID, analyze};

    /// Multipart fixture: 5-byte text body plus a 1000-byte image that only
    /// a filename (no disposition header) marks as an attachment
    fn multipart_fixture() -> Vec<u8> {
        let image_b64 = "QUFB".repeat(333) + "QQ==";
        format!(
            "From: sender@example.com\r\n\
             Message-ID: <m1@example.com>\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
             \r\n\
             --sep\r\n\
             Content-Type: text/plain\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             aGVsbG8=\r\n\
             --sep\r\n\
             Content-Type: image/png; name=\"chart.png\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             {image_b64}\r\n\
             --sep--\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn analyzes_single_part_plain_text() {
        let raw = b"From: sender@example.com\r\nSubject: Hi\r\n\r\nHello there";
        let analyzed = analyze(raw).expect("analysis succeeds");
        assert_eq!(analyzed.message_id, NO_MESSAGE_ID);
        assert_eq!(analyzed.body_length, 11);
        assert_eq!(analyzed.attachment_count, 0);
        assert_eq!(analyzed.attachment_total_size, 0);
    }

    #[test]
    fn multipart_splits_body_and_attachment_statistics() {
        let analyzed = analyze(&multipart_fixture()).expect("analysis succeeds");
        assert_eq!(analyzed.message_id, "<m1@example.com>");
        assert_eq!(analyzed.body_length, 5);
        assert_eq!(analyzed.attachment_count, 1);
        assert_eq!(analyzed.attachment_total_size, 1000);
    }

    #[test]
    fn attachment_disposition_without_filename_still_counts() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n\
            --b\r\n\
            Content-Type: application/octet-stream\r\n\
            Content-Disposition: attachment\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            aGVsbG8=\r\n\
            --b--\r\n";
        let analyzed = analyze(raw).expect("analysis succeeds");
        assert_eq!(analyzed.attachment_count, 1);
        assert_eq!(analyzed.attachment_total_size, 5);
    }

    #[test]
    fn plain_text_without_filename_or_disposition_never_counts() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n\
            --b\r\n\
            Content-Type: text/plain\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            aGVsbG8=\r\n\
            --b--\r\n";
        let analyzed = analyze(raw).expect("analysis succeeds");
        assert_eq!(analyzed.attachment_count, 0);
        assert_eq!(analyzed.body_length, 5);
    }

    #[test]
    fn inline_disposition_counts_only_with_filename() {
        let with_filename = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n\
            --b\r\n\
            Content-Type: image/png\r\n\
            Content-Disposition: inline; filename=\"logo.png\"\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            aGVsbG8=\r\n\
            --b--\r\n";
        let analyzed = analyze(with_filename).expect("analysis succeeds");
        assert_eq!(analyzed.attachment_count, 1);

        let without_filename = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n\
            --b\r\n\
            Content-Type: image/png\r\n\
            Content-Disposition: inline\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            aGVsbG8=\r\n\
            --b--\r\n";
        let analyzed = analyze(without_filename).expect("analysis succeeds");
        assert_eq!(analyzed.attachment_count, 0);
    }

    #[test]
    fn repeated_headers_keep_occurrence_order() {
        let raw = b"Received: from relay-b\r\n\
            From: sender@example.com\r\n\
            Received: from relay-a\r\n\
            \r\n\
            body";
        let analyzed = analyze(raw).expect("analysis succeeds");
        let received = analyzed
            .headers
            .iter()
            .find(|(name, _)| name == "Received")
            .map(|(_, values)| values.clone())
            .expect("Received group present");
        assert_eq!(received, vec!["from relay-b", "from relay-a"]);
        assert_eq!(analyzed.headers[0].0, "Received");
        assert_eq!(analyzed.headers[1].0, "From");
    }
}
