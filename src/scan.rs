//! Scan orchestration
//!
//! Sequences one run: list mailboxes, then per mailbox select, diff against
//! the known set, fetch and analyze the survivors, serialize records, and
//! finally emit the aggregate statistics. The upstream IMAP session is a
//! single stateful connection, so everything here is strictly sequential.
//!
//! Failure discipline: a listing failure aborts the run; a select or search
//! failure skips the mailbox; a per-message fetch or analysis failure skips
//! the message. Already-known UIDs and within-run duplicates are counted,
//! never treated as errors.

use std::collections::HashSet;
use std::io::Write;

use chrono::{SecondsFormat, Utc};

use crate::dedup::DedupGuard;
use crate::diff::classify;
use crate::errors::{AppError, AppResult};
use crate::listing::{parse_fetch_meta, parse_listing};
use crate::message::analyze;
use crate::models::{MessageKey, ScanStatistics, UidCandidate};
use crate::sql;

/// Mail session collaborator
///
/// Narrow view of an authenticated IMAP connection. Listing and metadata
/// fetches surface raw response lines (envelope and tag lines already
/// stripped) so the response parser owns all interpretation; only message
/// bodies arrive as bytes.
#[allow(async_fn_in_trait)]
pub trait MailSession {
    /// Raw LIST response lines, one per mailbox entry
    async fn list_mailboxes(&mut self) -> AppResult<Vec<String>>;
    /// Open a mailbox read-only
    async fn select(&mut self, mailbox: &str) -> AppResult<()>;
    /// Sequence numbers of every message in the selected mailbox, ascending
    async fn search_all(&mut self) -> AppResult<Vec<u32>>;
    /// Raw UID-only fetch response line for one message
    async fn fetch_uid_line(&mut self, seq: u32) -> AppResult<String>;
    /// Raw metadata line plus full RFC822 body for one message
    async fn fetch_full(&mut self, seq: u32) -> AppResult<(String, Vec<u8>)>;
}

/// Known-keys store collaborator (incremental mode only)
#[allow(async_fn_in_trait)]
pub trait KnownKeys {
    /// Snapshot of UIDs already indexed for a mailbox
    async fn known_uids(&self, mailbox: &str) -> AppResult<HashSet<String>>;
    /// Whether the target table exists
    async fn table_exists(&self) -> AppResult<bool>;
    /// Idempotently create the target table and indexes
    async fn ensure_schema(&self) -> AppResult<()>;
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Consult the known-keys store and skip already-indexed messages
    pub incremental: bool,
    /// Scan only this mailbox, bypassing LIST
    pub limit_mailbox: Option<String>,
}

/// Execute one scan run
///
/// Writes the schema section, one INSERT per surviving message, and the
/// trailing statistics block to `out`; diagnostics go to the tracing stream
/// so the record sink receives only well-formed SQL and comments.
///
/// # Errors
///
/// Only run-fatal conditions propagate: listing failure, schema creation
/// failure in incremental mode, and record-sink write failure. Everything
/// else is counted in the returned statistics.
pub async fn run<S, K, W>(
    session: &mut S,
    known: Option<&K>,
    out: &mut W,
    opts: &ScanOptions,
) -> AppResult<ScanStatistics>
where
    S: MailSession,
    K: KnownKeys,
    W: Write,
{
    let scan_timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    write_out(out, &sql::script_header(opts.incremental, &scan_timestamp))?;

    if opts.incremental {
        if let Some(store) = known
            && !store.table_exists().await?
        {
            tracing::info!("target table missing, creating it");
            store.ensure_schema().await?;
            write_out(out, &sql::incremental_schema())?;
        }
    } else {
        write_out(out, &sql::full_schema())?;
    }

    let mailbox_names = resolve_mailboxes(session, opts).await?;
    let mut stats = ScanStatistics {
        mailboxes: mailbox_names.len() as u64,
        ..ScanStatistics::default()
    };
    let mut dedup = DedupGuard::new();

    for (index, mailbox) in mailbox_names.iter().enumerate() {
        tracing::info!(
            mailbox = %mailbox,
            index = index + 1,
            total = mailbox_names.len(),
            "scanning mailbox"
        );
        scan_mailbox(
            session,
            known,
            out,
            opts,
            mailbox,
            &scan_timestamp,
            &mut dedup,
            &mut stats,
        )
        .await?;
    }

    stats.duplicates = dedup.duplicates();
    write_out(out, &sql::script_footer(&stats, opts.incremental))?;
    Ok(stats)
}

/// Determine which mailboxes the run covers, in sorted order
///
/// A listing failure here is fatal for the whole run.
async fn resolve_mailboxes<S: MailSession>(
    session: &mut S,
    opts: &ScanOptions,
) -> AppResult<Vec<String>> {
    if let Some(name) = &opts.limit_mailbox {
        return Ok(vec![name.clone()]);
    }
    let lines = session.list_mailboxes().await?;
    let mut names: Vec<String> = parse_listing(&lines)
        .into_iter()
        .filter(|desc| {
            if desc.is_selectable() {
                true
            } else {
                tracing::info!(name = %desc.name, "skipping non-selectable mailbox");
                false
            }
        })
        .map(|desc| desc.name)
        .collect();
    names.sort();
    Ok(names)
}

/// SELECT → DIFF → FETCH-PROCESS for one mailbox
///
/// Returns `Err` only for record-sink failures; all collaborator failures
/// inside the mailbox are recorded and absorbed.
#[allow(clippy::too_many_arguments)]
async fn scan_mailbox<S, K, W>(
    session: &mut S,
    known: Option<&K>,
    out: &mut W,
    opts: &ScanOptions,
    mailbox: &str,
    scan_timestamp: &str,
    dedup: &mut DedupGuard,
    stats: &mut ScanStatistics,
) -> AppResult<()>
where
    S: MailSession,
    K: KnownKeys,
    W: Write,
{
    let known_uids = if opts.incremental && let Some(store) = known {
        match store.known_uids(mailbox).await {
            Ok(set) => {
                tracing::info!(existing = set.len(), "known messages in database");
                set
            }
            Err(err) => {
                tracing::warn!(%err, "known-UID lookup failed, treating mailbox as all-new");
                HashSet::new()
            }
        }
    } else {
        HashSet::new()
    };

    if let Err(err) = session.select(mailbox).await {
        tracing::warn!(mailbox = %mailbox, %err, "cannot select mailbox, skipping");
        stats.errors += 1;
        return Ok(());
    }

    let seqs = match session.search_all().await {
        Ok(seqs) => seqs,
        Err(err) => {
            tracing::warn!(mailbox = %mailbox, %err, "search failed, skipping mailbox");
            stats.errors += 1;
            return Ok(());
        }
    };
    tracing::info!(found = seqs.len(), "messages in mailbox");

    // First pass: cheap UID-only probes, so skipped messages never pay for
    // the full fetch.
    let mut candidates = Vec::with_capacity(seqs.len());
    for seq in seqs {
        match session.fetch_uid_line(seq).await {
            Ok(line) => {
                let uid = parse_fetch_meta(&line)
                    .uid
                    .unwrap_or_else(|| seq.to_string());
                candidates.push(UidCandidate {
                    seq,
                    key: MessageKey::new(mailbox, uid),
                });
            }
            Err(err) => {
                tracing::warn!(seq, %err, "UID probe failed");
                stats.errors += 1;
            }
        }
    }

    let (to_process, skipped) = classify(candidates, &known_uids);
    if opts.incremental {
        tracing::info!(skipped, processing = to_process.len(), "incremental partition");
    }
    stats.skipped += skipped;

    // Second pass: full fetch, analysis, and record emission.
    for (index, candidate) in to_process.into_iter().enumerate() {
        let (meta_line, body) = match session.fetch_full(candidate.seq).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(seq = candidate.seq, %err, "full fetch failed");
                stats.errors += 1;
                continue;
            }
        };

        let meta = parse_fetch_meta(&meta_line);
        let uid = meta
            .uid
            .clone()
            .unwrap_or_else(|| candidate.seq.to_string());
        let key = MessageKey::new(mailbox, uid);
        if !dedup.admit(&key) {
            continue;
        }

        let analyzed = match analyze(&body) {
            Ok(analyzed) => analyzed,
            Err(err) => {
                tracing::warn!(uid = %key.uid, %err, "message analysis failed");
                stats.errors += 1;
                continue;
            }
        };

        write_out(out, &sql::render_insert(&key, &meta, &analyzed, scan_timestamp))?;
        stats.record_processed(
            analyzed.body_length,
            analyzed.attachment_count,
            analyzed.attachment_total_size,
        );

        if (index + 1) % 100 == 0 {
            tracing::info!(processed = index + 1, "progress");
        }
    }

    Ok(())
}

fn write_out<W: Write>(out: &mut W, chunk: &str) -> AppResult<()> {
    out.write_all(chunk.as_bytes())
        .map_err(|e| AppError::Output(format!("failed writing record stream: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::{KnownKeys, MailSession, ScanOptions, run};
    use crate::errors::{AppError, AppResult};

    #[derive(Clone)]
    struct FakeMessage {
        uid: &'static str,
        body: &'static [u8],
    }

    struct FakeSession {
        listing: Vec<String>,
        mailboxes: HashMap<String, Vec<FakeMessage>>,
        failing_select: HashSet<String>,
        selected: Option<String>,
    }

    impl FakeSession {
        fn new(listing: &[&str]) -> Self {
            Self {
                listing: listing.iter().map(|l| (*l).to_owned()).collect(),
                mailboxes: HashMap::new(),
                failing_select: HashSet::new(),
                selected: None,
            }
        }

        fn with_messages(mut self, mailbox: &str, messages: Vec<FakeMessage>) -> Self {
            self.mailboxes.insert(mailbox.to_owned(), messages);
            self
        }

        fn with_failing_select(mut self, mailbox: &str) -> Self {
            self.failing_select.insert(mailbox.to_owned());
            self
        }

        fn current(&self) -> &[FakeMessage] {
            self.selected
                .as_ref()
                .and_then(|name| self.mailboxes.get(name))
                .map_or(&[], Vec::as_slice)
        }
    }

    impl MailSession for FakeSession {
        async fn list_mailboxes(&mut self) -> AppResult<Vec<String>> {
            Ok(self.listing.clone())
        }

        async fn select(&mut self, mailbox: &str) -> AppResult<()> {
            if self.failing_select.contains(mailbox) {
                return Err(AppError::NotFound(format!("cannot select '{mailbox}'")));
            }
            self.selected = Some(mailbox.to_owned());
            Ok(())
        }

        async fn search_all(&mut self) -> AppResult<Vec<u32>> {
            Ok((1..=self.current().len() as u32).collect())
        }

        async fn fetch_uid_line(&mut self, seq: u32) -> AppResult<String> {
            let message = &self.current()[(seq - 1) as usize];
            Ok(format!("* {seq} FETCH (UID {})", message.uid))
        }

        async fn fetch_full(&mut self, seq: u32) -> AppResult<(String, Vec<u8>)> {
            let message = self.current()[(seq - 1) as usize].clone();
            let line = format!(
                r#"* {seq} FETCH (UID {} FLAGS (\Seen) INTERNALDATE "01-Jan-2020 00:00:00 +0000" RFC822.SIZE {})"#,
                message.uid,
                message.body.len()
            );
            Ok((line, message.body.to_vec()))
        }
    }

    struct FakeStore {
        known: HashMap<String, HashSet<String>>,
        exists: bool,
        ensured: AtomicBool,
    }

    impl FakeStore {
        fn new(exists: bool) -> Self {
            Self {
                known: HashMap::new(),
                exists,
                ensured: AtomicBool::new(false),
            }
        }

        fn with_known(mut self, mailbox: &str, uids: &[&str]) -> Self {
            self.known.insert(
                mailbox.to_owned(),
                uids.iter().map(|u| (*u).to_owned()).collect(),
            );
            self
        }
    }

    impl KnownKeys for FakeStore {
        async fn known_uids(&self, mailbox: &str) -> AppResult<HashSet<String>> {
            Ok(self.known.get(mailbox).cloned().unwrap_or_default())
        }

        async fn table_exists(&self) -> AppResult<bool> {
            Ok(self.exists)
        }

        async fn ensure_schema(&self) -> AppResult<()> {
            self.ensured.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    const BODY: &[u8] = b"From: a@example.com\r\nSubject: Hi\r\n\r\nhello";

    fn message(uid: &'static str) -> FakeMessage {
        FakeMessage { uid, body: BODY }
    }

    fn insert_count(output: &[u8]) -> usize {
        String::from_utf8_lossy(output)
            .matches("INSERT INTO email_messages")
            .count()
    }

    #[tokio::test]
    async fn incremental_run_skips_known_messages() {
        let mut session = FakeSession::new(&[r#"(\HasNoChildren) "/" INBOX"#])
            .with_messages("INBOX", vec![message("101"), message("102"), message("103")]);
        let store = FakeStore::new(true).with_known("INBOX", &["102"]);
        let mut output = Vec::new();
        let opts = ScanOptions {
            incremental: true,
            limit_mailbox: None,
        };

        let stats = run(&mut session, Some(&store), &mut output, &opts)
            .await
            .expect("run succeeds");

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(insert_count(&output), 2);
        let text = String::from_utf8_lossy(&output);
        assert!(!text.contains("DROP TABLE"));
        assert!(text.contains("-- Known messages skipped: 1"));
    }

    #[tokio::test]
    async fn full_run_processes_everything_and_recreates_schema() {
        let mut session = FakeSession::new(&[
            r#"(\Noselect) "/" Archive"#,
            r#"() "/" /"#,
            r#"(\HasNoChildren) "/" INBOX"#,
        ])
        .with_messages("INBOX", vec![message("1"), message("2")]);
        let mut output = Vec::new();
        let opts = ScanOptions::default();

        let stats = run(&mut session, None::<&FakeStore>, &mut output, &opts)
            .await
            .expect("run succeeds");

        assert_eq!(stats.mailboxes, 1);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped, 0);
        assert_eq!(insert_count(&output), 2);
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("DROP TABLE IF EXISTS email_messages CASCADE;"));
        assert!(text.contains("COMMIT;"));
    }

    #[tokio::test]
    async fn select_failure_skips_mailbox_and_continues() {
        let mut session = FakeSession::new(&[
            r#"() "/" Broken"#,
            r#"() "/" INBOX"#,
        ])
        .with_messages("INBOX", vec![message("1")])
        .with_messages("Broken", vec![message("9")])
        .with_failing_select("Broken");
        let mut output = Vec::new();

        let stats = run(
            &mut session,
            None::<&FakeStore>,
            &mut output,
            &ScanOptions::default(),
        )
        .await
        .expect("run succeeds");

        assert_eq!(stats.mailboxes, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(insert_count(&output), 1);
    }

    #[tokio::test]
    async fn duplicate_enumeration_is_emitted_once() {
        let mut session = FakeSession::new(&[r#"() "/" INBOX"#])
            .with_messages("INBOX", vec![message("7"), message("7")]);
        let mut output = Vec::new();

        let stats = run(
            &mut session,
            None::<&FakeStore>,
            &mut output,
            &ScanOptions::default(),
        )
        .await
        .expect("run succeeds");

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(insert_count(&output), 1);
    }

    #[tokio::test]
    async fn limit_mailbox_bypasses_listing() {
        let mut session =
            FakeSession::new(&[]).with_messages("Archive", vec![message("5")]);
        let mut output = Vec::new();
        let opts = ScanOptions {
            incremental: false,
            limit_mailbox: Some("Archive".to_owned()),
        };

        let stats = run(&mut session, None::<&FakeStore>, &mut output, &opts)
            .await
            .expect("run succeeds");

        assert_eq!(stats.mailboxes, 1);
        assert_eq!(stats.processed, 1);
        assert!(String::from_utf8_lossy(&output).contains("'Archive', '5'"));
    }

    #[tokio::test]
    async fn missing_table_is_created_in_incremental_mode() {
        let mut session = FakeSession::new(&[r#"() "/" INBOX"#])
            .with_messages("INBOX", vec![message("1")]);
        let store = FakeStore::new(false);
        let mut output = Vec::new();
        let opts = ScanOptions {
            incremental: true,
            limit_mailbox: None,
        };

        run(&mut session, Some(&store), &mut output, &opts)
            .await
            .expect("run succeeds");

        assert!(store.ensured.load(Ordering::SeqCst));
        assert!(String::from_utf8_lossy(&output).contains("CREATE TABLE IF NOT EXISTS"));
    }

    #[tokio::test]
    async fn rescanning_counts_duplicates_across_mailbox_passes() {
        let mut session = FakeSession::new(&[]).with_messages("INBOX", vec![message("3")]);
        let mut output = Vec::new();
        let opts = ScanOptions {
            incremental: false,
            limit_mailbox: Some("INBOX".to_owned()),
        };

        let stats = run(&mut session, None::<&FakeStore>, &mut output, &opts)
            .await
            .expect("run succeeds");
        assert_eq!(stats.processed, 1);

        // Same key enumerated again within one run via a second pass.
        let mut twice = FakeSession::new(&[
            r#"() "/" INBOX"#,
        ])
        .with_messages("INBOX", vec![message("3"), message("3"), message("4")]);
        let stats = run(
            &mut twice,
            None::<&FakeStore>,
            &mut Vec::new(),
            &ScanOptions::default(),
        )
        .await
        .expect("run succeeds");
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.duplicates, 1);
    }
}
