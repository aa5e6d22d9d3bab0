//! mail-imap-scan-rs: IMAP mailbox indexer
//!
//! Scans every selectable mailbox of an IMAP account and generates a
//! PostgreSQL bulk-load script with per-message metadata, header JSONB, and
//! body/attachment statistics. Incremental mode consults an existing
//! database to skip already-indexed messages.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and exit-code mapping
//! - [`cli`]: Command-line argument surface
//! - [`config`]: CLI/environment merge into a resolved run configuration
//! - [`errors`]: Application error model with exit-code mapping
//! - [`models`]: Core data model shared across the pipeline
//! - [`listing`]: LIST and FETCH response-line parsing
//! - [`message`]: RFC822 analysis (headers, body length, attachments)
//! - [`diff`]: Incremental known/new classification
//! - [`dedup`]: Run-scoped duplicate suppression
//! - [`sql`]: Record serialization, schema DDL, and script framing
//! - [`scan`]: Orchestration and collaborator traits
//! - [`imap`]: IMAP transport/session operations with timeout wrappers
//! - [`store`]: PostgreSQL known-keys store

mod cli;
mod config;
mod dedup;
mod diff;
mod errors;
mod imap;
mod listing;
mod message;
mod models;
mod scan;
mod sql;
mod store;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::ScanConfig;
use crate::errors::{AppError, AppResult};
use crate::scan::ScanOptions;
use crate::store::PgKnownKeys;

/// Application entry point
///
/// Initializes tracing from environment with stderr as the writer, so the
/// record stream (stdout or `-o` file) receives only well-formed SQL.
///
/// # Example
///
/// ```text
/// IMAP_PASSWORD=secret mail-imap-scan-rs -H imap.example.com -u user -o mailbox_data.sql
/// ```
#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        tracing::error!(%err, "scan aborted");
        std::process::exit(err.exit_code());
    }
}

async fn run() -> AppResult<()> {
    let config = ScanConfig::from_cli(Cli::parse())?;

    let store = match &config.database {
        Some(db) => Some(PgKnownKeys::connect(db).await?),
        None => None,
    };

    let mut session = imap::connect_authenticated(&config.account, &config.timeouts).await?;
    let mut out = open_output(config.output.as_deref())?;

    let opts = ScanOptions {
        incremental: config.incremental,
        limit_mailbox: config.limit_mailbox.clone(),
    };
    let stats = scan::run(&mut session, store.as_ref(), &mut out, &opts).await?;
    out.flush()
        .map_err(|e| AppError::Output(format!("failed flushing record stream: {e}")))?;

    stats.log_summary(config.incremental);
    if let Some(path) = &config.output {
        tracing::info!(path = %path.display(), "SQL script written");
    }

    session.logout().await;
    Ok(())
}

/// Open the record sink: a file when `-o` was given, stdout otherwise
fn open_output(path: Option<&Path>) -> AppResult<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                AppError::Output(format!("cannot open output file '{}': {e}", path.display()))
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}
