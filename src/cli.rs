//! Command-line interface
//!
//! Flag surface for the scanner. Values omitted here fall back to
//! environment variables during config resolution (`IMAP_PASSWORD`, the
//! conventional `PG*` set); see [`crate::config::ScanConfig::from_cli`].

use std::path::PathBuf;

use clap::Parser;

/// Scan IMAP mailboxes into a PostgreSQL bulk-load script
#[derive(Debug, Parser)]
#[command(name = "mail-imap-scan-rs", version, about)]
pub struct Cli {
    /// IMAP server hostname
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// IMAP server port
    #[arg(short = 'p', long, default_value_t = 993)]
    pub port: u16,

    /// IMAP username
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// IMAP password (falls back to IMAP_PASSWORD)
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Disable TLS (not supported; present for compatibility)
    #[arg(long)]
    pub no_ssl: bool,

    /// Only process messages not already in the database
    #[arg(long)]
    pub incremental: bool,

    /// Database host (falls back to PGHOST, then localhost)
    #[arg(long)]
    pub db_host: Option<String>,

    /// Database port (falls back to PGPORT, then 5432)
    #[arg(long)]
    pub db_port: Option<u16>,

    /// Database name, required for incremental mode (falls back to PGDATABASE)
    #[arg(long)]
    pub db_name: Option<String>,

    /// Database username, required for incremental mode (falls back to PGUSER)
    #[arg(long)]
    pub db_user: Option<String>,

    /// Database password (falls back to PGPASSWORD)
    #[arg(long)]
    pub db_password: Option<String>,

    /// Output SQL file (stdout when omitted)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Scan only this mailbox instead of listing all of them
    #[arg(long)]
    pub limit_mailbox: Option<String>,
}
