//! Configuration for IMAP and database connections
//!
//! Command-line flags are merged with environment variables: `IMAP_PASSWORD`
//! for the mail account, the conventional `PG*` variables for the database,
//! and `MAIL_SCAN_*_TIMEOUT_MS` for transport timeouts. Passwords are stored
//! using `SecretString` to prevent accidental logging.

use std::env;
use std::env::VarError;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::cli::Cli;
use crate::errors::{AppError, AppResult};

/// IMAP account configuration
#[derive(Debug, Clone)]
pub struct ImapAccount {
    /// IMAP server hostname
    pub host: String,
    /// IMAP server port (typically 993 for TLS)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password stored in a type that prevents accidental logging
    pub pass: SecretString,
}

/// Transport timeouts, overridable via `MAIL_SCAN_*_TIMEOUT_MS`
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// IMAP greeting/TLS handshake timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Socket I/O timeout in milliseconds
    pub socket_timeout_ms: u64,
}

/// PostgreSQL connection details for the known-keys store
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: SecretString,
}

/// Fully-resolved run configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Mail account to scan
    pub account: ImapAccount,
    /// Transport timeouts
    pub timeouts: TimeoutConfig,
    /// Database connection, present only in incremental mode
    pub database: Option<DatabaseConfig>,
    /// Whether to skip messages already in the database
    pub incremental: bool,
    /// Scan only this mailbox
    pub limit_mailbox: Option<String>,
    /// Output SQL file (stdout when absent)
    pub output: Option<PathBuf>,
}

impl ScanConfig {
    /// Resolve the full configuration from CLI flags and environment
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a required value is missing (username,
    /// password, database coordinates in incremental mode), when `--no-ssl`
    /// is requested, or when an environment override is malformed.
    pub fn from_cli(cli: Cli) -> AppResult<Self> {
        if cli.no_ssl {
            return Err(AppError::InvalidInput(
                "insecure IMAP is not supported; connect over TLS".to_owned(),
            ));
        }

        let user = cli.username.ok_or_else(|| {
            AppError::InvalidInput("--username is required".to_owned())
        })?;
        let pass = cli
            .password
            .or_else(|| env_string("IMAP_PASSWORD"))
            .ok_or_else(|| {
                AppError::InvalidInput(
                    "IMAP password is required; pass --password or set IMAP_PASSWORD".to_owned(),
                )
            })?;

        let account = ImapAccount {
            host: cli.host.unwrap_or_else(|| "localhost".to_owned()),
            port: cli.port,
            user,
            pass: SecretString::new(pass.into()),
        };

        let database = if cli.incremental {
            Some(resolve_database(
                cli.db_host,
                cli.db_port,
                cli.db_name,
                cli.db_user,
                cli.db_password,
            )?)
        } else {
            None
        };

        Ok(Self {
            account,
            database,
            timeouts: TimeoutConfig {
                connect_timeout_ms: parse_u64_env("MAIL_SCAN_CONNECT_TIMEOUT_MS", 30_000)?,
                greeting_timeout_ms: parse_u64_env("MAIL_SCAN_GREETING_TIMEOUT_MS", 15_000)?,
                socket_timeout_ms: parse_u64_env("MAIL_SCAN_SOCKET_TIMEOUT_MS", 300_000)?,
            },
            incremental: cli.incremental,
            limit_mailbox: cli.limit_mailbox,
            output: cli.output,
        })
    }
}

/// Resolve database coordinates from flags with `PG*` fallbacks
fn resolve_database(
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
) -> AppResult<DatabaseConfig> {
    let name = name.or_else(|| env_string("PGDATABASE")).ok_or_else(|| {
        AppError::InvalidInput(
            "--db-name is required for incremental mode (or set PGDATABASE)".to_owned(),
        )
    })?;
    let user = user.or_else(|| env_string("PGUSER")).ok_or_else(|| {
        AppError::InvalidInput(
            "--db-user is required for incremental mode (or set PGUSER)".to_owned(),
        )
    })?;
    let password = password
        .or_else(|| env_string("PGPASSWORD"))
        .ok_or_else(|| {
            AppError::InvalidInput(
                "database password is required; pass --db-password or set PGPASSWORD".to_owned(),
            )
        })?;
    let port = match port {
        Some(p) => p,
        None => parse_u16_env("PGPORT", 5432)?,
    };

    Ok(DatabaseConfig {
        host: host
            .or_else(|| env_string("PGHOST"))
            .unwrap_or_else(|| "localhost".to_owned()),
        port,
        name,
        user,
        password: SecretString::new(password.into()),
    })
}

/// Read an environment variable, treating blank values as unset
fn env_string(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Parse a `u16` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match env::var(key) {
        Ok(v) => v.parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}
