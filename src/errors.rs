//! Application error model with process exit-code mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error
//! handling. The scan loop decides which variants are fatal and which are
//! recoverable; `main` derives the process exit code from whatever reaches it.

use thiserror::Error;

/// Application error type
///
/// Covers all error cases the mailbox scanner may encounter. Recoverable
/// failures (per-mailbox, per-message) are counted and logged by the scan
/// loop; only fatal ones propagate out of it.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (missing flag, malformed configuration value)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (mailbox cannot be selected, message gone)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (bad IMAP credentials)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Operation timeout (TCP connect, TLS handshake, IMAP response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Structurally undecodable message input
    #[error("parse error: {0}")]
    Parse(String),
    /// Known-keys database failure
    #[error("database error: {0}")]
    Database(String),
    /// Record sink failure (cannot open or write the output stream)
    #[error("output error: {0}")]
    Output(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Process exit code for a fatal error
    ///
    /// Usage errors exit with 2 so callers can distinguish a bad invocation
    /// from a run that failed against live collaborators.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => 2,
            _ => 1,
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
