//! IMAP transport and session operations
//!
//! Provides timeout-bounded wrappers around `async-imap` operations and the
//! production [`MailSession`] implementation. All network calls are enforced
//! to use TLS. Line-shaped responses (LIST, FETCH metadata) are returned raw
//! so the response parser owns all interpretation; message bodies are pulled
//! through the typed fetch API.

use std::sync::Arc;
use std::time::Duration;

use async_imap::types::Fetch;
use async_imap::{Client, Session};
use futures::TryStreamExt;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::config::{ImapAccount, TimeoutConfig};
use crate::errors::{AppError, AppResult};
use crate::scan::MailSession;

/// Type alias for authenticated IMAP session over TLS
///
/// Wraps the TLS stream type to simplify signatures throughout the codebase.
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Production mail session used by the scan loop
///
/// Owns the authenticated connection plus the per-command socket timeout.
pub struct ImapScanSession {
    session: ImapSession,
    socket_timeout: Duration,
}

/// Connect to the IMAP server and authenticate
///
/// Performs the full connection sequence with timeouts:
/// 1. TCP connect
/// 2. TLS handshake with system root certificates
/// 3. Read IMAP greeting
/// 4. LOGIN authentication
///
/// # Errors
///
/// - `InvalidInput` if the hostname is invalid for TLS SNI
/// - `Timeout` if any connection phase times out
/// - `AuthFailed` if authentication fails
/// - `Internal` for TCP, TLS, or greeting failures
pub async fn connect_authenticated(
    account: &ImapAccount,
    timeouts: &TimeoutConfig,
) -> AppResult<ImapScanSession> {
    let connect_duration = Duration::from_millis(timeouts.connect_timeout_ms);
    let greeting_duration = Duration::from_millis(timeouts.greeting_timeout_ms);

    let tcp = timeout(
        connect_duration,
        TcpStream::connect((account.host.as_str(), account.port)),
    )
    .await
    .map_err(|_| AppError::Timeout("tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Internal(format!("tcp connect failed: {e}"))))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(account.host.clone())
        .map_err(|_| AppError::InvalidInput("invalid IMAP host for TLS SNI".to_owned()))?;
    let tls_stream = timeout(greeting_duration, connector.connect(server_name, tcp))
        .await
        .map_err(|_| AppError::Timeout("TLS handshake timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("TLS handshake failed: {e}"))))?;

    let mut client = Client::new(tls_stream);
    let greeting = timeout(greeting_duration, client.read_response())
        .await
        .map_err(|_| AppError::Timeout("IMAP greeting timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("IMAP greeting failed: {e}"))))?;

    if greeting.is_none() {
        return Err(AppError::Internal(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }

    let pass = account.pass.expose_secret();
    let session = timeout(greeting_duration, client.login(account.user.as_str(), pass))
        .await
        .map_err(|_| AppError::Timeout("IMAP login timeout".to_owned()))
        .and_then(|r| {
            r.map_err(|(e, _)| {
                let msg = e.to_string();
                if msg.to_ascii_lowercase().contains("auth") || msg.contains("LOGIN") {
                    AppError::AuthFailed(msg)
                } else {
                    AppError::Internal(msg)
                }
            })
        })?;

    tracing::info!(host = %account.host, port = account.port, user = %account.user, "IMAP session established");
    Ok(ImapScanSession {
        session,
        socket_timeout: Duration::from_millis(timeouts.socket_timeout_ms),
    })
}

impl ImapScanSession {
    /// Run a raw command and return the untagged response bytes
    async fn run_raw(&mut self, command: &str) -> AppResult<Vec<u8>> {
        timeout(
            self.socket_timeout,
            self.session.run_command_and_read_response(command),
        )
        .await
        .map_err(|_| AppError::Timeout(format!("{command} timed out")))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("{command} failed: {e}"))))
    }

    /// Best-effort LOGOUT; failures are logged and swallowed
    pub async fn logout(mut self) {
        match timeout(self.socket_timeout, self.session.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::debug!(%err, "LOGOUT failed"),
            Err(_) => tracing::debug!("LOGOUT timed out"),
        }
    }
}

impl MailSession for ImapScanSession {
    async fn list_mailboxes(&mut self) -> AppResult<Vec<String>> {
        let response = self.run_raw("LIST \"\" \"*\"").await?;
        Ok(untagged_payloads(&response, "LIST"))
    }

    /// EXAMINE keeps the mailbox read-only so scanning never sets `\Seen`
    async fn select(&mut self, mailbox: &str) -> AppResult<()> {
        timeout(self.socket_timeout, self.session.examine(mailbox))
            .await
            .map_err(|_| AppError::Timeout(format!("EXAMINE timed out for mailbox '{mailbox}'")))
            .and_then(|r| {
                r.map_err(|e| {
                    AppError::NotFound(format!("cannot examine mailbox '{mailbox}': {e}"))
                })
            })?;
        Ok(())
    }

    async fn search_all(&mut self) -> AppResult<Vec<u32>> {
        let set = timeout(self.socket_timeout, self.session.search("ALL"))
            .await
            .map_err(|_| AppError::Timeout("SEARCH timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Internal(format!("search failed: {e}"))))?;
        let mut seqs: Vec<u32> = set.into_iter().collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    async fn fetch_uid_line(&mut self, seq: u32) -> AppResult<String> {
        let response = self.run_raw(&format!("FETCH {seq} (UID)")).await?;
        first_untagged_line(&response)
            .ok_or_else(|| AppError::Internal(format!("no FETCH response for message {seq}")))
    }

    async fn fetch_full(&mut self, seq: u32) -> AppResult<(String, Vec<u8>)> {
        let response = self
            .run_raw(&format!("FETCH {seq} (UID FLAGS INTERNALDATE RFC822.SIZE)"))
            .await?;
        let meta_line = first_untagged_line(&response)
            .ok_or_else(|| AppError::Internal(format!("no FETCH response for message {seq}")))?;

        // BODY.PEEK so the fetch does not mark the message as read.
        let stream = timeout(
            self.socket_timeout,
            self.session.fetch(seq.to_string(), "BODY.PEEK[]"),
        )
        .await
        .map_err(|_| AppError::Timeout("FETCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Internal(format!("fetch failed: {e}"))))?;
        let fetches: Vec<Fetch> = timeout(self.socket_timeout, stream.try_collect())
            .await
            .map_err(|_| AppError::Timeout("FETCH stream timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Internal(format!("fetch stream failed: {e}"))))?;

        let fetch = fetches
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("message {seq} not found")))?;
        let body = fetch
            .body()
            .ok_or_else(|| AppError::Internal(format!("message {seq} has no body")))?;
        Ok((meta_line, body.to_vec()))
    }
}

/// Extract the payloads of untagged `* <KEYWORD> ...` response lines
///
/// Tagged completion lines and unrelated untagged responses are dropped; the
/// keyword match is case-insensitive.
fn untagged_payloads(response: &[u8], keyword: &str) -> Vec<String> {
    String::from_utf8_lossy(response)
        .lines()
        .filter_map(|line| {
            let rest = line.trim_end().strip_prefix("* ")?;
            let (head, tail) = rest.split_at_checked(keyword.len())?;
            if head.eq_ignore_ascii_case(keyword) && tail.starts_with(' ') {
                Some(tail[1..].to_owned())
            } else {
                None
            }
        })
        .collect()
}

/// First untagged line of a response, trailing CR stripped
fn first_untagged_line(response: &[u8]) -> Option<String> {
    String::from_utf8_lossy(response)
        .lines()
        .map(str::trim_end)
        .find(|line| line.starts_with("* "))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{first_untagged_line, untagged_payloads};

    #[test]
    fn strips_list_envelope_and_tagged_lines() {
        let response = b"* LIST (\\HasNoChildren) \"/\" INBOX\r\n\
            * LIST (\\Noselect) \"/\" Archive\r\n\
            a2 OK LIST completed\r\n";
        let payloads = untagged_payloads(response, "LIST");
        assert_eq!(
            payloads,
            vec![
                "(\\HasNoChildren) \"/\" INBOX",
                "(\\Noselect) \"/\" Archive"
            ]
        );
    }

    #[test]
    fn keyword_match_is_case_insensitive_and_exact() {
        let response = b"* list () \"/\" Lower\r\n* LISTX () \"/\" Bogus\r\n";
        let payloads = untagged_payloads(response, "LIST");
        assert_eq!(payloads, vec!["() \"/\" Lower"]);
    }

    #[test]
    fn first_untagged_line_skips_tagged_completion() {
        let response = b"* 3 FETCH (UID 42)\r\na4 OK FETCH completed\r\n";
        assert_eq!(
            first_untagged_line(response).as_deref(),
            Some("* 3 FETCH (UID 42)")
        );
        assert!(first_untagged_line(b"a5 OK noop\r\n").is_none());
    }
}
