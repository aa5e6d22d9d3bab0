//! PostgreSQL-backed known-keys store
//!
//! Supplies the incremental scan with the set of already-indexed UIDs and
//! idempotently creates the target schema when it is missing. Uses a small
//! `sqlx` pool; the schema statements are shared with the script emitter so
//! the database and the generated SQL can never drift apart.

use std::collections::HashSet;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, AppResult};
use crate::scan::KnownKeys;
use crate::sql;

/// Known-keys store over a PostgreSQL connection pool
pub struct PgKnownKeys {
    pool: PgPool,
}

impl PgKnownKeys {
    /// Connect to PostgreSQL
    ///
    /// # Errors
    ///
    /// - `Database` if the connection cannot be established
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .password(config.password.expose_secret());
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Database(format!("postgres connection failed: {e}")))?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            user = %config.user,
            "connected to PostgreSQL"
        );
        Ok(Self { pool })
    }
}

impl KnownKeys for PgKnownKeys {
    async fn known_uids(&self, mailbox: &str) -> AppResult<HashSet<String>> {
        let uids: Vec<String> =
            sqlx::query_scalar("SELECT uid FROM email_messages WHERE mailbox = $1")
                .bind(mailbox)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    AppError::Database(format!("known-UID query failed for '{mailbox}': {e}"))
                })?;
        Ok(uids.into_iter().collect())
    }

    async fn table_exists(&self) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_name = 'email_messages')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("table existence check failed: {e}")))?;
        Ok(exists)
    }

    async fn ensure_schema(&self) -> AppResult<()> {
        sqlx::query(sql::CREATE_TABLE_IF_NOT_EXISTS)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("table creation failed: {e}")))?;
        for statement in sql::INDEX_STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Database(format!("index creation failed: {e}")))?;
        }
        tracing::info!("created email_messages table and indexes");
        Ok(())
    }
}
