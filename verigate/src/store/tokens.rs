//! Async token repository over a sqlx Postgres pool.
//!
//! Every state transition is guarded in SQL (`WHERE used = FALSE`,
//! `WHERE decision IS NULL`) so two concurrent requests cannot both win the
//! same transition; the loser sees zero rows affected.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use super::types::{Decision, TokenRow};

/// Length in bytes of the random token material; hex encoding doubles it.
const TOKEN_BYTES: usize = 32;

/// Errors from token store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token not found")]
    NotFound,

    #[error("token already exists")]
    AlreadyExists,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Token repository with a shared connection pool.
#[derive(Clone)]
pub struct TokenStore {
    pool: PgPool,
}

impl TokenStore {
    /// Connect to Postgres and build the store.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections = max_connections, "token_store_connected");

        Ok(Self { pool })
    }

    /// Build a store from an existing pool (used by tests and the sweeper).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Issue a new token row for the given webhook URL.
    pub async fn create(
        &self,
        webhook_url: &str,
        ttl_seconds: i64,
    ) -> Result<TokenRow, StoreError> {
        let token = generate_token();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds);

        let row: TokenRow = sqlx::query_as(
            r#"
            INSERT INTO tokens (token, webhook_url, expires_at, used, submitted, decision, created_at, decided_at)
            VALUES ($1, $2, $3, FALSE, FALSE, NULL, $4, NULL)
            RETURNING token, webhook_url, expires_at, used, submitted, decision, created_at, decided_at
            "#,
        )
        .bind(&token)
        .bind(webhook_url)
        .bind(expires_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            // A generated token colliding with an existing row
            sqlx::Error::Database(db_err) if db_err.constraint().is_some() => {
                StoreError::AlreadyExists
            }
            _ => StoreError::from(e),
        })?;

        info!(
            token_prefix = row.token_prefix(),
            expires_at = %row.expires_at,
            "token_issued"
        );

        Ok(row)
    }

    /// Look up a token row by its full token value.
    pub async fn find(&self, token: &str) -> Result<TokenRow, StoreError> {
        let row: Option<TokenRow> = sqlx::query_as(
            r#"
            SELECT token, webhook_url, expires_at, used, submitted, decision, created_at, decided_at
            FROM tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::NotFound)
    }

    /// Consume a token after a successful relay.
    ///
    /// Returns false if another request consumed it first.
    pub async fn mark_submitted(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET used = TRUE, submitted = TRUE
            WHERE token = $1 AND used = FALSE
            "#,
        )
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a reviewer decision on a submitted token.
    ///
    /// Returns false if the token was never submitted or already decided.
    pub async fn record_decision(
        &self,
        token: &str,
        decision: Decision,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET decision = $2, decided_at = $3
            WHERE token = $1 AND submitted = TRUE AND decision IS NULL
            "#,
        )
        .bind(token)
        .bind(decision.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Consume every token that expired before `now` without a submission.
    ///
    /// Returns the swept rows so the caller can notify their webhooks.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<TokenRow>, StoreError> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            r#"
            UPDATE tokens
            SET used = TRUE
            WHERE used = FALSE AND submitted = FALSE AND expires_at < $1
            RETURNING token, webhook_url, expires_at, used, submitted, decision, created_at, decided_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        if !rows.is_empty() {
            info!(expired_count = rows.len(), "tokens_expired");
        }

        Ok(rows)
    }
}

/// Generate an opaque hex token from 32 random bytes.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_token_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_store_error_variants() {
        assert_eq!(StoreError::NotFound.to_string(), "token not found");
        assert_eq!(StoreError::AlreadyExists.to_string(), "token already exists");

        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(_)));
    }
}
