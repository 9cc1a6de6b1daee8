use crate::config::DatabaseConfig;
use crate::errors::{map_append_error, Result};
use crate::models::{LedgerEntry, Source};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Idempotent schema bootstrap. The audit table lives in its own schema to
/// keep it out of normal query paths.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id UUID PRIMARY KEY,
        idempotency_key UUID NOT NULL UNIQUE,
        source_user_id UUID REFERENCES users(id),
        destination_user_id UUID NOT NULL REFERENCES users(id),
        amount BIGINT NOT NULL CHECK (amount > 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (source_user_id IS NULL OR source_user_id <> destination_user_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_source_created
        ON transactions (source_user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_destination_created
        ON transactions (destination_user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_endpoints_created
        ON transactions (source_user_id, destination_user_id, created_at, amount)",
    "CREATE SCHEMA IF NOT EXISTS audit",
    r#"
    CREATE TABLE IF NOT EXISTS audit.failed_transactions (
        id UUID PRIMARY KEY,
        idempotency_key UUID NOT NULL,
        source_user_id UUID,
        destination_user_id UUID NOT NULL,
        amount BIGINT NOT NULL,
        error_message TEXT NOT NULL,
        retry_count INT NOT NULL,
        failed_at TIMESTAMPTZ NOT NULL,
        resolved_at TIMESTAMPTZ
    )
    "#,
];

/// Durable home of the ledger. Owns the connection pool; constructed once at
/// startup and shared behind an `Arc`.
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        // Test the connection
        sqlx::query("SELECT 1").fetch_one(&pool).await?;

        info!("Database connection pool created successfully");

        Ok(Store { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the operational and audit tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Ledger schema verified");
        Ok(())
    }

    /// Drain the pool on shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Point lookup by idempotency key, outside any transaction.
    pub async fn find_by_idempotency(&self, key: Uuid) -> Result<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT * FROM transactions WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Open a transaction at serializable isolation. All writes, transfers
    /// and deposits alike, go through one of these.
    pub async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Take an exclusive row lock on the user. A missing user is a no-op:
    /// the subsequent balance derivation returns zero and the transfer fails
    /// the funds check, while a deposit to a missing user is caught by the
    /// foreign key on append.
    pub async fn acquire_user_lock(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<()> {
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(())
    }

    /// Derived balance: incoming minus outgoing over the prefix of the log
    /// with `created_at <= at`, or over the whole log when `at` is `None`.
    /// Zero for unknown users and empty prefixes.
    pub async fn derive_balance(&self, user_id: Uuid, at: Option<DateTime<Utc>>) -> Result<i64> {
        let balance = match at {
            Some(at) => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT CAST(
                        COALESCE((SELECT SUM(amount) FROM transactions
                                  WHERE destination_user_id = $1 AND created_at <= $2), 0)
                      - COALESCE((SELECT SUM(amount) FROM transactions
                                  WHERE source_user_id = $1 AND created_at <= $2), 0)
                    AS BIGINT)
                    "#,
                )
                .bind(user_id)
                .bind(at)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT CAST(
                        COALESCE((SELECT SUM(amount) FROM transactions
                                  WHERE destination_user_id = $1), 0)
                      - COALESCE((SELECT SUM(amount) FROM transactions
                                  WHERE source_user_id = $1), 0)
                    AS BIGINT)
                    "#,
                )
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(balance)
    }

    /// Current balance read through the open transaction, after locks are
    /// held. This is the read the funds check is based on.
    pub async fn derive_balance_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT CAST(
                COALESCE((SELECT SUM(amount) FROM transactions
                          WHERE destination_user_id = $1), 0)
              - COALESCE((SELECT SUM(amount) FROM transactions
                          WHERE source_user_id = $1), 0)
            AS BIGINT)
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(balance)
    }

    /// Append one ledger entry. The store assigns `id` and `created_at`;
    /// the database enforces idempotency-key uniqueness, positivity, and
    /// the foreign keys.
    pub async fn append_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        idempotency_key: Uuid,
        source: Source,
        destination_user_id: Uuid,
        amount: i64,
    ) -> Result<LedgerEntry> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO transactions (
                id, idempotency_key, source_user_id,
                destination_user_id, amount, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(idempotency_key)
        .bind(source.user_id())
        .bind(destination_user_id)
        .bind(amount)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await
        .map_err(map_append_error)?;

        Ok(entry)
    }

    /// Every entry the user sent or received, newest first.
    pub async fn list_history(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT * FROM transactions
            WHERE source_user_id = $1 OR destination_user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn test_connect_and_bootstrap() {
        dotenv::dotenv().ok();
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/transfer_engine".to_string()),
            max_connections: 5,
            min_connections: 1,
        };

        let store = Store::connect(&config).await.unwrap();
        store.ensure_schema().await.unwrap();

        // Idempotent: a second bootstrap is a no-op.
        store.ensure_schema().await.unwrap();
        store.close().await;
    }
}
