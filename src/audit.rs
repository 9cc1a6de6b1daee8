use crate::models::FailedAttempt;
use sqlx::postgres::PgPool;
use tracing::{error, warn};

/// Best-effort sink for writes that exhausted their retry budget. Runs
/// after the main transaction has ended, on its own connection, so an audit
/// write can never influence whether the caller's request succeeds.
pub struct FailureAudit {
    pool: PgPool,
}

impl FailureAudit {
    pub fn new(pool: PgPool) -> Self {
        FailureAudit { pool }
    }

    /// Record one failed attempt. Infallible to the caller: insert errors
    /// are logged and swallowed so they cannot mask the original error.
    pub async fn record(&self, attempt: &FailedAttempt) {
        warn!(
            "Recording failed attempt {} for key {} after {} retries: {}",
            attempt.id, attempt.idempotency_key, attempt.retry_count, attempt.error_message
        );

        let result = sqlx::query(
            r#"
            INSERT INTO audit.failed_transactions (
                id, idempotency_key, source_user_id, destination_user_id,
                amount, error_message, retry_count, failed_at, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.idempotency_key)
        .bind(attempt.source_user_id)
        .bind(attempt.destination_user_id)
        .bind(attempt.amount)
        .bind(&attempt.error_message)
        .bind(attempt.retry_count)
        .bind(attempt.failed_at)
        .bind(attempt.resolved_at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!("Failed to write audit record {}: {}", attempt.id, e);
        }
    }
}
