use crate::audit::FailureAudit;
use crate::config::Config;
use crate::coordinator::{lock_order, Coordinator};
use crate::database::Store;
use crate::errors::{Result, TransferEngineError};
use crate::metrics::Metrics;
use crate::models::{DepositRequest, FailedAttempt, LedgerEntry, Source, TransferRequest};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Stateless orchestrator for the ledger's write and read operations. Safe
/// to call concurrently from any number of tasks; every operation holds at
/// most one pooled connection for the duration of its transaction.
pub struct TransferService {
    store: Arc<Store>,
    coordinator: Coordinator,
    audit: FailureAudit,
    metrics: Metrics,
}

impl TransferService {
    pub fn new(store: Arc<Store>, config: &Config) -> Result<Self> {
        let metrics = Metrics::new()
            .map_err(|e| TransferEngineError::Internal(format!("Failed to build metrics: {e}")))?;

        Ok(TransferService {
            audit: FailureAudit::new(store.pool().clone()),
            coordinator: Coordinator::new(config.retry.clone()),
            metrics,
            store,
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Move value between two users. At most one ledger entry is ever
    /// committed per idempotency key; replays return the original entry.
    pub async fn execute_transfer(
        &self,
        cancel: &CancellationToken,
        request: TransferRequest,
    ) -> Result<LedgerEntry> {
        let started = Instant::now();
        Self::validate_transfer(&request)?;

        // Fast path: a stored entry under this key is authoritative,
        // whatever the rest of the payload says.
        if let Some(existing) = self.store.find_by_idempotency(request.idempotency_key).await? {
            self.metrics.idempotent_replays.inc();
            return Ok(existing);
        }

        let result = self
            .coordinator
            .run(cancel, "transfer", || self.attempt_transfer(&request))
            .await;

        self.metrics
            .execute_duration
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(entry) => {
                self.metrics.transfers_committed.inc();
                info!(
                    "Transfer {} committed: {} -> {} amount {}",
                    entry.id, request.source_user_id, request.destination_user_id, request.amount
                );
                Ok(entry)
            }
            Err(err) => {
                if let TransferEngineError::InsufficientFunds { .. } = err {
                    self.metrics.insufficient_funds.inc();
                }
                self.audit_write_failure(
                    &err,
                    request.idempotency_key,
                    Source::User(request.source_user_id),
                    request.destination_user_id,
                    request.amount,
                )
                .await;
                Err(err)
            }
        }
    }

    /// Inject value into the system. Same idempotency and retry contract as
    /// a transfer; no source user and no funds check.
    pub async fn execute_deposit(
        &self,
        cancel: &CancellationToken,
        request: DepositRequest,
    ) -> Result<LedgerEntry> {
        let started = Instant::now();
        Self::validate_deposit(&request)?;

        if let Some(existing) = self.store.find_by_idempotency(request.idempotency_key).await? {
            self.metrics.idempotent_replays.inc();
            return Ok(existing);
        }

        let result = self
            .coordinator
            .run(cancel, "deposit", || self.attempt_deposit(&request))
            .await;

        self.metrics
            .execute_duration
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(entry) => {
                self.metrics.deposits_committed.inc();
                info!(
                    "Deposit {} committed: {} amount {}",
                    entry.id, request.destination_user_id, request.amount
                );
                Ok(entry)
            }
            Err(err) => {
                self.audit_write_failure(
                    &err,
                    request.idempotency_key,
                    Source::Deposit,
                    request.destination_user_id,
                    request.amount,
                )
                .await;
                Err(err)
            }
        }
    }

    /// Current derived balance. Lock-free; unknown users are 0.
    pub async fn balance_now(&self, cancel: &CancellationToken, user_id: Uuid) -> Result<i64> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TransferEngineError::Canceled),
            balance = self.store.derive_balance(user_id, None) => balance,
        }
    }

    /// Balance as of `at`, inclusive. A future `at` yields the current
    /// balance; an `at` before the user's first entry yields 0.
    pub async fn balance_at(
        &self,
        cancel: &CancellationToken,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TransferEngineError::Canceled),
            balance = self.store.derive_balance(user_id, Some(at)) => balance,
        }
    }

    /// Every entry the user sent or received, newest first.
    pub async fn list_history(
        &self,
        cancel: &CancellationToken,
        user_id: Uuid,
    ) -> Result<Vec<LedgerEntry>> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TransferEngineError::Canceled),
            entries = self.store.list_history(user_id) => entries,
        }
    }

    /// One full attempt at a transfer. Re-entered from the probe on every
    /// retry: a prior attempt may have committed before its conflict
    /// surfaced.
    async fn attempt_transfer(&self, request: &TransferRequest) -> Result<LedgerEntry> {
        if let Some(existing) = self.store.find_by_idempotency(request.idempotency_key).await? {
            return Ok(existing);
        }

        let mut tx = self.store.begin_serializable().await?;

        for user_id in lock_order([request.source_user_id, request.destination_user_id]) {
            self.store.acquire_user_lock(&mut tx, user_id).await?;
        }

        let available = self
            .store
            .derive_balance_in_tx(&mut tx, request.source_user_id)
            .await?;
        if available < request.amount {
            tx.rollback().await?;
            return Err(TransferEngineError::InsufficientFunds {
                required: request.amount,
                available,
            });
        }

        match self
            .store
            .append_entry(
                &mut tx,
                request.idempotency_key,
                Source::User(request.source_user_id),
                request.destination_user_id,
                request.amount,
            )
            .await
        {
            Ok(entry) => {
                tx.commit().await?;
                Ok(entry)
            }
            Err(err) if err.is_idempotency_violation() => {
                // A concurrent request with the same key won the race; its
                // committed entry is the result.
                tx.rollback().await?;
                match self.store.find_by_idempotency(request.idempotency_key).await? {
                    Some(existing) => Ok(existing),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// One full attempt at a deposit: destination lock only, no funds
    /// check, serializable isolation retained.
    async fn attempt_deposit(&self, request: &DepositRequest) -> Result<LedgerEntry> {
        if let Some(existing) = self.store.find_by_idempotency(request.idempotency_key).await? {
            return Ok(existing);
        }

        let mut tx = self.store.begin_serializable().await?;

        self.store
            .acquire_user_lock(&mut tx, request.destination_user_id)
            .await?;

        match self
            .store
            .append_entry(
                &mut tx,
                request.idempotency_key,
                Source::Deposit,
                request.destination_user_id,
                request.amount,
            )
            .await
        {
            Ok(entry) => {
                tx.commit().await?;
                Ok(entry)
            }
            Err(err) if err.is_idempotency_violation() => {
                tx.rollback().await?;
                match self.store.find_by_idempotency(request.idempotency_key).await? {
                    Some(existing) => Ok(existing),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Best-effort audit after the main transaction has ended. Expected
    /// business outcomes and cancellation are not audited.
    async fn audit_write_failure(
        &self,
        err: &TransferEngineError,
        idempotency_key: Uuid,
        source: Source,
        destination_user_id: Uuid,
        amount: i64,
    ) {
        if !err.is_audited_write_failure() {
            return;
        }

        if let TransferEngineError::Conflict { .. } = err {
            self.metrics.conflicts_exhausted.inc();
        }

        let retry_count = match err {
            TransferEngineError::Conflict { attempts, .. } => *attempts,
            _ => 0,
        };

        self.audit
            .record(&FailedAttempt::new(
                idempotency_key,
                source,
                destination_user_id,
                amount,
                err.to_string(),
                retry_count,
            ))
            .await;
    }

    fn validate_transfer(request: &TransferRequest) -> Result<()> {
        validator::Validate::validate(request)
            .map_err(|e| TransferEngineError::Validation(e.to_string()))?;

        if request.source_user_id == request.destination_user_id {
            return Err(TransferEngineError::Validation(
                "source and destination must be distinct users".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_deposit(request: &DepositRequest) -> Result<()> {
        validator::Validate::validate(request)
            .map_err(|e| TransferEngineError::Validation(e.to_string()))
    }
}
