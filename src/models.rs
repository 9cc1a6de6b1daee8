use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Where the value of a ledger entry comes from. A deposit injects value
/// into the system; a user-sourced entry redistributes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Deposit,
    User(Uuid),
}

impl Source {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Source::Deposit => None,
            Source::User(id) => Some(*id),
        }
    }

    pub fn is_deposit(&self) -> bool {
        matches!(self, Source::Deposit)
    }
}

impl From<Option<Uuid>> for Source {
    fn from(column: Option<Uuid>) -> Self {
        match column {
            None => Source::Deposit,
            Some(id) => Source::User(id),
        }
    }
}

/// One immutable record of value movement. Never updated or deleted once
/// inserted; `created_at` is assigned by the store at insertion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub idempotency_key: Uuid,
    pub source_user_id: Option<Uuid>,
    pub destination_user_id: Uuid,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn source(&self) -> Source {
        Source::from(self.source_user_id)
    }
}

/// A participant with an implicit single account. The row exists as a
/// lockable anchor; there is no balance column.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transfer submission. The adapter validates these fields before calling
/// in; the engine re-checks and rejects violations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, validator::Validate)]
pub struct TransferRequest {
    pub idempotency_key: Uuid,
    pub source_user_id: Uuid,
    pub destination_user_id: Uuid,
    #[validate(range(min = 1))]
    pub amount: i64,
}

/// Deposit submission. Value enters the system; there is no source user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, validator::Validate)]
pub struct DepositRequest {
    pub idempotency_key: Uuid,
    pub destination_user_id: Uuid,
    #[validate(range(min = 1))]
    pub amount: i64,
}

/// Audit record for a write that exhausted its retry budget. Written
/// best-effort after the main transaction has ended; never read back by
/// the engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FailedAttempt {
    pub id: Uuid,
    pub idempotency_key: Uuid,
    pub source_user_id: Option<Uuid>,
    pub destination_user_id: Uuid,
    pub amount: i64,
    pub error_message: String,
    pub retry_count: i32,
    pub failed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl FailedAttempt {
    /// Build the audit record for a write that could not be committed.
    pub fn new(
        idempotency_key: Uuid,
        source: Source,
        destination_user_id: Uuid,
        amount: i64,
        error_message: String,
        retry_count: u32,
    ) -> Self {
        FailedAttempt {
            id: Uuid::new_v4(),
            idempotency_key,
            source_user_id: source.user_id(),
            destination_user_id,
            amount,
            error_message,
            retry_count: retry_count as i32,
            failed_at: Utc::now(),
            resolved_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_source_maps_nullable_column() {
        assert_eq!(Source::from(None), Source::Deposit);
        assert!(Source::Deposit.is_deposit());
        assert_eq!(Source::Deposit.user_id(), None);

        let id = Uuid::new_v4();
        assert_eq!(Source::from(Some(id)), Source::User(id));
        assert_eq!(Source::User(id).user_id(), Some(id));
    }

    #[test]
    fn test_entry_source() {
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            idempotency_key: Uuid::new_v4(),
            source_user_id: None,
            destination_user_id: Uuid::new_v4(),
            amount: 10_000,
            created_at: Utc::now(),
        };
        assert!(entry.source().is_deposit());
    }

    #[test]
    fn test_transfer_request_rejects_non_positive_amount() {
        let mut request = TransferRequest {
            idempotency_key: Uuid::new_v4(),
            source_user_id: Uuid::new_v4(),
            destination_user_id: Uuid::new_v4(),
            amount: 0,
        };
        assert!(request.validate().is_err());

        request.amount = -5;
        assert!(request.validate().is_err());

        request.amount = 1;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_failed_attempt_for_deposit_has_no_source() {
        let attempt = FailedAttempt::new(
            Uuid::new_v4(),
            Source::Deposit,
            Uuid::new_v4(),
            5_000,
            "serialization failure".to_string(),
            11,
        );
        assert_eq!(attempt.source_user_id, None);
        assert_eq!(attempt.retry_count, 11);
        assert!(attempt.resolved_at.is_none());
    }
}
