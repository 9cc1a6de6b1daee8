use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferEngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Serialization conflict persisted after {attempts} attempts: {last_error}")]
    Conflict { attempts: u32, last_error: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation cancelled by caller")]
    Canceled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TransferEngineError>;

impl TransferEngineError {
    /// SQLSTATE of the underlying Postgres error, if there is one.
    fn sqlstate(&self) -> Option<String> {
        match self {
            TransferEngineError::Database(sqlx::Error::Database(db)) => {
                db.code().map(|code| code.into_owned())
            }
            _ => None,
        }
    }

    /// Serialization failure or deadlock victim. Safe to re-run the whole
    /// unit of work from the idempotency probe.
    pub fn is_serialization_conflict(&self) -> bool {
        matches!(self.sqlstate().as_deref(), Some("40001") | Some("40P01"))
    }

    /// Unique violation on the ledger's idempotency key: a concurrent winner
    /// committed the same key first.
    pub fn is_idempotency_violation(&self) -> bool {
        if self.sqlstate().as_deref() != Some("23505") {
            return false;
        }
        match self {
            TransferEngineError::Database(sqlx::Error::Database(db)) => db
                .constraint()
                .map(|name| name.contains("idempotency"))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Write failures that get a failed-attempt audit record. Expected
    /// business outcomes and caller cancellation do not.
    pub fn is_audited_write_failure(&self) -> bool {
        matches!(
            self,
            TransferEngineError::Conflict { .. }
                | TransferEngineError::Database(_)
                | TransferEngineError::Internal(_)
        )
    }
}

/// Map store-rejected values (foreign key, check constraint) to Validation.
/// Everything else, including unique violations, passes through for the
/// caller to classify.
pub(crate) fn map_append_error(err: sqlx::Error) -> TransferEngineError {
    if let sqlx::Error::Database(ref db) = err {
        if matches!(db.code().as_deref(), Some("23503") | Some("23514")) {
            return TransferEngineError::Validation(db.to_string());
        }
    }
    TransferEngineError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_retryable() {
        let err = TransferEngineError::InsufficientFunds {
            required: 100,
            available: 50,
        };
        assert!(!err.is_serialization_conflict());
        assert!(!err.is_idempotency_violation());

        let err = TransferEngineError::Validation("bad amount".to_string());
        assert!(!err.is_serialization_conflict());
    }

    #[test]
    fn test_audit_classification() {
        assert!(TransferEngineError::Conflict {
            attempts: 11,
            last_error: "serialization failure".to_string(),
        }
        .is_audited_write_failure());
        assert!(TransferEngineError::Internal("connection reset".to_string())
            .is_audited_write_failure());

        assert!(!TransferEngineError::InsufficientFunds {
            required: 100,
            available: 0,
        }
        .is_audited_write_failure());
        assert!(!TransferEngineError::Canceled.is_audited_write_failure());
        assert!(!TransferEngineError::Validation("unknown user".to_string())
            .is_audited_write_failure());
    }

    #[test]
    fn test_insufficient_funds_display() {
        let err = TransferEngineError::InsufficientFunds {
            required: 8000,
            available: 2000,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: required 8000, available 2000"
        );
    }
}
