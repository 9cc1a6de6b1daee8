//! Transfer Engine
//!
//! Ledger-backed money movement over a single relational store. Every value
//! movement is an immutable row in an append-only transaction log; balances
//! are never materialized and are derived on demand from the log.
//!
//! # Architecture
//!
//! - **Append-only ledger**: entries are inserted once and never updated
//! - **Derived balances**: incoming minus outgoing over a time prefix
//! - **Serializable writes**: every transfer and deposit runs in a
//!   serializable transaction with row locks taken in canonical order
//! - **Idempotency keys**: a unique constraint is the sole deduplication
//!   mechanism; replays return the originally committed entry
//!
//! # Invariants
//!
//! - Conservation: Σ(balances) == Σ(deposit amounts) for all time
//! - Non-overdraft: no derived balance is ever negative
//! - At-most-once: one ledger entry per idempotency key

#![forbid(unsafe_code)]

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod services;

pub use crate::config::Config;
pub use coordinator::{Coordinator, RetryConfig};
pub use database::Store;
pub use errors::{Result, TransferEngineError};
pub use models::{DepositRequest, LedgerEntry, Source, TransferRequest};
pub use services::TransferService;

// Re-export the cancellation primitive threaded through every operation.
pub use tokio_util::sync::CancellationToken;
