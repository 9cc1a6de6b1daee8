//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `transfer_engine_transfers_committed_total` - Transfers committed
//! - `transfer_engine_deposits_committed_total` - Deposits committed
//! - `transfer_engine_idempotent_replays_total` - Requests resolved to a
//!   previously committed entry
//! - `transfer_engine_insufficient_funds_total` - Transfers refused by the
//!   funds check
//! - `transfer_engine_conflicts_exhausted_total` - Writes that spent the
//!   whole retry budget
//! - `transfer_engine_execute_duration_seconds` - Write latency histogram

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector. Each instance carries its own registry so multiple
/// engines in one process do not collide.
#[derive(Clone)]
pub struct Metrics {
    pub transfers_committed: IntCounter,
    pub deposits_committed: IntCounter,
    pub idempotent_replays: IntCounter,
    pub insufficient_funds: IntCounter,
    pub conflicts_exhausted: IntCounter,
    pub execute_duration: Histogram,
    registry: Arc<Registry>,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_committed = IntCounter::new(
            "transfer_engine_transfers_committed_total",
            "Transfers committed to the ledger",
        )?;
        registry.register(Box::new(transfers_committed.clone()))?;

        let deposits_committed = IntCounter::new(
            "transfer_engine_deposits_committed_total",
            "Deposits committed to the ledger",
        )?;
        registry.register(Box::new(deposits_committed.clone()))?;

        let idempotent_replays = IntCounter::new(
            "transfer_engine_idempotent_replays_total",
            "Requests resolved to a previously committed entry",
        )?;
        registry.register(Box::new(idempotent_replays.clone()))?;

        let insufficient_funds = IntCounter::new(
            "transfer_engine_insufficient_funds_total",
            "Transfers refused by the funds check",
        )?;
        registry.register(Box::new(insufficient_funds.clone()))?;

        let conflicts_exhausted = IntCounter::new(
            "transfer_engine_conflicts_exhausted_total",
            "Writes that exhausted the retry budget",
        )?;
        registry.register(Box::new(conflicts_exhausted.clone()))?;

        let execute_duration = Histogram::with_opts(
            HistogramOpts::new(
                "transfer_engine_execute_duration_seconds",
                "Write operation latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(execute_duration.clone()))?;

        Ok(Self {
            transfers_committed,
            deposits_committed,
            idempotent_replays,
            insufficient_funds,
            conflicts_exhausted,
            execute_duration,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
