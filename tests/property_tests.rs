//! Property-based tests for the engine's pure components
//!
//! The ledger itself lives in Postgres; what can be checked without a
//! database is the retry schedule, the lock-ordering protocol, and the
//! request validation bounds.

use proptest::prelude::*;
use transfer_engine::coordinator::{lock_order, Coordinator, RetryConfig};
use transfer_engine::TransferRequest;
use uuid::Uuid;

fn no_jitter(initial_delay_ms: u64, max_delay_ms: u64) -> Coordinator {
    Coordinator::new(RetryConfig {
        max_retries: 10,
        initial_delay_ms,
        max_delay_ms,
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    })
}

fn uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<[u8; 16]>().prop_map(Uuid::from_bytes)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Without jitter the schedule never shrinks between consecutive
    /// retries.
    #[test]
    fn prop_backoff_is_nondecreasing(
        initial in 1u64..1_000,
        attempt in 0u32..20,
    ) {
        let coordinator = no_jitter(initial, u64::MAX / 2);
        prop_assert!(
            coordinator.backoff_delay(attempt) <= coordinator.backoff_delay(attempt + 1)
        );
    }

    /// The cap bounds the schedule for every attempt, jitter included.
    #[test]
    fn prop_backoff_respects_cap(
        initial in 1u64..1_000,
        cap in 1u64..60_000,
        attempt in 0u32..64,
        jitter in 0.0f64..1.0,
    ) {
        let coordinator = Coordinator::new(RetryConfig {
            max_retries: 10,
            initial_delay_ms: initial,
            max_delay_ms: cap,
            backoff_multiplier: 2.0,
            jitter_factor: jitter,
        });

        let ceiling = (cap as f64 * (1.0 + jitter)).ceil() as u128;
        prop_assert!(coordinator.backoff_delay(attempt).as_millis() <= ceiling);
    }

    /// Lock order is a total, deterministic, permutation-invariant order.
    #[test]
    fn prop_lock_order_is_canonical(a in uuid_strategy(), b in uuid_strategy()) {
        let forward = lock_order([a, b]);
        let backward = lock_order([b, a]);

        prop_assert_eq!(forward, backward);
        prop_assert!(forward[0] <= forward[1]);

        // Nothing is lost or invented.
        let mut expected = [a, b];
        expected.sort();
        prop_assert_eq!(forward, expected);
    }

    /// Positive amounts pass validation; everything else is rejected.
    #[test]
    fn prop_transfer_amount_bounds(amount in i64::MIN..i64::MAX) {
        let request = TransferRequest {
            idempotency_key: Uuid::new_v4(),
            source_user_id: Uuid::new_v4(),
            destination_user_id: Uuid::new_v4(),
            amount,
        };

        let accepted = validator::Validate::validate(&request).is_ok();
        prop_assert_eq!(accepted, amount >= 1);
    }
}
