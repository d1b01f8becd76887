//! Property-based tests (fuzzing) for item sync.
//!
//! Uses proptest to generate random inputs and verify the hashing, backoff and
//! cursor parsing code never panics and keeps its invariants.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::{Map, Value};
use std::time::Duration;

use item_sync::sync::parse_next_url;
use item_sync::{ExternalId, ExternalRecord, RetryConfig};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate arbitrary JSON values, nested up to a few levels
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec(("[a-z_]{1,8}", inner), 0..6)
                .prop_map(|pairs| Value::Object(pairs.into_iter().collect())),
        ]
    })
}

fn attributes_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::vec(("[a-z_]{1,12}", arbitrary_json_strategy()), 0..8)
}

fn external_id_strategy() -> impl Strategy<Value = ExternalId> {
    prop_oneof![
        any::<i64>().prop_map(ExternalId::Int),
        "[a-zA-Z0-9 -]{1,20}".prop_map(ExternalId::Text),
    ]
}

fn record(id: ExternalId, title: &str, pairs: impl IntoIterator<Item = (String, Value)>) -> ExternalRecord {
    let attributes: Map<String, Value> = pairs.into_iter().collect();
    ExternalRecord::new(id, title).with_attributes(attributes)
}

// =============================================================================
// Content hash
// =============================================================================

proptest! {
    #[test]
    fn hash_ignores_attribute_insertion_order(
        id in external_id_strategy(),
        title in ".{0,40}",
        pairs in attributes_strategy(),
    ) {
        let forward = record(id.clone(), &title, pairs.clone());
        let reversed = record(id, &title, pairs.into_iter().rev());

        // Later duplicates win on insert, so only compare when keys are unique
        prop_assume!(forward.attributes == reversed.attributes);
        prop_assert_eq!(forward.content_hash().unwrap(), reversed.content_hash().unwrap());
    }

    #[test]
    fn hash_is_lowercase_hex_sha256(title in ".{0,40}", pairs in attributes_strategy()) {
        let hash = record(ExternalId::Int(1), &title, pairs).content_hash().unwrap();
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_changes_with_title(a in "[a-z]{1,20}", b in "[a-z]{1,20}", pairs in attributes_strategy()) {
        prop_assume!(a != b);
        let left = record(ExternalId::Int(1), &a, pairs.clone());
        let right = record(ExternalId::Int(1), &b, pairs);
        prop_assert_ne!(left.content_hash().unwrap(), right.content_hash().unwrap());
    }

    #[test]
    fn hash_does_not_depend_on_external_id(a in external_id_strategy(), b in external_id_strategy()) {
        let left = record(a, "same", Vec::new());
        let right = record(b, "same", Vec::new());
        prop_assert_eq!(left.content_hash().unwrap(), right.content_hash().unwrap());
    }
}

// =============================================================================
// Backoff
// =============================================================================

proptest! {
    #[test]
    fn backoff_is_monotonic_and_capped(
        initial_ms in 1u64..5_000,
        max_ms in 1u64..120_000,
        factor in 1.0f64..4.0,
        attempts in 1u32..64,
    ) {
        let config = RetryConfig {
            max_retries: attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            factor,
        };

        prop_assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        let mut previous = Duration::ZERO;
        for attempt in 1..=attempts {
            let delay = config.delay_for_attempt(attempt);
            prop_assert!(delay <= config.max_delay);
            prop_assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn first_retry_waits_initial_delay(initial_ms in 1u64..10_000) {
        let config = RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
        };
        prop_assert_eq!(config.delay_for_attempt(1), Duration::from_millis(initial_ms));
    }
}

// =============================================================================
// Cursor parsing
// =============================================================================

proptest! {
    #[test]
    fn next_url_round_trips_offset_and_limit(offset in any::<u64>(), limit in 1u64..10_000) {
        let url = format!("https://pokeapi.co/api/v2/pokemon?offset={offset}&limit={limit}");
        prop_assert_eq!(parse_next_url(&url).unwrap(), (offset, limit));
    }

    #[test]
    fn next_url_without_limit_defaults_to_twenty(offset in any::<u64>()) {
        let url = format!("https://pokeapi.co/api/v2/pokemon?offset={offset}");
        prop_assert_eq!(parse_next_url(&url).unwrap(), (offset, 20));
    }

    #[test]
    fn next_url_never_panics(input in ".*") {
        let _ = parse_next_url(&input);
    }
}
