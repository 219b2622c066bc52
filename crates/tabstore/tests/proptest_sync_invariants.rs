//! Property-based invariant tests for the storage sync engine.
//!
//! 1. Decoding never panics; anything that is not JSON decodes to `null`.
//! 2. Acquiring the same (store, key) always yields the same cell.
//! 3. A local write persists to its own key and nowhere else.
//! 4. Foreign notifications never cause writes, for any event stream.
//! 5. Under any interleaving of local writes, foreign notifications, and
//!    clears, the store receives exactly one write per local value change.

mod common;

use common::{SpyStorage, Write};
use proptest::prelude::*;
use serde_json::json;
use tabstore::codec::{decode, encode};
use tabstore::{NO_VALUE, Scope, StorageEvent, StorageEventChannel, Value, WebStorage};

// ── Strategy helpers ──────────────────────────────────────────────────

fn arb_key() -> impl Strategy<Value = String> {
    prop_oneof![Just("a".to_string()), Just("b".to_string()), "[a-z]{1,6}"]
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Raw strings a foreign context might leave behind: valid JSON or junk.
fn arb_raw() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None::<String>),
        arb_json().prop_map(|v| Some(encode(&v))),
        "[ -~]{0,16}".prop_map(Some),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Local(Value),
    Foreign(Option<String>),
    Clear,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        arb_json().prop_map(Op::Local),
        arb_raw().prop_map(Op::Foreign),
        Just(Op::Clear),
    ]
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Decode robustness
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn decode_never_panics(raw in "\\PC{0,32}") {
        let decoded = decode(Some(&raw));
        if serde_json::from_str::<Value>(&raw).is_err() {
            prop_assert_eq!(decoded, NO_VALUE);
        }
    }

    #[test]
    fn decode_inverts_encode(value in arb_json()) {
        prop_assert_eq!(decode(Some(&encode(&value))), value);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Singleton identity
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn same_pair_same_cell(keys in prop::collection::vec(arb_key(), 1..12)) {
        let store = SpyStorage::default().store();
        let service = WebStorage::new(&StorageEventChannel::new());
        let scope = Scope::new();

        let cells: Vec<_> = keys
            .iter()
            .map(|k| service.acquire_cell_in(&scope, &store, k).unwrap())
            .collect();
        for (i, a) in cells.iter().enumerate() {
            for (j, b) in cells.iter().enumerate() {
                prop_assert_eq!(a.ptr_eq(b), keys[i] == keys[j]);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Write-through isolation
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn local_write_hits_one_key(
        key in arb_key(),
        other in arb_key(),
        value in arb_json(),
    ) {
        prop_assume!(key != other);
        let spy = SpyStorage::with_entries(&[(other.as_str(), "\"untouched\"")]);
        let store = spy.store();
        let service = WebStorage::new(&StorageEventChannel::new());
        let scope = Scope::new();
        let cell = service.acquire_cell_in(&scope, &store, &key).unwrap();
        let _neighbour = service.acquire_cell_in(&scope, &store, &other).unwrap();

        cell.set(value.clone());

        let writes = spy.writes();
        if value == NO_VALUE {
            prop_assert!(writes.is_empty());
        } else {
            prop_assert_eq!(writes, vec![Write::Set(key.clone(), encode(&value))]);
        }
        let other_item = store.get_item(&other);
        prop_assert_eq!(other_item.as_deref(), Some("\"untouched\""));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Anti-echo
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn foreign_events_never_write(events in prop::collection::vec(arb_raw(), 0..24)) {
        let spy = SpyStorage::default();
        let store = spy.store();
        let channel = StorageEventChannel::new();
        let service = WebStorage::new(&channel);
        let scope = Scope::new();
        let cell = service.acquire_cell_in(&scope, &store, "k").unwrap();

        for raw in &events {
            channel.dispatch(&StorageEvent::changed(&store, "k", None, raw.clone()));
            prop_assert_eq!(cell.get(), decode(raw.as_deref()));
            prop_assert_eq!(cell.pending_echoes(), 0);
        }
        prop_assert_eq!(spy.write_count(), 0);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Interleavings
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn writes_match_local_changes(ops in prop::collection::vec(arb_op(), 0..32)) {
        let spy = SpyStorage::default();
        let store = spy.store();
        let channel = StorageEventChannel::new();
        let service = WebStorage::new(&channel);
        let scope = Scope::new();
        let cell = service.acquire_cell_in(&scope, &store, "k").unwrap();

        let mut expected_writes = Vec::new();
        for op in ops {
            match op {
                Op::Local(value) => {
                    if cell.get() != value {
                        expected_writes.push(encode(&value));
                    }
                    cell.set(value);
                }
                Op::Foreign(raw) => {
                    spy.poke("k", raw.as_deref());
                    channel.dispatch(&StorageEvent::changed(&store, "k", None, raw));
                }
                Op::Clear => {
                    spy.poke("k", None);
                    channel.dispatch(&StorageEvent::cleared(&store));
                    prop_assert_eq!(cell.get(), NO_VALUE);
                }
            }
            prop_assert_eq!(cell.pending_echoes(), 0);
        }
        prop_assert_eq!(spy.writes_to("k"), expected_writes);
    }
}

#[test]
fn local_write_after_identical_foreign_value_is_persisted() {
    let spy = SpyStorage::default();
    let store = spy.store();
    let channel = StorageEventChannel::new();
    let service = WebStorage::new(&channel);
    let scope = Scope::new();
    let cell = service.acquire_cell_in(&scope, &store, "k").unwrap();

    channel.dispatch(&StorageEvent::changed(&store, "k", None, Some("1".into())));
    channel.dispatch(&StorageEvent::changed(&store, "k", None, Some("1".into())));
    cell.set(json!(2));
    cell.set(json!(1));

    assert_eq!(spy.writes_to("k"), vec!["2", "1"]);
}
