//! Integration tests for the instrumented cache.

use instrumented_cache::{
    call_count, from_fn, instrument, replay, Cache, CacheConfig, CallRecord, MemoryStore,
    Operation, OperationId, StoreAdapter, Value, STORE_IDENTITY,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn test_cache() -> Cache {
    Cache::open(CacheConfig::default()).unwrap()
}

// --- Facade ---

#[test]
fn test_keys_are_unique() {
    let cache = test_cache();

    let keys: HashSet<_> = (0..500).map(|i| cache.store(i).unwrap()).collect();
    assert_eq!(keys.len(), 500);
}

#[test]
fn test_round_trip_each_scalar_type() {
    let cache = test_cache();

    let key = cache.store("foo").unwrap();
    assert_eq!(cache.get_str(&key).unwrap(), "foo");

    let key = cache.store(42).unwrap();
    assert_eq!(cache.get_int(&key).unwrap(), 42);

    let key = cache.store(b"\x00bin".to_vec()).unwrap();
    assert_eq!(cache.get(&key).unwrap(), Some(b"\x00bin".to_vec()));

    let key = cache.store(2.5).unwrap();
    let parsed = cache
        .get_with(&key, |raw| Ok(String::from_utf8_lossy(&raw).parse::<f64>().unwrap()))
        .unwrap();
    assert_eq!(parsed, Some(2.5));
}

#[test]
fn test_store_history_replay() {
    let cache = test_cache();

    let first = cache.store("foo").unwrap();
    let second = cache.store(7).unwrap();
    let third = cache.store(b"raw".to_vec()).unwrap();

    let report = cache.replay(&STORE_IDENTITY).unwrap();
    assert_eq!(report.count, 3);
    assert_eq!(
        report.lines(),
        vec![
            "Cache.store was called 3 times:".to_string(),
            format!("Cache.store(*('foo',)) -> {}", first),
            format!("Cache.store(*(7,)) -> {}", second),
            format!("Cache.store(*(b'raw',)) -> {}", third),
        ]
    );
}

#[test]
fn test_flush_clears_values_and_history() {
    let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
    let cache = Cache::with_store(Arc::clone(&store));

    let key = cache.store("foo").unwrap();
    cache.store("bar").unwrap();

    store.flush_all().unwrap();

    assert_eq!(cache.get(&key).unwrap(), None);
    assert_eq!(cache.call_count(&STORE_IDENTITY).unwrap(), 0);
    let report = cache.replay(&STORE_IDENTITY).unwrap();
    assert!(report.calls.is_empty());
}

// --- Generic instrumentation ---

#[test]
fn test_instrumented_custom_operation() {
    let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
    let id = OperationId::new("Greeter.greet").unwrap();
    let greet = instrument(
        from_fn(|(name, times): (String, i64)| Ok(format!("hi {}", name).repeat(times as usize))),
        id.clone(),
        Arc::clone(&store),
    );

    assert_eq!(greet.invoke(("ann".to_string(), 1)).unwrap(), "hi ann");
    assert_eq!(greet.invoke(("bo".to_string(), 2)).unwrap(), "hi bohi bo");

    let report = replay(store.as_ref(), &id).unwrap();
    assert_eq!(report.count, 2);
    assert_eq!(
        report.calls,
        vec![
            CallRecord {
                input: "('ann', 1)".into(),
                output: "hi ann".into(),
            },
            CallRecord {
                input: "('bo', 2)".into(),
                output: "hi bohi bo".into(),
            },
        ]
    );
}

#[test]
fn test_concurrent_callers_keep_count_exact() {
    let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
    let cache = Arc::new(Cache::with_store(Arc::clone(&store)));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..50 {
                    cache.store(Value::Int(t * 1000 + i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(call_count(store.as_ref(), &STORE_IDENTITY).unwrap(), 400);

    // Both lists get one entry per completed call, pairing aside.
    assert_eq!(store.lrange(&STORE_IDENTITY.inputs_key(), 0, -1).unwrap().len(), 400);
    assert_eq!(store.lrange(&STORE_IDENTITY.outputs_key(), 0, -1).unwrap().len(), 400);
}

// --- Properties ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_text_round_trip(text in ".*") {
        let cache = Cache::new_in_memory();
        let key = cache.store(text.clone()).unwrap();
        prop_assert_eq!(cache.get_str(&key).unwrap(), text);
    }

    #[test]
    fn prop_int_round_trip(n in any::<i64>()) {
        let cache = Cache::new_in_memory();
        let key = cache.store(n).unwrap();
        prop_assert_eq!(cache.get_int(&key).unwrap(), n);
    }

    #[test]
    fn prop_bytes_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let cache = Cache::new_in_memory();
        let key = cache.store(bytes.clone()).unwrap();
        prop_assert_eq!(cache.get(&key).unwrap(), Some(bytes));
    }

    #[test]
    fn prop_count_and_history_match_calls(args in prop::collection::vec(any::<i64>(), 0..40)) {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let id = OperationId::new("negate").unwrap();
        let negate = instrument(
            from_fn(|(x,): (i64,)| Ok(x.wrapping_neg())),
            id.clone(),
            Arc::clone(&store),
        );

        for x in &args {
            negate.invoke((*x,)).unwrap();
        }

        let report = replay(store.as_ref(), &id).unwrap();
        prop_assert_eq!(report.count, args.len() as i64);
        prop_assert_eq!(report.calls.len(), args.len());
        for (call, x) in report.calls.iter().zip(&args) {
            prop_assert_eq!(&call.input, &format!("({},)", x));
            prop_assert_eq!(&call.output, &x.wrapping_neg().to_string());
        }
    }
}
