//! End-to-end scenarios against the public `Engine` façade (§8 concrete
//! scenarios 2-4).
use talus_common::EngineConfig;
use talus_storage::{Engine, WriteOp};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Engine {
    let mut cfg = EngineConfig::new(dir);
    cfg.buffer_pool_size = 32;
    Engine::open(cfg).unwrap()
}

#[test]
fn tombstone_persists_across_reopen_then_key_is_reusable() {
    let dir = tempdir().unwrap();
    {
        let engine = open(dir.path());
        engine.put(b"x", b"a").unwrap();
        assert!(engine.delete(b"x").unwrap());
        engine.close().unwrap();
    }
    let engine = open(dir.path());
    assert_eq!(engine.get(b"x").unwrap(), None);
    engine.put(b"x", b"b").unwrap();
    assert_eq!(engine.get(b"x").unwrap(), Some(b"b".to_vec()));
}

#[test]
fn ordered_scan_with_limit_and_reverse() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    for i in 0..100 {
        let key = format!("key_{i:03}");
        let value = format!("value{i}");
        engine.put(key.as_bytes(), value.as_bytes()).unwrap();
    }

    let forward = engine
        .scan(
            Some(b"key_010"),
            Some(b"key_020"),
            talus_storage::engine::ScanOptions { limit: Some(5), reverse: false, keys_only: false },
        )
        .unwrap();
    let forward_keys: Vec<String> = forward.into_iter().map(|(k, _)| String::from_utf8(k).unwrap()).collect();
    assert_eq!(
        forward_keys,
        vec!["key_010", "key_011", "key_012", "key_013", "key_014"]
    );

    let backward = engine
        .scan(
            Some(b"key_010"),
            Some(b"key_020"),
            talus_storage::engine::ScanOptions { limit: Some(5), reverse: true, keys_only: false },
        )
        .unwrap();
    let backward_keys: Vec<String> = backward.into_iter().map(|(k, _)| String::from_utf8(k).unwrap()).collect();
    assert_eq!(
        backward_keys,
        vec!["key_019", "key_018", "key_017", "key_016", "key_015"]
    );
}

#[test]
fn batch_write_applies_every_op_atomically() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    for i in 0..50 {
        let key = format!("key{i}");
        let value = format!("original_{i}");
        engine.put(key.as_bytes(), value.as_bytes()).unwrap();
    }

    let mut ops = Vec::new();
    for i in 0..25 {
        ops.push(WriteOp::Put(format!("key{i}").into_bytes(), format!("updated_{i}").into_bytes()));
    }
    for i in 25..50 {
        ops.push(WriteOp::Delete(format!("key{i}").into_bytes()));
    }
    for i in 50..100 {
        ops.push(WriteOp::Put(format!("key{i}").into_bytes(), format!("new_{i}").into_bytes()));
    }
    engine.batch_write(&ops).unwrap();

    assert_eq!(engine.get(b"key10").unwrap(), Some(b"updated_10".to_vec()));
    assert_eq!(engine.get(b"key30").unwrap(), None);
    assert_eq!(engine.get(b"key75").unwrap(), Some(b"new_75".to_vec()));
}

#[test]
fn empty_value_is_allowed_empty_key_is_rejected() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    engine.put(b"k", b"").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(Vec::new()));
    assert!(engine.put(b"", b"v").is_err());
}

#[test]
fn oversized_value_round_trips_through_overflow_pages() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    let big = vec![0x42u8; 20_000];
    engine.put(b"big", &big).unwrap();
    assert_eq!(engine.get(b"big").unwrap(), Some(big));
}

#[test]
fn buffer_pool_of_size_one_still_allows_every_operation_to_succeed() {
    let dir = tempdir().unwrap();
    let mut cfg = EngineConfig::new(dir.path());
    cfg.buffer_pool_size = 1;
    let engine = Engine::open(cfg).unwrap();

    for i in 0..20 {
        let key = format!("k{i}");
        engine.put(key.as_bytes(), b"v").unwrap();
    }
    assert_eq!(engine.get(b"k5").unwrap(), Some(b"v".to_vec()));
}
