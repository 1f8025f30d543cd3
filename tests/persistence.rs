use serde_json::{json, Value};
use tempfile::tempdir;

use tankdb::snapshot;
use tankdb::store::TankStore;
use tankdb::tank::{Tank, TankConfig};

fn unique(name: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}_{}_{}",
        name,
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

#[test]
fn test_save_load_roundtrip() {
    let dir = tempdir().unwrap();
    let name = unique("persist_rt");
    let config = TankConfig::new(&name, 3).capacity(10).persist(true);

    let tank = Tank::create(config.clone()).unwrap();
    tank.add_vector(&[1.0, 2.0, 3.0], json!({"tag": "a"})).unwrap();
    tank.add_vector(&[4.0, 5.0, 6.0], Value::Null).unwrap();
    tank.save(dir.path()).unwrap();
    tank.close();

    assert!(snapshot::record_exists(dir.path(), &name));

    let restored = Tank::create(config).unwrap();
    assert!(restored.is_empty());
    restored.load(dir.path()).unwrap();

    assert_eq!(restored.len(), 2);
    assert_eq!(restored.get_vector("1").unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(restored.get_vector("2").unwrap(), vec![4.0, 5.0, 6.0]);
    assert_eq!(restored.get_metadata("1"), Some(json!({"tag": "a"})));
    assert_eq!(restored.get_metadata("2"), Some(Value::Null));

    // key numbering resumes after the restored rows
    let key = restored.add_vector(&[7.0, 8.0, 9.0], Value::Null).unwrap();
    assert_eq!(key, "3");
    restored.close();
}

#[test]
fn test_load_without_record_is_a_noop() {
    let dir = tempdir().unwrap();
    let tank = Tank::create(TankConfig::new(unique("persist_none"), 3).capacity(4)).unwrap();
    tank.load(dir.path()).unwrap();
    assert!(tank.is_empty());
    tank.close();
}

#[test]
fn test_partial_record_is_a_noop() {
    let dir = tempdir().unwrap();
    let name = unique("persist_partial");
    let config = TankConfig::new(&name, 2).capacity(4);

    let tank = Tank::create(config.clone()).unwrap();
    tank.add_vector(&[1.0, 2.0], Value::Null).unwrap();
    tank.save(dir.path()).unwrap();
    tank.close();

    // lose one half of the pair
    std::fs::remove_file(snapshot::metadata_path(dir.path(), &name)).unwrap();

    let restored = Tank::create(config).unwrap();
    restored.load(dir.path()).unwrap();
    assert!(restored.is_empty());
    restored.close();
}

#[test]
fn test_load_rejects_wrong_dimension() {
    let dir = tempdir().unwrap();
    let name = unique("persist_dim");

    let tank = Tank::create(TankConfig::new(&name, 3).capacity(4)).unwrap();
    tank.add_vector(&[1.0, 2.0, 3.0], Value::Null).unwrap();
    tank.save(dir.path()).unwrap();
    tank.close();

    let reshaped = Tank::create(TankConfig::new(&name, 4).capacity(4)).unwrap();
    assert!(reshaped.load(dir.path()).is_err());
    reshaped.close();
}

#[test]
fn test_store_restores_saved_tanks() {
    let dir = tempdir().unwrap();
    let name = unique("persist_store");
    let channel_a = unique("persist_ch_a");
    let channel_b = unique("persist_ch_b");

    let store = TankStore::open(dir.path(), Some(&channel_a)).unwrap();
    let tank = store
        .create_tank(TankConfig::new(&name, 2).capacity(8).persist(true))
        .unwrap();
    tank.add_vector(&[1.0, 2.0], json!({"src": "first"})).unwrap();
    tank.add_vector(&[3.0, 4.0], Value::Null).unwrap();
    store.save_tank(&name).unwrap();
    store.stop();

    // a fresh store on the same directory restores the tank with its data
    let store = TankStore::open(dir.path(), Some(&channel_b)).unwrap();
    assert_eq!(store.tank_names(), vec![name.clone()]);
    let restored = store.get_tank(&name).unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.config().dim, 2);
    assert_eq!(restored.get_vector("1").unwrap(), vec![1.0, 2.0]);
    assert_eq!(restored.get_metadata("1"), Some(json!({"src": "first"})));
    store.stop();
}

#[test]
fn test_store_skips_corrupt_records() {
    let dir = tempdir().unwrap();
    let good = unique("persist_good");
    let garbage = unique("persist_garbage");
    let huge = unique("persist_huge");
    let channel_a = unique("persist_ch_c");
    let channel_b = unique("persist_ch_d");

    let store = TankStore::open(dir.path(), Some(&channel_a)).unwrap();
    for name in [&good, &garbage, &huge] {
        let tank = store
            .create_tank(TankConfig::new(name, 2).capacity(4).persist(true))
            .unwrap();
        tank.add_vector(&[1.0, 1.0], Value::Null).unwrap();
        store.save_tank(name).unwrap();
    }
    store.stop();

    // one vector file loses its magic entirely
    std::fs::write(snapshot::vector_path(dir.path(), &garbage), b"garbage").unwrap();

    // another keeps a valid magic but claims an absurd row count; its .meta
    // half still parses, so restore reaches the vector reader
    let mut header = vec![0u8; snapshot::HEADER_SIZE];
    header[0..8].copy_from_slice(&snapshot::MAGIC);
    header[8..12].copy_from_slice(&2u32.to_le_bytes());
    header[12..20].copy_from_slice(&u64::MAX.to_le_bytes());
    std::fs::write(snapshot::vector_path(dir.path(), &huge), &header).unwrap();

    // both damaged tanks are skipped, the healthy one restores
    let store = TankStore::open(dir.path(), Some(&channel_b)).unwrap();
    assert_eq!(store.tank_names(), vec![good.clone()]);
    store.stop();
}

#[test]
fn test_drop_tank_releases_regions() {
    let dir = tempdir().unwrap();
    let name = unique("persist_drop");
    let channel = unique("persist_ch_e");

    let store = TankStore::open(dir.path(), Some(&channel)).unwrap();
    store
        .create_tank(TankConfig::new(&name, 2).capacity(4))
        .unwrap();
    store.drop_tank(&name).unwrap();
    assert!(store.get_tank(&name).is_none());

    // the regions are gone, so the same name can be created again
    let tank = store
        .create_tank(TankConfig::new(&name, 2).capacity(4))
        .unwrap();
    assert!(tank.is_empty());
    store.stop();
}
