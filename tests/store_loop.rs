use std::time::Duration;

use serde_json::{json, Value};
use tempfile::tempdir;

use tankdb::region::SharedRegion;
use tankdb::similarity::SimMethod;
use tankdb::snapshot;
use tankdb::store::TankStore;
use tankdb::tank::{Tank, TankConfig};
use tankdb::{Command, CommandChannel};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

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
fn test_create_over_channel_then_attach() {
    let dir = tempdir().unwrap();
    let channel = unique("loop_create_ch");
    let name = unique("loop_create");

    let store = TankStore::open(dir.path(), Some(&channel)).unwrap();

    let config = TankConfig::new(&name, 3)
        .capacity(16)
        .metric(SimMethod::Inner)
        .persist(true);
    let peer = Tank::request_create(&channel, config, SEND_TIMEOUT).unwrap();

    // the store now owns the tank and the peer shares its regions
    let owned = store.get_tank(&name).expect("store registered the tank");
    assert_eq!(owned.config().metric, SimMethod::Inner);
    assert_eq!(peer.config().capacity, 16);

    peer.add_vector(&[1.0, 2.0, 3.0], json!({"via": "peer"})).unwrap();
    owned.refresh().unwrap();
    assert_eq!(owned.len(), 1);
    store.stop();
}

#[test]
fn test_create_is_idempotent_over_channel() {
    let dir = tempdir().unwrap();
    let channel = unique("loop_idem_ch");
    let name = unique("loop_idem");

    let store = TankStore::open(dir.path(), Some(&channel)).unwrap();
    let config = TankConfig::new(&name, 2).capacity(4);

    let first = Tank::request_create(&channel, config.clone(), SEND_TIMEOUT).unwrap();
    first.add_vector(&[1.0, 2.0], Value::Null).unwrap();

    // a repeated create is acknowledged but leaves the tank untouched
    let again = Tank::request_create(&channel, config, SEND_TIMEOUT).unwrap();
    assert_eq!(again.len(), 1);
    store.stop();
}

#[test]
fn test_save_over_channel_captures_peer_writes() {
    let dir = tempdir().unwrap();
    let channel = unique("loop_save_ch");
    let name = unique("loop_save");

    let store = TankStore::open(dir.path(), Some(&channel)).unwrap();
    let config = TankConfig::new(&name, 2).capacity(8).persist(true);
    let peer = Tank::request_create(&channel, config, SEND_TIMEOUT).unwrap();

    peer.add_vector(&[1.0, 2.0], json!({"n": 1})).unwrap();
    peer.add_vector(&[3.0, 4.0], json!({"n": 2})).unwrap();
    assert!(peer.request_save(&channel, SEND_TIMEOUT));

    // the record on disk reflects the peer's writes
    assert!(snapshot::record_exists(dir.path(), &name));
    let (dim, data) = snapshot::read_vectors(&snapshot::vector_path(dir.path(), &name)).unwrap();
    assert_eq!(dim, 2);
    assert_eq!(data, vec![1.0, 2.0, 3.0, 4.0]);
    store.stop();
}

#[test]
fn test_log_over_channel_is_acknowledged() {
    let dir = tempdir().unwrap();
    let channel = unique("loop_log_ch");
    let name = unique("loop_log");

    let store = TankStore::open(dir.path(), Some(&channel)).unwrap();
    let peer =
        Tank::request_create(&channel, TankConfig::new(&name, 2).capacity(4), SEND_TIMEOUT)
            .unwrap();
    assert!(peer.request_log(&channel, "checkpoint reached", SEND_TIMEOUT));

    // logging an unknown tank is still consumed and acknowledged
    let ok = CommandChannel::send(
        &channel,
        &Command::Log {
            name: "no_such_tank".into(),
            message: "dropped".into(),
        },
        SEND_TIMEOUT,
    );
    assert!(ok);
    store.stop();
}

#[test]
fn test_malformed_command_is_consumed() {
    let dir = tempdir().unwrap();
    let channel = unique("loop_junk_ch");

    let store = TankStore::open(dir.path(), Some(&channel)).unwrap();

    // bypass Command and write garbage straight into the mailbox
    let mut region = SharedRegion::attach(&channel).unwrap();
    let junk = b"frobnicate,everything\0";
    region.as_mut_slice()[..junk.len()].copy_from_slice(junk);

    let start = std::time::Instant::now();
    while start.elapsed() < SEND_TIMEOUT {
        if region.as_slice().iter().all(|&b| b == 0) {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    // the loop cleared the slot without creating anything
    assert!(region.as_slice().iter().all(|&b| b == 0));
    assert!(store.tank_names().is_empty());
    store.stop();
}

#[test]
fn test_send_fails_after_store_stops() {
    let dir = tempdir().unwrap();
    let channel = unique("loop_stopped_ch");

    let store = TankStore::open(dir.path(), Some(&channel)).unwrap();
    store.stop();

    let ok = CommandChannel::send(
        &channel,
        &Command::Save { name: "t".into() },
        Duration::from_millis(200),
    );
    assert!(!ok);
}
