//! Release and re-init run in their own binary so the shared test state of
//! the unit tests is left alone.

use bridge_lib::codec::{self, Format, Mode};
use bridge_lib::lifecycle::{self, STATE_READY, STATE_RELEASED};
use bridge_lib::storage::{kv, sql};
use bridge_lib::types::BridgeConfig;
use bridge_lib::{json, Error};

#[test]
fn test_release_closes_storage_and_allows_reinit() {
    let root = tempfile::tempdir().unwrap();
    assert!(matches!(lifecycle::release(), Err(Error::NotInitialized)));
    lifecycle::init(BridgeConfig::with_root(root.path())).unwrap();
    assert_eq!(lifecycle::get_state(), STATE_READY);

    let prefs = kv::open("prefs").unwrap();
    kv::store(prefs).unwrap().write("kept", "yes").unwrap();
    let conn = sql::open("main").unwrap();
    sql::execute(conn, "CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1), (2);").unwrap();
    let query = sql::query(conn, "SELECT v FROM t").unwrap();
    let zip = codec::zip_init(Mode::Default, 64, Format::Zlib).unwrap();
    let decoder = json::decoder_init(r#"{"a": 1}"#).unwrap();

    lifecycle::release().unwrap();
    assert_eq!(lifecycle::get_state(), STATE_RELEASED);
    assert!(lifecycle::config().is_none());

    assert!(matches!(kv::store(prefs), Err(Error::InvalidHandle(_))));
    assert!(matches!(sql::execute(conn, "SELECT 1"), Err(Error::InvalidHandle(_))));
    assert!(matches!(sql::read_row(query), Err(Error::InvalidHandle(_))));
    assert!(kv::close(prefs).is_err());
    assert!(matches!(kv::open("prefs"), Err(Error::NotInitialized)));
    assert!(matches!(lifecycle::release(), Err(Error::NotInitialized)));

    // codec and json handles do not depend on the storage root
    assert_eq!(codec::input(zip, b"still usable", true).unwrap(), 12);
    codec::release(zip).unwrap();
    assert_eq!(json::child_count(decoder, json::NodeId::ROOT).unwrap(), 1);
    json::decoder_release(decoder).unwrap();

    lifecycle::init(BridgeConfig::with_root(root.path())).unwrap();
    assert_eq!(lifecycle::get_state(), STATE_READY);
    let prefs = kv::open("prefs").unwrap();
    assert_eq!(kv::store(prefs).unwrap().read_string("kept").unwrap().as_deref(), Some("yes"));
    kv::close(prefs).unwrap();
    lifecycle::release().unwrap();
}
