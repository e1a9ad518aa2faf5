use crate::error::Error;
use crate::json::{self, NodeId, NodeType};

const SAMPLE: &str = r#"{"a": [1, "x", true, null], "b": {"c": 2.5}}"#;

#[test]
fn test_walk_document_through_handles() {
    let decoder = json::decoder_init(SAMPLE).unwrap();
    let root = NodeId::ROOT;
    assert_eq!(json::node_type(decoder, root).unwrap(), NodeType::Object);
    assert_eq!(json::child_count(decoder, root).unwrap(), 2);

    let a = json::read_node(decoder, root, "a").unwrap().unwrap();
    assert_eq!(json::node_type(decoder, a).unwrap(), NodeType::Array);
    assert_eq!(json::read_key(decoder, a).unwrap().as_deref(), Some("a"));
    assert_eq!(json::child_count(decoder, a).unwrap(), 4);

    let first = json::read_child(decoder, a).unwrap().unwrap();
    assert_eq!(json::read_number(decoder, first).unwrap(), 1.0);
    let second = json::read_next(decoder, first).unwrap().unwrap();
    assert_eq!(json::read_string(decoder, second).unwrap(), "x");
    let third = json::read_next(decoder, second).unwrap().unwrap();
    assert!(json::read_bool(decoder, third).unwrap());
    let fourth = json::read_next(decoder, third).unwrap().unwrap();
    assert_eq!(json::node_type(decoder, fourth).unwrap(), NodeType::Null);
    assert_eq!(json::read_next(decoder, fourth).unwrap(), None);
    assert_eq!(json::read_key(decoder, fourth).unwrap(), None);

    let b = json::read_next(decoder, a).unwrap().unwrap();
    let c = json::read_node(decoder, b, "c").unwrap().unwrap();
    assert_eq!(json::read_number(decoder, c).unwrap(), 2.5);
    assert_eq!(json::read_node(decoder, b, "missing").unwrap(), None);

    json::decoder_release(decoder).unwrap();
}

#[test]
fn test_object_children_keep_document_order() {
    let decoder = json::decoder_init(r#"{"z": 1, "a": 2, "m": 3}"#).unwrap();
    let mut keys = Vec::new();
    let mut node = json::read_child(decoder, NodeId::ROOT).unwrap();
    while let Some(id) = node {
        keys.push(json::read_key(decoder, id).unwrap().unwrap());
        node = json::read_next(decoder, id).unwrap();
    }
    assert_eq!(keys, ["z", "a", "m"]);
    json::decoder_release(decoder).unwrap();
}

#[test]
fn test_type_mismatch_and_bad_node() {
    let decoder = json::decoder_init(SAMPLE).unwrap();
    assert!(matches!(
        json::read_string(decoder, NodeId::ROOT),
        Err(Error::Argument(_))
    ));
    assert!(json::read_number(decoder, NodeId::ROOT).is_err());
    let past_end = NodeId::from_raw(99).unwrap();
    assert!(matches!(
        json::node_type(decoder, past_end),
        Err(Error::InvalidNode(99))
    ));
    assert!(json::read_child(decoder, past_end).is_err());
    // lookup on an array finds nothing
    let a = json::read_node(decoder, NodeId::ROOT, "a").unwrap().unwrap();
    assert_eq!(json::read_node(decoder, a, "0").unwrap(), None);
    json::decoder_release(decoder).unwrap();
}

#[test]
fn test_scalar_root_and_malformed_text() {
    let decoder = json::decoder_init("\"only\"").unwrap();
    assert_eq!(json::read_string(decoder, NodeId::ROOT).unwrap(), "only");
    assert_eq!(json::read_child(decoder, NodeId::ROOT).unwrap(), None);
    assert_eq!(json::child_count(decoder, NodeId::ROOT).unwrap(), 0);
    json::decoder_release(decoder).unwrap();

    assert!(matches!(json::decoder_init("{\"a\": "), Err(Error::Json(_))));
    assert!(json::decoder_init("").is_err());
}

#[test]
fn test_release_invalidates_handle() {
    let decoder = json::decoder_init("[1, 2]").unwrap();
    json::decoder_release(decoder).unwrap();
    assert!(matches!(
        json::node_type(decoder, NodeId::ROOT),
        Err(Error::InvalidHandle(_))
    ));
    assert!(json::decoder_release(decoder).is_err());
}

#[test]
fn test_decoders_are_independent() {
    let first = json::decoder_init("[\"one\"]").unwrap();
    let second = json::decoder_init("[\"two\"]").unwrap();
    assert_ne!(first, second);
    let node = json::read_child(first, NodeId::ROOT).unwrap().unwrap();
    json::decoder_release(first).unwrap();
    let other = json::read_child(second, NodeId::ROOT).unwrap().unwrap();
    assert_eq!(json::read_string(second, other).unwrap(), "two");
    assert!(json::read_string(first, node).is_err());
    json::decoder_release(second).unwrap();
}
