//! Pull-based JSON cursor addressed by decoder handle plus node index.

use std::sync::Arc;

use log::debug;

mod tree;

pub use tree::{Children, Document, NodeId, NodeType};

use crate::error::{Error, Result};
use crate::handle::{registry, wrong_kind, Handle, Resource, ResourceKind};

pub fn decoder_init(text: &str) -> Result<Handle> {
    let doc = Document::parse(text)?;
    let nodes = doc.len();
    let handle = registry().insert(Resource::Json(Arc::new(doc)))?;
    debug!("json decoder {} opened with {} nodes", handle, nodes);
    Ok(handle)
}

pub fn document(decoder: Handle) -> Result<Arc<Document>> {
    match registry().get(decoder)? {
        Resource::Json(doc) => Ok(doc),
        other => Err(wrong_kind(decoder, ResourceKind::Json, &other)),
    }
}

fn checked(doc: &Document, node: NodeId) -> Result<NodeType> {
    doc.node_type(node)
        .ok_or(Error::InvalidNode(node.as_raw()))
}

pub fn node_type(decoder: Handle, node: NodeId) -> Result<NodeType> {
    let doc = document(decoder)?;
    checked(&doc, node)
}

pub fn read_child(decoder: Handle, node: NodeId) -> Result<Option<NodeId>> {
    let doc = document(decoder)?;
    checked(&doc, node)?;
    Ok(doc.child(node))
}

pub fn read_next(decoder: Handle, node: NodeId) -> Result<Option<NodeId>> {
    let doc = document(decoder)?;
    checked(&doc, node)?;
    Ok(doc.next(node))
}

pub fn read_node(decoder: Handle, parent: NodeId, key: &str) -> Result<Option<NodeId>> {
    let doc = document(decoder)?;
    checked(&doc, parent)?;
    Ok(doc.lookup(parent, key))
}

pub fn read_key(decoder: Handle, node: NodeId) -> Result<Option<String>> {
    let doc = document(decoder)?;
    checked(&doc, node)?;
    Ok(doc.key(node).map(str::to_string))
}

pub fn child_count(decoder: Handle, node: NodeId) -> Result<usize> {
    let doc = document(decoder)?;
    checked(&doc, node)?;
    Ok(doc.child_count(node))
}

pub fn read_string(decoder: Handle, node: NodeId) -> Result<String> {
    let doc = document(decoder)?;
    let kind = checked(&doc, node)?;
    doc.read_string(node)
        .map(str::to_string)
        .ok_or_else(|| Error::argument(format!("node {} is {:?}, not a string", node.as_raw(), kind)))
}

pub fn read_number(decoder: Handle, node: NodeId) -> Result<f64> {
    let doc = document(decoder)?;
    let kind = checked(&doc, node)?;
    doc.read_number(node)
        .ok_or_else(|| Error::argument(format!("node {} is {:?}, not a number", node.as_raw(), kind)))
}

pub fn read_bool(decoder: Handle, node: NodeId) -> Result<bool> {
    let doc = document(decoder)?;
    let kind = checked(&doc, node)?;
    doc.read_bool(node)
        .ok_or_else(|| Error::argument(format!("node {} is {:?}, not a bool", node.as_raw(), kind)))
}

/// Drops the parse tree. Node ids taken from it resolve nowhere afterwards.
pub fn decoder_release(decoder: Handle) -> Result<()> {
    registry().remove(decoder, ResourceKind::Json)?;
    debug!("json decoder {} released", decoder);
    Ok(())
}
