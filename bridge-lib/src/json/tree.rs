use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum NodeType {
    Object = 1,
    Array = 2,
    String = 3,
    Number = 4,
    Bool = 5,
    Null = 6,
}

impl NodeType {
    /// Code used when a node cannot be resolved.
    pub const UNKNOWN_CODE: i32 = 0;

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_container(self) -> bool {
        matches!(self, NodeType::Object | NodeType::Array)
    }
}

/// Index of a node inside its document. The root is always 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn from_raw(raw: i64) -> Option<NodeId> {
        u32::try_from(raw).ok().map(NodeId)
    }

    pub fn as_raw(self) -> i64 {
        self.0 as i64
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
enum Scalar {
    None,
    Str(Box<str>),
    Num(f64),
    Bool(bool),
}

#[derive(Debug)]
struct Node {
    kind: NodeType,
    key: Option<Box<str>>,
    scalar: Scalar,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    child_count: u32,
}

/// Parsed document stored as a flat arena. Children follow their parent in
/// document order and are linked through `next_sibling`.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        let mut doc = Document { nodes: Vec::new() };
        doc.push(None, value);
        doc
    }

    fn push(&mut self, key: Option<String>, value: Value) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let (kind, scalar, children): (_, _, Vec<(Option<String>, Value)>) = match value {
            Value::Null => (NodeType::Null, Scalar::None, Vec::new()),
            Value::Bool(b) => (NodeType::Bool, Scalar::Bool(b), Vec::new()),
            Value::Number(n) => (
                NodeType::Number,
                Scalar::Num(n.as_f64().unwrap_or(f64::NAN)),
                Vec::new(),
            ),
            Value::String(s) => (NodeType::String, Scalar::Str(s.into()), Vec::new()),
            Value::Array(items) => (
                NodeType::Array,
                Scalar::None,
                items.into_iter().map(|v| (None, v)).collect(),
            ),
            Value::Object(map) => (
                NodeType::Object,
                Scalar::None,
                map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
            ),
        };
        self.nodes.push(Node {
            kind,
            key: key.map(Into::into),
            scalar,
            first_child: None,
            next_sibling: None,
            child_count: children.len() as u32,
        });

        let mut prev: Option<NodeId> = None;
        for (child_key, child_value) in children {
            let child = self.push(child_key, child_value);
            match prev {
                Some(p) => self.nodes[p.index()].next_sibling = Some(child),
                None => self.nodes[id.index()].first_child = Some(child),
            }
            prev = Some(child);
        }
        id
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_type(&self, id: NodeId) -> Option<NodeType> {
        self.node(id).map(|n| n.kind)
    }

    pub fn child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.first_child)
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.next_sibling)
    }

    /// Member name of `id` when its parent is an object.
    pub fn key(&self, id: NodeId) -> Option<&str> {
        self.node(id).and_then(|n| n.key.as_deref())
    }

    pub fn lookup(&self, parent: NodeId, key: &str) -> Option<NodeId> {
        if self.node_type(parent)? != NodeType::Object {
            return None;
        }
        self.children(parent).find(|c| self.key(*c) == Some(key))
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.node(id).map_or(0, |n| n.child_count as usize)
    }

    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            doc: self,
            next: self.child(id),
        }
    }

    pub fn read_string(&self, id: NodeId) -> Option<&str> {
        match &self.node(id)?.scalar {
            Scalar::Str(s) => Some(&s[..]),
            _ => None,
        }
    }

    pub fn read_number(&self, id: NodeId) -> Option<f64> {
        match self.node(id)?.scalar {
            Scalar::Num(n) => Some(n),
            _ => None,
        }
    }

    pub fn read_bool(&self, id: NodeId) -> Option<bool> {
        match self.node(id)?.scalar {
            Scalar::Bool(b) => Some(b),
            _ => None,
        }
    }
}

pub struct Children<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.doc.next(current);
        Some(current)
    }
}
