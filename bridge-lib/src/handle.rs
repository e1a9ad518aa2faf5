//! Handle registry
//!
//! Every native resource lives in one slot map. A handle is the slot key
//! encoded as a positive 64-bit integer; the encoding carries the slot
//! generation, so a closed handle keeps failing even after its slot is reused.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;
use slotmap::{DefaultKey, Key, KeyData, SlotMap};

use crate::codec::ZStream;
use crate::error::{Error, Result};
use crate::json::Document;
use crate::mutex_lock;
use crate::storage::kv::KvStore;
use crate::storage::sql::{QueryCursor, SqlConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(i64);

impl Handle {
    pub const INVALID: Handle = Handle(0);

    /// Accepts only values that could have been issued by the registry.
    pub fn from_raw(raw: i64) -> Option<Handle> {
        if raw <= 0 {
            return None;
        }
        let data = KeyData::from_ffi(raw as u64);
        (data.as_ffi() == raw as u64).then_some(Handle(raw))
    }

    pub fn as_raw(self) -> i64 {
        self.0
    }

    fn key(self) -> DefaultKey {
        KeyData::from_ffi(self.0 as u64).into()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Codec,
    Json,
    Kv,
    Sql,
    Query,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Codec,
        ResourceKind::Json,
        ResourceKind::Kv,
        ResourceKind::Sql,
        ResourceKind::Query,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Codec => "codec",
            ResourceKind::Json => "json",
            ResourceKind::Kv => "kv",
            ResourceKind::Sql => "sql",
            ResourceKind::Query => "query",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
pub enum Resource {
    Codec(Arc<Mutex<ZStream>>),
    Json(Arc<Document>),
    Kv(KvStore),
    Sql(SqlConnection),
    Query(Arc<Mutex<QueryCursor>>),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Codec(_) => ResourceKind::Codec,
            Resource::Json(_) => ResourceKind::Json,
            Resource::Kv(_) => ResourceKind::Kv,
            Resource::Sql(_) => ResourceKind::Sql,
            Resource::Query(_) => ResourceKind::Query,
        }
    }
}

#[derive(Default)]
pub struct Registry {
    slots: Mutex<SlotMap<DefaultKey, Resource>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: Resource) -> Result<Handle> {
        let mut slots = mutex_lock!(self.slots);
        let key = slots.insert(resource);
        let raw = key.data().as_ffi();
        match i64::try_from(raw) {
            Ok(raw) => Ok(Handle(raw)),
            Err(_) => {
                slots.remove(key);
                Err(Error::runtime("handle space exhausted"))
            }
        }
    }

    /// Clones the resource out so the registry lock is not held while it is used.
    pub fn get(&self, handle: Handle) -> Result<Resource> {
        let slots = mutex_lock!(self.slots);
        slots
            .get(handle.key())
            .cloned()
            .ok_or(Error::InvalidHandle(handle.as_raw()))
    }

    /// Removes the resource if it is of the expected kind.
    pub fn remove(&self, handle: Handle, expected: ResourceKind) -> Result<Resource> {
        let mut slots = mutex_lock!(self.slots);
        let key = handle.key();
        let found = slots
            .get(key)
            .map(Resource::kind)
            .ok_or(Error::InvalidHandle(handle.as_raw()))?;
        if found != expected {
            return Err(Error::WrongKind {
                handle: handle.as_raw(),
                expected,
                found,
            });
        }
        slots
            .remove(key)
            .ok_or(Error::InvalidHandle(handle.as_raw()))
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        let slots = mutex_lock!(self.slots);
        slots.values().filter(|r| r.kind() == kind).count()
    }

    /// Removes every resource of `kind`, returning how many were dropped.
    pub fn remove_all(&self, kind: ResourceKind) -> usize {
        let mut slots = mutex_lock!(self.slots);
        let before = slots.len();
        slots.retain(|_, r| r.kind() != kind);
        before - slots.len()
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

pub fn live_count(kind: ResourceKind) -> usize {
    registry().count(kind)
}

pub(crate) fn wrong_kind(handle: Handle, expected: ResourceKind, found: &Resource) -> Error {
    Error::WrongKind {
        handle: handle.as_raw(),
        expected,
        found: found.kind(),
    }
}

/// Resolves a raw value into a handle, failing the same way as a stale one.
pub fn resolve(raw: i64) -> Result<Handle> {
    Handle::from_raw(raw).ok_or(Error::InvalidHandle(raw))
}
