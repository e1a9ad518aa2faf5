use std::sync::{Arc, Mutex};

use log::debug;
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{params, Connection, OptionalExtension, ToSql};

use super::Area;
use crate::error::Result;
use crate::handle::{registry, wrong_kind, Handle, Resource, ResourceKind};
use crate::{lifecycle, mutex_lock};

#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl ToSql for KvValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            KvValue::Text(s) => s.to_sql(),
            KvValue::Integer(i) => i.to_sql(),
            KvValue::Float(f) => f.to_sql(),
        }
    }
}

impl From<&str> for KvValue {
    fn from(value: &str) -> Self {
        KvValue::Text(value.to_string())
    }
}

impl From<String> for KvValue {
    fn from(value: String) -> Self {
        KvValue::Text(value)
    }
}

impl From<i64> for KvValue {
    fn from(value: i64) -> Self {
        KvValue::Integer(value)
    }
}

impl From<f64> for KvValue {
    fn from(value: f64) -> Self {
        KvValue::Float(value)
    }
}

/// Typed key-value table on top of a shared SQLite connection.
#[derive(Clone)]
pub struct KvStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl KvStore {
    pub fn attach(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let guard = mutex_lock!(conn);
            guard.execute(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value
                )",
                [],
            )?;
        }
        Ok(Self { conn })
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = mutex_lock!(self.conn);
        let mut stmt = conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        let res = stmt
            .query_row(params![key], |row| row.get::<_, Value>(0))
            .optional()?;
        Ok(res)
    }

    pub fn read(&self, key: &str) -> Result<Option<KvValue>> {
        Ok(match self.get(key)? {
            Some(Value::Text(s)) => Some(KvValue::Text(s)),
            Some(Value::Integer(i)) => Some(KvValue::Integer(i)),
            Some(Value::Real(f)) => Some(KvValue::Float(f)),
            _ => None,
        })
    }

    pub fn read_string(&self, key: &str) -> Result<Option<String>> {
        Ok(match self.read(key)? {
            Some(KvValue::Text(s)) => Some(s),
            _ => None,
        })
    }

    pub fn read_integer(&self, key: &str) -> Result<Option<i64>> {
        Ok(match self.read(key)? {
            Some(KvValue::Integer(i)) => Some(i),
            _ => None,
        })
    }

    pub fn read_float(&self, key: &str) -> Result<Option<f64>> {
        Ok(match self.read(key)? {
            Some(KvValue::Float(f)) => Some(f),
            _ => None,
        })
    }

    pub fn write<V: Into<KvValue>>(&self, key: &str, value: V) -> Result<()> {
        let value: KvValue = value.into();
        let conn = mutex_lock!(self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn all_keys(&self) -> Result<Vec<String>> {
        let conn = mutex_lock!(self.conn);
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key ASC")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns whether the key existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let conn = mutex_lock!(self.conn);
        let n = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }

    pub fn clear(&self) -> Result<()> {
        let conn = mutex_lock!(self.conn);
        conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}

pub fn open(id: &str) -> Result<Handle> {
    let pool = lifecycle::pool()?;
    let store = KvStore::attach(pool.connect(Area::Kv, id)?)?;
    let handle = registry().insert(Resource::Kv(store))?;
    debug!("kv {:?} opened as {}", id, handle);
    Ok(handle)
}

pub fn store(handle: Handle) -> Result<KvStore> {
    match registry().get(handle)? {
        Resource::Kv(store) => Ok(store),
        other => Err(wrong_kind(handle, ResourceKind::Kv, &other)),
    }
}

pub fn close(handle: Handle) -> Result<()> {
    registry().remove(handle, ResourceKind::Kv)?;
    if let Ok(pool) = lifecycle::pool() {
        pool.prune();
    }
    debug!("kv {} closed", handle);
    Ok(())
}
