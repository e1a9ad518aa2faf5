//! Storage resources: a typed key-value store and a SQL cursor, both backed
//! by SQLite files under the configured root.
//!
//! Several handles onto the same id share one connection. The pool keeps
//! only weak references, so a file is closed once its last handle is gone.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use rusqlite::Connection;

pub mod kv;
pub mod sql;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Kv,
    Sqlite,
}

impl Area {
    fn dir(self) -> &'static str {
        match self {
            Area::Kv => "kv",
            Area::Sqlite => "sqlite",
        }
    }
}

pub struct ConnectionPool {
    root: PathBuf,
    conns: DashMap<PathBuf, Weak<Mutex<Connection>>>,
}

impl ConnectionPool {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for area in [Area::Kv, Area::Sqlite] {
            fs::create_dir_all(root.join(area.dir()))?;
        }
        Ok(Self {
            root,
            conns: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps an id onto a database file inside the area directory.
    pub fn resolve(&self, area: Area, id: &str) -> Result<PathBuf> {
        let cleaned = PathBuf::from(path_clean::clean(id));
        let inside = !id.is_empty()
            && cleaned
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !inside {
            return Err(Error::argument(format!("invalid store id {:?}", id)));
        }
        let mut path = self.root.join(area.dir()).join(cleaned);
        let file_name = match path.file_name() {
            Some(name) => format!("{}.db", name.to_string_lossy()),
            None => return Err(Error::argument(format!("invalid store id {:?}", id))),
        };
        path.set_file_name(file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Returns the live connection for `id`, opening the file if needed.
    pub fn connect(&self, area: Area, id: &str) -> Result<Arc<Mutex<Connection>>> {
        let path = self.resolve(area, id)?;
        match self.conns.entry(path.clone()) {
            Entry::Occupied(mut entry) => {
                if let Some(conn) = entry.get().upgrade() {
                    return Ok(conn);
                }
                let conn = open_connection(&path)?;
                entry.insert(Arc::downgrade(&conn));
                Ok(conn)
            }
            Entry::Vacant(entry) => {
                let conn = open_connection(&path)?;
                entry.insert(Arc::downgrade(&conn));
                Ok(conn)
            }
        }
    }

    /// Number of files with at least one live handle.
    pub fn live_files(&self) -> usize {
        self.conns.iter().filter(|e| e.value().strong_count() > 0).count()
    }

    pub fn prune(&self) {
        self.conns.retain(|_, conn| conn.strong_count() > 0);
    }
}

fn open_connection(path: &Path) -> Result<Arc<Mutex<Connection>>> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = 10000;
         PRAGMA encoding = 'UTF-8';",
    )?;
    debug!("opened database {:?}", path);

    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_escaping_ids() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(dir.path()).unwrap();
        for bad in ["", "..", "../x", "/etc/passwd", "a/../../b", "."] {
            assert!(pool.resolve(Area::Kv, bad).is_err(), "{:?}", bad);
        }
        let path = pool.resolve(Area::Sqlite, "user/./profile").unwrap();
        assert_eq!(path, dir.path().join("sqlite").join("user").join("profile.db"));
    }

    #[test]
    fn test_connections_are_shared_per_id() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(dir.path()).unwrap();
        let a = pool.connect(Area::Kv, "shared").unwrap();
        let b = pool.connect(Area::Kv, "shared").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = pool.connect(Area::Sqlite, "shared").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.live_files(), 2);

        drop(a);
        drop(b);
        pool.prune();
        assert_eq!(pool.live_files(), 1);
    }
}
