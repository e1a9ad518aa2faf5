use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params, Connection};

use super::Area;
use crate::error::Result;
use crate::handle::{registry, wrong_kind, Handle, Resource, ResourceKind};
use crate::{lifecycle, mutex_lock};

pub const PAGE_SIZE: usize = 256;

#[derive(Clone)]
pub struct SqlConnection {
    conn: Arc<Mutex<Connection>>,
}

impl SqlConnection {
    pub fn attach(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn execute(&self, sql: &str) -> Result<()> {
        let conn = mutex_lock!(self.conn);
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Prepares `sql` once to validate it and capture the column names.
    pub fn query(&self, sql: &str) -> Result<QueryCursor> {
        let sql = sql.trim().trim_end_matches(';').trim_end().to_string();
        let columns = {
            let conn = mutex_lock!(self.conn);
            let stmt = conn.prepare(&sql)?;
            let names: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            names
        };
        Ok(QueryCursor {
            conn: Arc::clone(&self.conn),
            sql,
            columns,
            page: VecDeque::new(),
            offset: 0,
            exhausted: false,
            current: None,
        })
    }
}

/// Forward-only cursor over a query result.
///
/// A statement can't be kept alive across calls while its connection sits
/// behind a mutex, so rows are collected a page at a time with LIMIT/OFFSET.
/// Writes between pages may shift rows in or out of later pages.
pub struct QueryCursor {
    conn: Arc<Mutex<Connection>>,
    sql: String,
    columns: Vec<String>,
    page: VecDeque<Vec<Value>>,
    offset: usize,
    exhausted: bool,
    current: Option<Vec<Value>>,
}

impl QueryCursor {
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Moves to the next row. Returns false once the result is exhausted.
    pub fn read_row(&mut self) -> Result<bool> {
        if self.page.is_empty() && !self.exhausted {
            self.fetch_page()?;
        }
        self.current = self.page.pop_front();
        Ok(self.current.is_some())
    }

    fn fetch_page(&mut self) -> Result<()> {
        let conn = mutex_lock!(self.conn);
        let width = self.columns.len();
        let paged = format!("SELECT * FROM ({}) LIMIT ?1 OFFSET ?2", self.sql);
        let rows = match conn.prepare(&paged) {
            Ok(mut stmt) => {
                let rows = stmt
                    .query_map(params![PAGE_SIZE as i64, self.offset as i64], |row| {
                        read_values(row, width)
                    })?
                    .collect::<rusqlite::Result<Vec<Vec<Value>>>>()?;
                if rows.len() < PAGE_SIZE {
                    self.exhausted = true;
                }
                rows
            }
            Err(e) => {
                // statements such as PRAGMA can't be wrapped; read them whole
                debug!("query is not pageable ({}), reading it whole", e);
                let mut stmt = conn.prepare(&self.sql)?;
                let rows = stmt
                    .query_map([], |row| read_values(row, width))?
                    .collect::<rusqlite::Result<Vec<Vec<Value>>>>()?;
                self.exhausted = true;
                rows
            }
        };
        self.offset += rows.len();
        self.page.extend(rows);
        Ok(())
    }

    fn column(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == name)?;
        self.current.as_ref()?.get(index)
    }

    /// Succeeds only when the column holds text.
    pub fn read_text(&self, name: &str) -> Option<String> {
        match self.column(name)? {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn read_integer(&self, name: &str) -> Option<i64> {
        match self.column(name)? {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn read_float(&self, name: &str) -> Option<f64> {
        match self.column(name)? {
            Value::Real(f) => Some(*f),
            _ => None,
        }
    }
}

fn read_values(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Vec<Value>> {
    (0..width).map(|i| row.get::<_, Value>(i)).collect()
}

pub fn open(id: &str) -> Result<Handle> {
    let pool = lifecycle::pool()?;
    let conn = SqlConnection::attach(pool.connect(Area::Sqlite, id)?);
    let handle = registry().insert(Resource::Sql(conn))?;
    debug!("sqlite {:?} opened as {}", id, handle);
    Ok(handle)
}

pub fn connection(handle: Handle) -> Result<SqlConnection> {
    match registry().get(handle)? {
        Resource::Sql(conn) => Ok(conn),
        other => Err(wrong_kind(handle, ResourceKind::Sql, &other)),
    }
}

pub fn execute(handle: Handle, sql: &str) -> Result<()> {
    connection(handle)?.execute(sql).map_err(|e| {
        warn!("sqlite {} execute failed: {}", handle, e);
        e
    })
}

pub fn query(handle: Handle, sql: &str) -> Result<Handle> {
    let cursor = connection(handle)?.query(sql)?;
    let query = registry().insert(Resource::Query(Arc::new(Mutex::new(cursor))))?;
    debug!("sqlite {} query opened as {}", handle, query);
    Ok(query)
}

pub fn cursor(handle: Handle) -> Result<Arc<Mutex<QueryCursor>>> {
    match registry().get(handle)? {
        Resource::Query(cursor) => Ok(cursor),
        other => Err(wrong_kind(handle, ResourceKind::Query, &other)),
    }
}

pub fn read_row(query: Handle) -> Result<bool> {
    let cursor = cursor(query)?;
    let mut cursor = mutex_lock!(cursor);
    cursor.read_row()
}

pub fn read_text(query: Handle, column: &str) -> Result<Option<String>> {
    let cursor = cursor(query)?;
    let cursor = mutex_lock!(cursor);
    Ok(cursor.read_text(column))
}

pub fn read_integer(query: Handle, column: &str) -> Result<Option<i64>> {
    let cursor = cursor(query)?;
    let cursor = mutex_lock!(cursor);
    Ok(cursor.read_integer(column))
}

pub fn read_float(query: Handle, column: &str) -> Result<Option<f64>> {
    let cursor = cursor(query)?;
    let cursor = mutex_lock!(cursor);
    Ok(cursor.read_float(column))
}

pub fn drop_query(query: Handle) -> Result<()> {
    registry().remove(query, ResourceKind::Query)?;
    debug!("query {} dropped", query);
    Ok(())
}

/// Closes the connection handle. Open cursors keep the file open until dropped.
pub fn close(handle: Handle) -> Result<()> {
    registry().remove(handle, ResourceKind::Sql)?;
    if let Ok(pool) = lifecycle::pool() {
        pool.prune();
    }
    debug!("sqlite {} closed", handle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ConnectionPool;

    fn new_conn() -> (tempfile::TempDir, SqlConnection) {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(dir.path()).unwrap();
        let conn = SqlConnection::attach(pool.connect(Area::Sqlite, "unit").unwrap());
        (dir, conn)
    }

    #[test]
    fn test_typed_column_reads() {
        let (_dir, conn) = new_conn();
        conn.execute(
            "CREATE TABLE t (name TEXT, age INTEGER, score REAL);
             INSERT INTO t VALUES ('ann', 31, 9.5);",
        )
        .unwrap();
        let mut cursor = conn.query("SELECT name, age, score FROM t;").unwrap();
        assert_eq!(cursor.column_names(), ["name", "age", "score"]);
        assert!(cursor.read_row().unwrap());
        assert_eq!(cursor.read_text("name").as_deref(), Some("ann"));
        assert_eq!(cursor.read_integer("age"), Some(31));
        assert_eq!(cursor.read_float("score"), Some(9.5));
        assert_eq!(cursor.read_integer("name"), None);
        assert_eq!(cursor.read_text("missing"), None);
        assert!(!cursor.read_row().unwrap());
        assert_eq!(cursor.read_text("name"), None);
    }

    #[test]
    fn test_rows_span_pages() {
        let (_dir, conn) = new_conn();
        conn.execute("CREATE TABLE n (v INTEGER)").unwrap();
        let total = PAGE_SIZE * 2 + 17;
        let mut batch = String::from("BEGIN;");
        for i in 0..total {
            batch.push_str(&format!("INSERT INTO n VALUES ({});", i));
        }
        batch.push_str("COMMIT;");
        conn.execute(&batch).unwrap();

        let mut cursor = conn.query("SELECT v FROM n ORDER BY v").unwrap();
        let mut seen = Vec::new();
        while cursor.read_row().unwrap() {
            seen.push(cursor.read_integer("v").unwrap());
        }
        assert_eq!(seen, (0..total as i64).collect::<Vec<_>>());
    }

    #[test]
    fn test_pragma_is_read_whole() {
        let (_dir, conn) = new_conn();
        conn.execute("CREATE TABLE p (a TEXT, b INTEGER)").unwrap();
        let mut cursor = conn.query("PRAGMA table_info(p)").unwrap();
        let mut names = Vec::new();
        while cursor.read_row().unwrap() {
            names.push(cursor.read_text("name").unwrap());
        }
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_invalid_sql() {
        let (_dir, conn) = new_conn();
        assert!(conn.query("SELEC nothing").is_err());
        assert!(conn.execute("CREATE TABL x").is_err());
    }
}
