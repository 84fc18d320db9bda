//! SQLite storage backend.
//!
//! This module persists the namespace, the content log and the stat store in
//! a single database file:
//! - `nodes`: key to MessagePack-encoded [`NodeData`]
//! - `blocks`: the append-only content log, one 64KB block per row
//! - `stats`: path to JSON-encoded [`StatRecord`]
//! - `meta`: sequence and byte counters
//!
//! Keys use SQLite's default BINARY collation, which compares UTF-8 text
//! byte by byte, so `ORDER BY key` matches the namespace ordering.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::namespace::{check_blob_read, KeyRange, Namespace, RangeCursor, StatStore};
use crate::node::{BlobRef, Node, NodeData, StatRecord, BLOCK_SIZE};

/// Rows fetched per cursor round trip.
const PAGE_SIZE: usize = 64;

/// Current schema version.
const CURRENT_SCHEMA_VERSION: i32 = 1;

type SharedConnection = Arc<Mutex<Connection>>;

fn lock<'a>(conn: &'a SharedConnection, context: &str) -> StoreResult<MutexGuard<'a, Connection>> {
    conn.lock().map_err(|_| StoreError::LockPoisoned {
        context: context.to_string(),
    })
}

/// Database handle owning the shared connection.
pub struct Database {
    conn: SharedConnection,
}

impl Database {
    /// Open or create a database at the given path.
    ///
    /// Missing parent directories are created and pending migrations applied.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Migration(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> StoreResult<Self> {
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get the current schema version.
    pub fn schema_version(&self) -> StoreResult<i32> {
        let conn = lock(&self.conn, "schema_version")?;
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    /// Namespace view over this database.
    pub fn namespace(&self) -> SqliteNamespace {
        SqliteNamespace {
            conn: Arc::clone(&self.conn),
        }
    }

    /// Stat store view over this database.
    pub fn stat_store(&self) -> SqliteStatStore {
        SqliteStatStore {
            conn: Arc::clone(&self.conn),
        }
    }
}

fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current < 1 {
        migrate_v1(conn)?;
    }

    if current > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Migration to version 1: Initial schema.
fn migrate_v1(conn: &mut Connection) -> StoreResult<()> {
    let tx = conn.transaction()?;

    tx.execute(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            key TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            value BLOB NOT NULL
        )
        "#,
        [],
    )?;

    tx.execute(
        r#"
        CREATE TABLE IF NOT EXISTS blocks (
            idx INTEGER PRIMARY KEY,
            data BLOB NOT NULL
        )
        "#,
        [],
    )?;

    tx.execute(
        r#"
        CREATE TABLE IF NOT EXISTS stats (
            path TEXT PRIMARY KEY,
            record TEXT NOT NULL
        )
        "#,
        [],
    )?;

    tx.execute(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )
        "#,
        [],
    )?;

    tx.execute(
        "INSERT OR IGNORE INTO meta (name, value) VALUES ('seq', 0), ('bytes', 0)",
        [],
    )?;

    tx.execute(&format!("PRAGMA user_version = {}", 1), [])?;

    tx.commit()?;
    Ok(())
}

fn decode_node(key: String, seq: i64, value: Vec<u8>) -> StoreResult<Node> {
    Ok(Node {
        seq: seq as u64,
        key,
        data: rmp_serde::from_slice(&value)?,
    })
}

/// Namespace stored in SQLite.
#[derive(Clone)]
pub struct SqliteNamespace {
    conn: SharedConnection,
}

impl Namespace for SqliteNamespace {
    type Cursor = SqliteCursor;

    async fn get(&self, key: &str) -> StoreResult<Option<Node>> {
        let conn = lock(&self.conn, "namespace get")?;
        let row = conn
            .query_row(
                "SELECT key, seq, value FROM nodes WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, Vec<u8>>(2)?)),
            )
            .optional()?;

        row.map(|(key, seq, value)| decode_node(key, seq, value))
            .transpose()
    }

    async fn put(&self, key: &str, data: NodeData) -> StoreResult<u64> {
        let value = rmp_serde::to_vec_named(&data)?;

        let mut conn = lock(&self.conn, "namespace put")?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE meta SET value = value + 1 WHERE name = 'seq'", [])?;
        let seq: i64 = tx.query_row("SELECT value FROM meta WHERE name = 'seq'", [], |row| {
            row.get(0)
        })?;
        tx.execute(
            "INSERT OR REPLACE INTO nodes (key, seq, value) VALUES (?1, ?2, ?3)",
            params![key, seq, value],
        )?;
        tx.commit()?;

        Ok(seq as u64)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let conn = lock(&self.conn, "namespace delete")?;
        conn.execute("DELETE FROM nodes WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn range_iterator(&self, range: KeyRange) -> SqliteCursor {
        SqliteCursor {
            conn: Arc::clone(&self.conn),
            range,
            fetched_to: None,
            buffer: VecDeque::new(),
            yielded: 0,
            exhausted: false,
            open: false,
        }
    }

    async fn append_blob(&self, bytes: &[u8]) -> StoreResult<BlobRef> {
        let mut conn = lock(&self.conn, "append_blob")?;
        let tx = conn.transaction()?;

        let block_offset: i64 =
            tx.query_row("SELECT COALESCE(MAX(idx) + 1, 0) FROM blocks", [], |row| {
                row.get(0)
            })?;
        let byte_offset: i64 =
            tx.query_row("SELECT value FROM meta WHERE name = 'bytes'", [], |row| {
                row.get(0)
            })?;

        let mut block_length = 0i64;
        for chunk in bytes.chunks(BLOCK_SIZE) {
            tx.execute(
                "INSERT INTO blocks (idx, data) VALUES (?1, ?2)",
                params![block_offset + block_length, chunk],
            )?;
            block_length += 1;
        }
        tx.execute(
            "UPDATE meta SET value = value + ?1 WHERE name = 'bytes'",
            params![bytes.len() as i64],
        )?;
        tx.commit()?;

        Ok(BlobRef {
            block_offset: block_offset as u64,
            block_length: block_length as u64,
            byte_offset: byte_offset as u64,
            byte_length: bytes.len() as u64,
        })
    }

    async fn read_blob(&self, blob: &BlobRef, offset: u64, len: usize) -> StoreResult<Bytes> {
        check_blob_read(blob, offset, len)?;

        let conn = lock(&self.conn, "read_blob")?;
        let mut stmt = conn.prepare_cached("SELECT data FROM blocks WHERE idx = ?1")?;
        let mut out = BytesMut::with_capacity(len);
        for (block, start, end) in blob.block_slices(offset, len) {
            let data: Vec<u8> = stmt
                .query_row(params![block as i64], |row| row.get(0))
                .optional()?
                .ok_or(StoreError::MissingBlock(block))?;
            if data.len() < end {
                return Err(StoreError::MissingBlock(block));
            }
            out.extend_from_slice(&data[start..end]);
        }
        Ok(out.freeze())
    }
}

/// Cursor over a [`SqliteNamespace`] range, fetching rows a page at a time.
pub struct SqliteCursor {
    conn: SharedConnection,
    range: KeyRange,
    fetched_to: Option<String>,
    buffer: VecDeque<Node>,
    yielded: usize,
    exhausted: bool,
    open: bool,
}

impl SqliteCursor {
    fn fetch_page(&mut self) -> StoreResult<()> {
        let page = match self.range.limit {
            Some(limit) => PAGE_SIZE.min(limit.saturating_sub(self.yielded)),
            None => PAGE_SIZE,
        };
        if page == 0 {
            self.exhausted = true;
            return Ok(());
        }

        let lower = match &self.fetched_to {
            Some(key) => Bound::Excluded(key.clone()),
            None => self.range.start.clone(),
        };
        if KeyRange::bounds_are_empty(&lower, &self.range.end) {
            self.exhausted = true;
            return Ok(());
        }

        let mut clauses = Vec::new();
        let mut values = Vec::new();
        match lower {
            Bound::Included(key) => {
                clauses.push("key >= ?");
                values.push(key);
            }
            Bound::Excluded(key) => {
                clauses.push("key > ?");
                values.push(key);
            }
            Bound::Unbounded => {}
        }
        match &self.range.end {
            Bound::Included(key) => {
                clauses.push("key <= ?");
                values.push(key.clone());
            }
            Bound::Excluded(key) => {
                clauses.push("key < ?");
                values.push(key.clone());
            }
            Bound::Unbounded => {}
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let query = format!(
            "SELECT key, seq, value FROM nodes {} ORDER BY key LIMIT {}",
            filter, page
        );

        let rows = {
            let conn = lock(&self.conn, "cursor fetch")?;
            let mut stmt = conn.prepare(&query)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, Vec<u8>>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        if rows.len() < page {
            self.exhausted = true;
        }
        for (key, seq, value) in rows {
            self.fetched_to = Some(key.clone());
            self.buffer.push_back(decode_node(key, seq, value)?);
        }
        Ok(())
    }
}

impl RangeCursor for SqliteCursor {
    async fn open(&mut self) -> StoreResult<()> {
        self.open = true;
        Ok(())
    }

    async fn next(&mut self) -> StoreResult<Option<Node>> {
        if !self.open {
            return Err(StoreError::CursorNotOpen);
        }
        if self.range.limit.is_some_and(|limit| self.yielded >= limit) {
            return Ok(None);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page()?;
        }

        let node = self.buffer.pop_front();
        if node.is_some() {
            self.yielded += 1;
        }
        Ok(node)
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.open = false;
        self.buffer.clear();
        Ok(())
    }
}

/// Stat store stored in SQLite.
#[derive(Clone)]
pub struct SqliteStatStore {
    conn: SharedConnection,
}

impl StatStore for SqliteStatStore {
    async fn get(&self, path: &str) -> StoreResult<Option<StatRecord>> {
        let conn = lock(&self.conn, "stat get")?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM stats WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;

        Ok(record.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    async fn put(&self, path: &str, record: &StatRecord) -> StoreResult<()> {
        let encoded = serde_json::to_string(record)?;
        let conn = lock(&self.conn, "stat put")?;
        conn.execute(
            "INSERT OR REPLACE INTO stats (path, record) VALUES (?1, ?2)",
            params![path, encoded],
        )?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let conn = lock(&self.conn, "stat delete")?;
        conn.execute("DELETE FROM stats WHERE path = ?1", params![path])?;
        Ok(())
    }
}
