//! Hierarchical drive over a flat, ordered namespace.
//!
//! This module provides the filesystem emulation layer:
//! - Shallow directory listing with bounded look-ahead ([`readdir`])
//! - Single-pass recursive listing with synthesized directories ([`list`])
//! - Stat sidecar lifecycle and ancestor cascades ([`stat`])
//! - Collision-checked mutations ([`mutate`])
//!
//! Directories are never stored. A path is a directory when it is a strict
//! `/`-bounded prefix of some key, when an empty-directory marker sits under
//! it, or when a stat record exists for it without a colliding file.

pub mod list;
pub mod mutate;
pub mod readdir;
pub mod stat;

use std::path::Path;

use bytes::Bytes;
use store::{
    Database, KeyRange, MemoryNamespace, MemoryStatStore, Namespace, Node, RangeCursor,
    SqliteNamespace, SqliteStatStore, StatStore, StoreResult,
};

use crate::error::{DriveError, DriveResult};
use crate::path;

pub use list::{sort_entries, ListOptions, Listing, RecursiveLister, SortBy, SortOrder};
pub use mutate::{AncestorOptions, PutOptions, RmDirOptions};
pub use readdir::{DirEntry, DirIter, ReaddirOptions};
pub use stat::{EntryKind, MonotonicClock, SetStatOptions, Stat, StatMethod};

/// Default chunk size for content readers (64KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Behavioural switches for a drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveOptions {
    /// Record an `access` stat event whenever a file is read.
    pub track_access_time: bool,
    /// Bytes per chunk handed out by content readers.
    pub chunk_size: usize,
}

impl Default for DriveOptions {
    fn default() -> Self {
        Self {
            track_access_time: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// A drive backed by a namespace `N` and a stat store `S`.
///
/// A drive is a single-task object: operations await their storage round
/// trips one at a time and no locking is done across operations. Callers
/// mutating overlapping subtrees concurrently must serialize those calls
/// themselves.
pub struct Drive<N, S> {
    namespace: N,
    stats: S,
    clock: MonotonicClock,
    options: DriveOptions,
}

/// Drive held entirely in memory.
pub type MemoryDrive = Drive<MemoryNamespace, MemoryStatStore>;

/// Drive persisted in a SQLite database.
pub type SqliteDrive = Drive<SqliteNamespace, SqliteStatStore>;

impl MemoryDrive {
    /// Create an empty in-memory drive.
    pub fn in_memory() -> Self {
        Self::new(MemoryNamespace::new(), MemoryStatStore::new())
    }
}

impl SqliteDrive {
    /// Open or create a drive stored in the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DriveResult<Self> {
        let db = Database::open(path)?;
        Ok(Self::new(db.namespace(), db.stat_store()))
    }
}

impl<N, S> Drive<N, S> {
    /// Create a drive over the given collaborators.
    pub fn new(namespace: N, stats: S) -> Self {
        Self {
            namespace,
            stats,
            clock: MonotonicClock::new(),
            options: DriveOptions::default(),
        }
    }

    /// Replace the drive options.
    pub fn with_options(mut self, options: DriveOptions) -> Self {
        self.options = options;
        self
    }

    /// The underlying namespace.
    pub fn namespace(&self) -> &N {
        &self.namespace
    }

    /// The underlying stat store.
    pub fn stat_store(&self) -> &S {
        &self.stats
    }

    /// Current options.
    pub fn options(&self) -> &DriveOptions {
        &self.options
    }
}

impl<N: Namespace, S: StatStore> Drive<N, S> {
    /// Exact-key entry for `path`, file or not.
    pub async fn get(&self, path: &str) -> DriveResult<Option<Node>> {
        let path = path::normalize(path)?;
        Ok(self.namespace.get(&path).await?)
    }

    /// Whether `path` is a file or a directory.
    pub async fn exists(&self, path: &str) -> DriveResult<bool> {
        let path = path::normalize(path)?;
        if path == path::ROOT {
            return Ok(true);
        }
        if self.file_node(&path).await?.is_some() {
            return Ok(true);
        }
        self.is_directory(&path).await
    }

    /// Read the whole content of the file at `path`.
    pub async fn read(&self, path: &str) -> DriveResult<Bytes> {
        let path = path::normalize(path)?;
        let blob = self
            .file_node(&path)
            .await?
            .and_then(|node| node.data.blob)
            .ok_or_else(|| DriveError::NotFound(path.clone()))?;

        let content = self
            .namespace
            .read_blob(&blob, 0, blob.byte_length as usize)
            .await?;
        self.record_access(&path).await?;
        Ok(content)
    }

    /// Read the file at `path` as UTF-8 text.
    pub async fn read_to_string(&self, path: &str) -> DriveResult<String> {
        let content = self.read(path).await?;
        String::from_utf8(content.to_vec())
            .map_err(|e| DriveError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// The node at `path` if it is a file.
    pub(crate) async fn file_node(&self, path: &str) -> DriveResult<Option<Node>> {
        Ok(self.namespace.get(path).await?.filter(Node::is_file))
    }

    /// Whether a normalized `path` is a directory: it has listable entries,
    /// or a stat record exists without a colliding file.
    pub(crate) async fn is_directory(&self, path: &str) -> DriveResult<bool> {
        if path == path::ROOT || self.has_entries(path).await? {
            return Ok(true);
        }
        if self.file_node(path).await?.is_some() {
            return Ok(false);
        }
        Ok(self.stats.get(path).await?.is_some())
    }

    /// Whether a shallow listing of `dir` yields anything.
    pub(crate) async fn has_entries(&self, dir: &str) -> DriveResult<bool> {
        let mut entries = self.readdir_stream(dir, ReaddirOptions::default())?;
        Ok(entries.next_name().await?.is_some())
    }

    /// Whether an explicit empty-directory marker exists for `dir`.
    pub(crate) async fn has_marker(&self, dir: &str) -> DriveResult<bool> {
        Ok(self.namespace.get(&path::marker_key(dir)).await?.is_some())
    }

    /// Run a bounded range query, closing the cursor on every exit path.
    ///
    /// A failure of the query itself takes precedence over a close failure.
    pub(crate) async fn peek_range(&self, range: KeyRange) -> DriveResult<Vec<Node>> {
        debug_assert!(range.limit.is_some(), "peek_range needs a bounded range");

        let mut cursor = self.namespace.range_iterator(range);
        let result = drain_cursor(&mut cursor).await;
        let closed = cursor.close().await;

        let nodes = result?;
        closed?;
        Ok(nodes)
    }
}

async fn drain_cursor<C: RangeCursor>(cursor: &mut C) -> StoreResult<Vec<Node>> {
    cursor.open().await?;
    let mut nodes = Vec::new();
    while let Some(node) = cursor.next().await? {
        nodes.push(node);
    }
    Ok(nodes)
}
