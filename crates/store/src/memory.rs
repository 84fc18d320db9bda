//! In-memory storage backends.
//!
//! [`MemoryNamespace`] keeps nodes in a `BTreeMap` so range iteration follows
//! byte-lexicographic key order, and content in a vector of 64KB blocks.
//! [`MemoryStatStore`] is a concurrent hash map. Both are cheap to clone; clones
//! share state.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::namespace::{check_blob_read, KeyRange, Namespace, RangeCursor, StatStore};
use crate::node::{BlobRef, Node, NodeData, StatRecord, BLOCK_SIZE};

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    blocks: Vec<Bytes>,
    bytes: u64,
    seq: u64,
}

/// Namespace held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryNamespace {
    state: Arc<RwLock<State>>,
    open_cursors: Arc<AtomicUsize>,
}

impl MemoryNamespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cursors currently open on this namespace.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Number of nodes currently stored.
    pub async fn len(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    /// Whether the namespace holds no nodes.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.nodes.is_empty()
    }

    /// Total bytes appended to the content log.
    pub async fn content_len(&self) -> u64 {
        self.state.read().await.bytes
    }
}

impl Namespace for MemoryNamespace {
    type Cursor = MemoryCursor;

    async fn get(&self, key: &str) -> StoreResult<Option<Node>> {
        Ok(self.state.read().await.nodes.get(key).cloned())
    }

    async fn put(&self, key: &str, data: NodeData) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        state.seq += 1;
        let seq = state.seq;
        state.nodes.insert(
            key.to_string(),
            Node {
                seq,
                key: key.to_string(),
                data,
            },
        );
        Ok(seq)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.state.write().await.nodes.remove(key);
        Ok(())
    }

    fn range_iterator(&self, range: KeyRange) -> MemoryCursor {
        MemoryCursor {
            state: Arc::clone(&self.state),
            open_cursors: Arc::clone(&self.open_cursors),
            range,
            position: None,
            yielded: 0,
            open: false,
        }
    }

    async fn append_blob(&self, bytes: &[u8]) -> StoreResult<BlobRef> {
        let mut state = self.state.write().await;
        let block_offset = state.blocks.len() as u64;
        let byte_offset = state.bytes;

        for chunk in bytes.chunks(BLOCK_SIZE) {
            state.blocks.push(Bytes::copy_from_slice(chunk));
        }
        state.bytes += bytes.len() as u64;

        Ok(BlobRef {
            block_offset,
            block_length: state.blocks.len() as u64 - block_offset,
            byte_offset,
            byte_length: bytes.len() as u64,
        })
    }

    async fn read_blob(&self, blob: &BlobRef, offset: u64, len: usize) -> StoreResult<Bytes> {
        check_blob_read(blob, offset, len)?;

        let state = self.state.read().await;
        let mut out = BytesMut::with_capacity(len);
        for (block, start, end) in blob.block_slices(offset, len) {
            let data = state
                .blocks
                .get(block as usize)
                .ok_or(StoreError::MissingBlock(block))?;
            out.extend_from_slice(&data[start..end]);
        }
        Ok(out.freeze())
    }
}

/// Cursor over a [`MemoryNamespace`] range.
///
/// Every step re-queries the map strictly after the last returned key, so the
/// cursor never holds the lock between steps.
pub struct MemoryCursor {
    state: Arc<RwLock<State>>,
    open_cursors: Arc<AtomicUsize>,
    range: KeyRange,
    position: Option<String>,
    yielded: usize,
    open: bool,
}

impl RangeCursor for MemoryCursor {
    async fn open(&mut self) -> StoreResult<()> {
        if !self.open {
            self.open = true;
            self.open_cursors.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn next(&mut self) -> StoreResult<Option<Node>> {
        if !self.open {
            return Err(StoreError::CursorNotOpen);
        }
        if self.range.limit.is_some_and(|limit| self.yielded >= limit) {
            return Ok(None);
        }

        let lower = match &self.position {
            Some(key) => Bound::Excluded(key.clone()),
            None => self.range.start.clone(),
        };
        if KeyRange::bounds_are_empty(&lower, &self.range.end) {
            return Ok(None);
        }

        let found = {
            let state = self.state.read().await;
            state
                .nodes
                .range::<String, _>((lower, self.range.end.clone()))
                .next()
                .map(|(_, node)| node.clone())
        };

        if let Some(node) = &found {
            self.position = Some(node.key.clone());
            self.yielded += 1;
        }
        Ok(found)
    }

    async fn close(&mut self) -> StoreResult<()> {
        if self.open {
            self.open = false;
            self.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        if self.open {
            tracing::warn!(range = ?self.range, "Range cursor dropped without close");
            self.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Stat store held in memory.
#[derive(Clone, Default)]
pub struct MemoryStatStore {
    records: Arc<DashMap<String, StatRecord>>,
}

impl MemoryStatStore {
    /// Create an empty stat store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl StatStore for MemoryStatStore {
    async fn get(&self, path: &str) -> StoreResult<Option<StatRecord>> {
        Ok(self.records.get(path).map(|entry| entry.value().clone()))
    }

    async fn put(&self, path: &str, record: &StatRecord) -> StoreResult<()> {
        self.records.insert(path.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.records.remove(path);
        Ok(())
    }
}
