//! Record types held by the storage collaborators.
//!
//! A [`Node`] is one entry of the ordered namespace, a [`BlobRef`] locates its
//! bytes in the content log and a [`StatRecord`] is the sidecar timestamp
//! record kept in the stat store.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Size of one block in the append-only content log (64KB).
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Opaque locator of a byte range inside the content log.
///
/// Duplicating a `BlobRef` under another key shares the bytes instead of
/// copying them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    /// Index of the first block holding this blob.
    pub block_offset: u64,
    /// Number of blocks spanned by this blob.
    pub block_length: u64,
    /// Absolute byte offset of the blob in the content log.
    pub byte_offset: u64,
    /// Length of the blob in bytes.
    pub byte_length: u64,
}

impl BlobRef {
    /// Blob reference for zero bytes at the given log position.
    pub fn empty(block_offset: u64, byte_offset: u64) -> Self {
        Self {
            block_offset,
            block_length: 0,
            byte_offset,
            byte_length: 0,
        }
    }

    /// Block pieces covering `len` bytes starting `offset` bytes into the blob.
    ///
    /// Each item is `(block index, start in block, end in block)`. Blobs always
    /// begin on a block boundary and fill every block but the last.
    pub fn block_slices(&self, offset: u64, len: usize) -> Vec<(u64, usize, usize)> {
        let mut slices = Vec::new();
        let mut position = offset;
        let end = offset + len as u64;
        while position < end {
            let block = self.block_offset + position / BLOCK_SIZE as u64;
            let start = (position % BLOCK_SIZE as u64) as usize;
            let take = (BLOCK_SIZE - start).min((end - position) as usize);
            slices.push((block, start, start + take));
            position += take as u64;
        }
        slices
    }
}

/// Everything stored under a key except the key and sequence number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Content locator. `None` marks an absence: a tombstone or an empty
    /// directory marker, never a file.
    pub blob: Option<BlobRef>,
    /// Executable bit carried over from the writer.
    #[serde(default)]
    pub executable: bool,
    /// Symlink target, if the entry was stored as a link.
    #[serde(default)]
    pub linkname: Option<String>,
    /// Free-form metadata attached by the writer.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl NodeData {
    /// Node data pointing at the given blob.
    pub fn file(blob: BlobRef) -> Self {
        Self {
            blob: Some(blob),
            ..Self::default()
        }
    }

    /// Node data without content.
    pub fn marker() -> Self {
        Self::default()
    }
}

/// One entry of the namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Sequence number assigned when the entry was written.
    pub seq: u64,
    /// Full key (a normalized path, or a path with a reserved trailing `/`).
    pub key: String,
    /// Stored value.
    pub data: NodeData,
}

impl Node {
    /// Whether this node denotes a file, that is, it carries content.
    pub fn is_file(&self) -> bool {
        self.data.blob.is_some()
    }

    /// The content locator, if any.
    pub fn blob(&self) -> Option<&BlobRef> {
        self.data.blob.as_ref()
    }
}

const TIME_FIELDS: &[&str] = &[
    "atime",
    "mtime",
    "ctime",
    "birthtime",
    "atime_ms",
    "mtime_ms",
    "ctime_ms",
    "birthtime_ms",
];

/// Sidecar stat record, keyed by normalized path in the stat store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub birthtime: SystemTime,
    pub atime_ms: u64,
    pub mtime_ms: u64,
    pub ctime_ms: u64,
    pub birthtime_ms: u64,
    /// Caller supplied fields merged into the record.
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl StatRecord {
    /// A record with every timestamp set to `now`.
    pub fn created(now: SystemTime) -> Self {
        let ms = unix_millis(now);
        Self {
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
            atime_ms: ms,
            mtime_ms: ms,
            ctime_ms: ms,
            birthtime_ms: ms,
            extras: Map::new(),
        }
    }

    /// Set mtime and ctime, keeping birthtime and atime.
    pub fn touch_modified(&mut self, now: SystemTime) {
        let ms = unix_millis(now);
        self.mtime = now;
        self.ctime = now;
        self.mtime_ms = ms;
        self.ctime_ms = ms;
    }

    /// Set atime only.
    pub fn touch_accessed(&mut self, now: SystemTime) {
        self.atime = now;
        self.atime_ms = unix_millis(now);
    }

    /// Merge caller supplied fields, overwriting existing keys.
    ///
    /// Keys naming one of the timestamp fields are ignored.
    pub fn merge_extras(&mut self, extras: &Map<String, Value>) {
        for (key, value) in extras {
            if TIME_FIELDS.contains(&key.as_str()) {
                continue;
            }
            self.extras.insert(key.clone(), value.clone());
        }
    }
}

/// Milliseconds since the unix epoch, saturating at zero for earlier times.
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_block_slices_span_blocks() {
        let blob = BlobRef {
            block_offset: 3,
            block_length: 3,
            byte_offset: 3 * BLOCK_SIZE as u64,
            byte_length: 2 * BLOCK_SIZE as u64 + 10,
        };

        let slices = blob.block_slices(BLOCK_SIZE as u64 - 4, 14);
        assert_eq!(slices, vec![(3, BLOCK_SIZE - 4, BLOCK_SIZE), (4, 0, 10)]);

        let tail = blob.block_slices(2 * BLOCK_SIZE as u64, 10);
        assert_eq!(tail, vec![(5, 0, 10)]);

        assert!(blob.block_slices(0, 0).is_empty());
    }

    #[test]
    fn test_marker_is_not_a_file() {
        let node = Node {
            seq: 1,
            key: "/a/".to_string(),
            data: NodeData::marker(),
        };
        assert!(!node.is_file());
        assert!(node.blob().is_none());
    }

    #[test]
    fn test_created_record_times_are_equal() {
        let now = UNIX_EPOCH + Duration::from_millis(1_704_067_200_123);
        let record = StatRecord::created(now);
        assert_eq!(record.atime, now);
        assert_eq!(record.mtime, now);
        assert_eq!(record.ctime, now);
        assert_eq!(record.birthtime, now);
        assert_eq!(record.mtime_ms, 1_704_067_200_123);
    }

    #[test]
    fn test_touch_modified_keeps_birthtime() {
        let born = UNIX_EPOCH + Duration::from_secs(10);
        let later = UNIX_EPOCH + Duration::from_secs(20);
        let mut record = StatRecord::created(born);
        record.touch_modified(later);

        assert_eq!(record.birthtime, born);
        assert_eq!(record.atime, born);
        assert_eq!(record.mtime, later);
        assert_eq!(record.ctime_ms, 20_000);
    }

    #[test]
    fn test_extras_flatten_into_json() {
        let mut record = StatRecord::created(UNIX_EPOCH);
        let mut extras = Map::new();
        extras.insert("mode".to_string(), Value::from(0o644));
        record.merge_extras(&extras);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["mode"], Value::from(0o644));

        let back: StatRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
