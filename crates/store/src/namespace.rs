//! Storage collaborator interfaces.
//!
//! The [`Namespace`] is an ordered key-value store of [`Node`]s with range
//! iteration and a content log addressed by [`BlobRef`]. The [`StatStore`] is
//! an unrelated key space holding [`StatRecord`]s. Both are consumed by the
//! drive layer and never interpret paths themselves.

use std::cmp::Ordering;
use std::ops::Bound;

use bytes::Bytes;

use crate::error::StoreResult;
use crate::node::{BlobRef, Node, NodeData, StatRecord};

/// A half-open (or closed) key interval with an optional result limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound of the interval.
    pub start: Bound<String>,
    /// Upper bound of the interval.
    pub end: Bound<String>,
    /// Maximum number of nodes a cursor over this range yields.
    pub limit: Option<usize>,
}

impl KeyRange {
    /// Keys strictly between `greater_than` and `less_than`.
    pub fn between(greater_than: impl Into<String>, less_than: impl Into<String>) -> Self {
        Self {
            start: Bound::Excluded(greater_than.into()),
            end: Bound::Excluded(less_than.into()),
            limit: None,
        }
    }

    /// Replace the lower bound.
    pub fn starting(mut self, start: Bound<String>) -> Self {
        self.start = start;
        self
    }

    /// Cap the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `key` lies inside the interval (the limit is not considered).
    pub fn contains(&self, key: &str) -> bool {
        let above = match &self.start {
            Bound::Included(start) => key >= start.as_str(),
            Bound::Excluded(start) => key > start.as_str(),
            Bound::Unbounded => true,
        };
        let below = match &self.end {
            Bound::Included(end) => key <= end.as_str(),
            Bound::Excluded(end) => key < end.as_str(),
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Whether no key can satisfy both bounds of `(lower, upper)`.
    pub fn bounds_are_empty(lower: &Bound<String>, upper: &Bound<String>) -> bool {
        let (lo, lo_inclusive) = match lower {
            Bound::Included(k) => (k, true),
            Bound::Excluded(k) => (k, false),
            Bound::Unbounded => return false,
        };
        let (hi, hi_inclusive) = match upper {
            Bound::Included(k) => (k, true),
            Bound::Excluded(k) => (k, false),
            Bound::Unbounded => return false,
        };
        match lo.cmp(hi) {
            Ordering::Greater => true,
            Ordering::Equal => !(lo_inclusive && hi_inclusive),
            Ordering::Less => false,
        }
    }
}

/// A scoped iterator over a [`KeyRange`].
///
/// A cursor must be opened before the first `next` and closed on every exit
/// path. Cursors remember the last key they returned, so entries removed or
/// added behind the cursor never invalidate it.
#[allow(async_fn_in_trait)]
pub trait RangeCursor {
    /// Acquire the underlying resource.
    async fn open(&mut self) -> StoreResult<()>;

    /// Next node in key order, or `None` once the range or limit is exhausted.
    async fn next(&mut self) -> StoreResult<Option<Node>>;

    /// Release the underlying resource. Closing twice is a no-op.
    async fn close(&mut self) -> StoreResult<()>;
}

/// Ordered key-value namespace of file nodes plus their content log.
#[allow(async_fn_in_trait)]
pub trait Namespace {
    /// Cursor type returned by [`Namespace::range_iterator`].
    type Cursor: RangeCursor;

    /// Exact-key lookup.
    async fn get(&self, key: &str) -> StoreResult<Option<Node>>;

    /// Write `data` under `key`, returning the assigned sequence number.
    async fn put(&self, key: &str, data: NodeData) -> StoreResult<u64>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Create an unopened cursor over `range`.
    fn range_iterator(&self, range: KeyRange) -> Self::Cursor;

    /// Append bytes to the content log.
    async fn append_blob(&self, bytes: &[u8]) -> StoreResult<BlobRef>;

    /// Read `len` bytes starting `offset` bytes into `blob`.
    async fn read_blob(&self, blob: &BlobRef, offset: u64, len: usize) -> StoreResult<Bytes>;
}

/// Sidecar path to stat-record store.
#[allow(async_fn_in_trait)]
pub trait StatStore {
    async fn get(&self, path: &str) -> StoreResult<Option<StatRecord>>;

    async fn put(&self, path: &str, record: &StatRecord) -> StoreResult<()>;

    /// Remove the record for `path`. Removing a missing record is not an error.
    async fn delete(&self, path: &str) -> StoreResult<()>;
}

/// Validate a blob read request against the blob length.
pub(crate) fn check_blob_read(blob: &BlobRef, offset: u64, len: usize) -> StoreResult<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= blob.byte_length => Ok(()),
        _ => Err(crate::error::StoreError::BlobOutOfRange {
            offset,
            len,
            blob_length: blob.byte_length,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_between_contains() {
        let range = KeyRange::between("/a/", "/a0");
        assert!(range.contains("/a/b"));
        assert!(range.contains("/a/b/c"));
        assert!(!range.contains("/a/"));
        assert!(!range.contains("/a0"));
        assert!(!range.contains("/a.txt"));
        assert!(!range.contains("/ab"));
    }

    #[test]
    fn test_starting_included() {
        let range = KeyRange::between("/", "0").starting(Bound::Included("/x0".to_string()));
        assert!(range.contains("/x0"));
        assert!(!range.contains("/x/y"));
    }

    #[test]
    fn test_bounds_are_empty() {
        let a = || "/a".to_string();
        assert!(KeyRange::bounds_are_empty(
            &Bound::Excluded(a()),
            &Bound::Excluded(a())
        ));
        assert!(KeyRange::bounds_are_empty(
            &Bound::Included(a()),
            &Bound::Excluded(a())
        ));
        assert!(!KeyRange::bounds_are_empty(
            &Bound::Included(a()),
            &Bound::Included(a())
        ));
        assert!(KeyRange::bounds_are_empty(
            &Bound::Included("/b".to_string()),
            &Bound::Excluded(a())
        ));
        assert!(!KeyRange::bounds_are_empty(&Bound::Unbounded, &Bound::Excluded(a())));
    }

    #[test]
    fn test_check_blob_read() {
        let blob = BlobRef {
            block_offset: 0,
            block_length: 1,
            byte_offset: 0,
            byte_length: 10,
        };
        assert!(check_blob_read(&blob, 0, 10).is_ok());
        assert!(check_blob_read(&blob, 10, 0).is_ok());
        assert!(check_blob_read(&blob, 5, 6).is_err());
        assert!(check_blob_read(&blob, u64::MAX, 1).is_err());
    }
}
