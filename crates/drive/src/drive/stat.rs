//! Stat sidecar lifecycle.
//!
//! Every file and explicitly created directory has a [`StatRecord`] in the
//! stat store. Writes resolve a create-or-modify event against the existing
//! record and then touch each ancestor directory once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use store::{BlobRef, Namespace, Node, StatRecord, StatStore};

use super::{Drive, ReaddirOptions};
use crate::error::{DriveError, DriveResult};
use crate::path;

/// Wall clock that never hands out the same instant twice.
///
/// Successive calls return strictly increasing times even when the system
/// clock stalls or steps backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_nanos: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current time, strictly after every earlier result.
    pub fn now(&self) -> SystemTime {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let mut last = self.last_nanos.load(Ordering::Relaxed);
        loop {
            let next = wall.max(last + 1);
            match self.last_nanos.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return UNIX_EPOCH + Duration::from_nanos(next),
                Err(actual) => last = actual,
            }
        }
    }
}

/// Kind of stat event to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatMethod {
    /// Fresh record with every timestamp set to now.
    #[default]
    Create,
    /// Content changed: mtime and ctime move, birthtime is kept.
    Modify,
    /// Metadata changed. Recorded like a modification.
    Change,
    /// Content read: only atime moves.
    Access,
}

/// Options for [`Drive::set_stat`].
#[derive(Debug, Clone)]
pub struct SetStatOptions {
    /// Requested event. An absent record always forces `Create`, and an
    /// existing record turns any request other than `Access` into `Modify`.
    pub method: StatMethod,
    /// Extra fields merged into the record.
    pub extras: Map<String, Value>,
    /// Touch every ancestor directory after writing the record.
    pub recursive: bool,
}

impl Default for SetStatOptions {
    fn default() -> Self {
        Self {
            method: StatMethod::Create,
            extras: Map::new(),
            recursive: true,
        }
    }
}

impl SetStatOptions {
    /// Options requesting the given event.
    pub fn method(method: StatMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Disable the ancestor cascade.
    pub fn shallow(mut self) -> Self {
        self.recursive = false;
        self
    }

    /// Merge an extra field into the record.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// Whether a path is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// Merged view of a path's node and stat record.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    pub kind: EntryKind,
    /// Sidecar timestamps, absent for directories that were never created
    /// or touched explicitly.
    pub record: Option<StatRecord>,
    /// Namespace sequence number of a file.
    pub seq: Option<u64>,
    /// Content locator of a file.
    pub blob: Option<BlobRef>,
    /// Content length in bytes, zero for directories.
    pub size: u64,
    pub executable: bool,
    pub linkname: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    /// Number of shallow listing entries, for directories.
    pub items_count: Option<usize>,
}

impl Stat {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn mtime(&self) -> Option<SystemTime> {
        self.record.as_ref().map(|r| r.mtime)
    }

    pub fn atime(&self) -> Option<SystemTime> {
        self.record.as_ref().map(|r| r.atime)
    }

    pub fn ctime(&self) -> Option<SystemTime> {
        self.record.as_ref().map(|r| r.ctime)
    }

    pub fn birthtime(&self) -> Option<SystemTime> {
        self.record.as_ref().map(|r| r.birthtime)
    }

    fn directory(record: Option<StatRecord>, items_count: usize) -> Self {
        Self {
            kind: EntryKind::Directory,
            record,
            seq: None,
            blob: None,
            size: 0,
            executable: false,
            linkname: None,
            metadata: None,
            items_count: Some(items_count),
        }
    }

    fn file(node: Node, record: Option<StatRecord>) -> Self {
        let size = node.blob().map(|b| b.byte_length).unwrap_or(0);
        Self {
            kind: EntryKind::File,
            record,
            seq: Some(node.seq),
            blob: node.data.blob,
            size,
            executable: node.data.executable,
            linkname: node.data.linkname,
            metadata: node.data.metadata,
            items_count: None,
        }
    }
}

impl<N: Namespace, S: StatStore> Drive<N, S> {
    /// Record a stat event for `path`, returning the stored record.
    ///
    /// With `recursive` set, each ancestor directory (the root included)
    /// receives one non-recursive modify event. Access events never cascade.
    pub async fn set_stat(&self, path: &str, options: SetStatOptions) -> DriveResult<StatRecord> {
        let path = path::normalize(path)?;
        let (record, method) = self.apply_stat(&path, options.method, &options.extras).await?;

        if options.recursive && method != StatMethod::Access {
            self.touch_ancestors(&path).await?;
        }
        Ok(record)
    }

    /// Merged stat of the file or directory at `path`.
    ///
    /// A file node wins over a directory of the same name. The root always
    /// reports as a directory.
    pub async fn stat(&self, path: &str) -> DriveResult<Stat> {
        let path = path::normalize(path)?;
        if let Some(node) = self.file_node(&path).await? {
            let record = self.stats.get(&path).await?;
            return Ok(Stat::file(node, record));
        }
        self.stat_directory(&path)
            .await?
            .ok_or(DriveError::NotFound(path))
    }

    /// File stat for a node already fetched by a listing.
    pub(crate) async fn stat_node(&self, node: Node) -> DriveResult<Stat> {
        let record = self.stats.get(&node.key).await?;
        Ok(Stat::file(node, record))
    }

    /// Directory stat for a normalized path, `None` if no such directory.
    pub(crate) async fn stat_directory(&self, path: &str) -> DriveResult<Option<Stat>> {
        let record = self.stats.get(path).await?;
        let items_count = self.count_entries(path).await?;

        if items_count == 0 && record.is_none() && path != path::ROOT {
            return Ok(None);
        }
        Ok(Some(Stat::directory(record, items_count)))
    }

    /// Record an access event if access tracking is on.
    pub(crate) async fn record_access(&self, path: &str) -> DriveResult<()> {
        if self.options.track_access_time {
            self.apply_stat(path, StatMethod::Access, &Map::new()).await?;
        }
        Ok(())
    }

    /// One non-recursive modify event per ancestor of `path`, root first.
    async fn touch_ancestors(&self, path: &str) -> DriveResult<()> {
        for dir in path::ancestors(path, None) {
            self.apply_stat(&dir, StatMethod::Modify, &Map::new()).await?;
        }
        Ok(())
    }

    async fn count_entries(&self, dir: &str) -> DriveResult<usize> {
        let mut entries = self.readdir_stream(dir, ReaddirOptions::default())?;
        let mut count = 0;
        while entries.next_name().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    async fn apply_stat(
        &self,
        path: &str,
        requested: StatMethod,
        extras: &Map<String, Value>,
    ) -> DriveResult<(StatRecord, StatMethod)> {
        let existing = self.stats.get(path).await?;
        let now = self.clock.now();

        let (record, method) = match existing {
            None => (StatRecord::created(now), StatMethod::Create),
            Some(mut record) if requested == StatMethod::Access => {
                record.touch_accessed(now);
                (record, StatMethod::Access)
            }
            Some(mut record) => {
                record.touch_modified(now);
                (record, StatMethod::Modify)
            }
        };

        let mut record = record;
        record.merge_extras(extras);
        self.stats.put(path, &record).await?;

        tracing::trace!(path = %path, ?method, "Recorded stat event");
        Ok((record, method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{MemoryDrive, PutOptions};

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_entry_kinds_are_ordered() {
        use std::collections::BTreeSet;

        let entries: BTreeSet<(String, EntryKind)> = [
            ("/n".to_string(), EntryKind::Directory),
            ("/n".to_string(), EntryKind::File),
        ]
        .into_iter()
        .collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries.first().map(|e| e.1), Some(EntryKind::File));
    }

    #[tokio::test]
    async fn test_first_event_is_create() {
        let drive = MemoryDrive::in_memory();
        let record = drive
            .set_stat("/a", SetStatOptions::method(StatMethod::Modify).shallow())
            .await
            .unwrap();

        assert_eq!(record.birthtime, record.mtime);
        assert_eq!(record.atime, record.ctime);
    }

    #[tokio::test]
    async fn test_modify_keeps_birthtime() {
        let drive = MemoryDrive::in_memory();
        let created = drive.set_stat("/a", SetStatOptions::default()).await.unwrap();
        let modified = drive
            .set_stat("/a", SetStatOptions::method(StatMethod::Create))
            .await
            .unwrap();

        assert_eq!(modified.birthtime, created.birthtime);
        assert!(modified.mtime > created.mtime);
        assert_eq!(modified.ctime, modified.mtime);
        assert_eq!(modified.atime, created.atime);
    }

    #[tokio::test]
    async fn test_access_only_moves_atime_and_does_not_cascade() {
        let drive = MemoryDrive::in_memory();
        drive.put("/dir/file", b"x", PutOptions::default()).await.unwrap();
        let before = drive.stat("/dir/file").await.unwrap().record.unwrap();
        let parent_before = drive.stat("/dir").await.unwrap().record.unwrap();

        let after = drive
            .set_stat("/dir/file", SetStatOptions::method(StatMethod::Access))
            .await
            .unwrap();
        assert!(after.atime > before.atime);
        assert_eq!(after.mtime, before.mtime);

        let parent_after = drive.stat("/dir").await.unwrap().record.unwrap();
        assert_eq!(parent_after, parent_before);
    }

    #[tokio::test]
    async fn test_cascade_touches_every_ancestor_once() {
        let drive = MemoryDrive::in_memory();
        let record = drive.set_stat("/a/b/c", SetStatOptions::default()).await.unwrap();

        for dir in ["/", "/a", "/a/b"] {
            let ancestor = drive.stat_store().get(dir).await.unwrap().unwrap();
            assert!(ancestor.mtime > record.mtime, "{dir} not touched");
        }
        assert!(drive.stat_store().get("/a/b/c/d").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extras_are_merged() {
        let drive = MemoryDrive::in_memory();
        drive
            .set_stat("/a", SetStatOptions::default().with_extra("mode", 0o755))
            .await
            .unwrap();
        let record = drive
            .set_stat("/a", SetStatOptions::default().with_extra("owner", "alice"))
            .await
            .unwrap();

        assert_eq!(record.extras["mode"], Value::from(0o755));
        assert_eq!(record.extras["owner"], Value::from("alice"));
    }

    #[tokio::test]
    async fn test_stat_file_and_directory() {
        let drive = MemoryDrive::in_memory();
        drive.put("/d/f.txt", b"hello", PutOptions::default()).await.unwrap();
        drive.put("/d/g.txt", b"", PutOptions::default()).await.unwrap();

        let file = drive.stat("/d/f.txt").await.unwrap();
        assert!(file.is_file());
        assert_eq!(file.size, 5);
        assert!(file.record.is_some());
        assert!(file.items_count.is_none());

        let dir = drive.stat("/d").await.unwrap();
        assert!(dir.is_directory());
        assert_eq!(dir.items_count, Some(2));
        assert!(dir.mtime().unwrap() >= file.mtime().unwrap());
    }

    #[tokio::test]
    async fn test_stat_missing() {
        let drive = MemoryDrive::in_memory();
        assert!(matches!(drive.stat("/missing").await, Err(DriveError::NotFound(_))));

        let root = drive.stat("/").await.unwrap();
        assert!(root.is_directory());
        assert_eq!(root.items_count, Some(0));
    }
}
