//! Recursive listing and entry sorting.

use std::collections::{btree_set, BTreeSet};
use std::time::SystemTime;

use futures_util::stream::{self, Stream};
use regex::Regex;
use store::{Namespace, Node, RangeCursor, StatStore};

use super::{DirEntry, DirIter, Drive, EntryKind, ReaddirOptions};
use crate::error::DriveResult;
use crate::path;

/// Options for [`Drive::list`].
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Walk the whole subtree instead of immediate children.
    pub recursive: bool,
    /// Skip directory entries.
    pub file_only: bool,
    /// Attach a merged stat to every entry.
    pub with_stats: bool,
    /// Keep only entries whose name matches.
    pub search: Option<Regex>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            file_only: false,
            with_stats: false,
            search: None,
        }
    }
}

impl ListOptions {
    pub fn shallow(mut self) -> Self {
        self.recursive = false;
        self
    }

    pub fn file_only(mut self) -> Self {
        self.file_only = true;
        self
    }

    pub fn with_stats(mut self) -> Self {
        self.with_stats = true;
        self
    }

    pub fn search(mut self, pattern: Regex) -> Self {
        self.search = Some(pattern);
        self
    }

    fn matches(&self, name: &str) -> bool {
        self.search.as_ref().map_or(true, |p| p.is_match(name))
    }
}

impl From<ListOptions> for ReaddirOptions {
    fn from(options: ListOptions) -> Self {
        Self {
            file_only: options.file_only,
            with_stats: options.with_stats,
            search: options.search,
        }
    }
}

enum Phase<C> {
    Pending,
    Scanning(C),
    Flushing(btree_set::IntoIter<String>),
    Done,
}

/// Single-pass listing of every file below a folder.
///
/// Files are yielded in key order while the cursor is open. Directories are
/// synthesized from file ancestors and empty-directory markers, then yielded
/// after the scan in sorted order. Each directory appears exactly once.
pub struct RecursiveLister<'a, N: Namespace, S> {
    drive: &'a Drive<N, S>,
    folder: String,
    options: ListOptions,
    dirs: BTreeSet<String>,
    phase: Phase<N::Cursor>,
}

impl<'a, N: Namespace, S: StatStore> RecursiveLister<'a, N, S> {
    fn new(drive: &'a Drive<N, S>, folder: String, options: ListOptions) -> Self {
        Self {
            drive,
            folder,
            options,
            dirs: BTreeSet::new(),
            phase: Phase::Pending,
        }
    }

    /// The folder being listed.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Next entry, or `None` once the subtree is exhausted.
    pub async fn next(&mut self) -> DriveResult<Option<DirEntry>> {
        loop {
            if let Phase::Flushing(dirs) = &mut self.phase {
                match dirs.next() {
                    Some(dir) => {
                        let name = path::name_of(&dir).to_string();
                        if self.options.matches(&name) {
                            return self.directory_entry(dir, name).await.map(Some);
                        }
                        continue;
                    }
                    None => {
                        self.phase = Phase::Done;
                        return Ok(None);
                    }
                }
            }

            let Some(node) = self.scan().await? else {
                if matches!(self.phase, Phase::Done) {
                    return Ok(None);
                }
                continue;
            };

            if path::is_marker_key(&node.key) {
                if !self.options.file_only {
                    let dir = node.key.trim_end_matches('/');
                    if path::is_descendant(dir, &self.folder) {
                        self.dirs.extend(path::ancestors(dir, Some(&self.folder)));
                        self.dirs.insert(dir.to_string());
                    }
                }
                continue;
            }
            if !node.is_file() {
                continue;
            }
            if !self.options.file_only {
                self.dirs.extend(path::ancestors(&node.key, Some(&self.folder)));
            }

            let name = path::name_of(&node.key).to_string();
            if self.options.matches(&name) {
                return self.file_entry(node, name).await.map(Some);
            }
        }
    }

    /// Drain the remaining entries.
    pub async fn collect(mut self) -> DriveResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Release the cursor early.
    pub async fn close(mut self) -> DriveResult<()> {
        if let Phase::Scanning(mut cursor) = std::mem::replace(&mut self.phase, Phase::Done) {
            cursor.close().await?;
        }
        Ok(())
    }

    /// Pull the next node from the cursor.
    ///
    /// Returns `None` when the scan ends, after closing the cursor and moving
    /// to the flush phase (or straight to `Done` for file-only listings).
    async fn scan(&mut self) -> DriveResult<Option<Node>> {
        if let Phase::Pending = self.phase {
            let mut cursor = self
                .drive
                .namespace()
                .range_iterator(path::subtree_range(&self.folder));
            if let Err(e) = cursor.open().await {
                self.phase = Phase::Done;
                if let Err(close_err) = cursor.close().await {
                    tracing::warn!(folder = %self.folder, error = %close_err, "Failed to close cursor");
                }
                return Err(e.into());
            }
            self.phase = Phase::Scanning(cursor);
        }

        let Phase::Scanning(cursor) = &mut self.phase else {
            return Ok(None);
        };
        let step = match cursor.next().await {
            Ok(Some(node)) => return Ok(Some(node)),
            other => other,
        };

        let Phase::Scanning(mut cursor) = std::mem::replace(&mut self.phase, Phase::Done) else {
            return Ok(None);
        };
        let closed = cursor.close().await;
        step?;
        closed?;

        if !self.options.file_only {
            let dirs = std::mem::take(&mut self.dirs);
            self.phase = Phase::Flushing(dirs.into_iter());
        }
        Ok(None)
    }

    async fn file_entry(&self, node: Node, name: String) -> DriveResult<DirEntry> {
        let path = node.key.clone();
        let stat = if self.options.with_stats {
            Some(self.drive.stat_node(node).await?)
        } else {
            None
        };
        Ok(DirEntry {
            name,
            path,
            kind: EntryKind::File,
            stat,
        })
    }

    async fn directory_entry(&self, path: String, name: String) -> DriveResult<DirEntry> {
        let stat = if self.options.with_stats {
            self.drive.stat_directory(&path).await?
        } else {
            None
        };
        Ok(DirEntry {
            name,
            path,
            kind: EntryKind::Directory,
            stat,
        })
    }
}

/// A lazy listing, shallow or recursive.
pub enum Listing<'a, N: Namespace, S> {
    Shallow(DirIter<'a, N, S>),
    Recursive(RecursiveLister<'a, N, S>),
}

impl<'a, N: Namespace, S: StatStore> Listing<'a, N, S> {
    pub async fn next(&mut self) -> DriveResult<Option<DirEntry>> {
        match self {
            Listing::Shallow(iter) => iter.next().await,
            Listing::Recursive(lister) => lister.next().await,
        }
    }

    pub async fn collect(self) -> DriveResult<Vec<DirEntry>> {
        match self {
            Listing::Shallow(iter) => iter.collect().await,
            Listing::Recursive(lister) => lister.collect().await,
        }
    }

    /// Release any open cursor.
    pub async fn close(self) -> DriveResult<()> {
        match self {
            Listing::Shallow(_) => Ok(()),
            Listing::Recursive(lister) => lister.close().await,
        }
    }

    /// Adapt into a [`Stream`] of entries.
    pub fn into_stream(self) -> impl Stream<Item = DriveResult<DirEntry>> + 'a {
        stream::try_unfold(self, |mut listing| async move {
            Ok(listing.next().await?.map(|entry| (entry, listing)))
        })
    }
}

impl<N: Namespace, S: StatStore> Drive<N, S> {
    /// Lazily list `folder`, recursively unless `options.recursive` is off.
    pub fn list_stream(&self, folder: &str, options: ListOptions) -> DriveResult<Listing<'_, N, S>> {
        let folder = path::normalize(folder)?;
        if options.recursive {
            Ok(Listing::Recursive(RecursiveLister::new(self, folder, options)))
        } else {
            Ok(Listing::Shallow(self.readdir_stream(&folder, options.into())?))
        }
    }

    /// List `folder`, recursively unless `options.recursive` is off.
    pub async fn list(&self, folder: &str, options: ListOptions) -> DriveResult<Vec<DirEntry>> {
        self.list_stream(folder, options)?.collect().await
    }
}

/// Sort key for [`sort_entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    Name,
    /// Modification time. Entries without a stat sort first.
    Date,
    /// Content size. Entries without a stat count as empty.
    Size,
    /// Directories first, then files grouped by extension.
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Sort listed entries in place. Ties fall back to the entry path.
pub fn sort_entries(entries: &mut [DirEntry], by: SortBy, order: SortOrder) {
    entries.sort_by(|a, b| {
        let primary = match by {
            SortBy::Name => a.name.cmp(&b.name),
            SortBy::Date => modified(a).cmp(&modified(b)),
            SortBy::Size => size(a).cmp(&size(b)),
            SortBy::Type => type_key(a).cmp(&type_key(b)),
        };
        let ordering = primary.then_with(|| a.path.cmp(&b.path));
        match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
}

fn modified(entry: &DirEntry) -> Option<SystemTime> {
    entry.stat.as_ref().and_then(|s| s.mtime())
}

fn size(entry: &DirEntry) -> u64 {
    entry.stat.as_ref().map_or(0, |s| s.size)
}

fn type_key(entry: &DirEntry) -> (u8, &str) {
    match entry.kind {
        EntryKind::Directory => (0, ""),
        EntryKind::File => {
            let extension = entry
                .name
                .rsplit_once('.')
                .map_or("", |(stem, ext)| if stem.is_empty() { "" } else { ext });
            (1, extension)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{MemoryDrive, PutOptions};
    use futures_util::TryStreamExt;

    async fn sample_drive() -> MemoryDrive {
        let drive = MemoryDrive::in_memory();
        for (path, content) in [
            ("/src/main.rs", "fn main() {}"),
            ("/src/drive/mod.rs", "pub mod list;"),
            ("/src/drive/list.rs", "// list"),
            ("/docs/guide/intro.md", "# Intro"),
            ("/README.md", "readme"),
        ] {
            drive.put(path, content, PutOptions::default()).await.unwrap();
        }
        drive
    }

    fn paths(entries: &[DirEntry]) -> Vec<(&str, EntryKind)> {
        entries.iter().map(|e| (e.path.as_str(), e.kind)).collect()
    }

    #[tokio::test]
    async fn test_recursive_list_root() {
        let drive = sample_drive().await;
        let entries = drive.list("/", ListOptions::default()).await.unwrap();

        assert_eq!(
            paths(&entries),
            vec![
                ("/README.md", EntryKind::File),
                ("/docs/guide/intro.md", EntryKind::File),
                ("/src/drive/list.rs", EntryKind::File),
                ("/src/drive/mod.rs", EntryKind::File),
                ("/src/main.rs", EntryKind::File),
                ("/docs", EntryKind::Directory),
                ("/docs/guide", EntryKind::Directory),
                ("/src", EntryKind::Directory),
                ("/src/drive", EntryKind::Directory),
            ]
        );
        assert_eq!(drive.namespace().open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_recursive_list_subfolder_excludes_folder_and_above() {
        let drive = sample_drive().await;
        let entries = drive.list("/src", ListOptions::default()).await.unwrap();

        let dirs: Vec<_> = entries.iter().filter(|e| e.is_directory()).map(|e| e.path.as_str()).collect();
        assert_eq!(dirs, vec!["/src/drive"]);
        assert_eq!(entries.iter().filter(|e| e.is_file()).count(), 3);
    }

    #[tokio::test]
    async fn test_file_only_and_search() {
        let drive = sample_drive().await;

        let files = drive.list("/", ListOptions::default().file_only()).await.unwrap();
        assert_eq!(files.len(), 5);
        assert!(files.iter().all(DirEntry::is_file));

        let rust = drive
            .list("/", ListOptions::default().search(Regex::new(r"\.rs$").unwrap()))
            .await
            .unwrap();
        assert_eq!(rust.len(), 3);

        let dirs = drive
            .list("/", ListOptions::default().search(Regex::new("^drive$").unwrap()))
            .await
            .unwrap();
        assert_eq!(paths(&dirs), vec![("/src/drive", EntryKind::Directory)]);
    }

    #[tokio::test]
    async fn test_empty_directory_markers_are_listed() {
        let drive = sample_drive().await;
        drive.mkdir("/src/empty/deeper").await.unwrap();

        let entries = drive.list("/src", ListOptions::default()).await.unwrap();
        let dirs: Vec<_> = entries.iter().filter(|e| e.is_directory()).map(|e| e.path.as_str()).collect();
        assert_eq!(dirs, vec!["/src/drive", "/src/empty", "/src/empty/deeper"]);
    }

    #[tokio::test]
    async fn test_shallow_list_delegates_to_readdir() {
        let drive = sample_drive().await;
        let entries = drive.list("/", ListOptions::default().shallow()).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["README.md", "docs", "src"]);
    }

    #[tokio::test]
    async fn test_abandoned_listing_releases_cursor() {
        let drive = sample_drive().await;
        let mut listing = drive.list_stream("/", ListOptions::default()).unwrap();
        listing.next().await.unwrap().unwrap();
        assert_eq!(drive.namespace().open_cursors(), 1);

        listing.close().await.unwrap();
        assert_eq!(drive.namespace().open_cursors(), 0);

        let stream = drive.list_stream("/src", ListOptions::default()).unwrap().into_stream();
        let all: Vec<DirEntry> = stream.try_collect().await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(drive.namespace().open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_sort_entries() {
        let drive = sample_drive().await;
        let mut entries = drive
            .list("/src", ListOptions::default().with_stats())
            .await
            .unwrap();

        sort_entries(&mut entries, SortBy::Type, SortOrder::Ascending);
        assert!(entries[0].is_directory());

        sort_entries(&mut entries, SortBy::Size, SortOrder::Descending);
        assert_eq!(entries[0].path, "/src/drive/mod.rs");

        sort_entries(&mut entries, SortBy::Name, SortOrder::Ascending);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["drive", "list.rs", "main.rs", "mod.rs"]);

        sort_entries(&mut entries, SortBy::Date, SortOrder::Descending);
        assert_eq!(entries[0].path, "/src/drive");
    }
}
