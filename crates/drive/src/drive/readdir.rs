//! Shallow directory listing.
//!
//! Immediate children are discovered with repeated range queries of at most
//! two keys. After each step the lower bound jumps past whatever was just
//! emitted, so a directory's subtree is skipped in one query no matter how
//! many keys it holds.

use std::collections::VecDeque;
use std::ops::Bound;

use futures_util::stream::{self, Stream};
use regex::Regex;
use store::{Namespace, StatStore};

use super::{Drive, EntryKind, Stat};
use crate::error::DriveResult;
use crate::path;

/// Options for [`Drive::readdir`].
#[derive(Debug, Clone, Default)]
pub struct ReaddirOptions {
    /// Skip directory entries.
    pub file_only: bool,
    /// Attach a merged [`Stat`] to every entry.
    pub with_stats: bool,
    /// Keep only entries whose name matches.
    pub search: Option<Regex>,
}

impl ReaddirOptions {
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
}

/// One listed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    /// Final path segment.
    pub name: String,
    /// Full normalized path.
    pub path: String,
    pub kind: EntryKind,
    /// Present when stats were requested.
    pub stat: Option<Stat>,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Lazy shallow listing of one folder.
///
/// Every step runs a bounded range query and closes its cursor before
/// returning, so an abandoned iterator holds no storage resources. A name
/// that is both a file and a directory is yielded twice, file first.
pub struct DirIter<'a, N, S> {
    drive: &'a Drive<N, S>,
    folder: String,
    options: ReaddirOptions,
    lower: Bound<String>,
    ready: VecDeque<(String, EntryKind)>,
    exhausted: bool,
}

impl<'a, N: Namespace, S: StatStore> DirIter<'a, N, S> {
    fn new(drive: &'a Drive<N, S>, folder: String, options: ReaddirOptions) -> Self {
        let lower = path::subtree_range(&folder).start;
        Self {
            drive,
            folder,
            options,
            lower,
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The folder being listed.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Next entry, or `None` once the folder is exhausted.
    pub async fn next(&mut self) -> DriveResult<Option<DirEntry>> {
        let Some((name, kind)) = self.advance().await? else {
            return Ok(None);
        };

        let path = format!("{}/{}", path::key_prefix(&self.folder), name);
        let stat = if self.options.with_stats {
            match kind {
                EntryKind::File => match self.drive.file_node(&path).await? {
                    Some(node) => Some(self.drive.stat_node(node).await?),
                    None => None,
                },
                EntryKind::Directory => self.drive.stat_directory(&path).await?,
            }
        } else {
            None
        };

        Ok(Some(DirEntry {
            name,
            path,
            kind,
            stat,
        }))
    }

    /// Next entry name, with a trailing `/` for directories.
    pub async fn next_name(&mut self) -> DriveResult<Option<String>> {
        Ok(self.advance().await?.map(|(name, kind)| match kind {
            EntryKind::File => name,
            EntryKind::Directory => format!("{}/", name),
        }))
    }

    /// Drain the remaining entries.
    pub async fn collect(mut self) -> DriveResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Adapt into a [`Stream`] of entries.
    pub fn into_stream(self) -> impl Stream<Item = DriveResult<DirEntry>> + 'a {
        stream::try_unfold(self, |mut iter| async move {
            Ok(iter.next().await?.map(|entry| (entry, iter)))
        })
    }

    async fn advance(&mut self) -> DriveResult<Option<(String, EntryKind)>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Ok(Some(item));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.step().await?;
        }
    }

    async fn step(&mut self) -> DriveResult<()> {
        let range = path::subtree_range(&self.folder)
            .starting(self.lower.clone())
            .limit(2);
        let nodes = self.drive.peek_range(range).await?;

        let Some(first) = nodes.first() else {
            self.exhausted = true;
            return Ok(());
        };
        let Some((name, exact)) = path::child_segment(&first.key, &self.folder) else {
            self.exhausted = true;
            return Ok(());
        };
        let name = name.to_string();
        let past_subtree = format!("{}/{}0", path::key_prefix(&self.folder), name);

        if !exact {
            self.lower = Bound::Included(past_subtree);
            self.push(name, EntryKind::Directory);
            return Ok(());
        }

        if !first.is_file() {
            // Tombstone: neither a file nor evidence of a directory.
            self.lower = Bound::Excluded(first.key.clone());
            return Ok(());
        }

        let subtree = format!("{}/", first.key);
        let shadowed_dir = nodes.get(1).is_some_and(|n| n.key.starts_with(&subtree));
        if shadowed_dir {
            self.lower = Bound::Included(past_subtree);
            self.push(name.clone(), EntryKind::File);
            self.push(name, EntryKind::Directory);
        } else {
            self.lower = Bound::Excluded(first.key.clone());
            self.push(name, EntryKind::File);
        }
        Ok(())
    }

    fn push(&mut self, name: String, kind: EntryKind) {
        if self.options.file_only && kind == EntryKind::Directory {
            return;
        }
        if let Some(pattern) = &self.options.search {
            if !pattern.is_match(&name) {
                return;
            }
        }
        self.ready.push_back((name, kind));
    }
}

impl<N: Namespace, S: StatStore> Drive<N, S> {
    /// Lazily list the immediate children of `folder`.
    pub fn readdir_stream(
        &self,
        folder: &str,
        options: ReaddirOptions,
    ) -> DriveResult<DirIter<'_, N, S>> {
        let folder = path::normalize(folder)?;
        Ok(DirIter::new(self, folder, options))
    }

    /// List the immediate children of `folder`.
    ///
    /// A missing folder lists as empty.
    pub async fn readdir(&self, folder: &str, options: ReaddirOptions) -> DriveResult<Vec<DirEntry>> {
        self.readdir_stream(folder, options)?.collect().await
    }

    /// Names of the immediate children of `folder`, directories suffixed
    /// with `/`.
    pub async fn readdir_names(&self, folder: &str, options: ReaddirOptions) -> DriveResult<Vec<String>> {
        let mut entries = self.readdir_stream(folder, options)?;
        let mut names = Vec::new();
        while let Some(name) = entries.next_name().await? {
            names.push(name);
        }
        Ok(names)
    }
}
