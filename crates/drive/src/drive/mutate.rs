//! Collision-checked mutations.
//!
//! A path may not be written below a file, and a file may not replace a
//! directory. Every mutation validates first and only then touches the
//! namespace, so a rejected call leaves storage unchanged.

use serde_json::{Map, Value};
use store::{Namespace, NodeData, StatStore};

use super::{Drive, EntryKind, ListOptions, Listing, SetStatOptions, StatMethod};
use crate::error::{DriveError, DriveResult};
use crate::path;

/// Attributes stored with a file.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub executable: bool,
    pub linkname: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl PutOptions {
    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }

    pub fn linkname(mut self, target: impl Into<String>) -> Self {
        self.linkname = Some(target.into());
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Options for [`Drive::ancestors_of`].
#[derive(Debug, Clone, Default)]
pub struct AncestorOptions {
    /// Drop this directory and everything above it.
    pub exclude: Option<String>,
    /// Fail with `AlreadyExists` if any ancestor is a file.
    pub resolve_conflicts: bool,
}

impl AncestorOptions {
    pub fn resolving_conflicts() -> Self {
        Self {
            exclude: None,
            resolve_conflicts: true,
        }
    }
}

/// Options for [`Drive::rm_dir`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RmDirOptions {
    /// Remove every file and directory below the target.
    pub recursive: bool,
}

impl<N: Namespace, S: StatStore> Drive<N, S> {
    /// Proper ancestors of `path`, root first.
    pub async fn ancestors_of(
        &self,
        path: &str,
        options: &AncestorOptions,
    ) -> DriveResult<Vec<String>> {
        let path = path::normalize(path)?;
        let exclude = options.exclude.as_deref().map(path::normalize).transpose()?;
        let dirs = path::ancestors(&path, exclude.as_deref());

        if options.resolve_conflicts {
            for dir in &dirs {
                if self.file_node(dir).await?.is_some() {
                    return Err(DriveError::AlreadyExists(dir.clone()));
                }
            }
        }
        Ok(dirs)
    }

    /// Write a file, replacing any file already at `path`.
    ///
    /// Returns the namespace sequence number of the new node.
    pub async fn put(
        &self,
        path: &str,
        content: impl AsRef<[u8]>,
        options: PutOptions,
    ) -> DriveResult<u64> {
        let path = path::normalize(path)?;
        self.check_writable(&path).await?;

        let content = content.as_ref();
        let blob = self.namespace.append_blob(content).await?;
        let data = NodeData {
            blob: Some(blob),
            executable: options.executable,
            linkname: options.linkname,
            metadata: options.metadata,
        };
        let seq = self.namespace.put(&path, data).await?;
        self.set_stat(&path, SetStatOptions::default()).await?;

        tracing::debug!(path = %path, seq, bytes = content.len(), "File written");
        Ok(seq)
    }

    /// Write a UTF-8 text file.
    pub async fn write(&self, path: &str, text: &str) -> DriveResult<u64> {
        self.put(path, text.as_bytes(), PutOptions::default()).await
    }

    /// Remove the file at `path` and its stat record.
    ///
    /// Implied parent directories left without entries lose their stat
    /// records too. Returns whether a file was removed. Directories are
    /// left alone.
    pub async fn del(&self, path: &str) -> DriveResult<bool> {
        let path = path::normalize(path)?;
        if self.file_node(&path).await?.is_none() {
            return Ok(false);
        }

        self.namespace.delete(&path).await?;
        self.stats.delete(&path).await?;
        self.settle_ancestors(&path).await?;

        tracing::debug!(path = %path, "File deleted");
        Ok(true)
    }

    /// Create an empty directory. Missing parents are implied.
    pub async fn mkdir(&self, path: &str) -> DriveResult<()> {
        let path = path::normalize(path)?;
        if path == path::ROOT {
            return Err(DriveError::AlreadyExists(path));
        }
        self.ancestors_of(&path, &AncestorOptions::resolving_conflicts())
            .await?;
        if self.file_node(&path).await?.is_some() || self.is_directory(&path).await? {
            return Err(DriveError::AlreadyExists(path));
        }

        self.namespace
            .put(&path::marker_key(&path), NodeData::marker())
            .await?;
        self.set_stat(&path, SetStatOptions::default()).await?;

        tracing::debug!(path = %path, "Directory created");
        Ok(())
    }

    /// Remove a directory.
    ///
    /// Without `recursive`, fails with `NotEmpty` if the directory has any
    /// entries. With it, every file, marker and stat record below the
    /// directory is removed first.
    pub async fn rm_dir(&self, path: &str, options: RmDirOptions) -> DriveResult<()> {
        let path = path::normalize(path)?;
        let is_dir = self.is_directory(&path).await? || self.has_marker(&path).await?;
        if !is_dir {
            return Err(if self.file_node(&path).await?.is_some() {
                DriveError::NotADirectory(path)
            } else {
                DriveError::NotFound(path)
            });
        }

        if options.recursive {
            let mut listing = self.list_stream(&path, ListOptions::default())?;
            let removed = self.remove_entries(&mut listing).await;
            let closed = listing.close().await;
            let removed = removed?;
            closed?;
            tracing::debug!(path = %path, removed, "Directory contents removed");
        } else if self.has_entries(&path).await? {
            return Err(DriveError::NotEmpty(path));
        }

        self.namespace.delete(&path::marker_key(&path)).await?;
        self.stats.delete(&path).await?;
        self.settle_ancestors(&path).await?;

        tracing::debug!(path = %path, "Directory removed");
        Ok(())
    }

    /// Copy a file. The copy shares the source content and gets a fresh
    /// stat record.
    pub async fn copy(&self, source: &str, dest: &str) -> DriveResult<u64> {
        let source = path::normalize(source)?;
        let dest = path::normalize(dest)?;

        let node = self
            .file_node(&source)
            .await?
            .ok_or_else(|| DriveError::SourceNotFound(source.clone()))?;
        if dest == path::ROOT {
            return Err(DriveError::AlreadyExists(dest));
        }
        self.ancestors_of(&dest, &AncestorOptions::resolving_conflicts())
            .await?;
        if self.exists(&dest).await? {
            return Err(DriveError::AlreadyExists(dest));
        }

        let seq = self.namespace.put(&dest, node.data).await?;
        self.set_stat(&dest, SetStatOptions::default()).await?;

        tracing::debug!(source = %source, dest = %dest, seq, "File copied");
        Ok(seq)
    }

    /// Move a file: copy, then delete the source.
    ///
    /// Not atomic. If the delete fails both copies remain and the delete
    /// error is returned.
    pub async fn move_file(&self, source: &str, dest: &str) -> DriveResult<u64> {
        let seq = self.copy(source, dest).await?;
        if let Err(e) = self.del(source).await {
            tracing::warn!(source = %source, dest = %dest, error = %e, "Move left source in place");
            return Err(e);
        }
        Ok(seq)
    }

    /// Validate that a file may be written at a normalized `path`.
    pub(crate) async fn check_writable(&self, path: &str) -> DriveResult<()> {
        if path == path::ROOT {
            return Err(DriveError::AlreadyExists(path.to_string()));
        }
        self.ancestors_of(path, &AncestorOptions::resolving_conflicts())
            .await?;
        if self.file_node(path).await?.is_none() && self.is_directory(path).await? {
            return Err(DriveError::AlreadyExists(path.to_string()));
        }
        Ok(())
    }

    /// After a removal at `path`, drop the stat records of ancestors that no
    /// longer have entries or a marker, nearest first, then touch the rest.
    async fn settle_ancestors(&self, path: &str) -> DriveResult<()> {
        let mut dirs = path::ancestors(path, None);
        while let Some(dir) = dirs.last() {
            if dir == path::ROOT || self.has_entries(dir).await? || self.has_marker(dir).await? {
                break;
            }
            self.stats.delete(dir).await?;
            tracing::trace!(path = %dir, "Dropped stat of emptied directory");
            dirs.pop();
        }

        for dir in &dirs {
            self.set_stat(dir, SetStatOptions::method(StatMethod::Modify).shallow())
                .await?;
        }
        Ok(())
    }

    async fn remove_entries(&self, listing: &mut Listing<'_, N, S>) -> DriveResult<usize> {
        let mut removed = 0;
        while let Some(entry) = listing.next().await? {
            match entry.kind {
                EntryKind::File => {
                    self.del(&entry.path).await?;
                }
                EntryKind::Directory => {
                    self.namespace.delete(&path::marker_key(&entry.path)).await?;
                    self.stats.delete(&entry.path).await?;
                }
            }
            removed += 1;
        }
        Ok(removed)
    }
}
