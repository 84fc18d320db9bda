//! Folder transfer between drives.
//!
//! A transfer pairs a [`FolderReadStream`] (which yields files of a source
//! subtree together with a lazily opened [`ContentReader`]) with a
//! [`FolderWriteStream`] (which validates and writes each item through a
//! [`FolderTarget`]). Items are processed strictly one at a time: the next
//! item is not pulled until the current one has been fully written.
//!
//! Both the KV-backed [`Drive`](crate::drive::Drive) and the local
//! filesystem [`LocalDrive`] implement both sides, which gives export,
//! import and drive-to-drive copies.

mod drive;
mod local;

pub use drive::{DriveContentReader, DriveContentWriter, DriveFolderReadStream};
pub use local::{LocalContentReader, LocalContentWriter, LocalDrive, LocalEntry, LocalFolderReadStream};

use bytes::Bytes;

use crate::error::DriveResult;
use crate::path;

/// Pull-based source of file content.
#[allow(async_fn_in_trait)]
pub trait ContentReader {
    /// Next chunk, or `None` at end of content.
    async fn read_chunk(&mut self) -> DriveResult<Option<Bytes>>;
}

/// Sink for file content.
#[allow(async_fn_in_trait)]
pub trait ContentWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> DriveResult<()>;

    /// Commit the written content, returning the number of bytes stored.
    async fn finish(self) -> DriveResult<u64>;

    /// Discard everything written so far.
    async fn abort(self) -> DriveResult<()>;
}

/// One file of a folder read stream.
pub struct FolderItem<R> {
    /// Path of the file below the stream root, with a leading `/`.
    pub relative_path: String,
    pub reader: R,
}

/// Pull-based walk over the files of a subtree.
#[allow(async_fn_in_trait)]
pub trait FolderReadStream {
    type Reader: ContentReader;

    /// Next file, or `None` once the subtree is exhausted.
    async fn next_item(&mut self) -> DriveResult<Option<FolderItem<Self::Reader>>>;

    /// Release the walk early. Closing an exhausted stream is a no-op.
    async fn close(self) -> DriveResult<()>;
}

/// Destination side of a folder transfer.
#[allow(async_fn_in_trait)]
pub trait FolderTarget {
    type Writer: ContentWriter;

    /// Fail if `root` already exists as a file.
    async fn check_folder_root(&self, root: &str) -> DriveResult<()>;

    /// Fail if a file may not be written at `path`.
    async fn check_destination(&self, path: &str) -> DriveResult<()>;

    async fn create_writer(&self, path: &str) -> DriveResult<Self::Writer>;
}

/// Totals for a completed transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Writes folder items below a root of a [`FolderTarget`].
pub struct FolderWriteStream<T> {
    target: T,
    root: String,
    root_checked: bool,
    summary: TransferSummary,
}

impl<T: FolderTarget> FolderWriteStream<T> {
    pub fn new(target: T, root: &str) -> DriveResult<Self> {
        Ok(Self {
            target,
            root: path::normalize(root)?,
            root_checked: false,
            summary: TransferSummary::default(),
        })
    }

    /// Destination root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Write one item, consuming its reader to the end.
    ///
    /// The destination root is validated before the first item. A failed
    /// read or write aborts the item's writer.
    pub async fn write<R: ContentReader>(&mut self, item: FolderItem<R>) -> DriveResult<()> {
        if !self.root_checked {
            self.target.check_folder_root(&self.root).await?;
            self.root_checked = true;
        }

        let destination = path::join(&self.root, &item.relative_path)?;
        self.target.check_destination(&destination).await?;

        let mut writer = self.target.create_writer(&destination).await?;
        let mut reader = item.reader;
        if let Err(e) = copy_content(&mut reader, &mut writer).await {
            if let Err(abort_err) = writer.abort().await {
                tracing::warn!(path = %destination, error = %abort_err, "Failed to abort writer");
            }
            return Err(e);
        }
        let bytes = writer.finish().await?;

        self.summary.files += 1;
        self.summary.bytes += bytes;
        tracing::debug!(path = %destination, bytes, "Transferred file");
        Ok(())
    }

    /// Drain `source` into this stream, one item at a time.
    ///
    /// The source is closed on every exit path. An item failure takes
    /// precedence over a close failure.
    pub async fn pipe_from<F: FolderReadStream>(mut self, mut source: F) -> DriveResult<TransferSummary> {
        let result = self.drain(&mut source).await;
        let closed = source.close().await;
        result?;
        closed?;

        tracing::info!(
            root = %self.root,
            files = self.summary.files,
            bytes = self.summary.bytes,
            "Folder transfer complete"
        );
        Ok(self.summary)
    }

    /// Totals so far.
    pub fn finish(self) -> TransferSummary {
        self.summary
    }

    async fn drain<F: FolderReadStream>(&mut self, source: &mut F) -> DriveResult<()> {
        while let Some(item) = source.next_item().await? {
            self.write(item).await?;
        }
        Ok(())
    }
}

async fn copy_content<R: ContentReader, W: ContentWriter>(
    reader: &mut R,
    writer: &mut W,
) -> DriveResult<()> {
    while let Some(chunk) = reader.read_chunk().await? {
        writer.write_chunk(chunk).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::MemoryDrive;
    use crate::error::DriveError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_folder_within_drive() {
        let drive = MemoryDrive::in_memory();
        drive.write("/src/a.txt", "alpha").await.unwrap();
        drive.write("/src/nested/b.txt", "beta").await.unwrap();
        drive.write("/other", "untouched").await.unwrap();

        let summary = drive.copy_folder("/src", "/dst").await.unwrap();

        assert_eq!(summary, TransferSummary { files: 2, bytes: 9 });
        assert_eq!(drive.read_to_string("/dst/a.txt").await.unwrap(), "alpha");
        assert_eq!(drive.read_to_string("/dst/nested/b.txt").await.unwrap(), "beta");
        assert!(!drive.exists("/dst/other").await.unwrap());
        assert_eq!(drive.namespace().open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_destination_root_file_is_rejected() {
        let drive = MemoryDrive::in_memory();
        drive.write("/src/a", "1").await.unwrap();
        drive.write("/dst", "a file").await.unwrap();

        let result = drive.copy_folder("/src", "/dst").await;
        assert!(matches!(result, Err(DriveError::AlreadyExists(ref p)) if p == "/dst"));
        assert_eq!(drive.namespace().open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_destination_conflict_stops_transfer() {
        let drive = MemoryDrive::in_memory();
        drive.write("/src/a", "1").await.unwrap();
        drive.write("/src/b/c", "2").await.unwrap();
        drive.write("/dst/b", "blocks the directory").await.unwrap();

        let result = drive.copy_folder("/src", "/dst").await;
        assert!(matches!(result, Err(DriveError::AlreadyExists(ref p)) if p == "/dst/b"));
        assert_eq!(drive.read_to_string("/dst/a").await.unwrap(), "1");
        assert_eq!(drive.namespace().open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_export_then_import_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let local = LocalDrive::new(temp_dir.path());

        let drive = MemoryDrive::in_memory();
        drive.write("/photos/2024/beach.jpg", "jpeg bytes").await.unwrap();
        drive.write("/photos/notes.txt", "remember").await.unwrap();

        let exported = drive.export("/photos", &local, "/backup").await.unwrap();
        assert_eq!(exported.files, 2);
        let on_disk = std::fs::read_to_string(temp_dir.path().join("backup/2024/beach.jpg")).unwrap();
        assert_eq!(on_disk, "jpeg bytes");

        let restored = MemoryDrive::in_memory();
        let imported = restored.import(&local, "/backup", "/restored").await.unwrap();
        assert_eq!(imported, exported);
        assert_eq!(restored.read_to_string("/restored/notes.txt").await.unwrap(), "remember");
        assert_eq!(
            restored.read_to_string("/restored/2024/beach.jpg").await.unwrap(),
            "jpeg bytes"
        );
    }
}
