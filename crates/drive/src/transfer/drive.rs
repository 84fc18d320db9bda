//! Transfer endpoints backed by a [`Drive`].

use bytes::{Bytes, BytesMut};
use store::{BlobRef, Namespace, StatStore};

use super::{
    ContentReader, ContentWriter, FolderItem, FolderReadStream, FolderTarget, FolderWriteStream,
    LocalDrive, TransferSummary,
};
use crate::drive::{Drive, ListOptions, Listing, PutOptions};
use crate::error::{DriveError, DriveResult};
use crate::path;

/// Chunked reader over one file's content.
pub struct DriveContentReader<'a, N> {
    namespace: &'a N,
    blob: BlobRef,
    position: u64,
    chunk_size: usize,
}

impl<N: Namespace> DriveContentReader<'_, N> {
    /// Total content length.
    pub fn len(&self) -> u64 {
        self.blob.byte_length
    }

    pub fn is_empty(&self) -> bool {
        self.blob.byte_length == 0
    }
}

impl<N: Namespace> ContentReader for DriveContentReader<'_, N> {
    async fn read_chunk(&mut self) -> DriveResult<Option<Bytes>> {
        let remaining = self.blob.byte_length.saturating_sub(self.position);
        if remaining == 0 {
            return Ok(None);
        }
        let len = remaining.min(self.chunk_size as u64) as usize;
        let chunk = self
            .namespace
            .read_blob(&self.blob, self.position, len)
            .await?;
        self.position += len as u64;
        Ok(Some(chunk))
    }
}

/// Buffers written chunks and stores them as one file on `finish`.
pub struct DriveContentWriter<'a, N, S> {
    drive: &'a Drive<N, S>,
    path: String,
    options: PutOptions,
    buffer: BytesMut,
}

impl<N: Namespace, S: StatStore> ContentWriter for DriveContentWriter<'_, N, S> {
    async fn write_chunk(&mut self, chunk: Bytes) -> DriveResult<()> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self) -> DriveResult<u64> {
        let len = self.buffer.len() as u64;
        self.drive.put(&self.path, &self.buffer, self.options).await?;
        Ok(len)
    }

    async fn abort(self) -> DriveResult<()> {
        tracing::debug!(path = %self.path, buffered = self.buffer.len(), "Write aborted");
        Ok(())
    }
}

/// Walk over the files below a drive folder.
pub struct DriveFolderReadStream<'a, N: Namespace, S> {
    drive: &'a Drive<N, S>,
    root: String,
    listing: Listing<'a, N, S>,
}

impl<'a, N: Namespace, S: StatStore> FolderReadStream for DriveFolderReadStream<'a, N, S> {
    type Reader = DriveContentReader<'a, N>;

    async fn next_item(&mut self) -> DriveResult<Option<FolderItem<Self::Reader>>> {
        while let Some(entry) = self.listing.next().await? {
            let Some(relative) = path::relative_to(&entry.path, &self.root) else {
                continue;
            };
            let reader = self.drive.create_read_stream(&entry.path).await?;
            return Ok(Some(FolderItem {
                relative_path: relative.to_string(),
                reader,
            }));
        }
        Ok(None)
    }

    async fn close(self) -> DriveResult<()> {
        self.listing.close().await
    }
}

impl<'a, N: Namespace, S: StatStore> FolderTarget for &'a Drive<N, S> {
    type Writer = DriveContentWriter<'a, N, S>;

    async fn check_folder_root(&self, root: &str) -> DriveResult<()> {
        if self.file_node(root).await?.is_some() {
            return Err(DriveError::AlreadyExists(root.to_string()));
        }
        Ok(())
    }

    async fn check_destination(&self, path: &str) -> DriveResult<()> {
        self.check_writable(path).await
    }

    async fn create_writer(&self, path: &str) -> DriveResult<Self::Writer> {
        Ok(DriveContentWriter {
            drive: *self,
            path: path.to_string(),
            options: PutOptions::default(),
            buffer: BytesMut::new(),
        })
    }
}

impl<N: Namespace, S: StatStore> Drive<N, S> {
    /// Open a chunked reader over the file at `path`.
    ///
    /// Records an access event when access tracking is on.
    pub async fn create_read_stream(&self, path: &str) -> DriveResult<DriveContentReader<'_, N>> {
        let path = path::normalize(path)?;
        let blob = self
            .file_node(&path)
            .await?
            .and_then(|node| node.data.blob)
            .ok_or_else(|| DriveError::NotFound(path.clone()))?;
        self.record_access(&path).await?;

        Ok(DriveContentReader {
            namespace: self.namespace(),
            blob,
            position: 0,
            chunk_size: self.options().chunk_size.max(1),
        })
    }

    /// Open a writer that stores a file at `path` when finished.
    ///
    /// The path is validated up front with the same rules as [`Drive::put`].
    pub async fn create_write_stream(
        &self,
        path: &str,
        options: PutOptions,
    ) -> DriveResult<DriveContentWriter<'_, N, S>> {
        let path = path::normalize(path)?;
        self.check_writable(&path).await?;
        Ok(DriveContentWriter {
            drive: self,
            path,
            options,
            buffer: BytesMut::new(),
        })
    }

    /// Walk the files below `root`.
    pub fn create_folder_read_stream(&self, root: &str) -> DriveResult<DriveFolderReadStream<'_, N, S>> {
        let root = path::normalize(root)?;
        let listing = self.list_stream(&root, ListOptions::default().file_only())?;
        Ok(DriveFolderReadStream {
            drive: self,
            root,
            listing,
        })
    }

    /// Write folder items below `root`.
    pub fn create_folder_write_stream(&self, root: &str) -> DriveResult<FolderWriteStream<&Self>> {
        FolderWriteStream::new(self, root)
    }

    /// Copy every file below `source` to the same relative paths below
    /// `dest`.
    pub async fn copy_folder(&self, source: &str, dest: &str) -> DriveResult<TransferSummary> {
        let source = path::normalize(source)?;
        let dest = path::normalize(dest)?;
        if dest == source || path::is_descendant(&dest, &source) {
            return Err(DriveError::InvalidPath {
                path: dest,
                reason: "destination lies inside the source folder",
            });
        }

        let reader = self.create_folder_read_stream(&source)?;
        self.create_folder_write_stream(&dest)?
            .pipe_from(reader)
            .await
    }

    /// Copy every file below `source` onto the local filesystem.
    pub async fn export(
        &self,
        source: &str,
        local: &LocalDrive,
        dest: &str,
    ) -> DriveResult<TransferSummary> {
        let reader = self.create_folder_read_stream(source)?;
        FolderWriteStream::new(local, dest)?.pipe_from(reader).await
    }

    /// Copy every file below a local folder into this drive.
    pub async fn import(
        &self,
        local: &LocalDrive,
        source: &str,
        dest: &str,
    ) -> DriveResult<TransferSummary> {
        let reader = local.create_folder_read_stream(source)?;
        self.create_folder_write_stream(dest)?.pipe_from(reader).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{DriveOptions, MemoryDrive};

    #[tokio::test]
    async fn test_read_stream_chunks() {
        let drive = MemoryDrive::in_memory().with_options(DriveOptions {
            track_access_time: false,
            chunk_size: 4,
        });
        drive.write("/f", "0123456789").await.unwrap();

        let mut reader = drive.create_read_stream("/f").await.unwrap();
        assert_eq!(reader.len(), 10);
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.read_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["0123", "4567", "89"]);
    }

    #[tokio::test]
    async fn test_read_stream_records_access() {
        let drive = MemoryDrive::in_memory();
        drive.write("/f", "x").await.unwrap();
        let before = drive.stat("/f").await.unwrap().atime().unwrap();

        drive.create_read_stream("/f").await.unwrap();
        assert!(drive.stat("/f").await.unwrap().atime().unwrap() > before);

        assert!(matches!(
            drive.create_read_stream("/missing").await,
            Err(DriveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_write_stream() {
        let drive = MemoryDrive::in_memory();
        let mut writer = drive
            .create_write_stream("/out", PutOptions::default())
            .await
            .unwrap();
        writer.write_chunk(Bytes::from_static(b"hello ")).await.unwrap();
        writer.write_chunk(Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), 11);
        assert_eq!(drive.read_to_string("/out").await.unwrap(), "hello world");

        let writer = drive
            .create_write_stream("/aborted", PutOptions::default())
            .await
            .unwrap();
        writer.abort().await.unwrap();
        assert!(!drive.exists("/aborted").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_folder_into_itself_is_rejected() {
        let drive = MemoryDrive::in_memory();
        drive.write("/a/f", "x").await.unwrap();

        assert!(matches!(
            drive.copy_folder("/a", "/a/b").await,
            Err(DriveError::InvalidPath { .. })
        ));
    }
}
