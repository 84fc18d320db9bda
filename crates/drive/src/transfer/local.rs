//! Transfer endpoints on the local filesystem.
//!
//! Paths handed to a [`LocalDrive`] use drive syntax and are resolved below
//! its root directory. Writers stage content in a hidden sibling file and
//! rename it into place on `finish`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs::{self, File, ReadDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{ContentReader, ContentWriter, FolderItem, FolderReadStream, FolderTarget};
use crate::drive::{EntryKind, ListOptions, DEFAULT_CHUNK_SIZE};
use crate::error::{DriveError, DriveResult};
use crate::path;

/// Suffix of staging files written next to their destination.
const PARTIAL_SUFFIX: &str = ".partial";

/// A directory tree on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDrive {
    root: PathBuf,
    chunk_size: usize,
}

/// One entry of a local listing.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntry {
    pub name: String,
    /// Drive-style path below the local root.
    pub path: String,
    pub absolute_path: PathBuf,
    pub kind: EntryKind,
    /// Present when stats were requested.
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
}

impl LocalDrive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the read chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a drive-style `path`.
    pub fn resolve_path(&self, path: &str) -> DriveResult<PathBuf> {
        let path = path::normalize(path)?;
        if path == path::ROOT {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(path.trim_start_matches('/')))
    }

    pub async fn exists(&self, path: &str) -> DriveResult<bool> {
        Ok(fs::try_exists(self.resolve_path(path)?).await?)
    }

    /// List a local folder. A missing folder lists as empty.
    ///
    /// Entries come back sorted by path.
    pub async fn list(&self, folder: &str, options: ListOptions) -> DriveResult<Vec<LocalEntry>> {
        let folder = path::normalize(folder)?;
        let mut pending = vec![(folder.clone(), self.resolve_path(&folder)?)];
        let mut entries = Vec::new();

        while let Some((dir_path, dir)) = pending.pop() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == ErrorKind::NotFound && dir_path == folder => break,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let entry_path = format!("{}/{}", path::key_prefix(&dir_path), name);
                let file_type = entry.file_type().await?;

                let kind = if file_type.is_dir() {
                    if options.recursive {
                        pending.push((entry_path.clone(), entry.path()));
                    }
                    EntryKind::Directory
                } else if file_type.is_file() {
                    EntryKind::File
                } else {
                    continue;
                };

                if options.file_only && kind == EntryKind::Directory {
                    continue;
                }
                if !options.search.as_ref().map_or(true, |p| p.is_match(&name)) {
                    continue;
                }

                let (size, modified) = if options.with_stats {
                    let metadata = entry.metadata().await?;
                    (Some(metadata.len()), metadata.modified().ok())
                } else {
                    (None, None)
                };

                entries.push(LocalEntry {
                    name,
                    path: entry_path,
                    absolute_path: entry.path(),
                    kind,
                    size,
                    modified,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Open a chunked reader over a local file.
    pub async fn create_read_stream(&self, path: &str) -> DriveResult<LocalContentReader> {
        let absolute = self.resolve_path(path)?;
        let file = match File::open(&absolute).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DriveError::NotFound(path::normalize(path)?))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(LocalContentReader::new(file, self.chunk_size))
    }

    /// Open a staged writer for a local file, creating parent directories.
    pub async fn create_write_stream(&self, path: &str) -> DriveResult<LocalContentWriter> {
        let destination = self.resolve_path(path)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = destination.with_file_name(format!(".{}{}", file_name, PARTIAL_SUFFIX));
        let file = File::create(&staging).await?;

        Ok(LocalContentWriter {
            file,
            staging,
            destination,
            written: 0,
        })
    }

    /// Walk the files below a local folder, depth first.
    pub fn create_folder_read_stream(&self, root: &str) -> DriveResult<LocalFolderReadStream> {
        let root = path::normalize(root)?;
        Ok(LocalFolderReadStream {
            pending: vec![(String::new(), self.resolve_path(&root)?)],
            current: None,
            started: false,
            chunk_size: self.chunk_size,
        })
    }
}

/// Chunked reader over a local file.
pub struct LocalContentReader {
    file: File,
    chunk_size: usize,
}

impl LocalContentReader {
    fn new(file: File, chunk_size: usize) -> Self {
        Self { file, chunk_size }
    }
}

impl ContentReader for LocalContentReader {
    async fn read_chunk(&mut self) -> DriveResult<Option<Bytes>> {
        let mut buf = vec![0u8; self.chunk_size];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}

/// Writer staging content next to its destination.
pub struct LocalContentWriter {
    file: File,
    staging: PathBuf,
    destination: PathBuf,
    written: u64,
}

impl ContentWriter for LocalContentWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> DriveResult<()> {
        self.file.write_all(&chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(mut self) -> DriveResult<u64> {
        self.file.flush().await?;
        drop(self.file);
        fs::rename(&self.staging, &self.destination).await?;
        Ok(self.written)
    }

    async fn abort(self) -> DriveResult<()> {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.staging).await {
            tracing::warn!(path = ?self.staging, error = %e, "Failed to clean up staging file");
        }
        Ok(())
    }
}

/// Depth-first walk over the files below a local folder.
pub struct LocalFolderReadStream {
    pending: Vec<(String, PathBuf)>,
    current: Option<(String, ReadDir)>,
    started: bool,
    chunk_size: usize,
}

impl FolderReadStream for LocalFolderReadStream {
    type Reader = LocalContentReader;

    async fn next_item(&mut self) -> DriveResult<Option<FolderItem<Self::Reader>>> {
        loop {
            if self.current.is_none() {
                let Some((relative, dir)) = self.pending.pop() else {
                    return Ok(None);
                };
                let first = !self.started;
                self.started = true;
                match fs::read_dir(&dir).await {
                    Ok(read_dir) => self.current = Some((relative, read_dir)),
                    Err(e) if first && e.kind() == ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
            }

            let Some((relative, read_dir)) = self.current.as_mut() else {
                continue;
            };
            let Some(entry) = read_dir.next_entry().await? else {
                self.current = None;
                continue;
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            let entry_relative = format!("{}/{}", relative, name);
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                self.pending.push((entry_relative, entry.path()));
            } else if file_type.is_file() {
                let file = File::open(entry.path()).await?;
                return Ok(Some(FolderItem {
                    relative_path: entry_relative,
                    reader: LocalContentReader::new(file, self.chunk_size),
                }));
            } else {
                tracing::debug!(path = ?entry.path(), "Skipping non-regular file");
            }
        }
    }

    async fn close(mut self) -> DriveResult<()> {
        self.current = None;
        self.pending.clear();
        Ok(())
    }
}

impl FolderTarget for &LocalDrive {
    type Writer = LocalContentWriter;

    async fn check_folder_root(&self, root: &str) -> DriveResult<()> {
        let absolute = self.resolve_path(root)?;
        match fs::metadata(&absolute).await {
            Ok(metadata) if !metadata.is_dir() => Err(DriveError::AlreadyExists(root.to_string())),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn check_destination(&self, path: &str) -> DriveResult<()> {
        let path = path::normalize(path)?;
        for dir in path::ancestors(&path, None) {
            match fs::metadata(self.resolve_path(&dir)?).await {
                Ok(metadata) if !metadata.is_dir() => return Err(DriveError::AlreadyExists(dir)),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }
        match fs::metadata(self.resolve_path(&path)?).await {
            Ok(metadata) if metadata.is_dir() => Err(DriveError::AlreadyExists(path)),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_writer(&self, path: &str) -> DriveResult<Self::Writer> {
        self.create_write_stream(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use tempfile::TempDir;

    fn create_tree(root: &Path) {
        std::fs::create_dir_all(root.join("docs/guide")).unwrap();
        std::fs::write(root.join("readme.md"), "readme").unwrap();
        std::fs::write(root.join("docs/guide/intro.md"), "intro").unwrap();
        std::fs::write(root.join("docs/todo.txt"), "todo").unwrap();
    }

    #[tokio::test]
    async fn test_list_recursive() {
        let temp_dir = TempDir::new().unwrap();
        create_tree(temp_dir.path());
        let local = LocalDrive::new(temp_dir.path());

        let entries = local.list("/", ListOptions::default()).await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/docs", "/docs/guide", "/docs/guide/intro.md", "/docs/todo.txt", "/readme.md"]
        );

        let shallow = local.list("/docs", ListOptions::default().shallow()).await.unwrap();
        assert_eq!(shallow.len(), 2);

        let markdown = local
            .list("/", ListOptions::default().search(Regex::new(r"\.md$").unwrap()).with_stats())
            .await
            .unwrap();
        assert_eq!(markdown.len(), 2);
        assert_eq!(markdown[0].size, Some(5));

        assert!(local.list("/missing", ListOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_folder_read_stream_yields_every_file() {
        let temp_dir = TempDir::new().unwrap();
        create_tree(temp_dir.path());
        let local = LocalDrive::new(temp_dir.path()).with_chunk_size(2);

        let mut stream = local.create_folder_read_stream("/docs").unwrap();
        let mut seen = Vec::new();
        while let Some(mut item) = stream.next_item().await.unwrap() {
            let mut content = Vec::new();
            while let Some(chunk) = item.reader.read_chunk().await.unwrap() {
                content.extend_from_slice(&chunk);
            }
            seen.push((item.relative_path, String::from_utf8(content).unwrap()));
        }
        stream.close().await.unwrap();

        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("/guide/intro.md".to_string(), "intro".to_string()),
                ("/todo.txt".to_string(), "todo".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_writer_stages_then_renames() {
        let temp_dir = TempDir::new().unwrap();
        let local = LocalDrive::new(temp_dir.path());

        let mut writer = local.create_write_stream("/out/file.bin").await.unwrap();
        writer.write_chunk(Bytes::from_static(b"abc")).await.unwrap();
        assert!(!temp_dir.path().join("out/file.bin").exists());
        assert!(temp_dir.path().join("out/.file.bin.partial").exists());

        assert_eq!(writer.finish().await.unwrap(), 3);
        assert_eq!(std::fs::read(temp_dir.path().join("out/file.bin")).unwrap(), b"abc");
        assert!(!temp_dir.path().join("out/.file.bin.partial").exists());

        let writer = local.create_write_stream("/out/aborted").await.unwrap();
        writer.abort().await.unwrap();
        assert!(!local.exists("/out/aborted").await.unwrap());
        assert!(!temp_dir.path().join("out/.aborted.partial").exists());
    }

    #[tokio::test]
    async fn test_target_collisions() {
        let temp_dir = TempDir::new().unwrap();
        create_tree(temp_dir.path());
        let local = LocalDrive::new(temp_dir.path());
        let target = &local;

        assert!(matches!(
            target.check_folder_root("/readme.md").await,
            Err(DriveError::AlreadyExists(_))
        ));
        target.check_folder_root("/docs").await.unwrap();
        target.check_folder_root("/new").await.unwrap();

        assert!(matches!(
            target.check_destination("/readme.md/child").await,
            Err(DriveError::AlreadyExists(ref p)) if p == "/readme.md"
        ));
        assert!(matches!(
            target.check_destination("/docs/guide").await,
            Err(DriveError::AlreadyExists(_))
        ));
        target.check_destination("/docs/todo.txt").await.unwrap();
    }
}
