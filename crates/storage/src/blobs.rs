//! Blob tree rooted at a base directory.

use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use futures::Stream;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Physical attributes of a blob or directory.
#[derive(Debug, Clone)]
pub struct BlobMeta {
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
}

/// One entry produced by a full-tree walk.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Logical path (`/a/b/c.ext`).
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
}

/// One immediate child of a directory.
#[derive(Debug, Clone)]
pub struct DirEntryMeta {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
}

/// Stream of walk entries.
pub type WalkStream = Pin<Box<dyn Stream<Item = StorageResult<WalkEntry>> + Send>>;

/// Stream of blob content chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Blob store over a POSIX directory tree.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a blob store, creating the base directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a cleaned logical path to its on-disk location.
    ///
    /// Callers normalise paths before they reach the store; this re-checks
    /// that no component can escape the root.
    fn disk_path(&self, logical: &str) -> StorageResult<PathBuf> {
        let rel = logical.trim_start_matches('/');
        if rel.is_empty() {
            return Ok(self.root.clone());
        }

        for component in Path::new(rel).components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidPath(format!(
                        "unsafe path component in {logical:?}"
                    )));
                }
            }
        }

        Ok(self.root.join(rel))
    }

    fn not_found(logical: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(logical.to_string())
        } else {
            StorageError::Io(e)
        }
    }

    /// Stat a logical path.
    pub async fn stat(&self, logical: &str) -> StorageResult<BlobMeta> {
        let path = self.disk_path(logical)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found(logical, e))?;
        Ok(BlobMeta {
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified: meta.modified()?,
        })
    }

    /// Stat returning `None` for missing paths.
    pub async fn try_stat(&self, logical: &str) -> StorageResult<Option<BlobMeta>> {
        match self.stat(logical).await {
            Ok(meta) => Ok(Some(meta)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, logical: &str) -> StorageResult<bool> {
        Ok(self.try_stat(logical).await?.is_some())
    }

    /// Open a blob for reading.
    pub async fn open(&self, logical: &str) -> StorageResult<fs::File> {
        let path = self.disk_path(logical)?;
        fs::File::open(&path)
            .await
            .map_err(|e| Self::not_found(logical, e))
    }

    /// Read `[start, end)` from a blob.
    pub async fn read_range(&self, logical: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({end}) < start ({start})"
            )));
        }
        let len = usize::try_from(end - start)
            .map_err(|_| StorageError::InvalidRange(format!("range size {} too large", end - start)))?;

        let mut file = self.open(logical).await?;
        file.seek(std::io::SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Stream a blob's full content in chunks.
    pub async fn read_stream(&self, logical: &str) -> StorageResult<ByteStream> {
        let file = self.open(logical).await?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    /// Create (or truncate) a blob, creating parent directories first.
    pub async fn create(&self, logical: &str) -> StorageResult<fs::File> {
        let path = self.disk_path(logical)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(fs::File::create(&path).await?)
    }

    /// Create a directory (and any missing parents).
    pub async fn create_dir_all(&self, logical: &str) -> StorageResult<()> {
        let path = self.disk_path(logical)?;
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    /// Remove a single blob.
    pub async fn remove_file(&self, logical: &str) -> StorageResult<()> {
        let path = self.disk_path(logical)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::not_found(logical, e))
    }

    /// Remove a blob or an *empty* directory.
    pub async fn remove_entry(&self, logical: &str) -> StorageResult<()> {
        let path = self.disk_path(logical)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found(logical, e))?;
        if meta.is_dir() {
            fs::remove_dir(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Recursively remove a subtree (file or directory).
    pub async fn remove_all(&self, logical: &str) -> StorageResult<()> {
        let path = self.disk_path(logical)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found(logical, e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Rename a subtree, creating the destination's parent directories.
    /// Atomic on the same filesystem.
    pub async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.disk_path(from)?;
        let to_path = self.disk_path(to)?;
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| Self::not_found(from, e))
    }

    /// List the immediate children of a directory, skipping symlinks.
    pub async fn read_dir(&self, logical: &str) -> StorageResult<Vec<DirEntryMeta>> {
        let path = self.disk_path(logical)?;
        let mut entries = fs::read_dir(&path)
            .await
            .map_err(|e| Self::not_found(logical, e))?;

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_symlink() {
                continue;
            }
            let meta = entry.metadata().await?;
            out.push(DirEntryMeta {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: file_type.is_dir(),
                size: if file_type.is_dir() { 0 } else { meta.len() },
                modified: meta.modified()?,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Whether a directory has no entries.
    pub async fn is_dir_empty(&self, logical: &str) -> StorageResult<bool> {
        let path = self.disk_path(logical)?;
        let mut entries = fs::read_dir(&path)
            .await
            .map_err(|e| Self::not_found(logical, e))?;
        Ok(entries.next_entry().await?.is_none())
    }

    /// Walk the whole tree depth-first, yielding every file and directory
    /// (the root itself is not yielded). Symlinks are skipped so the walk
    /// cannot leave the base directory.
    pub fn walk(&self) -> WalkStream {
        let root = self.root.clone();

        let stream = async_stream::try_stream! {
            let mut stack = vec![root.clone()];
            while let Some(dir) = stack.pop() {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    let file_type = entry.file_type().await?;
                    if file_type.is_symlink() {
                        continue;
                    }

                    let rel = match path.strip_prefix(&root) {
                        Ok(rel) => rel,
                        Err(_) => continue,
                    };
                    let logical = format!("/{}", rel.to_string_lossy().replace('\\', "/"));
                    let meta = entry.metadata().await?;

                    if file_type.is_dir() {
                        stack.push(path);
                        yield WalkEntry {
                            path: logical,
                            is_dir: true,
                            size: 0,
                            modified: meta.modified()?,
                        };
                    } else {
                        yield WalkEntry {
                            path: logical,
                            is_dir: false,
                            size: meta.len(),
                            modified: meta.modified()?,
                        };
                    }
                }
            }
        };

        Box::pin(stream)
    }
}
