//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const APP_DIR_NAME: &str = "storytelling-core";

/// Tokio-based file system implementation
///
/// Uses `tokio::fs` for all operations and the platform cache/data
/// directories from `dirs` unless explicit directories are supplied.
pub struct TokioFileSystem {
    cache_dir: PathBuf,
    data_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with default directories
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME);

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join(APP_DIR_NAME);

        Self {
            cache_dir,
            data_dir,
        }
    }

    /// Create a new file system accessor with custom directories
    pub fn with_directories(cache_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            data_dir,
        }
    }

    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }

    async fn ensure_dir(dir: &Path) -> Result<()> {
        if !fs::try_exists(dir).await.map_err(Self::map_io_error)? {
            fs::create_dir_all(dir).await.map_err(Self::map_io_error)?;
            debug!(path = ?dir, "Created directory");
        }
        Ok(())
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        Self::ensure_dir(&self.cache_dir).await?;
        Ok(self.cache_dir.clone())
    }

    async fn get_data_directory(&self) -> Result<PathBuf> {
        Self::ensure_dir(&self.data_dir).await?;
        Ok(self.data_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: metadata.len(),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        fs::write(path, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        // rename(2) replaces the destination atomically on the same volume
        fs::rename(from, to).await.map_err(Self::map_io_error)?;
        debug!(from = ?from, to = ?to, "Renamed file");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted directory");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use uuid::Uuid;

    fn scratch_fs() -> (TokioFileSystem, PathBuf) {
        let root = env::temp_dir().join(format!("bridge-desktop-fs-{}", Uuid::new_v4()));
        let fs = TokioFileSystem::with_directories(root.join("cache"), root.join("data"));
        (fs, root)
    }

    #[tokio::test]
    async fn test_custom_directories_are_created() {
        let (fs, root) = scratch_fs();

        let cache_dir = fs.get_cache_directory().await.unwrap();
        assert_eq!(cache_dir, root.join("cache"));
        assert!(fs.exists(&cache_dir).await.unwrap());

        fs.delete_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (fs, root) = scratch_fs();
        let test_file = root.join("nested").join("test-file.txt");

        let data = Bytes::from("Hello, World!");
        fs.write_file(&test_file, data.clone()).await.unwrap();

        let read_data = fs.read_file(&test_file).await.unwrap();
        assert_eq!(data, read_data);

        let metadata = fs.metadata(&test_file).await.unwrap();
        assert_eq!(metadata.size, 13);
        assert!(!metadata.is_directory);
        assert!(metadata.modified_at.is_some());

        fs.delete_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_replaces_destination() {
        let (fs, root) = scratch_fs();
        let target = root.join("target.bin");
        let temp = root.join("target.bin.tmp");

        fs.write_file(&target, Bytes::from("old")).await.unwrap();
        fs.write_file(&temp, Bytes::from("new contents")).await.unwrap();
        fs.rename(&temp, &target).await.unwrap();

        assert_eq!(fs.read_file(&target).await.unwrap(), Bytes::from("new contents"));
        assert!(!fs.exists(&temp).await.unwrap());

        fs.delete_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_size_is_recursive() {
        let (fs, root) = scratch_fs();
        fs.write_file(&root.join("a.bin"), Bytes::from(vec![0u8; 10]))
            .await
            .unwrap();
        fs.write_file(&root.join("sub").join("b.bin"), Bytes::from(vec![0u8; 5]))
            .await
            .unwrap();

        assert_eq!(fs.directory_size(&root).await.unwrap(), 15);

        fs.delete_dir_all(&root).await.unwrap();
    }
}
