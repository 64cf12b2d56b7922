//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const APP_DIR: &str = "offline-media-core";

/// Tokio-based file system implementation rooted in the platform cache and
/// data directories.
pub struct TokioFileSystem {
    cache_dir: PathBuf,
    data_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with default directories
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join(APP_DIR);

        Self { cache_dir, data_dir }
    }

    pub fn with_directories(cache_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self { cache_dir, data_dir }
    }

    async fn ensure_dir(path: &Path) -> Result<()> {
        if !fs::try_exists(path).await.map_err(BridgeError::Io)? {
            fs::create_dir_all(path).await.map_err(BridgeError::Io)?;
            debug!(path = ?path, "Created directory");
        }
        Ok(())
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_secs(time: std::io::Result<std::time::SystemTime>) -> Option<i64> {
    time.ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
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
        fs::try_exists(path).await.map_err(BridgeError::Io)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(BridgeError::Io)?;

        Ok(FileMetadata {
            size: metadata.len(),
            modified_at: unix_secs(metadata.modified()),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(BridgeError::Io)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = ?path, "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!(path = ?path, "Deleted directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(BridgeError::Io)?;

        while let Some(entry) = read_dir.next_entry().await.map_err(BridgeError::Io)? {
            entries.push(entry.path());
        }

        Ok(entries)
    }

    async fn directory_size(&self, path: &Path) -> Result<u64> {
        if !self.exists(path).await? {
            return Ok(0);
        }

        // Iterative walk; async recursion would need boxing
        let mut total = 0u64;
        let mut pending = vec![path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(&dir).await? {
                let metadata = self.metadata(&entry).await?;
                if metadata.is_directory {
                    pending.push(entry);
                } else {
                    total += metadata.size;
                }
            }
        }

        debug!(path = ?path, size = total, "Calculated directory size");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("bridge-desktop-fs-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_custom_directories_are_created() {
        let base = scratch_dir();
        let fs = TokioFileSystem::with_directories(base.join("cache"), base.join("data"));

        let cache_dir = fs.get_cache_directory().await.unwrap();
        assert_eq!(cache_dir, base.join("cache"));
        assert!(fs.exists(&cache_dir).await.unwrap());

        let _ = std::fs::remove_dir_all(base);
    }

    #[tokio::test]
    async fn test_directory_size_is_recursive() {
        let base = scratch_dir();
        let fs = TokioFileSystem::with_directories(base.clone(), base.clone());
        let nested = base.join("offline-downloads").join("u1");
        fs.create_dir_all(&nested).await.unwrap();
        tokio::fs::write(nested.join("a.media"), vec![0u8; 100]).await.unwrap();
        tokio::fs::write(base.join("b.bin"), vec![0u8; 20]).await.unwrap();

        assert_eq!(fs.directory_size(&base).await.unwrap(), 120);
        assert_eq!(fs.directory_size(&base.join("missing")).await.unwrap(), 0);

        fs.delete_dir_all(&base).await.unwrap();
        assert!(!fs.exists(&base).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleting_missing_paths_is_ok() {
        let fs = TokioFileSystem::new();
        let missing = scratch_dir();
        fs.delete_file(&missing.join("x")).await.unwrap();
        fs.delete_dir_all(&missing).await.unwrap();
    }
}
