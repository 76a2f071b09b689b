//! Atomic JSON state files.
//!
//! Every persisted map is written to a sibling temp file first and then
//! renamed over the destination, so a crash mid-write leaves the previous
//! version intact.

use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{LibraryError, Result};

/// Temp path used while replacing `path`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Reads and decodes `path`. A missing file yields `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(
    fs: &dyn FileSystemAccess,
    path: &Path,
) -> Result<Option<T>> {
    if !fs.exists(path).await? {
        return Ok(None);
    }

    let bytes = fs.read_file(path).await?;
    serde_json::from_slice(&bytes).map(Some).map_err(|e| {
        warn!(path = ?path, error = %e, "Corrupt state file");
        LibraryError::DecodingFailed(format!("{}: {}", path.display(), e))
    })
}

/// Serializes `value` and atomically replaces `path` with it.
pub async fn write_json_atomic<T: Serialize>(
    fs: &dyn FileSystemAccess,
    path: &Path,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| LibraryError::DecodingFailed(format!("encode {}: {}", path.display(), e)))?;

    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent).await?;
    }

    let temp = temp_path_for(path);
    let write_failed = |e: bridge_traits::BridgeError| LibraryError::FileWriteFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    fs.write_file(&temp, Bytes::from(body))
        .await
        .map_err(write_failed)?;
    fs.rename(&temp, path).await.map_err(write_failed)?;

    debug!(path = ?path, "Persisted state file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[test]
    fn test_temp_path_is_sibling() {
        let path = Path::new("/data/listening_progress.json");
        assert_eq!(
            temp_path_for(path),
            PathBuf::from("/data/listening_progress.json.tmp")
        );
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let root = std::env::temp_dir().join(format!("json-store-{}", Uuid::new_v4()));
        let fs = TokioFileSystem::with_directories(root.join("cache"), root.join("data"));
        let path = root.join("data").join("state.json");

        assert_eq!(read_json::<BTreeMap<String, u32>>(&fs, &path).await.unwrap(), None);

        let mut map = BTreeMap::new();
        map.insert("a#1".to_string(), 7u32);
        write_json_atomic(&fs, &path, &map).await.unwrap();

        let loaded: Option<BTreeMap<String, u32>> = read_json(&fs, &path).await.unwrap();
        assert_eq!(loaded, Some(map));
        assert!(!fs.exists(&temp_path_for(&path)).await.unwrap());

        fs.delete_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_decoding_error() {
        let root = std::env::temp_dir().join(format!("json-store-{}", Uuid::new_v4()));
        let fs = TokioFileSystem::with_directories(root.join("cache"), root.join("data"));
        let path = root.join("broken.json");
        fs.write_file(&path, Bytes::from("{not json")).await.unwrap();

        let result = read_json::<BTreeMap<String, u32>>(&fs, &path).await;
        assert!(matches!(result, Err(LibraryError::DecodingFailed(_))));

        fs.delete_dir_all(&root).await.unwrap();
    }
}
