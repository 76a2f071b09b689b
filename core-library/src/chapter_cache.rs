//! Chapter Metadata Cache
//!
//! Keeps one chapter-list snapshot per book in `{data_dir}/chapters/`. A
//! snapshot is only ever replaced as a whole. [`ChapterMetadataCache::fresh_list`]
//! honors a TTL; [`ChapterMetadataCache::cached_list`] ignores it and backs the
//! offline display.

use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::json_store::{read_json, write_json_atomic};
use crate::models::{BookChapterSnapshot, BookId, ChapterSnapshot};

const SNAPSHOT_DIR: &str = "chapters";

pub struct ChapterMetadataCache {
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    dir: PathBuf,
    /// Snapshots already read from disk. Guarded so that reads and writes of
    /// the same book never interleave.
    loaded: Mutex<HashMap<BookId, Option<BookChapterSnapshot>>>,
}

impl ChapterMetadataCache {
    pub fn new(fs: Arc<dyn FileSystemAccess>, clock: Arc<dyn Clock>, data_dir: &Path) -> Self {
        Self {
            fs,
            clock,
            dir: data_dir.join(SNAPSHOT_DIR),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    fn snapshot_path(&self, book_id: &BookId) -> PathBuf {
        // Book ids come from the backend; hash them so any id is a safe filename
        let digest = Sha256::digest(book_id.as_str().as_bytes());
        self.dir.join(format!("{}.json", hex::encode(&digest[..16])))
    }

    async fn load<'a>(
        &self,
        loaded: &'a mut HashMap<BookId, Option<BookChapterSnapshot>>,
        book_id: &BookId,
    ) -> Result<&'a Option<BookChapterSnapshot>> {
        if !loaded.contains_key(book_id) {
            let snapshot: Option<BookChapterSnapshot> =
                read_json(self.fs.as_ref(), &self.snapshot_path(book_id)).await?;
            loaded.insert(book_id.clone(), snapshot);
        }
        Ok(loaded.get(book_id).unwrap_or(&None))
    }

    /// Chapter list of `book_id` if it was cached no more than `ttl` ago.
    #[instrument(skip(self), fields(book_id = %book_id))]
    pub async fn fresh_list(
        &self,
        book_id: &BookId,
        ttl: Duration,
    ) -> Result<Option<Vec<ChapterSnapshot>>> {
        let mut loaded = self.loaded.lock().await;
        let Some(snapshot) = self.load(&mut loaded, book_id).await? else {
            return Ok(None);
        };

        // A snapshot stamped in the future (clock moved back) counts as age zero
        let age = (self.clock.now() - snapshot.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age <= ttl {
            debug!(age_secs = age.as_secs(), "Chapter list snapshot is fresh");
            Ok(Some(snapshot.chapters.clone()))
        } else {
            debug!(age_secs = age.as_secs(), "Chapter list snapshot expired");
            Ok(None)
        }
    }

    /// Latest snapshot regardless of age.
    pub async fn cached_list(&self, book_id: &BookId) -> Result<Option<BookChapterSnapshot>> {
        let mut loaded = self.loaded.lock().await;
        Ok(self.load(&mut loaded, book_id).await?.clone())
    }

    /// Replaces the snapshot of `book_id` with `chapters`, stamped now.
    #[instrument(skip(self, chapters), fields(book_id = %book_id, count = chapters.len()))]
    pub async fn store(
        &self,
        book_id: &BookId,
        chapters: Vec<ChapterSnapshot>,
    ) -> Result<BookChapterSnapshot> {
        let snapshot = BookChapterSnapshot {
            book_id: book_id.clone(),
            chapters,
            cached_at: self.clock.now(),
        };

        let mut loaded = self.loaded.lock().await;
        write_json_atomic(self.fs.as_ref(), &self.snapshot_path(book_id), &snapshot).await?;
        loaded.insert(book_id.clone(), Some(snapshot.clone()));

        debug!("Stored chapter list snapshot");
        Ok(snapshot)
    }

    /// Drops the snapshot of `book_id`, forcing the next read to the network.
    pub async fn invalidate(&self, book_id: &BookId) -> Result<()> {
        let mut loaded = self.loaded.lock().await;
        let path = self.snapshot_path(book_id);
        if self.fs.exists(&path).await? {
            self.fs.delete_file(&path).await?;
        }
        loaded.insert(book_id.clone(), None);
        Ok(())
    }
}
