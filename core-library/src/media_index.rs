//! Index of chapters whose media has been fully downloaded.
//!
//! Written by the download paths once audio (and subtitles, when available)
//! are in the media cache; read by the playback path as the offline fallback.

use bridge_traits::storage::FileSystemAccess;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::json_store::{read_json, write_json_atomic};
use crate::models::{chapter_key, BookId, ChapterCacheEntry, ChapterId};

const INDEX_FILE: &str = "chapter_media_cache.json";

pub struct ChapterMediaIndex {
    fs: Arc<dyn FileSystemAccess>,
    path: PathBuf,
    entries: Mutex<BTreeMap<String, ChapterCacheEntry>>,
}

impl ChapterMediaIndex {
    pub async fn open(fs: Arc<dyn FileSystemAccess>, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(INDEX_FILE);
        let entries: BTreeMap<String, ChapterCacheEntry> =
            read_json(fs.as_ref(), &path).await?.unwrap_or_default();
        debug!(count = entries.len(), "Loaded chapter media index");

        Ok(Self {
            fs,
            path,
            entries: Mutex::new(entries),
        })
    }

    pub async fn get(&self, book_id: &BookId, chapter_id: &ChapterId) -> Option<ChapterCacheEntry> {
        self.entries
            .lock()
            .await
            .get(&chapter_key(book_id, chapter_id))
            .cloned()
    }

    /// Entry for the chapter, only if its audio file is still on disk.
    pub async fn get_playable(
        &self,
        book_id: &BookId,
        chapter_id: &ChapterId,
    ) -> Result<Option<ChapterCacheEntry>> {
        let Some(entry) = self.get(book_id, chapter_id).await else {
            return Ok(None);
        };
        if self.fs.exists(&entry.audio_path).await? {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    /// Chapters of `book_id` whose audio file is present, along with the
    /// subtitle file whenever the entry carries a subtitle URL.
    pub async fn downloaded_chapters(&self, book_id: &BookId) -> Result<HashSet<ChapterId>> {
        let candidates: Vec<ChapterCacheEntry> = self
            .entries
            .lock()
            .await
            .values()
            .filter(|entry| &entry.book_id == book_id)
            .cloned()
            .collect();

        let mut present = HashSet::new();
        for entry in candidates {
            if self.is_complete(&entry).await? {
                present.insert(entry.chapter_id);
            }
        }
        Ok(present)
    }

    async fn is_complete(&self, entry: &ChapterCacheEntry) -> Result<bool> {
        if !self.fs.exists(&entry.audio_path).await? {
            return Ok(false);
        }
        match (&entry.subtitles_url, &entry.subtitles_path) {
            (None, _) => Ok(true),
            (Some(_), Some(path)) => Ok(self.fs.exists(path).await?),
            (Some(_), None) => Ok(false),
        }
    }

    #[instrument(skip(self, entry), fields(book_id = %entry.book_id, chapter_id = %entry.chapter_id))]
    pub async fn upsert(&self, entry: ChapterCacheEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(entry.key(), entry);
        write_json_atomic(self.fs.as_ref(), &self.path, &next).await?;
        *entries = next;
        debug!("Recorded chapter media");
        Ok(())
    }

    /// Forgets every entry. Used together with a media cache wipe.
    pub async fn clear_all(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let next = BTreeMap::new();
        write_json_atomic(self.fs.as_ref(), &self.path, &next).await?;
        *entries = next;
        Ok(())
    }
}
