//! Media fetch seam used by the downloader

use async_trait::async_trait;
use core_playback::cache::{CachedAudio, CachedText, MediaCacheStore};
use core_playback::error::Result;

/// Downloads one media file into the local cache.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_audio(&self, url: &str) -> Result<CachedAudio>;

    async fn fetch_subtitles(&self, url: &str) -> Result<CachedText>;
}

#[async_trait]
impl MediaFetcher for MediaCacheStore {
    async fn fetch_audio(&self, url: &str) -> Result<CachedAudio> {
        MediaCacheStore::fetch_audio(self, url).await
    }

    async fn fetch_subtitles(&self, url: &str) -> Result<CachedText> {
        MediaCacheStore::fetch_subtitles(self, url).await
    }
}
