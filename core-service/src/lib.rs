//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host-provided bridges from [`CoreConfig`] (HTTP,
//! filesystem, clock) and the host audio engine into the shared core, and
//! exposes the operations a presentation layer needs: chapter lists with an
//! offline fallback, playback preparation, downloads, progress backup and
//! cache maintenance. Desktop apps typically enable the `desktop-shims`
//! feature, which lets [`CoreConfig`] default the bridges to `bridge-desktop`.

pub mod chapters;
pub mod error;
pub mod playback;

pub use chapters::ChapterListing;
pub use error::{CoreError, Result};
pub use playback::PreparedChapter;

use std::sync::Arc;

use bridge_traits::playback::PlaybackEngine;
use core_download::{BulkDownloadOrchestrator, DownloadConfig};
use core_library::{
    CatalogApi, ChapterMediaIndex, ChapterMetadataCache, HttpCatalogClient, ListeningProgressStore,
};
use core_playback::{MediaCacheConfig, MediaCacheStore, PlaybackCoordinator, SessionConfig};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use tokio::sync::broadcast;
use tracing::info;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    event_bus: EventBus,
    catalog: Arc<dyn CatalogApi>,
    chapter_cache: Arc<ChapterMetadataCache>,
    progress: Arc<ListeningProgressStore>,
    media_index: Arc<ChapterMediaIndex>,
    media: Arc<MediaCacheStore>,
    playback: Arc<PlaybackCoordinator>,
    downloads: Arc<BulkDownloadOrchestrator>,
}

impl CoreService {
    /// Builds every component against the backend at `config.api_base_url`.
    pub async fn bootstrap(config: CoreConfig, engine: Arc<dyn PlaybackEngine>) -> Result<Self> {
        let catalog = HttpCatalogClient::new(config.http_client.clone(), &config.api_base_url)?;
        Self::with_catalog(config, engine, Arc::new(catalog)).await
    }

    /// Same as [`CoreService::bootstrap`] with a caller-supplied catalog.
    pub async fn with_catalog(
        config: CoreConfig,
        engine: Arc<dyn PlaybackEngine>,
        catalog: Arc<dyn CatalogApi>,
    ) -> Result<Self> {
        config.validate()?;
        let event_bus = EventBus::new(config.event_buffer_size);
        let fs = config.file_system.clone();
        let clock = config.clock.clone();

        fs.create_dir_all(&config.data_dir)
            .await
            .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;

        let chapter_cache = Arc::new(ChapterMetadataCache::new(
            fs.clone(),
            clock.clone(),
            &config.data_dir,
        ));
        let progress = Arc::new(
            ListeningProgressStore::open(fs.clone(), clock.clone(), &config.data_dir)
                .await?
                .with_event_bus(event_bus.clone()),
        );
        let media_index = Arc::new(ChapterMediaIndex::open(fs.clone(), &config.data_dir).await?);

        let media = Arc::new(
            MediaCacheStore::new(
                MediaCacheConfig::default().with_ttl(config.media_cache_ttl),
                config.http_client.clone(),
                fs.clone(),
                clock.clone(),
                &config.cache_dir,
            )?
            .with_event_bus(event_bus.clone()),
        );

        let playback = Arc::new(
            PlaybackCoordinator::new(
                engine,
                progress.clone(),
                SessionConfig::default()
                    .with_sampling_interval(config.sampling_interval)
                    .with_progress_save_interval(config.progress_save_interval),
            )?
            .with_event_bus(event_bus.clone()),
        );

        let downloads = Arc::new(
            BulkDownloadOrchestrator::new(
                catalog.clone(),
                media.clone(),
                media_index.clone(),
                progress.clone(),
                clock,
                DownloadConfig::default(),
            )
            .with_event_bus(event_bus.clone()),
        );

        info!(api = %config.api_base_url, "Core service ready");

        Ok(Self {
            config: Arc::new(config),
            event_bus,
            catalog,
            chapter_cache,
            progress,
            media_index,
            media,
            playback,
            downloads,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn playback(&self) -> &PlaybackCoordinator {
        &self.playback
    }

    pub fn downloads(&self) -> Arc<BulkDownloadOrchestrator> {
        Arc::clone(&self.downloads)
    }

    pub fn progress(&self) -> Arc<ListeningProgressStore> {
        Arc::clone(&self.progress)
    }

    pub fn media_cache(&self) -> Arc<MediaCacheStore> {
        Arc::clone(&self.media)
    }
}
