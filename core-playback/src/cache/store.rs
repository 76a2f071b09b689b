//! # Media Cache Store
//!
//! Maps a remote media URL to a local file under `{cache_dir}/{directory_name}`.
//!
//! Each fetch runs the same sequence under a per-URL lock:
//!
//! 1. normalize the URL (the cache key)
//! 2. probe for a resolved URL and revalidation token
//! 3. serve the existing file if the stored token matches, or if no token
//!    could be obtained and the file is still within the TTL
//! 4. otherwise download the body to a temp file, rename it over the
//!    destination and record the new token
//! 5. delete files left behind at a previous path for the same key
//!
//! Files are named after the SHA-256 of the URL they were fetched for. The
//! path derived from the normalized URL is the "legacy" path; once a token is
//! available the path is derived from the resolved URL instead.

use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_library::error::LibraryError;
use core_library::json_store::{read_json, temp_path_for, write_json_atomic};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::{redact_if_sensitive, strip_path};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::config::MediaCacheConfig;
use crate::cache::normalize::normalize_media_url;
use crate::cache::resolver::RemoteMetadataResolver;
use crate::cache::stats::MediaCacheStats;
use crate::error::{PlaybackError, Result};

const INDEX_FILE: &str = "index.json";
const ETAG_HEADER: &str = "ETag";
const GENERATION_HEADER: &str = "x-goog-generation";

/// What a cached file holds. Only affects the fallback file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Subtitles,
}

/// Token bookkeeping for one cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub local_path: PathBuf,
    pub resolved_url: String,
    /// `None` when the last fetch could not obtain a token; any earlier token
    /// is dropped at that point.
    pub token: Option<String>,
    pub cached_at: DateTime<Utc>,
}

type TokenIndex = BTreeMap<String, TokenRecord>;

/// A cached audio file ready to hand to the playback engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAudio {
    pub local_path: PathBuf,
    /// Normalized URL, the cache key.
    pub remote_url: String,
    pub token: Option<String>,
    /// `true` when no body was downloaded by this call.
    pub from_cache: bool,
}

/// Cached subtitle text.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedText {
    pub local_path: PathBuf,
    pub remote_url: String,
    pub text: String,
    pub from_cache: bool,
}

struct CachedFile {
    local_path: PathBuf,
    remote_url: String,
    token: Option<String>,
    from_cache: bool,
}

pub struct MediaCacheStore {
    config: MediaCacheConfig,
    root: PathBuf,
    http_client: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    resolver: RemoteMetadataResolver,
    /// Loaded lazily on first use.
    index: Mutex<Option<TokenIndex>>,
    key_locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
    event_bus: Option<EventBus>,
}

impl MediaCacheStore {
    pub fn new(
        config: MediaCacheConfig,
        http_client: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        cache_dir: &Path,
    ) -> Result<Self> {
        config.validate().map_err(|e| {
            PlaybackError::Internal(format!("Invalid media cache configuration: {}", e))
        })?;

        let resolver =
            RemoteMetadataResolver::new(http_client.clone()).with_timeout(config.request_timeout);

        Ok(Self {
            root: cache_dir.join(&config.directory_name),
            config,
            http_client,
            fs,
            clock,
            resolver,
            index: Mutex::new(None),
            key_locks: SyncMutex::new(HashMap::new()),
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========================================================================
    // Fetch
    // ========================================================================

    #[instrument(skip(self, url), fields(url = %redact_if_sensitive("url", url)))]
    pub async fn fetch_audio(&self, url: &str) -> Result<CachedAudio> {
        let file = self.fetch(url, MediaKind::Audio).await?;
        Ok(CachedAudio {
            local_path: file.local_path,
            remote_url: file.remote_url,
            token: file.token,
            from_cache: file.from_cache,
        })
    }

    #[instrument(skip(self, url), fields(url = %redact_if_sensitive("url", url)))]
    pub async fn fetch_subtitles(&self, url: &str) -> Result<CachedText> {
        let file = self.fetch(url, MediaKind::Subtitles).await?;
        let text = self.read_text(&file.local_path).await?;
        Ok(CachedText {
            local_path: file.local_path,
            remote_url: file.remote_url,
            text,
            from_cache: file.from_cache,
        })
    }

    async fn fetch(&self, raw_url: &str, kind: MediaKind) -> Result<CachedFile> {
        let normalized = normalize_media_url(raw_url)?;
        let lease = self.key_lock(&normalized);
        let _serialized = lease.lock.lock().await;

        let remote = self.resolver.resolve(&normalized).await;
        let remote_token = remote.as_ref().and_then(|r| r.token.clone());

        let legacy_path = self.path_for(&normalized, kind);
        let destination = match (&remote, &remote_token) {
            (Some(resolved), Some(_)) => self.path_for(&resolved.resolved_url, kind),
            _ => legacy_path.clone(),
        };
        let stored = self.record(&normalized).await?;

        if let Some(existing) = self
            .existing_file(&destination, stored.as_ref(), &legacy_path)
            .await?
        {
            let record = stored.as_ref().filter(|r| r.local_path == existing);
            let stored_token = record.and_then(|r| r.token.as_deref());

            let hit = match remote_token.as_deref() {
                Some(token) => (stored_token == Some(token)).then_some(true),
                None => self
                    .is_within_ttl(&existing, record)
                    .await?
                    .then_some(false),
            };

            if let Some(revalidated) = hit {
                debug!(file = %strip_path(&existing.to_string_lossy()), revalidated, "Serving cached media");
                self.emit(CacheEvent::Hit {
                    url: normalized.clone(),
                    revalidated,
                });
                return Ok(CachedFile {
                    local_path: existing,
                    remote_url: normalized,
                    token: stored_token.map(str::to_string),
                    from_cache: true,
                });
            }
        }

        let fetch_url = remote
            .as_ref()
            .map(|r| r.resolved_url.clone())
            .unwrap_or_else(|| normalized.clone());
        let response = self.download(&fetch_url).await?;
        let token = remote_token.or_else(|| token_from(&response));
        let bytes = response.body.len() as u64;

        self.write_atomic(&destination, response.body).await?;
        self.put_record(
            &normalized,
            TokenRecord {
                local_path: destination.clone(),
                resolved_url: response.final_url.unwrap_or(fetch_url),
                token: token.clone(),
                cached_at: self.clock.now(),
            },
        )
        .await?;

        let mut orphans = vec![legacy_path];
        if let Some(previous) = stored {
            orphans.push(previous.local_path);
        }
        self.remove_orphans(&destination, orphans).await;

        info!(bytes, tokened = token.is_some(), "Cached media");
        self.emit(CacheEvent::Fetched {
            url: normalized.clone(),
            bytes,
        });

        Ok(CachedFile {
            local_path: destination,
            remote_url: normalized,
            token,
            from_cache: false,
        })
    }

    /// First of destination, previously recorded path, legacy path that exists.
    async fn existing_file(
        &self,
        destination: &Path,
        stored: Option<&TokenRecord>,
        legacy_path: &Path,
    ) -> Result<Option<PathBuf>> {
        let mut candidates = vec![destination.to_path_buf()];
        if let Some(record) = stored {
            candidates.push(record.local_path.clone());
        }
        candidates.push(legacy_path.to_path_buf());

        for candidate in candidates {
            if self.fs.exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn is_within_ttl(&self, path: &Path, record: Option<&TokenRecord>) -> Result<bool> {
        let cached_at = match record {
            Some(record) => Some(record.cached_at),
            None => self.fs.metadata(path).await?.modified_at,
        };
        let Some(cached_at) = cached_at else {
            return Ok(false);
        };

        // Clock skew can make the file look younger than zero.
        let age = (self.clock.now() - cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Ok(age <= self.config.ttl)
    }

    async fn download(&self, url: &str) -> Result<HttpResponse> {
        let mut request = HttpRequest::get(url);
        if let Some(timeout) = self.config.request_timeout {
            request = request.timeout(timeout);
        }

        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            warn!(status = response.status, "Media download rejected");
            return Err(PlaybackError::HttpError(response.status));
        }
        if response.body.is_empty() {
            return Err(PlaybackError::InvalidResponse(format!(
                "empty body from {}",
                url
            )));
        }
        Ok(response)
    }

    async fn write_atomic(&self, destination: &Path, body: Bytes) -> Result<()> {
        let temp = temp_path_for(destination);
        let write_failed = |e: bridge_traits::BridgeError| PlaybackError::FileWriteFailed {
            path: destination.display().to_string(),
            message: e.to_string(),
        };

        self.fs
            .create_dir_all(&self.root)
            .await
            .map_err(write_failed)?;

        if let Err(e) = self.fs.write_file(&temp, body).await {
            self.discard(&temp).await;
            return Err(write_failed(e));
        }
        if let Err(e) = self.fs.rename(&temp, destination).await {
            self.discard(&temp).await;
            return Err(write_failed(e));
        }
        Ok(())
    }

    async fn discard(&self, path: &Path) {
        if let Ok(true) = self.fs.exists(path).await {
            if let Err(e) = self.fs.delete_file(path).await {
                warn!(file = %strip_path(&path.to_string_lossy()), error = %e, "Failed to remove partial download");
            }
        }
    }

    async fn remove_orphans(&self, destination: &Path, candidates: Vec<PathBuf>) {
        for orphan in candidates {
            if orphan == destination || !orphan.starts_with(&self.root) {
                continue;
            }
            if let Ok(true) = self.fs.exists(&orphan).await {
                match self.fs.delete_file(&orphan).await {
                    Ok(()) => debug!(file = %strip_path(&orphan.to_string_lossy()), "Removed orphaned cache file"),
                    Err(e) => warn!(
                        file = %strip_path(&orphan.to_string_lossy()),
                        error = %e,
                        "Failed to remove orphaned cache file"
                    ),
                }
            }
        }
    }

    // ========================================================================
    // Offline Access
    // ========================================================================

    /// Previously cached audio for `url`, without touching the network.
    pub async fn cached_audio(&self, url: &str) -> Result<Option<CachedAudio>> {
        let normalized = normalize_media_url(url)?;
        let Some((local_path, token)) = self.cached_file(&normalized, MediaKind::Audio).await? else {
            return Ok(None);
        };
        Ok(Some(CachedAudio {
            local_path,
            remote_url: normalized,
            token,
            from_cache: true,
        }))
    }

    /// Previously cached subtitle text for `url`, without touching the network.
    pub async fn cached_subtitles(&self, url: &str) -> Result<Option<CachedText>> {
        let normalized = normalize_media_url(url)?;
        let Some((local_path, _)) = self.cached_file(&normalized, MediaKind::Subtitles).await? else {
            return Ok(None);
        };
        let text = self.read_text(&local_path).await?;
        Ok(Some(CachedText {
            local_path,
            remote_url: normalized,
            text,
            from_cache: true,
        }))
    }

    async fn cached_file(
        &self,
        normalized: &str,
        kind: MediaKind,
    ) -> Result<Option<(PathBuf, Option<String>)>> {
        if let Some(record) = self.record(normalized).await? {
            if self.fs.exists(&record.local_path).await? {
                return Ok(Some((record.local_path, record.token)));
            }
        }
        let legacy_path = self.path_for(normalized, kind);
        if self.fs.exists(&legacy_path).await? {
            return Ok(Some((legacy_path, None)));
        }
        Ok(None)
    }

    /// Reads a cached file as text. A UTF-8 byte order mark is dropped.
    pub async fn read_text(&self, path: &Path) -> Result<String> {
        let bytes = self.fs.read_file(path).await?;
        let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes[..]);
        String::from_utf8(body.to_vec())
            .map_err(|e| PlaybackError::DecodingFailed(format!("{}: {}", path.display(), e)))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub async fn stats(&self) -> Result<MediaCacheStats> {
        let tokened_entries = {
            let mut guard = self.index_guard().await?;
            guard
                .get_or_insert_with(TokenIndex::new)
                .values()
                .filter(|r| r.token.is_some())
                .count()
        };

        let mut stats = MediaCacheStats {
            tokened_entries,
            ..Default::default()
        };
        for path in self.media_files().await? {
            let metadata = self.fs.metadata(&path).await?;
            if !metadata.is_directory {
                stats.entries += 1;
                stats.total_bytes += metadata.size;
            }
        }
        Ok(stats)
    }

    /// Deletes the entire cache directory. Chapter snapshots and listening
    /// progress live elsewhere and are untouched.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<u64> {
        let mut guard = self.index.lock().await;
        let removed = self.media_files().await?.len() as u64;

        if self.fs.exists(&self.root).await? {
            self.fs.delete_dir_all(&self.root).await?;
        }
        *guard = Some(TokenIndex::new());

        info!(removed, "Cleared media cache");
        self.emit(CacheEvent::Cleared { removed });
        Ok(removed)
    }

    async fn media_files(&self) -> Result<Vec<PathBuf>> {
        if !self.fs.exists(&self.root).await? {
            return Ok(Vec::new());
        }
        let index_path = self.index_path();
        Ok(self
            .fs
            .list_directory(&self.root)
            .await?
            .into_iter()
            .filter(|path| path != &index_path)
            .collect())
    }

    // ========================================================================
    // Index
    // ========================================================================

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    async fn index_guard(&self) -> Result<MutexGuard<'_, Option<TokenIndex>>> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            let loaded = match read_json(self.fs.as_ref(), &self.index_path()).await {
                Ok(index) => index.unwrap_or_default(),
                Err(LibraryError::DecodingFailed(message)) => {
                    warn!(%message, "Discarding unreadable media cache index");
                    TokenIndex::new()
                }
                Err(e) => return Err(e.into()),
            };
            *guard = Some(loaded);
        }
        Ok(guard)
    }

    async fn record(&self, normalized: &str) -> Result<Option<TokenRecord>> {
        let mut guard = self.index_guard().await?;
        Ok(guard
            .get_or_insert_with(TokenIndex::new)
            .get(normalized)
            .cloned())
    }

    async fn put_record(&self, normalized: &str, record: TokenRecord) -> Result<()> {
        let mut guard = self.index_guard().await?;
        let mut next = guard.clone().unwrap_or_default();
        next.insert(normalized.to_string(), record);

        write_json_atomic(self.fs.as_ref(), &self.index_path(), &next)
            .await
            .map_err(|e| match e {
                LibraryError::FileWriteFailed { path, message } => {
                    PlaybackError::FileWriteFailed { path, message }
                }
                other => other.into(),
            })?;
        *guard = Some(next);
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn key_lock(&self, normalized: &str) -> KeyLockLease<'_> {
        let lock = self
            .key_locks
            .lock()
            .entry(normalized.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyLockLease {
            locks: &self.key_locks,
            key: normalized.to_string(),
            lock,
        }
    }

    /// URLs with a fetch currently holding or waiting on their lock.
    pub fn pending_fetches(&self) -> usize {
        self.key_locks.lock().len()
    }

    /// `{root}/{sha256(url)[..32]}.{ext}`
    pub fn path_for(&self, url: &str, kind: MediaKind) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let extension = url_extension(url).unwrap_or_else(|| match kind {
            MediaKind::Audio => self.config.default_audio_extension.clone(),
            MediaKind::Subtitles => self.config.default_subtitle_extension.clone(),
        });
        self.root.join(format!("{}.{}", &digest[..32], extension))
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }
}

/// Per-URL lock handle; the map entry is dropped with the last lease.
struct KeyLockLease<'a> {
    locks: &'a SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for KeyLockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // Map entry plus this lease.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            locks.remove(&self.key);
        }
    }
}

fn token_from(response: &HttpResponse) -> Option<String> {
    response
        .header(ETAG_HEADER)
        .or_else(|| response.header(GENERATION_HEADER))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let file_name = parsed.path_segments()?.next_back()?;
    let (_, extension) = file_name.rsplit_once('.')?;
    let valid = !extension.is_empty()
        && extension.len() <= 5
        && extension.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| extension.to_ascii_lowercase())
}
