use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

use murmur_types::models::UnreadCounts;

use crate::{BackendKind, CacheError, SharedCache};

/// Lifetime of a cached unread aggregate.
pub const UNREAD_TTL: Duration = Duration::from_secs(10);

const GENERATION_SLOTS: usize = 64;

/// Storage for cached unread aggregates keyed by viewer.
#[async_trait]
pub trait UnreadBackend: Send + Sync {
    async fn get(&self, viewer_id: &str) -> Result<Option<UnreadCounts>, CacheError>;

    async fn put(&self, viewer_id: &str, counts: &UnreadCounts, ttl: Duration) -> Result<(), CacheError>;

    async fn invalidate(&self, viewer_id: &str) -> Result<(), CacheError>;

    /// Drop in-process entries. Shared entries expire on their own.
    async fn reset(&self) {}

    fn kind(&self) -> BackendKind;
}

// ── Local backend ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct LocalUnread {
    entries: RwLock<HashMap<String, (Instant, UnreadCounts)>>,
}

#[async_trait]
impl UnreadBackend for LocalUnread {
    async fn get(&self, viewer_id: &str) -> Result<Option<UnreadCounts>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(viewer_id)
            .filter(|(expires_at, _)| Instant::now() <= *expires_at)
            .map(|(_, counts)| counts.clone()))
    }

    async fn put(&self, viewer_id: &str, counts: &UnreadCounts, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        // opportunistic sweep keeps the map bounded by active viewers
        entries.retain(|_, (expires_at, _)| now <= *expires_at);
        entries.insert(viewer_id.to_string(), (now + ttl, counts.clone()));
        Ok(())
    }

    async fn invalidate(&self, viewer_id: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(viewer_id);
        Ok(())
    }

    async fn reset(&self) {
        self.entries.write().await.clear();
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}

// ── Shared backend ──────────────────────────────────────────────────────

/// Aggregates as JSON under `unread:user:{viewer}` with native expiry.
pub struct RedisUnread {
    cache: SharedCache,
}

impl RedisUnread {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }

    fn key(viewer_id: &str) -> String {
        format!("unread:user:{}", viewer_id)
    }
}

#[async_trait]
impl UnreadBackend for RedisUnread {
    async fn get(&self, viewer_id: &str) -> Result<Option<UnreadCounts>, CacheError> {
        let key = Self::key(viewer_id);
        let raw = self
            .cache
            .run("unread get", |mut con| async move {
                let raw: Option<String> = con.get(key).await?;
                Ok(raw)
            })
            .await?;

        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::upstream("unread get", format!("unparsable entry: {}", e))),
            None => Ok(None),
        }
    }

    async fn put(&self, viewer_id: &str, counts: &UnreadCounts, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(counts)
            .map_err(|e| CacheError::upstream("unread put", e))?;
        let key = Self::key(viewer_id);
        let ttl = ttl.as_secs().max(1);
        self.cache
            .run("unread put", |mut con| async move {
                let _: () = con.set_ex(key, payload, ttl).await?;
                Ok(())
            })
            .await
    }

    async fn invalidate(&self, viewer_id: &str) -> Result<(), CacheError> {
        let key = Self::key(viewer_id);
        self.cache
            .run("unread invalidate", |mut con| async move {
                let _: () = con.del(key).await?;
                Ok(())
            })
            .await
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Shared
    }
}

// ── Cache ───────────────────────────────────────────────────────────────

/// TTL short-circuit in front of the unread aggregation, keyed by viewer.
///
/// A miss, an outage, or a lost invalidation only means a recompute or a
/// count that is at most `UNREAD_TTL` old. Backend errors never escape.
///
/// Each invalidation bumps a per-viewer generation (hashed into a fixed set
/// of slots). A recompute that started before an invalidation is not
/// written back, so a stale aggregate cannot outlive the write that
/// invalidated it within this process.
pub struct UnreadCache {
    backend: Arc<dyn UnreadBackend>,
    ttl: Duration,
    generations: [AtomicU64; GENERATION_SLOTS],
}

impl UnreadCache {
    pub fn local() -> Self {
        Self::local_with_ttl(UNREAD_TTL)
    }

    pub fn local_with_ttl(ttl: Duration) -> Self {
        Self::with_backend(Arc::new(LocalUnread::default()), ttl)
    }

    pub fn shared(cache: SharedCache) -> Self {
        Self::with_backend(Arc::new(RedisUnread::new(cache)), UNREAD_TTL)
    }

    pub fn with_backend(backend: Arc<dyn UnreadBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            generations: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    fn slot(&self, viewer_id: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        viewer_id.hash(&mut hasher);
        &self.generations[hasher.finish() as usize % GENERATION_SLOTS]
    }

    /// Snapshot to pass to [`UnreadCache::put_if_current`] after a recompute.
    pub fn generation(&self, viewer_id: &str) -> u64 {
        self.slot(viewer_id).load(Ordering::Acquire)
    }

    pub async fn get(&self, viewer_id: &str) -> Option<UnreadCounts> {
        match self.backend.get(viewer_id).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!("{}; recomputing unread counts", e);
                None
            }
        }
    }

    pub async fn put(&self, viewer_id: &str, counts: &UnreadCounts) {
        if let Err(e) = self.backend.put(viewer_id, counts, self.ttl).await {
            warn!("{}; unread counts left uncached", e);
        }
    }

    /// Store `counts` unless `viewer_id` was invalidated since `generation`
    /// was taken. Returns whether the value was stored.
    pub async fn put_if_current(&self, viewer_id: &str, counts: &UnreadCounts, generation: u64) -> bool {
        if self.generation(viewer_id) != generation {
            return false;
        }
        self.put(viewer_id, counts).await;
        // An invalidation that raced the write removes what was just stored
        if self.generation(viewer_id) != generation {
            self.drop_entry(viewer_id).await;
            return false;
        }
        true
    }

    pub async fn invalidate(&self, viewer_id: &str) {
        self.slot(viewer_id).fetch_add(1, Ordering::AcqRel);
        self.drop_entry(viewer_id).await;
    }

    async fn drop_entry(&self, viewer_id: &str) {
        if let Err(e) = self.backend.invalidate(viewer_id).await {
            warn!("{}; cached unread counts expire on their own", e);
        }
    }

    /// Drop all in-process entries.
    pub async fn reset(&self) {
        self.backend.reset().await;
    }
}
