use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

use crate::{BackendKind, CacheError, SharedCache};

/// How long a typing signal survives without a refresh.
pub const TYPING_TTL: Duration = Duration::from_secs(5);

const DEFAULT_DISPLAY_NAME: &str = "Someone";

/// Storage contract for typing indicators. Both implementations order
/// `list_typing` results by user id.
#[async_trait]
pub trait TypingBackend: Send + Sync {
    async fn set_typing(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
    ) -> Result<(), CacheError>;

    async fn clear_typing(&self, room_id: &str, user_id: &str) -> Result<(), CacheError>;

    async fn list_typing(
        &self,
        room_id: &str,
        exclude_user_id: &str,
    ) -> Result<Vec<String>, CacheError>;

    fn kind(&self) -> BackendKind;
}

// ── Local backend ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TypingEntry {
    display_name: String,
    expires_at: Instant,
}

impl TypingEntry {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

type RoomMap = HashMap<String, BTreeMap<String, TypingEntry>>;

struct LocalState {
    rooms: RoomMap,
    last_sweep: Instant,
}

impl LocalState {
    /// Drop expired entries everywhere and forget empty rooms.
    fn sweep(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        self.rooms.retain(|_, users| {
            let before = users.len();
            users.retain(|_, entry| entry.is_live(now));
            removed += before - users.len();
            !users.is_empty()
        });
        self.last_sweep = now;
        removed
    }

    /// Full sweep at most once per TTL, piggybacked on every access.
    fn maybe_sweep(&mut self, now: Instant, ttl: Duration) {
        if now.duration_since(self.last_sweep) >= ttl {
            self.sweep(now);
        }
    }
}

/// In-process typing map: room -> user -> entry.
///
/// Only meaningful within one process. A second server instance has its own
/// map and will not see these entries.
pub struct LocalTyping {
    state: RwLock<LocalState>,
    ttl: Duration,
}

impl LocalTyping {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(LocalState {
                rooms: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            ttl,
        }
    }

    /// Drop every entry.
    pub async fn reset(&self) {
        self.state.write().await.rooms.clear();
    }

    /// Remove expired entries everywhere and forget empty rooms.
    pub async fn sweep(&self) -> usize {
        self.state.write().await.sweep(Instant::now())
    }

    /// Rooms currently held, live or not yet swept.
    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }
}

impl Default for LocalTyping {
    fn default() -> Self {
        Self::new(TYPING_TTL)
    }
}

#[async_trait]
impl TypingBackend for LocalTyping {
    async fn set_typing(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.maybe_sweep(now, self.ttl);

        let users = state.rooms.entry(room_id.to_string()).or_default();
        users.retain(|_, entry| entry.is_live(now));
        users.insert(
            user_id.to_string(),
            TypingEntry {
                display_name: display_name.to_string(),
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }

    async fn clear_typing(&self, room_id: &str, user_id: &str) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        if let Some(users) = state.rooms.get_mut(room_id) {
            users.remove(user_id);
            if users.is_empty() {
                state.rooms.remove(room_id);
            }
        }
        Ok(())
    }

    async fn list_typing(
        &self,
        room_id: &str,
        exclude_user_id: &str,
    ) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.maybe_sweep(now, self.ttl);

        let Some(users) = state.rooms.get_mut(room_id) else {
            return Ok(Vec::new());
        };

        users.retain(|_, entry| entry.is_live(now));
        let names = users
            .iter()
            .filter(|(uid, _)| uid.as_str() != exclude_user_id)
            .map(|(_, entry)| entry.display_name.clone())
            .collect();

        if users.is_empty() {
            state.rooms.remove(room_id);
        }
        Ok(names)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}

// ── Shared backend ──────────────────────────────────────────────────────

/// Typing entries as Redis keys `typing:{room}:{user}` with native expiry.
pub struct RedisTyping {
    cache: SharedCache,
    ttl_secs: u64,
}

impl RedisTyping {
    pub fn new(cache: SharedCache, ttl: Duration) -> Self {
        Self {
            cache,
            ttl_secs: ttl.as_secs().max(1),
        }
    }

    fn key(room_id: &str, user_id: &str) -> String {
        format!("typing:{}:{}", room_id, user_id)
    }
}

#[async_trait]
impl TypingBackend for RedisTyping {
    async fn set_typing(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
    ) -> Result<(), CacheError> {
        let key = Self::key(room_id, user_id);
        let name = display_name.to_string();
        let ttl = self.ttl_secs;
        self.cache
            .run("typing set", |mut con| async move {
                let _: () = con.set_ex(key, name, ttl).await?;
                Ok(())
            })
            .await
    }

    async fn clear_typing(&self, room_id: &str, user_id: &str) -> Result<(), CacheError> {
        let key = Self::key(room_id, user_id);
        self.cache
            .run("typing clear", |mut con| async move {
                let _: () = con.del(key).await?;
                Ok(())
            })
            .await
    }

    async fn list_typing(
        &self,
        room_id: &str,
        exclude_user_id: &str,
    ) -> Result<Vec<String>, CacheError> {
        let pattern = format!("typing:{}:*", room_id);
        let excluded = Self::key(room_id, exclude_user_id);
        self.cache
            .run("typing list", |mut con| async move {
                // KEYS is fine at typing-indicator cardinality
                let mut keys: Vec<String> = con.keys(pattern).await?;
                keys.retain(|k| *k != excluded);
                if keys.is_empty() {
                    return Ok(Vec::new());
                }
                keys.sort();
                let values: Vec<Option<String>> =
                    redis::cmd("MGET").arg(&keys).query_async(&mut con).await?;
                Ok(values.into_iter().flatten().filter(|v| !v.is_empty()).collect())
            })
            .await
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Shared
    }
}

// ── Store ───────────────────────────────────────────────────────────────

/// Typing indicators as seen by request handlers.
///
/// Holds the backend selected at startup. When that backend is shared and a
/// call fails, the call is served from a per-process fallback instead of
/// erroring, so indicators degrade to single-instance visibility.
#[derive(Clone)]
pub struct TypingStore {
    primary: Arc<dyn TypingBackend>,
    fallback: Arc<LocalTyping>,
}

impl TypingStore {
    pub fn local() -> Self {
        let local = Arc::new(LocalTyping::default());
        Self {
            primary: local.clone(),
            fallback: local,
        }
    }

    pub fn shared(cache: SharedCache) -> Self {
        Self::with_backend(Arc::new(RedisTyping::new(cache, TYPING_TTL)))
    }

    pub fn with_backend(primary: Arc<dyn TypingBackend>) -> Self {
        Self {
            primary,
            fallback: Arc::new(LocalTyping::default()),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.primary.kind()
    }

    /// Start or refresh a typing signal. Empty names show as "Someone".
    pub async fn set_typing(&self, room_id: &str, user_id: &str, display_name: &str) {
        let name = if display_name.trim().is_empty() {
            DEFAULT_DISPLAY_NAME
        } else {
            display_name
        };
        if let Err(e) = self.primary.set_typing(room_id, user_id, name).await {
            warn!("{}; typing signal kept in-process", e);
            let _ = self.fallback.set_typing(room_id, user_id, name).await;
        }
    }

    pub async fn clear_typing(&self, room_id: &str, user_id: &str) {
        if let Err(e) = self.primary.clear_typing(room_id, user_id).await {
            warn!("{}; clearing in-process signal only", e);
        }
        // The signal may have landed in the fallback during an outage
        let _ = self.fallback.clear_typing(room_id, user_id).await;
    }

    pub async fn list_typing(&self, room_id: &str, exclude_user_id: &str) -> Vec<String> {
        match self.primary.list_typing(room_id, exclude_user_id).await {
            Ok(names) => names,
            Err(e) => {
                warn!("{}; listing in-process signals", e);
                self.fallback
                    .list_typing(room_id, exclude_user_id)
                    .await
                    .unwrap_or_default()
            }
        }
    }

    /// Drop all in-process state. Shared entries expire on their own.
    pub async fn reset(&self) {
        self.fallback.reset().await;
    }
}
