//! Best-effort ephemeral state: typing indicators and the unread-count
//! short-circuit. Both run against a shared Redis when one answers at
//! startup and against per-process maps otherwise. Nothing stored here is
//! durable; losing all of it only costs a re-poll.

pub mod shared;
pub mod typing;
pub mod unread;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

pub use shared::SharedCache;
pub use typing::{LocalTyping, RedisTyping, TYPING_TTL, TypingBackend, TypingStore};
pub use unread::{LocalUnread, RedisUnread, UNREAD_TTL, UnreadBackend, UnreadCache};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Shared cache unreachable, timed out, or returned garbage. Never fatal.
    #[error("shared cache unavailable during {op}: {reason}")]
    UpstreamUnavailable { op: &'static str, reason: String },
}

impl CacheError {
    pub(crate) fn upstream(op: &'static str, reason: impl ToString) -> Self {
        Self::UpstreamUnavailable {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Which backend family a deployment runs on. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Shared,
    Local,
}

/// The ephemeral-state components handed to request handlers.
#[derive(Clone)]
pub struct CacheLayer {
    pub typing: TypingStore,
    pub unread: Arc<UnreadCache>,
    pub kind: BackendKind,
}

impl CacheLayer {
    /// Per-process backends. Typing state is invisible to other instances.
    pub fn local() -> Self {
        Self {
            typing: TypingStore::local(),
            unread: Arc::new(UnreadCache::local()),
            kind: BackendKind::Local,
        }
    }

    pub fn shared(cache: SharedCache) -> Self {
        Self {
            typing: TypingStore::shared(cache.clone()),
            unread: Arc::new(UnreadCache::shared(cache)),
            kind: BackendKind::Shared,
        }
    }

    /// Ping the shared cache and pick a backend family for the process.
    pub async fn select(url: Option<&str>, timeout: Duration) -> Self {
        let Some(url) = url else {
            warn!(
                "No shared cache configured: typing indicators are per-process and \
                 NOT visible across instances; run a single instance or set REDIS_URL"
            );
            return Self::local();
        };

        match SharedCache::connect(url, timeout).await {
            Ok(cache) => {
                info!("Shared cache reachable, using shared typing/unread backends");
                Self::shared(cache)
            }
            Err(e) => {
                warn!(
                    "Shared cache unreachable ({}): falling back to per-process backends, \
                     valid for single-instance deployments only",
                    e
                );
                Self::local()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_url_selects_local() {
        let layer = CacheLayer::select(None, Duration::from_millis(50)).await;
        assert_eq!(layer.kind, BackendKind::Local);
    }

    #[tokio::test]
    async fn unparsable_url_selects_local() {
        let layer = CacheLayer::select(Some("not a url"), Duration::from_millis(50)).await;
        assert_eq!(layer.kind, BackendKind::Local);
    }

    #[tokio::test]
    async fn closed_port_selects_local() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("redis://127.0.0.1:{}", port);

        assert!(SharedCache::connect(&url, Duration::from_millis(200)).await.is_err());

        let layer = CacheLayer::select(Some(&url), Duration::from_millis(200)).await;
        assert_eq!(layer.kind, BackendKind::Local);
        assert_eq!(layer.unread.kind(), BackendKind::Local);
        assert!(layer.unread.get("bob").await.is_none());
    }
}
