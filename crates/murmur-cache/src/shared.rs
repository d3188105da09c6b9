use std::future::Future;
use std::time::Duration;

use redis::RedisResult;
use redis::aio::ConnectionManager;

use crate::CacheError;

/// Handle to the shared Redis cache. Every command runs under the
/// configured timeout so a hung cache degrades instead of stalling polls.
#[derive(Clone)]
pub struct SharedCache {
    manager: ConnectionManager,
    timeout: Duration,
}

impl SharedCache {
    /// Connect and PING within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::upstream("connect", e))?;

        let manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::upstream("connect", "timed out"))?
            .map_err(|e| CacheError::upstream("connect", e))?;

        let cache = Self { manager, timeout };
        let pong: String = cache
            .run("ping", |mut con| async move { redis::cmd("PING").query_async(&mut con).await })
            .await?;
        if pong != "PONG" {
            return Err(CacheError::upstream("ping", format!("unexpected reply {pong:?}")));
        }
        Ok(cache)
    }

    /// Run one command against a cloned connection handle, bounded by the timeout.
    pub async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, f(self.manager.clone())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::upstream(op, e)),
            Err(_) => Err(CacheError::upstream(op, "timed out")),
        }
    }
}
