//! Message delivery, presence and read tracking.
//!
//! Everything durable goes through [`murmur_db::Database`]; message bodies
//! pass through [`murmur_crypto::MessageCodec`] on the way in and out. The
//! synchronous trackers run on the blocking pool; [`sync::SyncService`] is
//! the async face request handlers poll.

pub mod error;
pub mod presence;
pub mod receipts;
pub mod rooms;
pub mod store;
pub mod sync;
pub mod users;

use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use murmur_cache::UnreadCache;
use murmur_crypto::MessageCodec;
use murmur_db::Database;

pub use error::{EngineError, Result};
pub use presence::PresenceTracker;
pub use receipts::ReadTracker;
pub use rooms::RoomDirectory;
pub use store::MessageStore;
pub use sync::SyncService;
pub use users::UserDirectory;

/// Every engine component, wired against one database.
#[derive(Clone)]
pub struct Engine {
    pub db: Arc<Database>,
    pub sync: SyncService,
    pub presence: PresenceTracker,
    pub rooms: RoomDirectory,
    pub users: UserDirectory,
}

impl Engine {
    pub fn new(db: Arc<Database>, codec: Arc<MessageCodec>, unread: Arc<UnreadCache>) -> Self {
        let rooms = RoomDirectory::new(db.clone());
        let store = MessageStore::new(db.clone(), codec);
        let receipts = ReadTracker::new(db.clone());
        Self {
            sync: SyncService::new(store, receipts, rooms.clone(), unread),
            presence: PresenceTracker::new(db.clone()),
            users: UserDirectory::new(db.clone()),
            rooms,
            db,
        }
    }
}

/// Run blocking database work off the async runtime.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        EngineError::Storage(anyhow!("blocking task failed: {}", e))
    })?
}
