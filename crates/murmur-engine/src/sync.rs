use std::sync::Arc;

use tracing::{debug, warn};

use murmur_cache::UnreadCache;
use murmur_types::models::{Message, MessageKind, Room, UnreadCounts};

use crate::receipts::ReadTracker;
use crate::rooms::RoomDirectory;
use crate::store::{DEFAULT_PAGE, MessageStore};
use crate::{Result, blocking};

/// The polling contract. Clients call `fetch_new_messages` with the highest
/// id they hold and merge the result by id; reads and unread aggregates stay
/// consistent because every write here invalidates the affected viewers.
#[derive(Clone)]
pub struct SyncService {
    store: MessageStore,
    receipts: ReadTracker,
    rooms: RoomDirectory,
    unread: Arc<UnreadCache>,
}

impl SyncService {
    pub fn new(
        store: MessageStore,
        receipts: ReadTracker,
        rooms: RoomDirectory,
        unread: Arc<UnreadCache>,
    ) -> Self {
        Self {
            store,
            receipts,
            rooms,
            unread,
        }
    }

    /// Messages in `room_id` after `cursor`. Whatever is returned counts as
    /// read by `viewer_id`.
    pub async fn fetch_new_messages(
        &self,
        viewer_id: &str,
        room_id: &str,
        cursor: Option<&str>,
    ) -> Result<Vec<Message>> {
        let (rooms, store) = (self.rooms.clone(), self.store.clone());
        let (viewer, room, cursor) = (
            viewer_id.to_string(),
            room_id.to_string(),
            cursor.map(str::to_string),
        );
        let messages = blocking(move || {
            rooms.ensure_member(&room, &viewer)?;
            store.list_since(&room, cursor.as_deref(), DEFAULT_PAGE)
        })
        .await?;

        if let Some(last) = messages.last() {
            let receipts = self.receipts.clone();
            let (viewer, room, last_id) =
                (viewer_id.to_string(), room_id.to_string(), last.id.clone());
            match blocking(move || receipts.mark_read(&room, &viewer, Some(&last_id))).await {
                Ok(marked) if marked > 0 => {
                    debug!("Poll by {} marked {} message(s) read in {}", viewer_id, marked, room_id)
                }
                Ok(_) => {}
                Err(e) => warn!("Read marking after poll failed for {} in {}: {}", viewer_id, room_id, e),
            }
            self.unread.invalidate(viewer_id).await;
        }

        Ok(messages)
    }

    pub async fn send_message(
        &self,
        sender_id: &str,
        room_id: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<Message> {
        let (rooms, store) = (self.rooms.clone(), self.store.clone());
        let (sender, room, content) =
            (sender_id.to_string(), room_id.to_string(), content.to_string());
        let (message, recipients) = blocking(move || {
            rooms.ensure_member(&room, &sender)?;
            let message = store.append(&room, &sender, kind, &content)?;
            // Only direct rooms feed the per-peer unread aggregate
            let recipients: Vec<String> = if rooms.get(&room)?.is_direct {
                rooms
                    .members(&room)?
                    .into_iter()
                    .filter(|member| *member != sender)
                    .collect()
            } else {
                Vec::new()
            };
            Ok((message, recipients))
        })
        .await?;

        for recipient in &recipients {
            self.unread.invalidate(recipient).await;
        }
        Ok(message)
    }

    pub async fn mark_read(
        &self,
        viewer_id: &str,
        room_id: &str,
        up_to: Option<&str>,
    ) -> Result<usize> {
        let receipts = self.receipts.clone();
        let (viewer, room, up_to) = (
            viewer_id.to_string(),
            room_id.to_string(),
            up_to.map(str::to_string),
        );
        let marked = blocking(move || receipts.mark_read(&room, &viewer, up_to.as_deref())).await?;
        self.unread.invalidate(viewer_id).await;
        Ok(marked)
    }

    /// Unread count per direct-room peer, served from cache when fresh.
    pub async fn fetch_unread(&self, viewer_id: &str) -> Result<UnreadCounts> {
        if let Some(counts) = self.unread.get(viewer_id).await {
            return Ok(counts);
        }

        // A send or mark landing mid-recompute makes this result stale
        let generation = self.unread.generation(viewer_id);
        let receipts = self.receipts.clone();
        let viewer = viewer_id.to_string();
        let counts = blocking(move || receipts.unread_counts_for_all_peers(&viewer)).await?;
        if !self.unread.put_if_current(viewer_id, &counts, generation).await {
            debug!("Unread counts for {} invalidated during recompute, not cached", viewer_id);
        }
        Ok(counts)
    }

    pub async fn mark_peer_read(&self, viewer_id: &str, peer_id: &str) -> Result<usize> {
        let receipts = self.receipts.clone();
        let (viewer, peer) = (viewer_id.to_string(), peer_id.to_string());
        let marked = blocking(move || receipts.mark_peer_read(&viewer, &peer)).await?;
        self.unread.invalidate(viewer_id).await;
        Ok(marked)
    }

    /// Open (or reopen) the direct room with `peer_id` and return its recent
    /// history, oldest first.
    pub async fn open_direct(&self, viewer_id: &str, peer_id: &str) -> Result<(Room, Vec<Message>)> {
        let (rooms, store) = (self.rooms.clone(), self.store.clone());
        let (viewer, peer) = (viewer_id.to_string(), peer_id.to_string());
        blocking(move || {
            let room = rooms.get_or_create_direct(&viewer, &peer)?;
            let messages = store.latest(&room.id, DEFAULT_PAGE)?;
            Ok((room, messages))
        })
        .await
    }
}
