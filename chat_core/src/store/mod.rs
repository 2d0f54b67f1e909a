/// Durable storage of chat messages and chat rooms.
mod memory;
mod pg;

use crate::{ChatMessage, ChatRoom, CreateMessage};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

pub use memory::{MemoryChatRoomStore, MemoryMessageStore};
pub use pg::{PgChatRoomStore, PgMessageStore};

/// A live tail of a room: history in insertion order, then new arrivals, forever.
///
/// Dropping the stream releases the underlying cursor or listener.
pub type MessageStream = BoxStream<'static, Result<ChatMessage, StoreError>>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sql error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only message log, queryable by room.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Persist a message, assigning its id and creation time.
    async fn append(&self, input: CreateMessage) -> Result<ChatMessage, StoreError>;

    /// Start tailing a room. Everything appended after this call returns is
    /// delivered, after the room's history.
    async fn stream_by_room(&self, room_id: &str) -> Result<MessageStream, StoreError>;

    async fn most_recent_by_room(&self, room_id: &str) -> Result<Option<ChatMessage>, StoreError>;
}

/// Room records keyed by `(product_id, buyer_id)`.
#[async_trait]
pub trait ChatRoomStore: Send + Sync + 'static {
    async fn find_room(
        &self,
        product_id: &str,
        buyer_id: &str,
    ) -> Result<Option<ChatRoom>, StoreError>;

    /// Create a room. Fails with [`StoreError::Conflict`] when one already
    /// exists for the same product and buyer.
    async fn create_room(
        &self,
        product_id: &str,
        seller_id: &str,
        buyer_id: &str,
    ) -> Result<ChatRoom, StoreError>;

    async fn list_by_seller(&self, seller_id: &str) -> Result<Vec<ChatRoom>, StoreError>;

    async fn list_by_buyer(&self, buyer_id: &str) -> Result<Vec<ChatRoom>, StoreError>;
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Per-room broadcast channels, created on first subscription.
pub(crate) type RoomChannels<T> = Arc<DashMap<String, broadcast::Sender<T>>>;

/// One receiver on a room's channel. The channel goes away with its last receiver.
pub(crate) struct RoomSubscription<T: Clone> {
    rooms: RoomChannels<T>,
    room_id: String,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> RoomSubscription<T> {
    pub(crate) fn new(rooms: &RoomChannels<T>, room_id: &str, capacity: usize) -> Self {
        let rx = rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe();

        Self {
            rooms: Arc::clone(rooms),
            room_id: room_id.to_owned(),
            rx,
        }
    }

    pub(crate) async fn recv(&mut self) -> Result<T, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    /// Skip everything queued and continue from the newest event.
    pub(crate) fn resubscribe(&mut self) {
        self.rx = self.rx.resubscribe();
    }
}

impl<T: Clone> Drop for RoomSubscription<T> {
    fn drop(&mut self) {
        // our own receiver is still counted here
        self.rooms
            .remove_if(&self.room_id, |_, tx| tx.receiver_count() <= 1);
    }
}
