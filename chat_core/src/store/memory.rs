use super::{
    new_id, ChatRoomStore, MessageStore, MessageStream, RoomChannels, RoomSubscription, StoreError,
};
use crate::{ChatMessage, ChatRoom, CreateMessage};
use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, RwLock};
use tracing::warn;

const TAIL_CAPACITY: usize = 1024;

/// In-process message log. Tails of the same room share one broadcast channel.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
    rooms: RoomChannels<ChatMessage>,
}

/// In-process room records with the `(product_id, buyer_id)` uniqueness enforced by the map key.
#[derive(Default)]
pub struct MemoryChatRoomStore {
    rooms: DashMap<(String, String), ChatRoom>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn room_history(log: &[ChatMessage], room_id: &str, skip: usize) -> Vec<ChatMessage> {
    log.iter()
        .filter(|m| m.room_id == room_id)
        .skip(skip)
        .cloned()
        .collect()
}

impl MemoryChatRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn list_by(&self, pred: impl Fn(&ChatRoom) -> bool) -> Vec<ChatRoom> {
        let mut rooms: Vec<ChatRoom> = self
            .rooms
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        rooms.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        rooms
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, input: CreateMessage) -> Result<ChatMessage, StoreError> {
        let message = ChatMessage {
            id: new_id(),
            body: input.body,
            sender_id: input.sender_id,
            receiver_id: input.receiver_id,
            room_id: input.room_id,
            created_at: Utc::now(),
        };

        // push and broadcast under the write lock so a tail sees each message exactly once
        let mut messages = self.messages.write().await;
        messages.push(message.clone());
        if let Some(tx) = self.rooms.get(&message.room_id) {
            let _ = tx.send(message.clone());
        }

        Ok(message)
    }

    async fn stream_by_room(&self, room_id: &str) -> Result<MessageStream, StoreError> {
        let (history, subscription) = {
            let messages = self.messages.read().await;
            let subscription = RoomSubscription::new(&self.rooms, room_id, TAIL_CAPACITY);
            (room_history(&messages, room_id, 0), subscription)
        };

        let messages = Arc::clone(&self.messages);
        let room_id = room_id.to_owned();
        let tail = stream! {
            let mut subscription = subscription;
            let mut backlog = history;
            let mut delivered = 0usize;
            'tail: loop {
                for message in std::mem::take(&mut backlog) {
                    delivered += 1;
                    yield Ok(message);
                }

                loop {
                    match subscription.recv().await {
                        Ok(message) => {
                            delivered += 1;
                            yield Ok(message);
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(room_id = %room_id, skipped = n, "room tail lagged behind, re-reading history");
                            break;
                        }
                        Err(RecvError::Closed) => break 'tail,
                    }
                }

                // catch up from the log, then follow the channel from its newest entry
                backlog = {
                    let log = messages.read().await;
                    subscription.resubscribe();
                    room_history(&log, &room_id, delivered)
                };
            }
        };

        Ok(tail.boxed())
    }

    async fn most_recent_by_room(&self, room_id: &str) -> Result<Option<ChatMessage>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().rev().find(|m| m.room_id == room_id).cloned())
    }
}

#[async_trait]
impl ChatRoomStore for MemoryChatRoomStore {
    async fn find_room(
        &self,
        product_id: &str,
        buyer_id: &str,
    ) -> Result<Option<ChatRoom>, StoreError> {
        let key = (product_id.to_string(), buyer_id.to_string());
        Ok(self.rooms.get(&key).map(|room| room.value().clone()))
    }

    async fn create_room(
        &self,
        product_id: &str,
        seller_id: &str,
        buyer_id: &str,
    ) -> Result<ChatRoom, StoreError> {
        match self
            .rooms
            .entry((product_id.to_string(), buyer_id.to_string()))
        {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "room for product {product_id} and buyer {buyer_id} already exists"
            ))),
            Entry::Vacant(entry) => {
                let room = ChatRoom {
                    id: new_id(),
                    product_id: product_id.to_string(),
                    seller_id: seller_id.to_string(),
                    buyer_id: buyer_id.to_string(),
                    created_at: Utc::now(),
                };
                entry.insert(room.clone());
                Ok(room)
            }
        }
    }

    async fn list_by_seller(&self, seller_id: &str) -> Result<Vec<ChatRoom>, StoreError> {
        Ok(self.list_by(|room| room.seller_id == seller_id))
    }

    async fn list_by_buyer(&self, buyer_id: &str) -> Result<Vec<ChatRoom>, StoreError> {
        Ok(self.list_by(|room| room.buyer_id == buyer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn append_should_assign_id_and_timestamp() -> Result<()> {
        let store = MemoryMessageStore::new();
        let m1 = store.append(CreateMessage::new("hi", "u1", "u2", "r1")).await?;
        let m2 = store.append(CreateMessage::new("yo", "u2", "u1", "r1")).await?;

        assert!(!m1.id.is_empty());
        assert_ne!(m1.id, m2.id);
        assert!(m1.created_at <= m2.created_at);
        Ok(())
    }

    #[tokio::test]
    async fn tail_should_replay_history_then_follow_new_messages() -> Result<()> {
        let store = MemoryMessageStore::new();
        store.append(CreateMessage::new("one", "u1", "u2", "r1")).await?;
        store.append(CreateMessage::new("other", "u3", "u4", "r2")).await?;
        store.append(CreateMessage::new("two", "u2", "u1", "r1")).await?;

        let mut stream = store.stream_by_room("r1").await?;
        assert_eq!(stream.next().await.unwrap()?.body, "one");
        assert_eq!(stream.next().await.unwrap()?.body, "two");

        store.append(CreateMessage::new("elsewhere", "u3", "u4", "r2")).await?;
        store.append(CreateMessage::new("three", "u1", "u2", "r1")).await?;

        let next = timeout(Duration::from_secs(3), stream.next()).await?;
        assert_eq!(next.unwrap()?.body, "three");
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_tail_should_release_its_subscription() -> Result<()> {
        let store = MemoryMessageStore::new();
        let first = store.stream_by_room("r1").await?;
        let second = store.stream_by_room("r1").await?;
        assert_eq!(store.rooms.len(), 1);

        drop(first);
        assert_eq!(store.rooms.len(), 1);
        drop(second);
        assert_eq!(store.rooms.len(), 0);

        // appending after cancellation reaches nobody and does not fail
        store.append(CreateMessage::new("late", "u1", "u2", "r1")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn busy_room_should_not_push_out_a_quiet_room() -> Result<()> {
        let store = MemoryMessageStore::new();
        let mut quiet = store.stream_by_room("quiet").await?;
        let _busy = store.stream_by_room("busy").await?;

        store.append(CreateMessage::new("hello", "u1", "u2", "quiet")).await?;
        for i in 0..TAIL_CAPACITY * 2 {
            store.append(CreateMessage::new(format!("m{i}"), "u3", "u4", "busy")).await?;
        }

        let next = timeout(Duration::from_secs(3), quiet.next()).await?;
        assert_eq!(next.unwrap()?.body, "hello");
        Ok(())
    }

    #[tokio::test]
    async fn lagging_tail_should_catch_up_from_history_in_order() -> Result<()> {
        let store = MemoryMessageStore::new();
        let mut stream = store.stream_by_room("r1").await?;

        let total = TAIL_CAPACITY + 100;
        for i in 0..total {
            store.append(CreateMessage::new(format!("m{i}"), "u1", "u2", "r1")).await?;
        }

        for i in 0..total {
            let next = timeout(Duration::from_secs(3), stream.next()).await?;
            assert_eq!(next.unwrap()?.body, format!("m{i}"));
        }

        store.append(CreateMessage::new("after", "u1", "u2", "r1")).await?;
        let next = timeout(Duration::from_secs(3), stream.next()).await?;
        assert_eq!(next.unwrap()?.body, "after");
        Ok(())
    }

    #[tokio::test]
    async fn tail_of_unknown_room_should_stay_open_and_empty() -> Result<()> {
        let store = MemoryMessageStore::new();
        let mut stream = store.stream_by_room("nonexistent").await?;

        let ret = timeout(Duration::from_millis(100), stream.next()).await;
        assert!(ret.is_err(), "expected no item and no end of stream");
        Ok(())
    }

    #[tokio::test]
    async fn most_recent_should_return_last_message_of_room() -> Result<()> {
        let store = MemoryMessageStore::new();
        assert!(store.most_recent_by_room("r1").await?.is_none());

        store.append(CreateMessage::new("first", "u1", "u2", "r1")).await?;
        store.append(CreateMessage::new("hi", "u1", "u2", "r1")).await?;
        store.append(CreateMessage::new("not this", "u1", "u2", "r2")).await?;

        let recent = store.most_recent_by_room("r1").await?.unwrap();
        assert_eq!(recent.body, "hi");
        Ok(())
    }

    #[tokio::test]
    async fn create_room_should_reject_duplicate_product_buyer_pair() -> Result<()> {
        let store = MemoryChatRoomStore::new();
        let room = store.create_room("p1", "s1", "b1").await?;

        let ret = store.create_room("p1", "s1", "b1").await;
        assert!(matches!(ret, Err(StoreError::Conflict(_))));

        let found = store.find_room("p1", "b1").await?.unwrap();
        assert_eq!(found, room);
        assert!(store.find_room("p1", "b2").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_rooms_should_filter_by_role() -> Result<()> {
        let store = MemoryChatRoomStore::new();
        store.create_room("p1", "s1", "b1").await?;
        store.create_room("p2", "s1", "b2").await?;
        store.create_room("p3", "s2", "s1").await?;

        let selling = store.list_by_seller("s1").await?;
        assert_eq!(selling.len(), 2);
        assert!(selling.iter().all(|room| room.seller_id == "s1"));

        let buying = store.list_by_buyer("s1").await?;
        assert_eq!(buying.len(), 1);
        assert_eq!(buying[0].product_id, "p3");
        Ok(())
    }
}
