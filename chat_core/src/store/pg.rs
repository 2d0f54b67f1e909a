use super::{
    new_id, ChatRoomStore, MessageStore, MessageStream, RoomChannels, RoomSubscription, StoreError,
};
use crate::{retry::RetryPolicy, ChatMessage, ChatRoom, CreateMessage};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use sqlx::{postgres::PgListener, FromRow, PgPool};
use std::collections::HashSet;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{
    broadcast::{self, error::RecvError},
    OnceCell,
};
use tracing::{debug, info, warn};

/// Raised by the `chat_messages` insert trigger with `{room_id, seq}`.
const MESSAGE_CREATED_CHANNEL: &str = "chat_message_created";
const ROOM_EVENT_CAPACITY: usize = 256;

/// Messages are tailed through one listener per store, shared by every open
/// tail. Tails only borrow pool connections for their reads.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
    retry: RetryPolicy,
    rooms: RoomChannels<RoomEvent>,
    listener: Arc<OnceCell<()>>,
}

#[derive(Clone)]
pub struct PgChatRoomStore {
    pool: PgPool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoomEvent {
    /// The row with this `seq` was committed.
    Created(i64),
    /// Notifications may have been lost, re-read the room.
    Resync,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    seq: i64,
    #[sqlx(flatten)]
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct MessageCreated {
    room_id: String,
    seq: i64,
}

/// Sequence numbers a tail has already delivered.
///
/// `seq` is taken at insert time but rows become visible at commit, so a
/// lower `seq` can show up after a higher one. Rows are tracked one by one
/// rather than with a high-water mark.
#[derive(Debug, Default)]
struct Delivered(HashSet<i64>);

impl Delivered {
    fn contains(&self, seq: i64) -> bool {
        self.0.contains(&seq)
    }

    /// Returns false if `seq` was delivered before.
    fn insert(&mut self, seq: i64) -> bool {
        self.0.insert(seq)
    }
}

impl PgMessageStore {
    pub fn new(pool: PgPool, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            rooms: Arc::new(DashMap::new()),
            listener: Arc::new(OnceCell::new()),
        }
    }

    /// Start the shared listener on first use.
    async fn ensure_listener(&self) -> Result<(), StoreError> {
        self.listener
            .get_or_try_init(|| async {
                let listener = connect_listener(&self.pool, self.retry).await?;
                tokio::spawn(fan_out(
                    listener,
                    self.pool.clone(),
                    self.retry,
                    Arc::downgrade(&self.rooms),
                ));
                info!("message listener started");
                Ok::<_, StoreError>(())
            })
            .await?;
        Ok(())
    }
}

impl PgChatRoomStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_by(&self, column: &str, user_id: &str) -> Result<Vec<ChatRoom>, StoreError> {
        let sql = format!(
            "SELECT id, product_id, seller_id, buyer_id, created_at FROM chat_rooms WHERE {column} = $1 ORDER BY created_at, id"
        );
        let rooms = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rooms)
    }
}

async fn connect_listener(pool: &PgPool, retry: RetryPolicy) -> Result<PgListener, StoreError> {
    retry
        .retry("listen chat_message_created", move || async move {
            let mut listener = PgListener::connect_with(pool).await?;
            listener.listen(MESSAGE_CREATED_CHANNEL).await?;
            Ok::<_, sqlx::Error>(listener)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))
}

fn resync_all(rooms: &RoomChannels<RoomEvent>) {
    for entry in rooms.iter() {
        let _ = entry.value().send(RoomEvent::Resync);
    }
}

/// Route every notification to the tails of its room. Runs until the store is dropped.
async fn fan_out(
    mut listener: PgListener,
    pool: PgPool,
    retry: RetryPolicy,
    rooms: Weak<DashMap<String, broadcast::Sender<RoomEvent>>>,
) {
    loop {
        let received = listener.try_recv().await;
        let Some(live) = rooms.upgrade() else {
            debug!("message store dropped, stopping listener");
            return;
        };

        match received {
            Ok(Some(notification)) => {
                match serde_json::from_str::<MessageCreated>(notification.payload()) {
                    Ok(created) => {
                        if let Some(tx) = live.get(&created.room_id) {
                            let _ = tx.send(RoomEvent::Created(created.seq));
                        }
                    }
                    Err(e) => {
                        warn!(payload = notification.payload(), error = %e, "unreadable notification");
                        resync_all(&live);
                    }
                }
            }
            Ok(None) => {
                // notifications sent while disconnected are gone
                warn!("message listener lost its connection");
                drop(live);
                listener = reconnect(&pool, retry).await;
                if let Some(live) = rooms.upgrade() {
                    resync_all(&live);
                }
            }
            Err(e) => {
                warn!(error = %e, "message listener failed");
                drop(live);
                listener = reconnect(&pool, retry).await;
                if let Some(live) = rooms.upgrade() {
                    resync_all(&live);
                }
            }
        }
    }
}

/// Reconnect the listener, backing off between attempts until it succeeds.
async fn reconnect(pool: &PgPool, retry: RetryPolicy) -> PgListener {
    let mut attempt = 0u32;
    loop {
        match connect_listener(pool, retry).await {
            Ok(listener) => {
                info!(attempt, "message listener reconnected");
                return listener;
            }
            Err(e) => {
                let delay = retry.backoff(attempt.min(retry.max_retries));
                attempt = attempt.saturating_add(1);
                warn!(error = %e, attempt, ?delay, "message listener reconnect failed");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn fetch_room(pool: &PgPool, room_id: &str) -> Result<Vec<MessageRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT seq, id, body, sender_id, receiver_id, room_id, created_at
        FROM chat_messages
        WHERE room_id = $1
        ORDER BY seq
        "#,
    )
    .bind(room_id)
    .fetch_all(pool)
    .await
}

async fn fetch_seq(pool: &PgPool, room_id: &str, seq: i64) -> Result<Vec<MessageRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT seq, id, body, sender_id, receiver_id, room_id, created_at
        FROM chat_messages
        WHERE room_id = $1 AND seq = $2
        "#,
    )
    .bind(room_id)
    .bind(seq)
    .fetch_all(pool)
    .await
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, input: CreateMessage) -> Result<ChatMessage, StoreError> {
        let message = sqlx::query_as(
            r#"
            INSERT INTO chat_messages (id, room_id, sender_id, receiver_id, body)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, body, sender_id, receiver_id, room_id, created_at
            "#,
        )
        .bind(new_id())
        .bind(&input.room_id)
        .bind(&input.sender_id)
        .bind(&input.receiver_id)
        .bind(&input.body)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    async fn stream_by_room(&self, room_id: &str) -> Result<MessageStream, StoreError> {
        self.ensure_listener().await?;
        // subscribe before the history read so nothing committed in between is missed
        let subscription = RoomSubscription::new(&self.rooms, room_id, ROOM_EVENT_CAPACITY);
        let history = {
            let pool = &self.pool;
            self.retry
                .retry("read room history", move || fetch_room(pool, room_id))
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
        };

        let pool = self.pool.clone();
        let retry = self.retry;
        let room_id = room_id.to_owned();

        let tail = stream! {
            let mut subscription = subscription;
            let mut delivered = Delivered::default();
            let mut rows = history;
            loop {
                for row in std::mem::take(&mut rows) {
                    if delivered.insert(row.seq) {
                        yield Ok(row.message);
                    }
                }

                let event = match subscription.recv().await {
                    Ok(RoomEvent::Created(seq)) if delivered.contains(seq) => continue,
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!(room_id = %room_id, skipped = n, "room tail lagged behind, re-reading room");
                        RoomEvent::Resync
                    }
                    Err(RecvError::Closed) => break,
                };

                let read = {
                    let pool = &pool;
                    let room_id = room_id.as_str();
                    match event {
                        RoomEvent::Created(seq) => {
                            retry.retry("read room tail", move || fetch_seq(pool, room_id, seq)).await
                        }
                        RoomEvent::Resync => {
                            retry.retry("re-read room", move || fetch_room(pool, room_id)).await
                        }
                    }
                };
                match read {
                    Ok(fetched) => rows = fetched,
                    Err(e) => {
                        warn!(room_id = %room_id, error = %e, "room tail read failed, giving up");
                        yield Err(StoreError::Unavailable(e.to_string()));
                        break;
                    }
                }
            }
            debug!(room_id = %room_id, "room tail closed");
        };

        Ok(tail.boxed())
    }

    async fn most_recent_by_room(&self, room_id: &str) -> Result<Option<ChatMessage>, StoreError> {
        let message = sqlx::query_as(
            r#"
            SELECT id, body, sender_id, receiver_id, room_id, created_at
            FROM chat_messages
            WHERE room_id = $1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }
}

#[async_trait]
impl ChatRoomStore for PgChatRoomStore {
    async fn find_room(
        &self,
        product_id: &str,
        buyer_id: &str,
    ) -> Result<Option<ChatRoom>, StoreError> {
        let room = sqlx::query_as(
            r#"
            SELECT id, product_id, seller_id, buyer_id, created_at
            FROM chat_rooms
            WHERE product_id = $1 AND buyer_id = $2
            "#,
        )
        .bind(product_id)
        .bind(buyer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(room)
    }

    async fn create_room(
        &self,
        product_id: &str,
        seller_id: &str,
        buyer_id: &str,
    ) -> Result<ChatRoom, StoreError> {
        sqlx::query_as(
            r#"
            INSERT INTO chat_rooms (id, product_id, seller_id, buyer_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, product_id, seller_id, buyer_id, created_at
            "#,
        )
        .bind(new_id())
        .bind(product_id)
        .bind(seller_id)
        .bind(buyer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(format!(
                "room for product {product_id} and buyer {buyer_id} already exists"
            )),
            e => e.into(),
        })
    }

    async fn list_by_seller(&self, seller_id: &str) -> Result<Vec<ChatRoom>, StoreError> {
        self.list_by("seller_id", seller_id).await
    }

    async fn list_by_buyer(&self, buyer_id: &str) -> Result<Vec<ChatRoom>, StoreError> {
        self.list_by("buyer_id", buyer_id).await
    }
}
