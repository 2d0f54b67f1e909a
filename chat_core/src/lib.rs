pub mod cache;
pub mod middlewares;
pub mod pubsub;
pub mod retry;
pub mod store;
mod utils;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

pub use cache::{CacheAside, CacheError, CacheStore, MemoryCache, RedisCache};
pub use pubsub::{
    MemoryPubSub, PayloadStream, PubSubBroker, PubSubError, Publisher, RedisPubSub, Subscriber,
    Transport,
};
pub use retry::{RetryError, RetryPolicy};
pub use store::{
    ChatRoomStore, MemoryChatRoomStore, MemoryMessageStore, MessageStore, MessageStream,
    PgChatRoomStore, PgMessageStore, StoreError,
};
pub use utils::{load_config, DecodingKey, EncodingKey};

/// A persisted chat message. Immutable once the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub body: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub room_id: String,
    pub created_at: DateTime<Utc>,
}

/// Input for [`MessageStore::append`]; id and timestamp are assigned on persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessage {
    pub body: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub room_id: String,
}

/// A conversation between a product's seller and one buyer.
///
/// At most one room exists per `(product_id, buyer_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: String,
    pub product_id: String,
    pub seller_id: String,
    pub buyer_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// The verified identity carried by a request token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    pub id: String,
    pub nickname: String,
    #[serde(default)]
    pub role: Role,
}

impl CreateMessage {
    pub fn new(
        body: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            room_id: room_id.into(),
        }
    }
}

impl Principal {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            role: Role::User,
        }
    }
}
