mod directory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

pub use directory::{ImageLookup, PgDirectory, ProductLookup, UserLookup};

#[cfg(feature = "test-util")]
pub use directory::MemoryDirectory;

/// Profile image used when a user never uploaded one.
pub const DEFAULT_PROFILE_IMAGE: &str = "/img/profile.png";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub msg: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub room_id: String,
}

/// Where the user clicked "chat": a product's detail page or their chat list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClickPage {
    Detail,
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenChat {
    pub product_id: String,
    pub seller_id: String,
    pub buyer_id: String,
    pub click_page: ClickPage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomView {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub receiver_nickname: String,
    pub thumbnail_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomListItem {
    pub room_id: String,
    pub product_id: String,
    pub product_title: String,
    pub seller_id: String,
    pub seller_nickname: String,
    pub buyer_id: String,
    pub buyer_nickname: String,
    pub recent_msg: Option<String>,
    pub recent_created_at: Option<DateTime<Utc>>,
    pub thumbnail_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatRoomLists {
    pub seller: Vec<ChatRoomListItem>,
    pub buyer: Vec<ChatRoomListItem>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub seller_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "image_owner", rename_all = "lowercase")]
pub enum ImageOwner {
    User,
    Product,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub image_path: String,
    pub thumbnail_path: String,
}

impl SendMessage {
    pub fn new(
        msg: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Self {
        Self {
            msg: msg.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            room_id: room_id.into(),
        }
    }
}

impl OpenChat {
    pub fn new(
        product_id: impl Into<String>,
        seller_id: impl Into<String>,
        buyer_id: impl Into<String>,
        click_page: ClickPage,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            seller_id: seller_id.into(),
            buyer_id: buyer_id.into(),
            click_page,
        }
    }
}

impl Image {
    pub fn new(image_path: impl Into<String>, thumbnail_path: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            thumbnail_path: thumbnail_path.into(),
        }
    }

    pub fn default_profile() -> Self {
        Self::new(DEFAULT_PROFILE_IMAGE, DEFAULT_PROFILE_IMAGE)
    }
}
