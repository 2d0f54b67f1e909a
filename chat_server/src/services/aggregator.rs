use super::ImageService;
use crate::{
    models::{
        ChatRoomListItem, ChatRoomView, ClickPage, OpenChat, Product, ProductLookup, UserLookup,
    },
    AppError,
};
use chat_core::{
    CacheAside, ChatMessage, ChatRoom, ChatRoomStore, CreateMessage, MessageStore, Principal,
    StoreError,
};
use futures::{stream, Stream, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const SYSTEM_SENDER: &str = "system";
const CHAT_STARTED: &str = "Chat started.";

/// Builds chat room views out of the room store, the message store and the
/// user, product and image lookups.
#[derive(Clone)]
pub struct ChatRoomAggregator {
    rooms: Arc<dyn ChatRoomStore>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserLookup>,
    products: Arc<dyn ProductLookup>,
    images: ImageService,
    cache: CacheAside,
    room_list_ttl: Duration,
}

fn seller_rooms_key(seller_id: &str) -> String {
    format!("chatRooms:seller:{seller_id}")
}

fn buyer_rooms_key(buyer_id: &str) -> String {
    format!("chatRooms:buyer:{buyer_id}")
}

impl ChatRoomAggregator {
    pub fn new(
        rooms: Arc<dyn ChatRoomStore>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserLookup>,
        products: Arc<dyn ProductLookup>,
        images: ImageService,
        cache: CacheAside,
        room_list_ttl: Duration,
    ) -> Self {
        Self {
            rooms,
            messages,
            users,
            products,
            images,
            cache,
            room_list_ttl,
        }
    }

    /// Join a room with its product, participants, latest message and thumbnail.
    ///
    /// The five lookups run concurrently; any failure fails the whole item.
    pub async fn build_room_list_item(&self, room: &ChatRoom) -> Result<ChatRoomListItem, AppError> {
        let ret = tokio::try_join!(
            self.product(&room.product_id),
            self.recent_message(&room.id),
            self.images.product_image(&room.product_id),
            self.user(&room.seller_id),
            self.user(&room.buyer_id),
        );
        let (product, recent, image, seller, buyer) = ret.map_err(|e| {
            warn!(room_id = %room.id, error = %e, "fetch room info failed");
            AppError::ChatRoomInfoFetchFailed(format!("room {}", room.id))
        })?;

        Ok(ChatRoomListItem {
            room_id: room.id.clone(),
            product_id: room.product_id.clone(),
            product_title: product.title,
            seller_id: room.seller_id.clone(),
            seller_nickname: seller.nickname,
            buyer_id: room.buyer_id.clone(),
            buyer_nickname: buyer.nickname,
            recent_msg: recent.as_ref().map(|m| m.body.clone()),
            recent_created_at: recent.map(|m| m.created_at),
            thumbnail_path: image.thumbnail_path,
        })
    }

    /// Find or create the room for `(product, buyer)` and describe it from
    /// the requester's side.
    #[instrument(level = "debug", skip_all, fields(product_id = %input.product_id, requester = %requester.id))]
    pub async fn open_chat(
        &self,
        input: OpenChat,
        requester: &Principal,
    ) -> Result<ChatRoomView, AppError> {
        self.find_or_open_chat(input, requester).await.map_err(|e| {
            if e.is_domain() {
                e
            } else {
                warn!(error = %e, "open chat failed");
                AppError::ChatRoomCreationFailed(e.to_string())
            }
        })
    }

    pub async fn list_rooms_for_seller(
        &self,
        seller_id: &str,
    ) -> Result<Vec<ChatRoomListItem>, AppError> {
        let key = seller_rooms_key(seller_id);
        let rooms = self
            .cache
            .get_or_fetch_list(&key, self.room_list_ttl, || {
                rooms_stream(self.rooms.list_by_seller(seller_id))
            })
            .await;
        self.build_list(rooms).await
    }

    pub async fn list_rooms_for_buyer(
        &self,
        buyer_id: &str,
    ) -> Result<Vec<ChatRoomListItem>, AppError> {
        let key = buyer_rooms_key(buyer_id);
        let rooms = self
            .cache
            .get_or_fetch_list(&key, self.room_list_ttl, || {
                rooms_stream(self.rooms.list_by_buyer(buyer_id))
            })
            .await;
        self.build_list(rooms).await
    }

    /// Items are built one room at a time to bound the load a single list puts on the lookups.
    async fn build_list(
        &self,
        rooms: Result<Vec<ChatRoom>, StoreError>,
    ) -> Result<Vec<ChatRoomListItem>, AppError> {
        let rooms = rooms.map_err(|e| {
            warn!(error = %e, "list rooms failed");
            AppError::ChatRoomInfoFetchFailed(e.to_string())
        })?;

        let mut items = Vec::with_capacity(rooms.len());
        for room in &rooms {
            items.push(self.build_room_list_item(room).await?);
        }
        Ok(items)
    }

    async fn find_or_open_chat(
        &self,
        input: OpenChat,
        requester: &Principal,
    ) -> Result<ChatRoomView, AppError> {
        let from_seller = requester.id == input.seller_id;
        if from_seller && input.click_page == ClickPage::Detail {
            return Err(AppError::SelfChatNotAllowed);
        }
        let (sender_id, receiver_id) = if from_seller {
            (input.seller_id.clone(), input.buyer_id.clone())
        } else {
            (input.buyer_id.clone(), input.seller_id.clone())
        };

        let receiver = self.user(&receiver_id).await?;
        let room = match self.rooms.find_room(&input.product_id, &input.buyer_id).await? {
            Some(room) => room,
            None => self.create_room(&input).await?,
        };
        let image = self.images.profile_image(&receiver_id).await?;

        Ok(ChatRoomView {
            id: room.id,
            sender_id,
            receiver_id,
            receiver_nickname: receiver.nickname,
            thumbnail_path: image.thumbnail_path,
        })
    }

    async fn create_room(&self, input: &OpenChat) -> Result<ChatRoom, AppError> {
        self.product(&input.product_id).await?;

        let ret = self
            .rooms
            .create_room(&input.product_id, &input.seller_id, &input.buyer_id)
            .await;
        let room = match ret {
            Ok(room) => room,
            Err(StoreError::Conflict(msg)) => {
                debug!(%msg, "lost the room creation race, reading the winner");
                return self
                    .rooms
                    .find_room(&input.product_id, &input.buyer_id)
                    .await?
                    .ok_or(AppError::Conflict(msg));
            }
            Err(e) => return Err(e.into()),
        };

        let marker = CreateMessage::new(CHAT_STARTED, SYSTEM_SENDER, SYSTEM_SENDER, &room.id);
        self.messages.append(marker).await?;

        for key in [seller_rooms_key(&room.seller_id), buyer_rooms_key(&room.buyer_id)] {
            if let Err(e) = self.cache.append_to_list(&key, &room).await {
                warn!(key = %key, error = %e, "append room to cached list failed");
            }
        }

        info!(room_id = %room.id, "chat room created");
        Ok(room)
    }

    async fn user(&self, id: &str) -> Result<Principal, AppError> {
        self.users
            .find_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {id}")))
    }

    async fn product(&self, id: &str) -> Result<Product, AppError> {
        self.products
            .find_product(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {id}")))
    }

    async fn recent_message(&self, room_id: &str) -> Result<Option<ChatMessage>, AppError> {
        Ok(self.messages.most_recent_by_room(room_id).await?)
    }
}

fn rooms_stream<F>(rooms: F) -> impl Stream<Item = Result<ChatRoom, StoreError>>
where
    F: std::future::Future<Output = Result<Vec<ChatRoom>, StoreError>>,
{
    stream::once(rooms)
        .map_ok(|rooms| stream::iter(rooms.into_iter().map(Ok)))
        .try_flatten()
}
