use crate::{
    models::{ChatRoomLists, ChatRoomView, OpenChat},
    AppError, AppState, ErrorOutput,
};
use axum::{extract::State, response::IntoResponse, Extension, Json};
use chat_core::Principal;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/api/chat-rooms",
    request_body = OpenChat,
    responses(
        (status = 200, description = "Chat room opened", body = ChatRoomView),
        (status = 400, description = "Seller opened a chat on their own product", body = ErrorOutput),
        (status = 404, description = "Receiver or product not found", body = ErrorOutput),
        (status = 500, description = "Chat room could not be created", body = ErrorOutput),
    ),
    security(
        ("token" = [])
    ),
    tag = "chat-room",
)]
#[instrument(level = "debug", skip(state))]
pub(crate) async fn open_chat_handler(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
    Json(input): Json<OpenChat>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.rooms.open_chat(input, &principal).await?;
    Ok(Json(view))
}

#[utoipa::path(
    get,
    path = "/api/chat-rooms",
    responses(
        (status = 200, description = "Chat rooms where the user sells and buys", body = ChatRoomLists),
        (status = 500, description = "Chat room info could not be fetched", body = ErrorOutput),
    ),
    security(
        ("token" = [])
    ),
    tag = "chat-room",
)]
#[instrument(level = "debug", skip(state))]
pub(crate) async fn list_chat_rooms_handler(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let seller = state.rooms.list_rooms_for_seller(&principal.id).await?;
    let buyer = state.rooms.list_rooms_for_buyer(&principal.id).await?;
    Ok(Json(ChatRoomLists { seller, buyer }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClickPage, SendMessage};
    use anyhow::Result;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn open_chat_then_list_should_work() -> Result<()> {
        let (_directory, state) = AppState::new_for_test()?;
        let bob = Principal::new("u2", "bob");
        let input = OpenChat::new("p1", "u1", "u2", ClickPage::Detail);

        let ret = open_chat_handler(Extension(bob.clone()), State(state.clone()), Json(input))
            .await?
            .into_response();
        assert_eq!(ret.status(), StatusCode::OK);
        let body = ret.into_body().collect().await?.to_bytes();
        let view: ChatRoomView = serde_json::from_slice(&body)?;
        assert_eq!(view.receiver_nickname, "alice");

        state
            .chat
            .save_message(SendMessage::new("is it still available?", "u2", "u1", &view.id))
            .await?;

        let ret = list_chat_rooms_handler(Extension(bob), State(state))
            .await?
            .into_response();
        let body = ret.into_body().collect().await?.to_bytes();
        let lists: ChatRoomLists = serde_json::from_slice(&body)?;
        assert!(lists.seller.is_empty());
        assert_eq!(lists.buyer.len(), 1);
        assert_eq!(
            lists.buyer[0].recent_msg.as_deref(),
            Some("is it still available?")
        );
        Ok(())
    }

    #[tokio::test]
    async fn seller_open_chat_from_detail_should_400() -> Result<()> {
        let (_directory, state) = AppState::new_for_test()?;
        let alice = Principal::new("u1", "alice");
        let input = OpenChat::new("p1", "u1", "u2", ClickPage::Detail);

        let ret = open_chat_handler(Extension(alice), State(state), Json(input))
            .await
            .into_response();
        assert_eq!(ret.status(), StatusCode::BAD_REQUEST);
        let body = ret.into_body().collect().await?.to_bytes();
        let ret: ErrorOutput = serde_json::from_slice(&body)?;
        assert_eq!(ret.error, "seller cannot open a chat on their own product");
        Ok(())
    }
}
