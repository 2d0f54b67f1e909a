use crate::{models::SendMessage, AppError, AppState, ErrorOutput};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{sse::Event, IntoResponse, Sse},
    Extension, Json,
};
use chat_core::{ChatMessage, Principal};
use futures::{Stream, StreamExt};
use std::{convert::Infallible, time::Duration};
use tracing::{info, instrument, warn};

pub(crate) const CHAT_MESSAGE_EVENT: &str = "chat-message";

#[utoipa::path(
    post,
    path = "/api/messages",
    request_body = SendMessage,
    responses(
        (status = 201, description = "Message saved and published", body = ChatMessage),
        (status = 400, description = "Invalid message", body = ErrorOutput),
        (status = 403, description = "Sender is not the signed in user", body = ErrorOutput),
        (status = 500, description = "Message could not be saved or delivered", body = ErrorOutput),
    ),
    security(
        ("token" = [])
    ),
    tag = "chat",
)]
#[instrument(level = "debug", skip(state))]
pub(crate) async fn send_message_handler(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
    Json(input): Json<SendMessage>,
) -> Result<impl IntoResponse, AppError> {
    if principal.id != input.sender_id {
        return Err(AppError::Forbidden(format!(
            "user {} cannot send as {}",
            principal.id, input.sender_id
        )));
    }

    let message = state.chat.save_message(input).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[utoipa::path(
    get,
    path = "/api/chat-rooms/{room_id}/messages",
    params(
        ("room_id" = String, Path, description = "Chat room id")
    ),
    responses(
        (status = 200, description = "Server-sent `chat-message` events: the room history, then new messages"),
    ),
    security(
        ("token" = [])
    ),
    tag = "chat",
)]
pub(crate) async fn room_messages_handler(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(user = %principal.id, room_id = %room_id, "tailing room");

    let stream = state.chat.stream_room(&room_id).await.filter_map(|message| async move {
        match serde_json::to_string(&message) {
            Ok(data) => Some(Ok(Event::default().event(CHAT_MESSAGE_EVENT).data(data))),
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "serialize message failed");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(1))
            .text("keep-alive-text"),
    )
}

#[utoipa::path(
    get,
    path = "/api/chat-rooms/{room_id}/recent",
    params(
        ("room_id" = String, Path, description = "Chat room id")
    ),
    responses(
        (status = 200, description = "Most recent message of the room", body = ChatMessage),
        (status = 404, description = "The room has no messages", body = ErrorOutput),
    ),
    security(
        ("token" = [])
    ),
    tag = "chat",
)]
pub(crate) async fn recent_message_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.chat.recent(&room_id).await?;
    Ok(Json(message))
}
