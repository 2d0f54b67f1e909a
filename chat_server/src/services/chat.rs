use crate::{models::SendMessage, AppError};
use chat_core::{ChatMessage, CreateMessage, MessageStore, PubSubBroker};
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Persists messages and fans them out to their recipients.
#[derive(Clone)]
pub struct ChatService {
    messages: Arc<dyn MessageStore>,
    broker: PubSubBroker,
}

impl ChatService {
    pub fn new(messages: Arc<dyn MessageStore>, broker: PubSubBroker) -> Self {
        Self { messages, broker }
    }

    /// Append the message, then publish its body to the receiver's topic.
    ///
    /// A failed publish is reported as [`AppError::ChatSaveFailed`] but the
    /// message stays persisted and can be read back from the room history.
    #[instrument(level = "debug", skip_all, fields(room_id = %input.room_id))]
    pub async fn save_message(&self, input: SendMessage) -> Result<ChatMessage, AppError> {
        validate(&input)?;

        let create = CreateMessage::new(input.msg, input.sender_id, input.receiver_id, input.room_id);
        let message = self.messages.append(create).await.map_err(|e| {
            warn!(error = %e, "persist message failed");
            AppError::ChatSaveFailed(e.to_string())
        })?;

        self.broker
            .publish(&message.receiver_id, &message.body)
            .await
            .map_err(|e| {
                warn!(message_id = %message.id, error = %e, "message persisted but not delivered");
                AppError::ChatSaveFailed(e.to_string())
            })?;

        info!(message_id = %message.id, "message saved");
        Ok(message)
    }

    /// Live tail of a room. Store failures end the stream instead of erroring.
    pub async fn stream_room(&self, room_id: &str) -> BoxStream<'static, ChatMessage> {
        let tail = match self.messages.stream_by_room(room_id).await {
            Ok(tail) => tail,
            Err(e) => {
                warn!(room_id, error = %e, "cannot tail room, closing stream");
                return stream::empty().boxed();
            }
        };

        let room_id = room_id.to_owned();
        tail.take_while(move |ret| {
            if let Err(e) = ret {
                warn!(room_id = %room_id, error = %e, "room tail failed, closing stream");
            }
            futures::future::ready(ret.is_ok())
        })
        .filter_map(|ret| futures::future::ready(ret.ok()))
        .boxed()
    }

    pub async fn recent(&self, room_id: &str) -> Result<ChatMessage, AppError> {
        self.messages
            .most_recent_by_room(room_id)
            .await?
            .ok_or_else(|| AppError::ChatNotFound(format!("room {room_id}")))
    }
}

fn validate(input: &SendMessage) -> Result<(), AppError> {
    if input.msg.trim().is_empty() {
        return Err(AppError::CreateMessageError(
            "message cannot be empty".to_string(),
        ));
    }
    for (field, value) in [
        ("senderId", &input.sender_id),
        ("receiverId", &input.receiver_id),
        ("roomId", &input.room_id),
    ] {
        if value.is_empty() {
            return Err(AppError::CreateMessageError(format!("{field} is required")));
        }
    }
    Ok(())
}
