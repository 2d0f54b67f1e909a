mod chat_room;
mod message;

use axum::response::IntoResponse;

pub(crate) use chat_room::*;
pub(crate) use message::*;

pub(crate) async fn index_handler() -> impl IntoResponse {
    "index"
}
