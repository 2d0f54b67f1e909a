use crate::AppState;
use axum::extract::State;
use axum::response::{sse::Event, Sse};
use axum::Extension;
use chat_core::Principal;
use futures::{Stream, StreamExt};
use std::{convert::Infallible, time::Duration};
use tracing::info;

pub(crate) async fn sse_handler(
    Extension(principal): Extension<Principal>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(user = %principal.id, nickname = %principal.nickname, "connected");

    let stream = state
        .gateway
        .open_notification_stream(&principal.id)
        .await
        .map(|e| Ok(Event::default().event(e.event).data(e.data)));

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(1))
            .text("keep-alive-text"),
    )
}
