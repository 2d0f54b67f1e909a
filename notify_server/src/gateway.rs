//! Per-user notification streams over the pub/sub broker.
//!
//! Every open stream is registered under its user id. A user has at most one
//! open stream: opening another cancels the previous one.

use async_stream::stream;
use chat_core::PubSubBroker;
use dashmap::DashMap;
use futures::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const CHAT_MESSAGE_EVENT: &str = "chat-message";

/// What the client receives for every payload published to its topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    pub event: String,
    pub data: String,
}

#[derive(Clone)]
pub struct NotificationGateway {
    broker: PubSubBroker,
    registry: Arc<DashMap<String, Registration>>,
    next_conn_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

struct Registration {
    conn_id: u64,
    token: CancellationToken,
}

/// Unregisters a stream when it ends, unless a newer stream took its place.
struct RegistrationGuard {
    registry: Arc<DashMap<String, Registration>>,
    user_id: String,
    conn_id: u64,
}

impl ClientEvent {
    pub fn chat_message(data: impl Into<String>) -> Self {
        Self {
            event: CHAT_MESSAGE_EVENT.to_string(),
            data: data.into(),
        }
    }
}

impl NotificationGateway {
    pub fn new(broker: PubSubBroker) -> Self {
        Self {
            broker,
            registry: Arc::new(DashMap::new()),
            next_conn_id: Arc::new(AtomicU64::new(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribe to the user's topic and map every payload into a [`ClientEvent`].
    ///
    /// The stream ends, never errors, when the broker gives up, when
    /// [`NotificationGateway::cancel`] is called for the user, when another
    /// stream is opened for the same user, or on shutdown. Dropping it
    /// unsubscribes right away.
    pub async fn open_notification_stream(&self, user_id: &str) -> BoxStream<'static, ClientEvent> {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();
        let registration = Registration {
            conn_id,
            token: token.clone(),
        };
        if let Some(previous) = self.registry.insert(user_id.to_owned(), registration) {
            info!(user_id, conn_id = previous.conn_id, "replacing open notification stream");
            previous.token.cancel();
        }

        let guard = RegistrationGuard {
            registry: Arc::clone(&self.registry),
            user_id: user_id.to_owned(),
            conn_id,
        };
        let mut payloads = self.broker.subscribe(user_id).await;
        info!(user_id, conn_id, "notification stream opened");

        let events = stream! {
            let guard = guard;
            loop {
                let payload = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(user_id = %guard.user_id, conn_id, "notification stream cancelled");
                        break;
                    }
                    payload = payloads.next() => payload,
                };
                match payload {
                    Some(data) => yield ClientEvent::chat_message(data),
                    None => {
                        info!(user_id = %guard.user_id, conn_id, "subscription ended, closing notification stream");
                        break;
                    }
                }
            }
        };

        events.boxed()
    }

    /// End the user's open stream. Returns false when there was none.
    pub fn cancel(&self, user_id: &str) -> bool {
        match self.registry.remove(user_id) {
            Some((_, registration)) => {
                registration.token.cancel();
                true
            }
            None => false,
        }
    }

    /// End every open stream; streams opened afterwards end immediately.
    pub fn shutdown(&self) {
        info!(open = self.registry.len(), "closing all notification streams");
        self.shutdown.cancel();
    }

    pub fn open_streams(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry
            .remove_if(&self.user_id, |_, r| r.conn_id == self.conn_id);
    }
}
