use super::{PayloadStream, PubSubError, Publisher, Subscriber};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::{future, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

const CHANNEL_CAPACITY: usize = 100;

type TopicMap = Arc<DashMap<String, broadcast::Sender<String>>>;

/// An in-process transport: one broadcast channel per topic, created on first
/// subscribe and dropped with the last subscriber.
#[derive(Clone, Default)]
pub struct MemoryPubSub {
    topics: TopicMap,
}

/// Keeps the topic routed while alive; removes it when the last subscriber goes away.
struct TopicSubscription {
    topic: String,
    topics: TopicMap,
    inner: PayloadStream,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of topics that currently have at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[async_trait]
impl Publisher for MemoryPubSub {
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, PubSubError> {
        let receivers = match self.topics.get(topic) {
            Some(tx) => tx.send(payload.to_owned()).unwrap_or(0),
            None => 0,
        };
        Ok(receivers)
    }
}

#[async_trait]
impl Subscriber for MemoryPubSub {
    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, PubSubError> {
        let rx = self
            .topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let name = topic.to_owned();
        let payloads = BroadcastStream::new(rx).filter_map(move |ret| {
            future::ready(match ret {
                Ok(payload) => Some(Ok(payload)),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(topic = %name, skipped = n, "subscriber lagged behind");
                    None
                }
            })
        });

        let subscription = TopicSubscription {
            topic: topic.to_owned(),
            topics: Arc::clone(&self.topics),
            inner: payloads.boxed(),
        };
        Ok(subscription.boxed())
    }
}

impl Stream for TopicSubscription {
    type Item = Result<String, PubSubError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        // our own receiver is still alive here
        self.topics
            .remove_if(&self.topic, |_, tx| tx.receiver_count() <= 1);
    }
}
