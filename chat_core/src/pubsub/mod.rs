/// This module is used to publish and subscribe to payloads addressed by topic.
mod memory;
mod redis;

use crate::retry::RetryPolicy;
use async_stream::stream;
use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use self::memory::MemoryPubSub;
pub use self::redis::RedisPubSub;

/// Payloads of one subscription. An `Err` item or the end of the stream means
/// the transport dropped the subscription.
pub type PayloadStream = BoxStream<'static, Result<String, PubSubError>>;

#[derive(Error, Debug)]
pub enum PubSubError {
    #[error("redis error: {0}")]
    RedisError(#[from] ::redis::RedisError),

    #[error("transport closed: {0}")]
    Closed(String),

    #[error("delivery to {topic} failed: {reason}")]
    DeliveryFailed { topic: String, reason: String },
}

/// A transport that can publish payloads. One call is one attempt.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Returns how many receivers the payload reached.
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, PubSubError>;
}

/// A transport that can open subscriptions. One call is one attempt.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, PubSubError>;
}

pub trait Transport: Publisher + Subscriber {}

impl<T: Publisher + Subscriber> Transport for T {}

/// Publish/subscribe with timeouts, retries and graceful degradation on top of a [`Transport`].
///
/// `publish` surfaces [`PubSubError::DeliveryFailed`] once retries run out.
/// `subscribe` never fails: when retries run out the stream simply ends.
#[derive(Clone)]
pub struct PubSubBroker {
    transport: Arc<dyn Transport>,
    publish_policy: RetryPolicy,
    subscribe_policy: RetryPolicy,
}

impl PubSubBroker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            publish_policy: RetryPolicy::publish(),
            subscribe_policy: RetryPolicy::subscribe(),
        }
    }

    pub fn with_publish_policy(mut self, policy: RetryPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    pub fn with_subscribe_policy(mut self, policy: RetryPolicy) -> Self {
        self.subscribe_policy = policy;
        self
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<usize, PubSubError> {
        let transport = &self.transport;
        let receivers = self
            .publish_policy
            .retry("publish", move || transport.publish(topic, payload))
            .await
            .map_err(|e| PubSubError::DeliveryFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        debug!(topic = %topic, receivers, "published");
        Ok(receivers)
    }

    /// Subscribe to `topic`. The first subscription is established before this
    /// returns; later drops, errors and inactivity are retried with backoff.
    pub async fn subscribe(&self, topic: &str) -> BoxStream<'static, String> {
        let policy = self.subscribe_policy;
        let transport = Arc::clone(&self.transport);
        let topic = topic.to_owned();

        let first = {
            let transport = &transport;
            let topic = topic.as_str();
            policy
                .retry("subscribe", move || transport.subscribe(topic))
                .await
        };
        let first = match first {
            Ok(payloads) => payloads,
            Err(e) => {
                info!(topic = %topic, error = %e, "could not subscribe, ending stream");
                return stream::empty().boxed();
            }
        };
        info!(topic = %topic, "subscribed");

        let payloads = stream! {
            let mut current = Some(first);
            let mut retries = 0u32;
            loop {
                if let Some(mut payloads) = current.take() {
                    loop {
                        match tokio::time::timeout(policy.timeout(), payloads.next()).await {
                            Ok(Some(Ok(payload))) => {
                                retries = 0;
                                yield payload;
                            }
                            Ok(Some(Err(e))) => {
                                warn!(topic = %topic, error = %e, "subscription dropped");
                                break;
                            }
                            Ok(None) => {
                                warn!(topic = %topic, "subscription closed by transport");
                                break;
                            }
                            Err(_) => {
                                info!(topic = %topic, timeout = ?policy.timeout(), "subscription idle");
                                break;
                            }
                        }
                    }
                }

                if retries >= policy.max_retries {
                    info!(topic = %topic, retries, "resubscribe retries exhausted, ending stream");
                    break;
                }
                let delay = policy.backoff(retries);
                retries += 1;
                tokio::time::sleep(delay).await;

                match tokio::time::timeout(policy.timeout(), transport.subscribe(&topic)).await {
                    Ok(Ok(payloads)) => {
                        info!(topic = %topic, attempt = retries, "resubscribed");
                        current = Some(payloads);
                    }
                    Ok(Err(e)) => warn!(topic = %topic, attempt = retries, error = %e, "resubscribe failed"),
                    Err(_) => warn!(topic = %topic, attempt = retries, "resubscribe timed out"),
                }
            }
        };

        payloads.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails every publish and every subscribe.
    #[derive(Default)]
    struct BrokenTransport {
        publishes: AtomicU32,
        subscribes: AtomicU32,
    }

    /// Subscribes fine but every subscription drops right away with an error.
    #[derive(Default)]
    struct FlappingTransport {
        subscribes: AtomicU32,
    }

    /// Fails the first `failures` publishes.
    struct FlakyPublisher {
        failures: u32,
        calls: AtomicU32,
        inner: MemoryPubSub,
    }

    #[async_trait]
    impl Publisher for BrokenTransport {
        async fn publish(&self, _topic: &str, _payload: &str) -> Result<usize, PubSubError> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            Err(PubSubError::Closed("broker down".to_string()))
        }
    }

    #[async_trait]
    impl Subscriber for BrokenTransport {
        async fn subscribe(&self, _topic: &str) -> Result<PayloadStream, PubSubError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            Err(PubSubError::Closed("broker down".to_string()))
        }
    }

    #[async_trait]
    impl Publisher for FlappingTransport {
        async fn publish(&self, _topic: &str, _payload: &str) -> Result<usize, PubSubError> {
            Ok(0)
        }
    }

    #[async_trait]
    impl Subscriber for FlappingTransport {
        async fn subscribe(&self, _topic: &str) -> Result<PayloadStream, PubSubError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let dropped = stream::iter(vec![Err(PubSubError::Closed("reset".to_string()))]);
            Ok(dropped.boxed())
        }
    }

    #[async_trait]
    impl Publisher for FlakyPublisher {
        async fn publish(&self, topic: &str, payload: &str) -> Result<usize, PubSubError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(PubSubError::Closed("transient".to_string()));
            }
            self.inner.publish(topic, payload).await
        }
    }

    #[async_trait]
    impl Subscriber for FlakyPublisher {
        async fn subscribe(&self, topic: &str) -> Result<PayloadStream, PubSubError> {
            self.inner.subscribe(topic).await
        }
    }

    #[tokio::test]
    async fn broker_should_deliver_in_publish_order() -> Result<()> {
        let broker = PubSubBroker::new(Arc::new(MemoryPubSub::new()));
        let mut sub = broker.subscribe("u2").await;

        for body in ["a", "b", "c"] {
            assert_eq!(broker.publish("u2", body).await?, 1);
        }
        assert_eq!(broker.publish("u3", "nobody").await?, 0);

        assert_eq!(sub.next().await.unwrap(), "a");
        assert_eq!(sub.next().await.unwrap(), "b");
        assert_eq!(sub.next().await.unwrap(), "c");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn publish_should_retry_transient_failures() -> Result<()> {
        let transport = Arc::new(FlakyPublisher {
            failures: 2,
            calls: AtomicU32::new(0),
            inner: MemoryPubSub::new(),
        });
        let broker = PubSubBroker::new(transport.clone());
        let mut sub = broker.subscribe("u2").await;

        assert_eq!(broker.publish("u2", "hi").await?, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sub.next().await.unwrap(), "hi");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn publish_should_fail_with_delivery_failed_after_retries() {
        let transport = Arc::new(BrokenTransport::default());
        let broker = PubSubBroker::new(transport.clone());

        let ret = broker.publish("u2", "hi").await;
        assert!(matches!(ret, Err(PubSubError::DeliveryFailed { ref topic, .. }) if topic == "u2"));
        assert_eq!(transport.publishes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_to_broken_broker_should_end_without_error() {
        let transport = Arc::new(BrokenTransport::default());
        let broker = PubSubBroker::new(transport.clone());

        let mut sub = broker.subscribe("u2").await;
        assert!(sub.next().await.is_none());
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_should_end_after_repeated_drops() {
        let transport = Arc::new(FlappingTransport::default());
        let broker = PubSubBroker::new(transport.clone());

        let mut sub = broker.subscribe("u2").await;
        assert!(sub.next().await.is_none());
        // the first subscription plus three resubscribes
        assert_eq!(transport.subscribes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_subscription_should_be_renewed_then_closed() {
        let memory = MemoryPubSub::new();
        let policy = RetryPolicy {
            timeout_ms: 1_000,
            ..RetryPolicy::subscribe()
        };
        let broker = PubSubBroker::new(Arc::new(memory.clone())).with_subscribe_policy(policy);

        let mut sub = broker.subscribe("u2").await;
        let ret = tokio::time::timeout(Duration::from_secs(60), sub.next()).await;
        assert_eq!(ret, Ok(None));
        drop(sub);
        assert_eq!(memory.topic_count(), 0);
    }
}
