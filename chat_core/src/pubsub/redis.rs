use super::{PayloadStream, PubSubError, Publisher, Subscriber};
use async_trait::async_trait;
use futures::StreamExt;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::info;

/// A Redis transport. Publishes share one managed connection; every
/// subscription gets its own pub/sub connection, closed when the stream is dropped.
#[derive(Clone)]
pub struct RedisPubSub {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisPubSub {
    pub async fn connect(url: &str) -> Result<Self, PubSubError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        info!("connected to redis pub/sub");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl Publisher for RedisPubSub {
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, PubSubError> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(topic, payload).await?;
        Ok(receivers)
    }
}

#[async_trait]
impl Subscriber for RedisPubSub {
    async fn subscribe(&self, topic: &str) -> Result<PayloadStream, PubSubError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let payloads = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload::<String>().map_err(PubSubError::from));
        Ok(payloads.boxed())
    }
}
