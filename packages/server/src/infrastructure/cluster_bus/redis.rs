//! Redis ClusterBus 実装
//!
//! publish は多重化された 1 本の接続で行い、購読は専用の pub/sub 接続で行います。
//! 購読接続が切れた場合は一定の間隔を置いて張り直します。切断中に publish された
//! メッセージは失われます（at-most-once）。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection, aio::PubSub};
use tokio::sync::mpsc;

use crate::domain::{BusChannel, BusError, BusMessage, BusSubscription, ClusterBus};

/// 購読接続を張り直すまでの待ち時間
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// 購読ごとの受信キューの容量
const SUBSCRIPTION_CAPACITY: usize = 1024;

impl From<redis::RedisError> for BusError {
    fn from(e: redis::RedisError) -> Self {
        BusError::Connection(e.to_string())
    }
}

/// Redis ClusterBus
#[derive(Clone)]
pub struct RedisClusterBus {
    client: Client,
    connection: MultiplexedConnection,
}

impl RedisClusterBus {
    /// Redis に接続する
    pub async fn connect(redis_url: &str) -> Result<Self, BusError> {
        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        tracing::info!("Connected to Redis cluster bus");
        Ok(Self { client, connection })
    }
}

async fn open_pubsub(client: &Client, channels: &[BusChannel]) -> Result<PubSub, BusError> {
    let mut pubsub = client.get_async_pubsub().await?;
    for channel in channels {
        pubsub.subscribe(channel.as_str()).await?;
    }
    Ok(pubsub)
}

/// pub/sub 接続が切れるまでメッセージを転送する。受信側が閉じていれば false
async fn forward(pubsub: PubSub, tx: &mpsc::Sender<BusMessage>) -> bool {
    let mut stream = pubsub.into_on_message();
    while let Some(message) = stream.next().await {
        let channel = match message.get_channel_name().parse::<BusChannel>() {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!("Dropping message from Redis: {}", e);
                continue;
            }
        };
        let payload = match message.get_payload::<String>() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Dropping undecodable payload on '{}': {}", channel, e);
                continue;
            }
        };
        if tx.send(BusMessage { channel, payload }).await.is_err() {
            return false;
        }
    }
    !tx.is_closed()
}

#[async_trait]
impl ClusterBus for RedisClusterBus {
    async fn publish(&self, channel: BusChannel, payload: String) -> Result<(), BusError> {
        let mut connection = self.connection.clone();
        let _receivers: i64 = connection
            .publish(channel.as_str(), payload)
            .await
            .map_err(|e| BusError::Publish {
                channel: channel.as_str().to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(&self, channels: &[BusChannel]) -> Result<BusSubscription, BusError> {
        let channels = channels.to_vec();
        // 最初の購読は呼び出し元に返す前に確立する
        let first = open_pubsub(&self.client, &channels).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut pubsub = Some(first);
            loop {
                let current = match pubsub.take() {
                    Some(current) => current,
                    None => match open_pubsub(&client, &channels).await {
                        Ok(current) => {
                            tracing::info!("Redis subscription re-established");
                            current
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Failed to re-subscribe to Redis, retrying in {:?}: {}",
                                RECONNECT_BACKOFF,
                                e
                            );
                            tokio::time::sleep(RECONNECT_BACKOFF).await;
                            continue;
                        }
                    },
                };

                if !forward(current, &tx).await {
                    break;
                }
                tracing::warn!(
                    "Redis subscription dropped, reconnecting in {:?}",
                    RECONNECT_BACKOFF
                );
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
            tracing::debug!("Redis subscription closed");
        });

        Ok(BusSubscription::new(rx))
    }
}
