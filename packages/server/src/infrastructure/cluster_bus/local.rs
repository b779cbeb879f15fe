//! プロセス内 ClusterBus 実装
//!
//! 単一プロセスで動かすときに共有バスの代わりを務めます。
//! `tokio::sync::broadcast` で全購読者に配信し、遅れた購読者は取りこぼした分を破棄します
//! （at-most-once）。

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::domain::{BusChannel, BusError, BusMessage, BusSubscription, ClusterBus};

/// broadcast チャネルの容量
const BUS_CAPACITY: usize = 1024;

/// 購読ごとの受信キューの容量
const SUBSCRIPTION_CAPACITY: usize = 1024;

/// プロセス内 ClusterBus
#[derive(Clone)]
pub struct LocalClusterBus {
    sender: broadcast::Sender<BusMessage>,
}

impl LocalClusterBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalClusterBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterBus for LocalClusterBus {
    async fn publish(&self, channel: BusChannel, payload: String) -> Result<(), BusError> {
        // 購読者がいない場合の送信失敗はエラーではない
        let receivers = self
            .sender
            .send(BusMessage { channel, payload })
            .unwrap_or(0);
        tracing::trace!("Published to '{}' ({} receivers)", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channels: &[BusChannel]) -> Result<BusSubscription, BusError> {
        let wanted: HashSet<BusChannel> = channels.iter().copied().collect();
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if !wanted.contains(&message.channel) {
                            continue;
                        }
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Local bus subscriber lagged, {} messages dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Local bus subscription closed");
        });

        Ok(BusSubscription::new(rx))
    }
}
