//! WebSocket を使った PresenceBus 実装
//!
//! ## 責務
//!
//! - 接続ごとの送信キュー（`PusherChannel`）を管理
//! - 接続へのメッセージ送信（push_to, fan_out）
//!
//! ## 設計ノート
//!
//! WebSocket の生成は UI 層（`ui/handler/websocket.rs`）で行われます。
//! この実装は送信キューの送信側だけを保持し、キューを読む単一のタスクが
//! ソケットに書き込みます。ソケットへの同時書き込みは起こりません。
//!
//! キューは有界です。満杯の接続（処理が追いつかないクライアント）宛ての
//! メッセージは破棄され、配信全体を止めることはありません。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc::error::TrySendError};

use crate::domain::{Connection, ConnectionId, PresenceBus, PushError, PusherChannel};

/// WebSocket を使った PresenceBus 実装
#[derive(Default)]
pub struct WebSocketPresenceBus {
    /// 接続中のクライアントの送信キュー
    connections: Mutex<HashMap<ConnectionId, PusherChannel>>,
}

impl WebSocketPresenceBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登録されている接続数
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }
}

fn try_push(
    connection_id: &ConnectionId,
    sender: &PusherChannel,
    content: &str,
) -> Result<(), PushError> {
    sender
        .try_send(content.to_string())
        .map_err(|e| match e {
            TrySendError::Full(_) => PushError::QueueFull(*connection_id),
            TrySendError::Closed(_) => PushError::Closed(*connection_id),
        })
}

#[async_trait]
impl PresenceBus for WebSocketPresenceBus {
    async fn register(&self, connection: Connection) {
        let mut connections = self.connections.lock().await;
        connections.insert(connection.id, connection.outbound);
        tracing::debug!("Connection '{}' registered to PresenceBus", connection.id);
    }

    async fn unregister(&self, connection_id: &ConnectionId) {
        let mut connections = self.connections.lock().await;
        connections.remove(connection_id);
        tracing::debug!("Connection '{}' unregistered from PresenceBus", connection_id);
    }

    async fn push_to(&self, connection_id: &ConnectionId, content: &str) -> Result<(), PushError> {
        let connections = self.connections.lock().await;
        let sender = connections
            .get(connection_id)
            .ok_or(PushError::ConnectionNotFound(*connection_id))?;
        try_push(connection_id, sender, content)?;
        tracing::trace!("Pushed message to connection '{}'", connection_id);
        Ok(())
    }

    async fn fan_out(&self, targets: &[ConnectionId], content: &str) {
        let connections = self.connections.lock().await;

        for target in targets {
            let Some(sender) = connections.get(target) else {
                tracing::debug!("Connection '{}' not found during fan-out, skipping", target);
                continue;
            };
            // fan-out では一部の送信失敗を許容
            if let Err(e) = try_push(target, sender, content) {
                tracing::warn!("Dropped message for connection '{}': {}", target, e);
            }
        }
    }
}
