//! PresenceBus trait 定義
//!
//! ローカル接続へのメッセージ配信（fan-out）の抽象です。
//! 各接続は有界の送信キューを持ち、そのキューを読む単一のタスクだけがソケットに書き込みます。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ConnectionId, PushError};

/// 接続ごとの送信キュー
pub type PusherChannel = mpsc::Sender<String>;

/// 1 クライアントとの双方向チャネル（部屋に入る前の状態）
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub outbound: PusherChannel,
}

impl Connection {
    pub fn new(outbound: PusherChannel) -> Self {
        Self {
            id: ConnectionId::generate(),
            outbound,
        }
    }
}

/// PresenceBus trait
#[async_trait]
pub trait PresenceBus: Send + Sync {
    /// 接続を登録
    async fn register(&self, connection: Connection);

    /// 接続を登録解除
    async fn unregister(&self, connection_id: &ConnectionId);

    /// 特定の接続に送信
    async fn push_to(&self, connection_id: &ConnectionId, content: &str) -> Result<(), PushError>;

    /// 複数の接続に送信（一部の失敗はログに残して続行）
    async fn fan_out(&self, targets: &[ConnectionId], content: &str);
}
