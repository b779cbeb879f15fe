//! クラスタバス trait 定義
//!
//! 複数のサーバープロセス間でイベントを中継する publish/subscribe の抽象です。
//! 全てのプロセスは全てのイベントを受け取り、自分のローカル接続へ配信します。
//! 自分が publish したイベントも自分に届きます。

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::BusError;

/// バス上のチャンネル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusChannel {
    Positions,
    Events,
    Chat,
    StatusUpdates,
    WhiteboardUpdates,
    WhiteboardParticipants,
}

impl BusChannel {
    pub const PRESENCE: [BusChannel; 4] = [
        BusChannel::Positions,
        BusChannel::Events,
        BusChannel::Chat,
        BusChannel::StatusUpdates,
    ];

    pub const WHITEBOARD: [BusChannel; 2] = [
        BusChannel::WhiteboardUpdates,
        BusChannel::WhiteboardParticipants,
    ];

    /// ワイヤ上のチャンネル名
    pub fn as_str(&self) -> &'static str {
        match self {
            BusChannel::Positions => "game:positions",
            BusChannel::Events => "game:events",
            BusChannel::Chat => "game:chat",
            BusChannel::StatusUpdates => "user:status_updates",
            BusChannel::WhiteboardUpdates => "whiteboard:updates",
            BusChannel::WhiteboardParticipants => "whiteboard:participants",
        }
    }
}

impl fmt::Display for BusChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusChannel {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "game:positions" => Ok(BusChannel::Positions),
            "game:events" => Ok(BusChannel::Events),
            "game:chat" => Ok(BusChannel::Chat),
            "user:status_updates" => Ok(BusChannel::StatusUpdates),
            "whiteboard:updates" => Ok(BusChannel::WhiteboardUpdates),
            "whiteboard:participants" => Ok(BusChannel::WhiteboardParticipants),
            other => Err(BusError::UnknownChannel(other.to_string())),
        }
    }
}

/// バスから受信したメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub channel: BusChannel,
    pub payload: String,
}

/// 購読ハンドル
///
/// 購読したチャンネルのメッセージを publish 順に受け取ります。
/// バスが停止すると `recv` は `None` を返します。
#[derive(Debug)]
pub struct BusSubscription {
    receiver: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    pub fn new(receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

/// クラスタバス trait
#[async_trait]
pub trait ClusterBus: Send + Sync {
    /// チャンネルにペイロードを publish する
    async fn publish(&self, channel: BusChannel, payload: String) -> Result<(), BusError>;

    /// チャンネル群を購読する
    ///
    /// 戻り値を受け取った時点で購読は有効になっており、
    /// 以降に publish されたメッセージは全て受信できる。
    async fn subscribe(&self, channels: &[BusChannel]) -> Result<BusSubscription, BusError>;
}
