//! ドメイン層のエラー定義

use thiserror::Error;

use super::value_object::ConnectionId;

/// Value Object 生成時のバリデーションエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("room id must not be empty")]
    RoomIdEmpty,
    #[error("room id must be at most {0} characters")]
    RoomIdTooLong(usize),
    #[error("room id contains whitespace: '{0}'")]
    RoomIdInvalid(String),
    #[error("user id must not be empty")]
    UserIdEmpty,
    #[error("unknown player status: '{0}'")]
    UnknownStatus(String),
}

/// 永続ストアのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// ストアへの接続・クエリ実行に失敗
    #[error("store backend error: {0}")]
    Backend(String),
    /// 保存されていた値を解釈できない
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
}

/// クラスタバスのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),
    #[error("publish to '{channel}' failed: {reason}")]
    Publish { channel: String, reason: String },
    #[error("unknown bus channel: '{0}'")]
    UnknownChannel(String),
    #[error("subscription closed")]
    Closed,
}

/// 接続へのメッセージ送信エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("connection {0} is not registered")]
    ConnectionNotFound(ConnectionId),
    #[error("outbound queue of connection {0} is full")]
    QueueFull(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}
