//! Shared application state.

use std::sync::Arc;

use crate::usecase::{PresenceSyncServer, WhiteboardSyncServer};

/// Shared application state
pub struct AppState {
    /// PresenceSyncServer（位置・在席・チャットの同期）
    pub presence: Arc<PresenceSyncServer>,
    /// WhiteboardSyncServer（ホワイトボードの同期）
    pub whiteboard: Arc<WhiteboardSyncServer>,
    /// 1 接続あたりの送信キューの容量
    pub outbound_queue_capacity: usize,
}
