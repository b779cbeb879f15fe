//! UseCase 層
//!
//! 部屋の種類ごとの同期サーバーと、ホワイトボードの遅延保存を提供します。

pub mod error;
pub mod persistence_scheduler;
pub mod presence;
pub mod sync_server;
pub mod whiteboard;

pub use error::ConnectError;
pub use persistence_scheduler::{DEFAULT_SAVE_DEBOUNCE, PersistenceScheduler};
pub use presence::{PresenceSession, PresenceSyncServer, publish_status_update};
pub use sync_server::{SyncServer, parse_room_id, resolve_user};
pub use whiteboard::{WhiteboardSession, WhiteboardSyncServer};
