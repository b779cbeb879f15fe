//! ドメイン層
//!
//! 部屋とその参加者、およびドメイン層が依存する外部協調者（永続ストア、
//! クラスタバス、ローカル配信）のインターフェースを定義します。

pub mod cluster_bus;
pub mod entity;
pub mod error;
pub mod presence_bus;
pub mod repository;
pub mod value_object;

pub use cluster_bus::{BusChannel, BusMessage, BusSubscription, ClusterBus};
pub use entity::{
    CHAT_HISTORY_CAPACITY, ChatHistory, ChatMessage, JoinSnapshot, Player, PresenceRoom,
    RoomLifecycle, Scene, UserProfile, WhiteboardRoom,
};
pub use error::{BusError, PushError, StoreError, ValueObjectError};
pub use presence_bus::{Connection, PresenceBus, PusherChannel};
pub use repository::PersistenceStore;
#[cfg(test)]
pub use repository::MockPersistenceStore;
pub use value_object::{
    ConnectionId, PlayerStatus, Position, ROOM_ID_MAX_LEN, RoomId, SPAWN_POSITION, SpaceId, UserId,
};
