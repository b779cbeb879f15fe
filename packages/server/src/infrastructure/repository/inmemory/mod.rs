//! InMemory 実装

pub mod room_registry;
pub mod store;

pub use room_registry::{RoomRegistry, SharedRoom};
pub use store::InMemoryPersistenceStore;
