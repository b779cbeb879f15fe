//! Repository 実装
//!
//! - `inmemory`: RoomRegistry とインメモリの PersistenceStore
//! - `postgres`: PostgreSQL の PersistenceStore

pub mod inmemory;
pub mod postgres;

pub use inmemory::{InMemoryPersistenceStore, RoomRegistry, SharedRoom};
pub use postgres::PgPersistenceStore;
