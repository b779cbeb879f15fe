//! ClusterBus 実装
//!
//! - `local`: 単一プロセス用（tokio broadcast）
//! - `redis`: 複数プロセス用（Redis pub/sub）

pub mod local;
pub mod redis;

pub use self::local::LocalClusterBus;
pub use self::redis::RedisClusterBus;
