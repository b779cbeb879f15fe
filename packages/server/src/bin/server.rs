//! Hearth room synchronization server.
//!
//! Serves presence rooms (positions, statuses, chat) and whiteboard rooms
//! over WebSocket. Without `--redis-url` / `--database-url` it runs as a
//! single node with an in-process bus and an in-memory store.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hearth-server
//! cargo run --bin hearth-server -- --host 0.0.0.0 --port 3000 --redis-url redis://127.0.0.1:6379
//! ```

use std::{process, sync::Arc};

use clap::Parser;
use hearth_server::{
    config::Config,
    domain::{ClusterBus, PersistenceStore},
    infrastructure::{
        cluster_bus::{LocalClusterBus, RedisClusterBus},
        message_pusher::WebSocketPresenceBus,
        repository::{InMemoryPersistenceStore, PgPersistenceStore},
    },
    ui::Server,
    usecase::{PersistenceScheduler, PresenceSyncServer, WhiteboardSyncServer},
};
use hearth_shared::{logger::setup_logger, time::SystemClock};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &config.log_level);

    // Initialize dependencies in order:
    // 1. PersistenceStore
    // 2. ClusterBus
    // 3. PresenceBus / Clock
    // 4. Sync servers
    // 5. Server

    // 1. Create PersistenceStore
    let store: Arc<dyn PersistenceStore> = match &config.database_url {
        Some(url) => match PgPersistenceStore::connect(url, config.db_max_connections).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!("Failed to connect to database: {}", e);
                process::exit(1);
            }
        },
        None => {
            tracing::warn!("DATABASE_URL is not set, whiteboards are kept in memory only");
            Arc::new(InMemoryPersistenceStore::new())
        }
    };

    // 2. Create ClusterBus
    let bus: Arc<dyn ClusterBus> = match &config.redis_url {
        Some(url) => match RedisClusterBus::connect(url).await {
            Ok(bus) => Arc::new(bus),
            Err(e) => {
                tracing::error!("Failed to connect to Redis: {}", e);
                process::exit(1);
            }
        },
        None => {
            tracing::info!("REDIS_URL is not set, running as a single node");
            Arc::new(LocalClusterBus::new())
        }
    };

    // 3. Create PresenceBus (WebSocket implementation) and Clock
    let pusher = Arc::new(WebSocketPresenceBus::new());
    let clock = Arc::new(SystemClock);

    // 4. Create sync servers
    let presence = match PresenceSyncServer::start(
        Arc::clone(&bus),
        pusher.clone(),
        Arc::clone(&store),
        clock.clone(),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to subscribe presence channels: {}", e);
            process::exit(1);
        }
    };

    let scheduler = PersistenceScheduler::new(Arc::clone(&store), config.save_debounce());
    let whiteboard =
        match WhiteboardSyncServer::start(bus, pusher, store, clock, scheduler).await {
            Ok(server) => server,
            Err(e) => {
                tracing::error!("Failed to subscribe whiteboard channels: {}", e);
                process::exit(1);
            }
        };

    // 5. Create and run server
    let server = Server::new(presence, whiteboard, config.outbound_queue_capacity());
    if let Err(e) = server.run(&config.bind_addr()).await {
        tracing::error!("Server error: {}", e);
        process::exit(1);
    }
}
