//! Server execution logic.

use std::{future::Future, sync::Arc};

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::usecase::{PresenceSyncServer, WhiteboardSyncServer};

use super::{
    handler::{get_rooms, health_check, presence_websocket_handler, whiteboard_websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Room synchronization server
///
/// This struct wires the sync servers into the HTTP router and runs it until shutdown.
///
/// # Example
///
/// ```ignore
/// let server = Server::new(presence, whiteboard, 256);
/// server.run("127.0.0.1:8080").await?;
/// ```
pub struct Server {
    /// PresenceSyncServer（位置・在席・チャットの同期）
    presence: Arc<PresenceSyncServer>,
    /// WhiteboardSyncServer（ホワイトボードの同期）
    whiteboard: Arc<WhiteboardSyncServer>,
    /// 1 接続あたりの送信キューの容量
    outbound_queue_capacity: usize,
}

impl Server {
    /// Create a new Server instance
    ///
    /// # Arguments
    ///
    /// * `presence` - Sync server for presence rooms
    /// * `whiteboard` - Sync server for whiteboard rooms
    /// * `outbound_queue_capacity` - Capacity of each connection's outbound queue
    pub fn new(
        presence: Arc<PresenceSyncServer>,
        whiteboard: Arc<WhiteboardSyncServer>,
        outbound_queue_capacity: usize,
    ) -> Self {
        Self {
            presence,
            whiteboard,
            outbound_queue_capacity,
        }
    }

    /// Build the router with every endpoint of the server
    pub fn router(&self) -> Router {
        let app_state = Arc::new(AppState {
            presence: Arc::clone(&self.presence),
            whiteboard: Arc::clone(&self.whiteboard),
            outbound_queue_capacity: self.outbound_queue_capacity,
        });

        Router::new()
            // WebSocket エンドポイント
            .route("/space/ws/{id}", get(presence_websocket_handler))
            .route("/whiteboard/ws/{space_id}", get(whiteboard_websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/api/rooms", get(get_rooms))
            .layer(TraceLayer::new_for_http())
            .with_state(app_state)
    }

    /// Run the server until Ctrl+C or SIGTERM
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - The address to bind to (e.g., "127.0.0.1:8080")
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, bind_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(bind_addr).await?;

        tracing::info!("Sync server listening on {}", listener.local_addr()?);
        tracing::info!("Presence:   ws://{}/space/ws/{{id}}?user_id=..", bind_addr);
        tracing::info!(
            "Whiteboard: ws://{}/whiteboard/ws/{{space_id}}?user_id=..",
            bind_addr
        );
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        self.serve(listener, shutdown_signal()).await?;
        Ok(())
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// Pending whiteboard saves are flushed after the HTTP server has stopped.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.whiteboard.flush_all().await;
        tracing::info!("Server shutdown complete");

        Ok(())
    }
}
