//! WebSocket 接続ハンドラ
//!
//! 部屋の種類によらず同じ接続ループを使います。アップグレード前に利用者 ID と
//! 部屋 ID を検証し、その後ソケットを送信タスク（送信キュー → ソケット）と
//! 受信タスク（ソケット → 同期サーバー）に分割します。

use std::sync::Arc;

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    domain::{Connection, RoomId, UserProfile},
    ui::state::AppState,
    usecase::{ConnectError, SyncServer, parse_room_id},
};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Trusted identity forwarded by the upstream authentication layer
    pub user_id: Option<String>,
}

/// `GET /space/ws/{id}`
pub async fn presence_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response, StatusCode> {
    upgrade(
        ws,
        Arc::clone(&state.presence),
        id,
        query,
        state.outbound_queue_capacity,
    )
    .await
}

/// `GET /whiteboard/ws/{space_id}`
pub async fn whiteboard_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(space_id): Path<String>,
    Query(query): Query<ConnectQuery>,
) -> Result<Response, StatusCode> {
    upgrade(
        ws,
        Arc::clone(&state.whiteboard),
        space_id,
        query,
        state.outbound_queue_capacity,
    )
    .await
}

async fn upgrade<S: SyncServer>(
    ws: WebSocketUpgrade,
    server: Arc<S>,
    raw_room_id: String,
    query: ConnectQuery,
    outbound_queue_capacity: usize,
) -> Result<Response, StatusCode> {
    let room_id = parse_room_id(raw_room_id).map_err(|e| reject(server.kind(), &e))?;
    let profile = server
        .authenticate(query.user_id.as_deref())
        .await
        .map_err(|e| reject(server.kind(), &e))?;

    tracing::info!(
        "User '{}' connecting to {} room '{}'",
        profile.id,
        server.kind(),
        room_id
    );
    Ok(ws
        .on_upgrade(move |socket| {
            handle_socket(socket, server, room_id, profile, outbound_queue_capacity)
        })
        .into_response())
}

fn reject(kind: &str, error: &ConnectError) -> StatusCode {
    let status = status_for(error);
    tracing::warn!("Rejected {} connection ({}): {}", kind, status, error);
    status
}

fn status_for(error: &ConnectError) -> StatusCode {
    match error {
        ConnectError::MissingIdentity | ConnectError::UnknownUser(_) => StatusCode::UNAUTHORIZED,
        ConnectError::InvalidRoom(_) => StatusCode::BAD_REQUEST,
        ConnectError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Spawns a task that receives messages from the rx channel and pushes them to the WebSocket sender.
///
/// This function handles the outbound message flow: messages fanned out to this
/// connection (via rx channel) are written to the WebSocket in queue order.
///
/// # Arguments
///
/// * `rx` - Bounded receiver of the connection's outbound queue
/// * `sender` - WebSocket sink to send messages to this client
///
/// # Returns
///
/// A `JoinHandle` for the spawned task
fn pusher_loop(
    mut rx: mpsc::Receiver<String>,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    })
}

async fn handle_socket<S: SyncServer>(
    socket: WebSocket,
    server: Arc<S>,
    room_id: RoomId,
    profile: UserProfile,
    outbound_queue_capacity: usize,
) {
    let (sender, mut receiver) = socket.split();

    let (tx, rx) = mpsc::channel(outbound_queue_capacity);
    let session = Arc::new(server.join(room_id, profile, Connection::new(tx)).await);

    // Spawn a task to push queued messages to this client
    let mut send_task = pusher_loop(rx, sender);

    // Spawn a task to receive messages from this client
    let recv_server = Arc::clone(&server);
    let recv_session = Arc::clone(&session);
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!("WebSocket error: {}", e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    recv_server
                        .handle_inbound(&recv_session, text.as_str())
                        .await;
                }
                Message::Close(_) => break,
                // Ping/pong is handled automatically by the WebSocket protocol
                _ => {}
            }
        }
    });

    // If any one of the tasks completes, abort the other
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    server.leave(&session).await;
}
