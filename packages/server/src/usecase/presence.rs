//! UseCase: Presence 部屋（位置・在席・チャット）の同期
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - 参加時の追いつき（existing_players / chat_history）と player_joined の配信
//! - 位置更新・チャットがバス経由で部屋の全員に届くこと
//! - ステータス更新が対象ユーザーのいる部屋にだけ届くこと
//! - 退出時の player_left の配信と、空になった部屋の削除
//!
//! ### どのような状況を想定しているか
//! - 正常系：2 人のクライアントのやり取り
//! - 異常系：壊れた JSON・未知の type（接続は維持される）
//! - エッジケース：部屋に自分しかいない、チャット履歴が空

use std::sync::Arc;

use async_trait::async_trait;
use hearth_shared::time::Clock;

use crate::{
    domain::{
        BusChannel, BusError, BusMessage, BusSubscription, ClusterBus, Connection, ConnectionId,
        PersistenceStore, Player, PlayerStatus, PresenceBus, PresenceRoom, RoomId, RoomLifecycle,
        UserId, UserProfile,
    },
    infrastructure::{
        dto::websocket::{
            BusEvent, ChatMessageDto, ChatPublishedContent, ClientEvent, ClientRequest,
            DecodeError, Envelope, EnvelopeEvent, PlayerDto, PlayerJoinedContent, PlayerLeftContent,
            PlayerStatusContent, PositionContent, StatusChangeContent,
        },
        repository::{RoomRegistry, SharedRoom},
    },
};

use super::{
    error::ConnectError,
    sync_server::{SyncServer, resolve_user},
};

/// Presence 部屋に参加している 1 接続
pub struct PresenceSession {
    pub room_id: RoomId,
    pub connection_id: ConnectionId,
    pub profile: UserProfile,
    room: SharedRoom<PresenceRoom>,
}

/// Presence 部屋の同期サーバー
pub struct PresenceSyncServer {
    registry: RoomRegistry<PresenceRoom>,
    bus: Arc<dyn ClusterBus>,
    pusher: Arc<dyn PresenceBus>,
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
}

impl PresenceSyncServer {
    pub fn new(
        bus: Arc<dyn ClusterBus>,
        pusher: Arc<dyn PresenceBus>,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry: RoomRegistry::new(),
            bus,
            pusher,
            store,
            clock,
        }
    }

    /// サーバーを生成し、バスの購読ループを開始する
    pub async fn start(
        bus: Arc<dyn ClusterBus>,
        pusher: Arc<dyn PresenceBus>,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, BusError> {
        let server = Arc::new(Self::new(bus, pusher, store, clock));
        let subscription = server.bus.subscribe(&BusChannel::PRESENCE).await?;
        tokio::spawn(Arc::clone(&server).run_bus_loop(subscription));
        Ok(server)
    }

    async fn run_bus_loop(self: Arc<Self>, mut subscription: BusSubscription) {
        tracing::info!("Presence bus loop started");
        while let Some(message) = subscription.recv().await {
            self.deliver(message).await;
        }
        tracing::warn!("Presence bus subscription ended");
    }

    /// 部屋 ID と参加者数の一覧
    pub async fn room_summaries(&self) -> Vec<(RoomId, usize)> {
        let mut summaries = Vec::new();
        for (id, room) in self.registry.rooms().await {
            let room = room.lock().await;
            if !room.is_closed() {
                summaries.push((id, room.len()));
            }
        }
        summaries.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        summaries
    }

    // ========================================
    // 送信
    // ========================================

    async fn publish(&self, channel: BusChannel, event: BusEvent) {
        let payload = match Envelope::new(event, self.clock.now()).encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode event for '{}': {}", channel, e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(channel, payload).await {
            tracing::error!("Failed to publish to '{}': {}", channel, e);
        }
    }

    fn encode_for_client(&self, event: ClientEvent) -> Option<String> {
        let kind = event.kind();
        match Envelope::new(event, self.clock.now()).encode() {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::error!("Failed to encode '{}': {}", kind, e);
                None
            }
        }
    }

    async fn push(&self, connection_id: &ConnectionId, event: ClientEvent) {
        let Some(payload) = self.encode_for_client(event) else {
            return;
        };
        if let Err(e) = self.pusher.push_to(connection_id, &payload).await {
            tracing::warn!("Failed to push to connection '{}': {}", connection_id, e);
        }
    }

    // ========================================
    // バスからの配信
    // ========================================

    /// バスから受信したメッセージを部屋のローカル接続へ配信する
    pub async fn deliver(&self, message: BusMessage) {
        let envelope = match Envelope::<BusEvent>::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Dropping message on '{}': {}", message.channel, e);
                return;
            }
        };

        match envelope.event {
            BusEvent::StatusUpdate(change) => self.apply_status_update(change).await,
            BusEvent::ChatMessage(chat) => self.deliver_chat(chat).await,
            event => {
                // position_update / player_joined / player_left はそのまま転送
                let Some(space_id) = event.space_id() else {
                    return;
                };
                if let Some(targets) = self.local_targets(space_id).await {
                    self.pusher.fan_out(&targets, &message.payload).await;
                }
            }
        }
    }

    /// 部屋のローカル接続の一覧（部屋がこのプロセスに無ければ None）
    async fn local_targets(&self, space_id: &str) -> Option<Vec<ConnectionId>> {
        let room_id = RoomId::new(space_id.to_string()).ok()?;
        let room = self.registry.get(&room_id).await?;
        let room = room.lock().await;
        if room.is_closed() {
            return None;
        }
        Some(room.connection_ids())
    }

    async fn deliver_chat(&self, chat: ChatPublishedContent) {
        let Ok(room_id) = RoomId::new(chat.space_id.clone()) else {
            tracing::warn!("Dropping chat for invalid room '{}'", chat.space_id);
            return;
        };
        let Some(room) = self.registry.get(&room_id).await else {
            return;
        };

        let message = chat.into_chat_message(self.clock.now());
        let targets = {
            let mut room = room.lock().await;
            if room.is_closed() {
                return;
            }
            room.record_chat(message.clone());
            room.connection_ids()
        };

        let event = ClientEvent::ChatMessage(ChatMessageDto::from(message));
        if let Some(payload) = self.encode_for_client(event) {
            self.pusher.fan_out(&targets, &payload).await;
        }
    }

    /// 全ての部屋を走査し、対象ユーザーの Player のステータスを更新して通知する
    async fn apply_status_update(&self, change: StatusChangeContent) {
        let Some(user_id) = change.user_id() else {
            tracing::warn!("Dropping status update with empty user id");
            return;
        };

        for (room_id, room) in self.registry.rooms().await {
            let (updated, targets) = {
                let mut room = room.lock().await;
                if room.is_closed() {
                    continue;
                }
                let updated = room.set_status(&user_id, change.status);
                (updated, room.connection_ids())
            };

            // 同じユーザーが複数接続していても通知は部屋ごとに 1 回
            let Some(player) = updated.first() else {
                continue;
            };
            tracing::debug!(
                "Status of '{}' in room '{}' changed to '{}'",
                user_id,
                room_id,
                change.status
            );
            let event = ClientEvent::StatusUpdate(PlayerStatusContent::from_player(player, &room_id));
            if let Some(payload) = self.encode_for_client(event) {
                self.pusher.fan_out(&targets, &payload).await;
            }
        }
    }
}

#[async_trait]
impl SyncServer for PresenceSyncServer {
    type Session = PresenceSession;

    fn kind(&self) -> &'static str {
        "presence"
    }

    async fn authenticate(&self, user_id: Option<&str>) -> Result<UserProfile, ConnectError> {
        resolve_user(self.store.as_ref(), user_id).await
    }

    async fn join(
        &self,
        room_id: RoomId,
        profile: UserProfile,
        connection: Connection,
    ) -> PresenceSession {
        let connection_id = connection.id;
        self.pusher.register(connection).await;

        let player = Player::spawn(&profile);
        let (room, mut guard) = self
            .registry
            .enter(&room_id, || {
                std::future::ready(PresenceRoom::new(room_id.clone()))
            })
            .await;

        // スナップショットの取得と送信を部屋のロック下で行い、
        // 以降の配信が必ずスナップショットの後に届くようにする
        let snapshot = guard.join(connection_id, player.clone());
        let others = snapshot
            .others
            .iter()
            .map(|other| PlayerDto::from_player(other, &room_id))
            .collect();
        self.push(&connection_id, ClientEvent::ExistingPlayers(others))
            .await;
        if !snapshot.history.is_empty() {
            let history = snapshot
                .history
                .into_iter()
                .map(ChatMessageDto::from)
                .collect();
            self.push(&connection_id, ClientEvent::ChatHistory(history))
                .await;
        }
        drop(guard);

        tracing::info!(
            "Player '{}' joined presence room '{}'",
            profile.id,
            room_id
        );
        self.publish(
            BusChannel::Events,
            BusEvent::PlayerJoined(PlayerJoinedContent::from_player(&player, &room_id)),
        )
        .await;

        PresenceSession {
            room_id,
            connection_id,
            profile,
            room,
        }
    }

    async fn handle_inbound(&self, session: &PresenceSession, payload: &str) {
        match ClientRequest::decode(payload) {
            Ok(ClientRequest::PositionUpdate { position }) => {
                let moved = session
                    .room
                    .lock()
                    .await
                    .move_player(&session.connection_id, position);
                if let Some(player) = moved {
                    self.publish(
                        BusChannel::Positions,
                        BusEvent::PositionUpdate(PositionContent::from_player(
                            &player,
                            &session.room_id,
                        )),
                    )
                    .await;
                }
            }
            Ok(ClientRequest::ChatMessage { content }) => {
                self.publish(
                    BusChannel::Chat,
                    BusEvent::ChatMessage(ChatPublishedContent::authored_by(
                        &session.profile,
                        &session.room_id,
                        content,
                    )),
                )
                .await;
            }
            Err(DecodeError::UnknownType(kind)) => {
                tracing::warn!("Unknown message type received: '{}'", kind);
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to parse message from '{}': {}",
                    session.profile.id,
                    e
                );
            }
        }
    }

    async fn leave(&self, session: &PresenceSession) {
        let player = session.room.lock().await.leave(&session.connection_id);
        if self
            .registry
            .retire_if_empty(&session.room_id, &session.room)
            .await
        {
            tracing::info!("Presence room '{}' is empty", session.room_id);
        }
        self.pusher.unregister(&session.connection_id).await;

        let Some(player) = player else {
            return;
        };
        tracing::info!(
            "Player '{}' left presence room '{}'",
            player.id,
            session.room_id
        );
        self.publish(
            BusChannel::Events,
            BusEvent::PlayerLeft(PlayerLeftContent::from_player(&player, &session.room_id)),
        )
        .await;
    }
}

/// ステータス変更をクラスタ全体に通知する
///
/// 永続ストアへの反映は呼び出し側（CRUD 層）の責務です。
pub async fn publish_status_update(
    bus: &dyn ClusterBus,
    clock: &dyn Clock,
    user_id: &UserId,
    status: PlayerStatus,
) -> Result<(), BusError> {
    let channel = BusChannel::StatusUpdates;
    let event = BusEvent::StatusUpdate(StatusChangeContent {
        user_id: user_id.as_str().to_string(),
        status,
    });
    let payload = Envelope::new(event, clock.now())
        .encode()
        .map_err(|e| BusError::Publish {
            channel: channel.as_str().to_string(),
            reason: e.to_string(),
        })?;
    bus.publish(channel, payload).await
}
