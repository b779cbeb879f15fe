//! UseCase: Whiteboard 部屋の同期
//!
//! シーンは後勝ちで丸ごと置き換えられ、遅延保存（`PersistenceScheduler`）で
//! 永続ストアに書き込まれます。最後の参加者が退出した部屋は閉鎖され、
//! 閉鎖時点のシーンを即座に保存してから削除されます。

use std::sync::Arc;

use async_trait::async_trait;
use hearth_shared::time::Clock;

use crate::{
    domain::{
        BusChannel, BusError, BusMessage, BusSubscription, ClusterBus, Connection, ConnectionId,
        PersistenceStore, PresenceBus, RoomId, RoomLifecycle, Scene, SpaceId, UserProfile,
        WhiteboardRoom,
    },
    infrastructure::{
        dto::websocket::{
            ParticipantsMessage, SceneMessage, WhiteboardEvent, normalize_whiteboard_inbound,
        },
        repository::{RoomRegistry, SharedRoom},
    },
};

use super::{
    error::ConnectError,
    persistence_scheduler::PersistenceScheduler,
    sync_server::{SyncServer, resolve_user},
};

/// Whiteboard 部屋に参加している 1 接続
pub struct WhiteboardSession {
    pub room_id: RoomId,
    pub connection_id: ConnectionId,
    pub display_name: String,
    room: SharedRoom<WhiteboardRoom>,
}

/// Whiteboard 部屋の同期サーバー
pub struct WhiteboardSyncServer {
    registry: RoomRegistry<WhiteboardRoom>,
    bus: Arc<dyn ClusterBus>,
    pusher: Arc<dyn PresenceBus>,
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    scheduler: PersistenceScheduler,
}

impl WhiteboardSyncServer {
    pub fn new(
        bus: Arc<dyn ClusterBus>,
        pusher: Arc<dyn PresenceBus>,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
        scheduler: PersistenceScheduler,
    ) -> Self {
        Self {
            registry: RoomRegistry::new(),
            bus,
            pusher,
            store,
            clock,
            scheduler,
        }
    }

    /// サーバーを生成し、バスの購読ループを開始する
    pub async fn start(
        bus: Arc<dyn ClusterBus>,
        pusher: Arc<dyn PresenceBus>,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
        scheduler: PersistenceScheduler,
    ) -> Result<Arc<Self>, BusError> {
        let server = Arc::new(Self::new(bus, pusher, store, clock, scheduler));
        let subscription = server.bus.subscribe(&BusChannel::WHITEBOARD).await?;
        tokio::spawn(Arc::clone(&server).run_bus_loop(subscription));
        Ok(server)
    }

    async fn run_bus_loop(self: Arc<Self>, mut subscription: BusSubscription) {
        tracing::info!("Whiteboard bus loop started");
        while let Some(message) = subscription.recv().await {
            self.deliver(message).await;
        }
        tracing::warn!("Whiteboard bus subscription ended");
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

    /// 保存が予約されている全ての部屋を即座に保存する（シャットダウン時）
    pub async fn flush_all(&self) -> usize {
        let mut flushed = 0;
        for (_, room) in self.registry.rooms().await {
            if self.scheduler.flush_if_scheduled(&room).await {
                flushed += 1;
            }
        }
        if flushed > 0 {
            tracing::info!("Flushed {} pending whiteboard saves", flushed);
        }
        flushed
    }

    /// 永続ストアからシーンを読み込んで部屋を作る（失敗時は空のシーン）
    async fn hydrate(&self, room_id: RoomId) -> WhiteboardRoom {
        let space_id = SpaceId::from_room_id(&room_id);
        let scene = if space_id.is_durable() {
            match self.store.load_whiteboard(space_id).await {
                Ok(Some(scene)) => scene,
                Ok(None) => {
                    tracing::debug!("No saved whiteboard for space '{}'", space_id);
                    Scene::default()
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load whiteboard of space '{}', starting empty: {}",
                        space_id,
                        e
                    );
                    Scene::default()
                }
            }
        } else {
            Scene::default()
        };
        WhiteboardRoom::new(room_id, space_id, scene)
    }

    async fn publish_participants(&self, room_id: &RoomId, participants: Vec<String>) {
        let message = ParticipantsMessage::new(room_id, participants);
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode participants of '{}': {}", room_id, e);
                return;
            }
        };
        if let Err(e) = self
            .bus
            .publish(BusChannel::WhiteboardParticipants, payload)
            .await
        {
            tracing::error!("Failed to publish participants of '{}': {}", room_id, e);
        }
    }

    /// バスから受信したメッセージを部屋のローカル接続へ配信する
    ///
    /// `scene-update` は部屋のシーンを置き換えて保存を予約し、
    /// どの type のメッセージも受信したままの形で転送します。
    pub async fn deliver(&self, message: BusMessage) {
        let event = match WhiteboardEvent::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping message on '{}': {}", message.channel, e);
                return;
            }
        };
        let Ok(room_id) = RoomId::new(event.room_id().to_string()) else {
            tracing::warn!("Dropping message for invalid room '{}'", event.room_id());
            return;
        };
        let Some(room) = self.registry.get(&room_id).await else {
            return;
        };

        let targets = {
            let mut board = room.lock().await;
            if board.is_closed() {
                return;
            }
            if let WhiteboardEvent::SceneUpdate(update) = event {
                board.replace_scene(
                    Scene::new(update.elements, update.app_state),
                    self.clock.now(),
                );
                self.scheduler.schedule(&room, &mut board);
            }
            board.connection_ids()
        };
        self.pusher.fan_out(&targets, &message.payload).await;
    }
}

#[async_trait]
impl SyncServer for WhiteboardSyncServer {
    type Session = WhiteboardSession;

    fn kind(&self) -> &'static str {
        "whiteboard"
    }

    async fn authenticate(&self, user_id: Option<&str>) -> Result<UserProfile, ConnectError> {
        resolve_user(self.store.as_ref(), user_id).await
    }

    async fn join(
        &self,
        room_id: RoomId,
        profile: UserProfile,
        connection: Connection,
    ) -> WhiteboardSession {
        let connection_id = connection.id;
        let display_name = profile.display_name().to_string();
        self.pusher.register(connection).await;

        let (room, mut board) = self
            .registry
            .enter(&room_id, || self.hydrate(room_id.clone()))
            .await;
        board.add_participant(connection_id, display_name.clone());

        // 現在のシーンを部屋のロック下で送る
        match serde_json::to_string(&SceneMessage::new(&room_id, board.scene())) {
            Ok(payload) => {
                if let Err(e) = self.pusher.push_to(&connection_id, &payload).await {
                    tracing::warn!("Failed to send scene to '{}': {}", connection_id, e);
                }
            }
            Err(e) => tracing::error!("Failed to encode scene of '{}': {}", room_id, e),
        }
        let participants = board.participant_names();
        drop(board);

        tracing::info!(
            "'{}' joined whiteboard room '{}'",
            display_name,
            room_id
        );
        self.publish_participants(&room_id, participants).await;

        WhiteboardSession {
            room_id,
            connection_id,
            display_name,
            room,
        }
    }

    async fn handle_inbound(&self, session: &WhiteboardSession, payload: &str) {
        let normalized = match normalize_whiteboard_inbound(payload, &session.room_id) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::warn!(
                    "Failed to parse whiteboard message from '{}': {}",
                    session.display_name,
                    e
                );
                return;
            }
        };
        if let Err(e) = self
            .bus
            .publish(BusChannel::WhiteboardUpdates, normalized)
            .await
        {
            tracing::error!(
                "Failed to publish whiteboard update of '{}': {}",
                session.room_id,
                e
            );
        }
    }

    async fn leave(&self, session: &WhiteboardSession) {
        let (now_empty, participants) = {
            let mut board = session.room.lock().await;
            board.remove_participant(&session.connection_id);
            (board.is_empty(), board.participant_names())
        };
        self.pusher.unregister(&session.connection_id).await;
        tracing::info!(
            "'{}' left whiteboard room '{}'",
            session.display_name,
            session.room_id
        );

        if !now_empty {
            self.publish_participants(&session.room_id, participants)
                .await;
            return;
        }

        // 最後の参加者: 部屋を閉鎖してその時点のシーンを保存してから削除する
        if self.scheduler.close_and_flush(&session.room).await {
            self.registry
                .remove_if_same(&session.room_id, &session.room)
                .await;
            tracing::info!("Whiteboard room '{}' closed", session.room_id);
        } else {
            tracing::debug!(
                "Whiteboard room '{}' was re-joined during the final save",
                session.room_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{MockPersistenceStore, PlayerStatus, StoreError, UserId},
        infrastructure::{
            cluster_bus::LocalClusterBus, message_pusher::WebSocketPresenceBus,
            repository::InMemoryPersistenceStore,
        },
        usecase::persistence_scheduler::DEFAULT_SAVE_DEBOUNCE,
    };
    use hearth_shared::time::FixedClock;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};

    /// 保存を `release` が呼ばれるまで止めておくストア
    struct GatedStore {
        inner: InMemoryPersistenceStore,
        saving: Notify,
        release: Notify,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: InMemoryPersistenceStore::new(),
                saving: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl PersistenceStore for GatedStore {
        async fn load_whiteboard(&self, space_id: SpaceId) -> Result<Option<Scene>, StoreError> {
            self.inner.load_whiteboard(space_id).await
        }

        async fn save_whiteboard(&self, space_id: SpaceId, scene: &Scene) -> Result<(), StoreError> {
            self.saving.notify_one();
            self.release.notified().await;
            self.inner.save_whiteboard(space_id, scene).await
        }

        async fn lookup_user(&self, user_id: &UserId) -> Result<Option<UserProfile>, StoreError> {
            self.inner.lookup_user(user_id).await
        }
    }

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - 参加時に現在のシーンと参加者一覧が届くこと
    // - シーンの更新が部屋の全員に届き、遅延保存で 1 回だけ保存されること
    // - 最後の参加者の退出で即座に保存され、待機中のタイマーが取り消されること
    // - 最後の保存の最中に届いた更新は破棄され、保存済みのシーンと食い違わないこと
    // - 永続ストアの障害時に空のシーンで参加できること
    //
    // 【どのようにテストするか】
    // - 時間を停止した状態（start_paused）で実行し、遅延保存のタイミングを制御する
    // ========================================

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    async fn server_with(store: Arc<dyn PersistenceStore>) -> Arc<WhiteboardSyncServer> {
        WhiteboardSyncServer::start(
            Arc::new(LocalClusterBus::new()),
            Arc::new(WebSocketPresenceBus::new()),
            store.clone(),
            Arc::new(FixedClock::from_millis(0)),
            PersistenceScheduler::new(store, DEFAULT_SAVE_DEBOUNCE),
        )
        .await
        .unwrap()
    }

    fn profile(id: &str, nickname: &str) -> UserProfile {
        UserProfile {
            id: UserId::new(id.to_string()).unwrap(),
            name: format!("{} full name", nickname),
            nickname: nickname.to_string(),
            status: PlayerStatus::Online,
        }
    }

    async fn connect(
        server: &WhiteboardSyncServer,
        nickname: &str,
        room: &str,
    ) -> (WhiteboardSession, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(128);
        let session = server
            .join(
                RoomId::new(room.to_string()).unwrap(),
                profile(nickname, nickname),
                Connection::new(tx),
            )
            .await;
        (session, rx)
    }

    async fn next_of_type(rx: &mut mpsc::Receiver<String>, kind: &str) -> Value {
        loop {
            let payload = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
                .await
                .expect("timed out waiting for message")
                .expect("channel closed");
            let message: Value = serde_json::from_str(&payload).unwrap();
            if message["type"] == kind {
                return message;
            }
        }
    }

    fn scene_request(n: usize) -> String {
        json!({"elements": [{"id": format!("shape-{}", n)}], "appState": {"zoom": n}}).to_string()
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_receives_scene_and_participants() {
        // テスト項目: 参加時に現在のシーンと参加者一覧が届く
        // given (前提条件):
        let store = Arc::new(InMemoryPersistenceStore::new());
        store
            .insert_whiteboard(SpaceId::new(7), Scene::new(json!([{"id": "saved"}]), json!({})))
            .await;
        let server = server_with(store).await;

        // when (操作):
        let (_alice, mut alice_rx) = connect(&server, "alice", "7").await;

        // then (期待する結果):
        let scene = next_of_type(&mut alice_rx, "scene-update").await;
        assert_eq!(scene["elements"], json!([{"id": "saved"}]));
        assert_eq!(scene["roomId"], "7");
        let participants = next_of_type(&mut alice_rx, "participants-update").await;
        assert_eq!(participants["participants"], json!(["alice"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_with_failing_store_starts_empty() {
        // テスト項目: 永続ストアの読み込みに失敗しても空のシーンで参加できる
        // given (前提条件):
        let mut store = MockPersistenceStore::new();
        store
            .expect_load_whiteboard()
            .returning(|_| Err(StoreError::Backend("database is down".to_string())));
        let server = server_with(Arc::new(store)).await;

        // when (操作):
        let (_alice, mut alice_rx) = connect(&server, "alice", "7").await;

        // then (期待する結果):
        let scene = next_of_type(&mut alice_rx, "scene-update").await;
        assert_eq!(scene["elements"], json!([]));
        assert_eq!(scene["appState"], json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_updates_are_relayed_and_saved_once() {
        // テスト項目: 1 秒以内の 5 回の更新は全員に届き、遅延時間後に 5 回目の内容で 1 回だけ保存される
        // given (前提条件):
        let store = Arc::new(InMemoryPersistenceStore::new());
        let server = server_with(store.clone()).await;
        let (alice, _alice_rx) = connect(&server, "alice", "7").await;
        let (_bob, mut bob_rx) = connect(&server, "bob", "7").await;
        next_of_type(&mut bob_rx, "scene-update").await;

        // when (操作):
        for n in 1..=5 {
            server.handle_inbound(&alice, &scene_request(n)).await;
            next_of_type(&mut bob_rx, "scene-update").await;
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        settle(DEFAULT_SAVE_DEBOUNCE).await;

        // then (期待する結果):
        let saves = store.saves().await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0, SpaceId::new(7));
        assert_eq!(saves[0].1.elements, json!([{"id": "shape-5"}]));
        assert_eq!(saves[0].1.app_state, json!({"zoom": 5}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_leave_flushes_immediately_without_double_save() {
        // テスト項目: 最後の参加者の退出で即座に保存され、待機中のタイマーによる二重保存は起きない
        // given (前提条件):
        let store = Arc::new(InMemoryPersistenceStore::new());
        let server = server_with(store.clone()).await;
        let (alice, mut alice_rx) = connect(&server, "alice", "7").await;
        server.handle_inbound(&alice, &scene_request(1)).await;
        server.handle_inbound(&alice, &scene_request(2)).await;
        next_of_type(&mut alice_rx, "scene-update").await;
        next_of_type(&mut alice_rx, "scene-update").await;
        next_of_type(&mut alice_rx, "scene-update").await;

        // when (操作):
        server.leave(&alice).await;

        // then (期待する結果):
        let saves = store.saves().await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1.elements, json!([{"id": "shape-2"}]));
        assert!(server.room_summaries().await.is_empty());

        settle(DEFAULT_SAVE_DEBOUNCE * 2).await;
        assert_eq!(store.saves().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_messages_do_not_touch_scene() {
        // テスト項目: scene-update 以外のメッセージはそのまま中継され、保存は予約されない
        // given (前提条件):
        let store = Arc::new(InMemoryPersistenceStore::new());
        let server = server_with(store.clone()).await;
        let (alice, _alice_rx) = connect(&server, "alice", "7").await;
        let (_bob, mut bob_rx) = connect(&server, "bob", "7").await;

        // when (操作):
        server
            .handle_inbound(&alice, r#"{"type":"pointer","x":3,"y":4}"#)
            .await;

        // then (期待する結果):
        let pointer = next_of_type(&mut bob_rx, "pointer").await;
        assert_eq!(pointer["x"], 3);
        assert_eq!(pointer["roomId"], "7");
        settle(DEFAULT_SAVE_DEBOUNCE).await;
        assert!(store.saves().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_participants_are_sorted_and_updated_on_leave() {
        // テスト項目: 参加者一覧はアルファベット順で、退出時にも更新される
        // given (前提条件):
        let store = Arc::new(InMemoryPersistenceStore::new());
        let server = server_with(store).await;
        let (_carol, mut carol_rx) = connect(&server, "carol", "7").await;
        next_of_type(&mut carol_rx, "participants-update").await;

        // when (操作):
        let (alice, _alice_rx) = connect(&server, "alice", "7").await;

        // then (期待する結果):
        let joined = next_of_type(&mut carol_rx, "participants-update").await;
        assert_eq!(joined["participants"], json!(["alice", "carol"]));

        // when (操作):
        server.leave(&alice).await;

        // then (期待する結果):
        let left = next_of_type(&mut carol_rx, "participants-update").await;
        assert_eq!(left["participants"], json!(["carol"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ephemeral_room_is_not_persisted() {
        // テスト項目: 数値でない部屋 ID（Space ID 0）のホワイトボードは保存されない
        // given (前提条件):
        let store = Arc::new(InMemoryPersistenceStore::new());
        let server = server_with(store.clone()).await;
        let (alice, mut alice_rx) = connect(&server, "alice", "lobby").await;

        // when (操作):
        server.handle_inbound(&alice, &scene_request(1)).await;
        next_of_type(&mut alice_rx, "scene-update").await;
        next_of_type(&mut alice_rx, "scene-update").await;
        server.leave(&alice).await;
        settle(DEFAULT_SAVE_DEBOUNCE).await;

        // then (期待する結果):
        assert!(store.saves().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_saves_pending_rooms() {
        // テスト項目: シャットダウン時の一括保存で、保存が予約されている部屋が即座に保存される
        // given (前提条件):
        let store = Arc::new(InMemoryPersistenceStore::new());
        let server = server_with(store.clone()).await;
        let (alice, mut alice_rx) = connect(&server, "alice", "7").await;
        let (_bob, _bob_rx) = connect(&server, "bob", "8").await;
        server.handle_inbound(&alice, &scene_request(1)).await;
        next_of_type(&mut alice_rx, "scene-update").await;
        next_of_type(&mut alice_rx, "scene-update").await;

        // when (操作):
        let flushed = server.flush_all().await;

        // then (期待する結果):
        assert_eq!(flushed, 1);
        assert_eq!(store.saves().await.len(), 1);
        assert_eq!(store.saves().await[0].0, SpaceId::new(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_during_final_save_does_not_diverge_from_store() {
        // テスト項目: 最後の保存の最中に届いた更新は閉鎖済みの部屋で破棄され、
        //             再参加時のシーンは保存済みのシーンと一致する
        // given (前提条件):
        let store = Arc::new(GatedStore::new());
        let server = server_with(store.clone()).await;
        let (alice, mut alice_rx) = connect(&server, "alice", "7").await;
        server.handle_inbound(&alice, &scene_request(1)).await;
        next_of_type(&mut alice_rx, "scene-update").await;
        next_of_type(&mut alice_rx, "scene-update").await;

        // when (操作):
        let leaving = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.leave(&alice).await })
        };
        store.saving.notified().await;
        server
            .deliver(BusMessage {
                channel: BusChannel::WhiteboardUpdates,
                payload: json!({
                    "type": "scene-update",
                    "elements": [{"id": "late"}],
                    "appState": {},
                    "roomId": "7",
                })
                .to_string(),
            })
            .await;
        store.release.notify_one();
        leaving.await.unwrap();
        settle(DEFAULT_SAVE_DEBOUNCE * 2).await;

        // then (期待する結果):
        let saves = store.inner.saves().await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1.elements, json!([{"id": "shape-1"}]));
        assert!(server.room_summaries().await.is_empty());

        let (_bob, mut bob_rx) = connect(&server, "bob", "7").await;
        let scene = next_of_type(&mut bob_rx, "scene-update").await;
        assert_eq!(scene["elements"], saves[0].1.elements);
    }
}
