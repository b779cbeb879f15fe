//! Entity 定義
//!
//! 部屋（Presence / Whiteboard）と、その中で管理される Player・チャット履歴・
//! ホワイトボードのシーンを表現します。
//!
//! 部屋のエンティティ自体はロックを持ちません。`RoomRegistry` が
//! `Arc<Mutex<_>>` で包んで共有し、全ての変更はその部屋のロック下で行われます。

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::{sync::Mutex, task::AbortHandle};

use super::value_object::{ConnectionId, PlayerStatus, Position, RoomId, SpaceId, UserId};

/// 部屋ごとに保持するチャット履歴の上限
pub const CHAT_HISTORY_CAPACITY: usize = 50;

/// 部屋のライフサイクル
///
/// `RoomRegistry` はこの trait を通じて「空かどうか」「閉鎖済みかどうか」を判定し、
/// 参加と削除の競合を調停します。
pub trait RoomLifecycle: Send + 'static {
    /// 接続中のクライアントがいないか
    fn is_empty(&self) -> bool;

    /// 削除が確定しているか（閉鎖済みの部屋には参加できない）
    fn is_closed(&self) -> bool;

    /// 部屋を閉鎖済みにする
    fn close(&mut self);
}

/// 永続ストアから取得した利用者情報
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub nickname: String,
    pub status: PlayerStatus,
}

impl UserProfile {
    /// 表示名（ニックネームが未設定なら名前）
    pub fn display_name(&self) -> &str {
        if self.nickname.trim().is_empty() {
            &self.name
        } else {
            &self.nickname
        }
    }
}

/// Presence 部屋の参加者
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: UserId,
    pub name: String,
    pub nickname: String,
    pub position: Position,
    pub status: PlayerStatus,
}

impl Player {
    /// 利用者情報から初期位置に Player を生成
    pub fn spawn(profile: &UserProfile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            nickname: profile.nickname.clone(),
            position: Position::default(),
            status: profile.status,
        }
    }
}

/// チャットメッセージ（生成後は不変、永続化しない）
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub time: DateTime<Utc>,
    pub author: String,
    pub content: String,
}

/// 容量固定のチャット履歴（古いものから破棄される）
#[derive(Debug, Clone)]
pub struct ChatHistory {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// メッセージを追加し、上限を超えた分を古い順に破棄する
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new(CHAT_HISTORY_CAPACITY)
    }
}

/// 参加直後に新規クライアントへ送るスナップショット
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSnapshot {
    /// 自分以外の在室 Player
    pub others: Vec<Player>,
    /// チャット履歴（古い順）
    pub history: Vec<ChatMessage>,
}

/// Presence 部屋（位置・在席・チャット）
#[derive(Debug)]
pub struct PresenceRoom {
    id: RoomId,
    players: HashMap<ConnectionId, Player>,
    chat: ChatHistory,
    closed: bool,
}

impl PresenceRoom {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            players: HashMap::new(),
            chat: ChatHistory::default(),
            closed: false,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Player を登録し、登録前の在室者（自分を除く）とチャット履歴を返す
    pub fn join(&mut self, connection: ConnectionId, player: Player) -> JoinSnapshot {
        let mut others: Vec<Player> = self
            .players
            .values()
            .filter(|existing| existing.id != player.id)
            .cloned()
            .collect();
        others.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));

        let history = self.chat.to_vec();
        self.players.insert(connection, player);

        JoinSnapshot { others, history }
    }

    pub fn leave(&mut self, connection: &ConnectionId) -> Option<Player> {
        self.players.remove(connection)
    }

    pub fn player(&self, connection: &ConnectionId) -> Option<&Player> {
        self.players.get(connection)
    }

    /// 接続の所有する Player の位置を更新し、更新後の値を返す
    pub fn move_player(&mut self, connection: &ConnectionId, position: Position) -> Option<Player> {
        let player = self.players.get_mut(connection)?;
        player.position = position;
        Some(player.clone())
    }

    /// 指定ユーザーの全ての Player のステータスを更新し、更新した Player を返す
    pub fn set_status(&mut self, user_id: &UserId, status: PlayerStatus) -> Vec<Player> {
        self.players
            .values_mut()
            .filter(|player| &player.id == user_id)
            .map(|player| {
                player.status = status;
                player.clone()
            })
            .collect()
    }

    pub fn record_chat(&mut self, message: ChatMessage) {
        self.chat.push(message);
    }

    pub fn chat_history(&self) -> &ChatHistory {
        &self.chat
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.players.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }
}

impl RoomLifecycle for PresenceRoom {
    fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// ホワイトボードのシーン（中身は不透明な JSON）
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub elements: Value,
    pub app_state: Value,
}

impl Scene {
    pub fn new(elements: Value, app_state: Value) -> Self {
        Self {
            elements,
            app_state,
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            elements: json!([]),
            app_state: json!({}),
        }
    }
}

/// 待機中の遅延保存タイマー
#[derive(Debug)]
struct PendingSave {
    generation: u64,
    abort: AbortHandle,
}

/// Whiteboard 部屋
///
/// `save_scheduled()` はタイマーが待機中である場合に限り true になります。
/// タイマーハンドルそのものをフラグとして保持するため、両者がずれることはありません。
#[derive(Debug)]
pub struct WhiteboardRoom {
    id: RoomId,
    space_id: SpaceId,
    participants: HashMap<ConnectionId, String>,
    scene: Scene,
    last_modified: Option<DateTime<Utc>>,
    pending_save: Option<PendingSave>,
    save_generation: u64,
    flush_lock: Arc<Mutex<()>>,
    closed: bool,
}

impl WhiteboardRoom {
    pub fn new(id: RoomId, space_id: SpaceId, scene: Scene) -> Self {
        Self {
            id,
            space_id,
            participants: HashMap::new(),
            scene,
            last_modified: None,
            pending_save: None,
            save_generation: 0,
            flush_lock: Arc::new(Mutex::new(())),
            closed: false,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    pub fn add_participant(&mut self, connection: ConnectionId, display_name: String) {
        self.participants.insert(connection, display_name);
    }

    pub fn remove_participant(&mut self, connection: &ConnectionId) -> Option<String> {
        self.participants.remove(connection)
    }

    /// 参加者の表示名（アルファベット順）
    pub fn participant_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.participants.values().cloned().collect();
        names.sort();
        names
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.participants.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// シーンを丸ごと置き換える（後勝ち、マージしない）
    pub fn replace_scene(&mut self, scene: Scene, now: DateTime<Utc>) {
        self.scene = scene;
        self.last_modified = Some(now);
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn save_scheduled(&self) -> bool {
        self.pending_save.is_some()
    }

    /// 保存タイマーを張る
    ///
    /// 既にタイマーが待機中なら何もせず false を返します。
    /// `spawn` には世代番号が渡され、起動したタイマーの `AbortHandle` を返します。
    pub fn arm_save(&mut self, spawn: impl FnOnce(u64) -> AbortHandle) -> bool {
        if self.pending_save.is_some() {
            return false;
        }
        self.save_generation += 1;
        let generation = self.save_generation;
        let abort = spawn(generation);
        self.pending_save = Some(PendingSave { generation, abort });
        true
    }

    /// 発火したタイマーが現役であれば保存フラグを下ろし、保存すべき内容を返す
    pub fn take_due_save(&mut self, generation: u64) -> Option<(SpaceId, Scene)> {
        match &self.pending_save {
            Some(pending) if pending.generation == generation && !self.closed => {
                self.pending_save = None;
                Some((self.space_id, self.scene.clone()))
            }
            _ => None,
        }
    }

    /// 待機中のタイマーを取り消す。取り消した場合は true
    pub fn cancel_pending_save(&mut self) -> bool {
        match self.pending_save.take() {
            Some(pending) => {
                pending.abort.abort();
                true
            }
            None => false,
        }
    }

    /// 現在のシーンと Space ID
    pub fn snapshot(&self) -> (SpaceId, Scene) {
        (self.space_id, self.scene.clone())
    }

    /// この部屋の保存処理を直列化するためのロック
    pub fn flush_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.flush_lock)
    }
}

impl RoomLifecycle for WhiteboardRoom {
    fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
        self.cancel_pending_save();
    }
}
