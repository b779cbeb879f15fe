//! WebSocket / クラスタバス上のメッセージ DTO
//!
//! Presence 系のメッセージは全て `{"type": ..., "content": ..., "time": ...}` の
//! Envelope に包まれます。デコードは「`type` の判別」と「`content` の解釈」の
//! 2 段階で行い、未知の `type` と壊れた `content` を区別します。
//!
//! Whiteboard 系のメッセージは Envelope を持たないフラットな JSON オブジェクトで、
//! 未知のフィールドはそのまま中継されます。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{PlayerStatus, Position, RoomId, Scene};

/// デコードエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// JSON として解釈できない、または必須フィールドが欠けている
    #[error("malformed message: {0}")]
    Malformed(String),
    /// 判別子が未知
    #[error("unknown message type: '{0}'")]
    UnknownType(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}

// ========================================
// Envelope
// ========================================

/// Envelope に載せられるイベントの集合（閉じたタグ付き共用体）
pub trait EnvelopeEvent: Sized {
    /// `type` フィールドの値
    fn kind(&self) -> &'static str;

    /// `content` フィールドの値
    fn to_content(&self) -> Result<Value, serde_json::Error>;

    /// `type` と `content` からイベントを復元
    fn from_parts(kind: &str, content: Value) -> Result<Self, DecodeError>;
}

/// ワイヤ上の Envelope（判別前）
#[derive(Debug, Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
    #[serde(default = "Utc::now")]
    time: DateTime<Utc>,
}

/// 型付きの Envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<E> {
    pub event: E,
    pub time: DateTime<Utc>,
}

impl<E: EnvelopeEvent> Envelope<E> {
    pub fn new(event: E, time: DateTime<Utc>) -> Self {
        Self { event, time }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let raw = RawEnvelope {
            kind: self.event.kind().to_string(),
            content: self.event.to_content()?,
            time: self.time,
        };
        serde_json::to_string(&raw)
    }

    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let raw: RawEnvelope = serde_json::from_str(payload)?;
        let event = E::from_parts(&raw.kind, raw.content)?;
        Ok(Self {
            event,
            time: raw.time,
        })
    }
}

fn content_of<T: DeserializeOwned>(content: Value) -> Result<T, DecodeError> {
    Ok(serde_json::from_value(content)?)
}

// ========================================
// Presence: バス上のイベント
// ========================================

/// `position_update` の content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionContent {
    pub player_id: String,
    pub space_id: String,
    pub position: Position,
    pub player_name: String,
    pub player_nickname: String,
    pub status: PlayerStatus,
}

/// `player_joined` の content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoinedContent {
    pub player_id: String,
    pub player_name: String,
    pub player_nickname: String,
    pub space_id: String,
    pub position: Position,
    pub status: PlayerStatus,
}

/// `player_left` の content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLeftContent {
    pub player_id: String,
    pub player_name: String,
    pub space_id: String,
    pub player_nickname: String,
}

/// バス上の `chat_message` の content（履歴への追加前）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPublishedContent {
    pub space_id: String,
    pub content: String,
    pub author: String,
}

/// バス上の `status_update` の content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeContent {
    pub user_id: String,
    pub status: PlayerStatus,
}

/// Presence 系のバスイベント
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    PositionUpdate(PositionContent),
    PlayerJoined(PlayerJoinedContent),
    PlayerLeft(PlayerLeftContent),
    ChatMessage(ChatPublishedContent),
    StatusUpdate(StatusChangeContent),
}

impl BusEvent {
    /// 配信先の部屋（`status_update` は部屋を持たない）
    pub fn space_id(&self) -> Option<&str> {
        match self {
            BusEvent::PositionUpdate(c) => Some(&c.space_id),
            BusEvent::PlayerJoined(c) => Some(&c.space_id),
            BusEvent::PlayerLeft(c) => Some(&c.space_id),
            BusEvent::ChatMessage(c) => Some(&c.space_id),
            BusEvent::StatusUpdate(_) => None,
        }
    }
}

impl EnvelopeEvent for BusEvent {
    fn kind(&self) -> &'static str {
        match self {
            BusEvent::PositionUpdate(_) => "position_update",
            BusEvent::PlayerJoined(_) => "player_joined",
            BusEvent::PlayerLeft(_) => "player_left",
            BusEvent::ChatMessage(_) => "chat_message",
            BusEvent::StatusUpdate(_) => "status_update",
        }
    }

    fn to_content(&self) -> Result<Value, serde_json::Error> {
        match self {
            BusEvent::PositionUpdate(c) => serde_json::to_value(c),
            BusEvent::PlayerJoined(c) => serde_json::to_value(c),
            BusEvent::PlayerLeft(c) => serde_json::to_value(c),
            BusEvent::ChatMessage(c) => serde_json::to_value(c),
            BusEvent::StatusUpdate(c) => serde_json::to_value(c),
        }
    }

    fn from_parts(kind: &str, content: Value) -> Result<Self, DecodeError> {
        match kind {
            "position_update" => Ok(BusEvent::PositionUpdate(content_of(content)?)),
            "player_joined" => Ok(BusEvent::PlayerJoined(content_of(content)?)),
            "player_left" => Ok(BusEvent::PlayerLeft(content_of(content)?)),
            "chat_message" => Ok(BusEvent::ChatMessage(content_of(content)?)),
            "status_update" => Ok(BusEvent::StatusUpdate(content_of(content)?)),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

// ========================================
// Presence: クライアントへ送るイベント
// ========================================

/// `existing_players` の要素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDto {
    pub id: String,
    pub name: String,
    pub space_id: String,
    pub nickname: String,
    pub position: Position,
    pub status: PlayerStatus,
}

/// クライアントへ送るチャットメッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageDto {
    pub time: DateTime<Utc>,
    pub content: String,
    pub author: String,
}

/// クライアントへ送る `status_update` の content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatusContent {
    pub player_id: String,
    pub player_name: String,
    pub player_nickname: String,
    pub space_id: String,
    pub status: PlayerStatus,
}

/// クライアントへ送る Presence イベント
///
/// `position_update` / `player_joined` / `player_left` はバス上のペイロードを
/// そのまま転送するため、ここには含まれません。
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ExistingPlayers(Vec<PlayerDto>),
    ChatHistory(Vec<ChatMessageDto>),
    ChatMessage(ChatMessageDto),
    StatusUpdate(PlayerStatusContent),
}

impl EnvelopeEvent for ClientEvent {
    fn kind(&self) -> &'static str {
        match self {
            ClientEvent::ExistingPlayers(_) => "existing_players",
            ClientEvent::ChatHistory(_) => "chat_history",
            ClientEvent::ChatMessage(_) => "chat_message",
            ClientEvent::StatusUpdate(_) => "status_update",
        }
    }

    fn to_content(&self) -> Result<Value, serde_json::Error> {
        match self {
            ClientEvent::ExistingPlayers(c) => serde_json::to_value(c),
            ClientEvent::ChatHistory(c) => serde_json::to_value(c),
            ClientEvent::ChatMessage(c) => serde_json::to_value(c),
            ClientEvent::StatusUpdate(c) => serde_json::to_value(c),
        }
    }

    fn from_parts(kind: &str, content: Value) -> Result<Self, DecodeError> {
        match kind {
            "existing_players" => Ok(ClientEvent::ExistingPlayers(content_of(content)?)),
            "chat_history" => Ok(ClientEvent::ChatHistory(content_of(content)?)),
            "chat_message" => Ok(ClientEvent::ChatMessage(content_of(content)?)),
            "status_update" => Ok(ClientEvent::StatusUpdate(content_of(content)?)),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

// ========================================
// Presence: クライアントからの要求
// ========================================

/// クライアントから受信するメッセージ（Envelope なしのフラットな形式）
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    PositionUpdate { position: Position },
    ChatMessage { content: String },
}

impl ClientRequest {
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(payload)?;
        match value.get("type").and_then(Value::as_str) {
            Some("position_update") | Some("chat_message") => Ok(serde_json::from_value(value)?),
            Some(other) => Err(DecodeError::UnknownType(other.to_string())),
            None => Err(DecodeError::Malformed("missing 'type'".to_string())),
        }
    }
}

// ========================================
// Whiteboard
// ========================================

pub const SCENE_UPDATE: &str = "scene-update";
pub const PARTICIPANTS_UPDATE: &str = "participants-update";

/// `scene-update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_elements")]
    pub elements: Value,
    #[serde(default = "empty_app_state")]
    pub app_state: Value,
    pub room_id: String,
}

impl SceneMessage {
    pub fn new(room_id: &RoomId, scene: &Scene) -> Self {
        Self {
            kind: SCENE_UPDATE.to_string(),
            elements: scene.elements.clone(),
            app_state: scene.app_state.clone(),
            room_id: room_id.as_str().to_string(),
        }
    }
}

fn empty_elements() -> Value {
    Scene::default().elements
}

fn empty_app_state() -> Value {
    Scene::default().app_state
}

/// `participants-update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub participants: Vec<String>,
    pub room_id: String,
}

impl ParticipantsMessage {
    pub fn new(room_id: &RoomId, participants: Vec<String>) -> Self {
        Self {
            kind: PARTICIPANTS_UPDATE.to_string(),
            participants,
            room_id: room_id.as_str().to_string(),
        }
    }
}

/// バスから受信した Whiteboard メッセージ
#[derive(Debug, Clone, PartialEq)]
pub enum WhiteboardEvent {
    SceneUpdate(SceneMessage),
    ParticipantsUpdate(ParticipantsMessage),
    /// 状態を持たないメッセージ（ポインタ移動など）
    Relay { kind: String, room_id: String },
}

impl WhiteboardEvent {
    pub fn room_id(&self) -> &str {
        match self {
            WhiteboardEvent::SceneUpdate(m) => &m.room_id,
            WhiteboardEvent::ParticipantsUpdate(m) => &m.room_id,
            WhiteboardEvent::Relay { room_id, .. } => room_id,
        }
    }

    /// `type` を省略したメッセージは `scene-update` として扱う
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let mut object: Map<String, Value> = serde_json::from_str(payload)?;
        let kind = match object.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(DecodeError::Malformed("'type' must be a string".to_string())),
            None => {
                object.insert("type".to_string(), Value::String(SCENE_UPDATE.to_string()));
                SCENE_UPDATE.to_string()
            }
        };

        match kind.as_str() {
            SCENE_UPDATE => Ok(WhiteboardEvent::SceneUpdate(serde_json::from_value(
                Value::Object(object),
            )?)),
            PARTICIPANTS_UPDATE => Ok(WhiteboardEvent::ParticipantsUpdate(
                serde_json::from_value(Value::Object(object))?,
            )),
            _ => {
                let room_id = object
                    .get("roomId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DecodeError::Malformed("missing 'roomId'".to_string()))?
                    .to_string();
                Ok(WhiteboardEvent::Relay { kind, room_id })
            }
        }
    }
}

/// クライアントから受信した Whiteboard メッセージをバスに流せる形に整える
///
/// `type` が無ければ `scene-update` を補い、`roomId` を接続先の部屋で上書きします。
/// それ以外のフィールドは変更しません。
pub fn normalize_whiteboard_inbound(payload: &str, room_id: &RoomId) -> Result<String, DecodeError> {
    let mut object: Map<String, Value> = serde_json::from_str(payload)?;
    if !object.contains_key("type") {
        object.insert("type".to_string(), Value::String(SCENE_UPDATE.to_string()));
    }
    object.insert(
        "roomId".to_string(),
        Value::String(room_id.as_str().to_string()),
    );
    Ok(Value::Object(object).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room_id(value: &str) -> RoomId {
        RoomId::new(value.to_string()).unwrap()
    }

    #[test]
    fn test_bus_event_encodes_as_envelope() {
        // テスト項目: バスイベントが type / content / time の Envelope として出力される
        // given (前提条件):
        let envelope = Envelope::new(
            BusEvent::ChatMessage(ChatPublishedContent {
                space_id: "42".to_string(),
                content: "hello".to_string(),
                author: "alice".to_string(),
            }),
            DateTime::<Utc>::default(),
        );

        // when (操作):
        let encoded = envelope.encode().unwrap();

        // then (期待する結果):
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["content"]["space_id"], "42");
        assert_eq!(value["content"]["author"], "alice");
        assert!(value["time"].is_string());
    }

    #[test]
    fn test_bus_event_decodes_position_update() {
        // テスト項目: position_update の Envelope が型付きイベントに復元される
        // given (前提条件):
        let payload = json!({
            "type": "position_update",
            "content": {
                "player_id": "1",
                "space_id": "42",
                "position": {"x": 10.0, "y": 20.0},
                "player_name": "Alice",
                "player_nickname": "alice",
                "status": "away"
            },
            "time": "2025-01-01T00:00:00Z"
        })
        .to_string();

        // when (操作):
        let envelope = Envelope::<BusEvent>::decode(&payload).unwrap();

        // then (期待する結果):
        match envelope.event {
            BusEvent::PositionUpdate(content) => {
                assert_eq!(content.position, Position::new(10.0, 20.0));
                assert_eq!(content.status, PlayerStatus::Away);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_envelope_type_is_distinguished_from_malformed() {
        // テスト項目: 未知の type と壊れた content が別のエラーとして報告される
        // given (前提条件):
        let unknown = json!({"type": "teleport", "content": {}}).to_string();
        let malformed = json!({"type": "player_left", "content": {"player_id": 1}}).to_string();

        // when (操作):
        let unknown_result = Envelope::<BusEvent>::decode(&unknown);
        let malformed_result = Envelope::<BusEvent>::decode(&malformed);

        // then (期待する結果):
        assert_eq!(
            unknown_result.unwrap_err(),
            DecodeError::UnknownType("teleport".to_string())
        );
        assert!(matches!(malformed_result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_envelope_without_time_is_accepted() {
        // テスト項目: time を持たない Envelope もデコードできる
        // given (前提条件):
        let payload = json!({
            "type": "status_update",
            "content": {"user_id": "1", "status": "dnd"}
        })
        .to_string();

        // when (操作):
        let result = Envelope::<BusEvent>::decode(&payload);

        // then (期待する結果):
        assert!(result.is_ok());
    }

    #[test]
    fn test_client_request_decodes_flat_messages() {
        // テスト項目: クライアントのフラットな要求がデコードされる
        // given (前提条件):
        let position = r#"{"type":"position_update","position":{"x":1.5,"y":2.5}}"#;
        let chat = r#"{"type":"chat_message","content":"hi"}"#;

        // when (操作):
        let position = ClientRequest::decode(position).unwrap();
        let chat = ClientRequest::decode(chat).unwrap();

        // then (期待する結果):
        assert_eq!(
            position,
            ClientRequest::PositionUpdate {
                position: Position::new(1.5, 2.5)
            }
        );
        assert_eq!(
            chat,
            ClientRequest::ChatMessage {
                content: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_client_request_rejects_unknown_type() {
        // テスト項目: 未知の type は UnknownType になる
        // given (前提条件):
        let payload = r#"{"type":"dance"}"#;

        // when (操作):
        let result = ClientRequest::decode(payload);

        // then (期待する結果):
        assert_eq!(result, Err(DecodeError::UnknownType("dance".to_string())));
    }

    #[test]
    fn test_client_request_rejects_invalid_json() {
        // テスト項目: JSON でない入力は Malformed になる
        // given (前提条件):
        let payload = "not json";

        // when (操作):
        let result = ClientRequest::decode(payload);

        // then (期待する結果):
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_whiteboard_message_without_type_is_scene_update() {
        // テスト項目: type を省略した Whiteboard メッセージは scene-update として扱われる
        // given (前提条件):
        let payload = json!({
            "elements": [{"id": "rect-1"}],
            "appState": {"viewBackgroundColor": "#fff"},
            "roomId": "7"
        })
        .to_string();

        // when (操作):
        let event = WhiteboardEvent::decode(&payload).unwrap();

        // then (期待する結果):
        match event {
            WhiteboardEvent::SceneUpdate(message) => {
                assert_eq!(message.kind, SCENE_UPDATE);
                assert_eq!(message.elements, json!([{"id": "rect-1"}]));
                assert_eq!(message.room_id, "7");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_whiteboard_unknown_type_is_relayed() {
        // テスト項目: 未知の type の Whiteboard メッセージは中継対象として扱われる
        // given (前提条件):
        let payload = json!({"type": "pointer", "x": 3, "roomId": "7"}).to_string();

        // when (操作):
        let event = WhiteboardEvent::decode(&payload).unwrap();

        // then (期待する結果):
        assert_eq!(
            event,
            WhiteboardEvent::Relay {
                kind: "pointer".to_string(),
                room_id: "7".to_string()
            }
        );
    }

    #[test]
    fn test_whiteboard_message_without_room_is_malformed() {
        // テスト項目: roomId を持たないメッセージは Malformed になる
        // given (前提条件):
        let payload = json!({"type": "scene-update", "elements": []}).to_string();

        // when (操作):
        let result = WhiteboardEvent::decode(&payload);

        // then (期待する結果):
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_normalize_inbound_sets_type_and_room() {
        // テスト項目: 受信メッセージに type が補われ roomId が接続先で上書きされる
        // given (前提条件):
        let payload = json!({"elements": [], "appState": {}, "roomId": "other", "extra": 1}).to_string();

        // when (操作):
        let normalized = normalize_whiteboard_inbound(&payload, &room_id("7")).unwrap();

        // then (期待する結果):
        let value: Value = serde_json::from_str(&normalized).unwrap();
        assert_eq!(value["type"], SCENE_UPDATE);
        assert_eq!(value["roomId"], "7");
        assert_eq!(value["extra"], 1);
    }

    #[test]
    fn test_normalize_inbound_rejects_non_object() {
        // テスト項目: オブジェクトでない Whiteboard メッセージは拒否される
        // given (前提条件):
        let payload = "[1, 2, 3]";

        // when (操作):
        let result = normalize_whiteboard_inbound(payload, &room_id("7"));

        // then (期待する結果):
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }
}
