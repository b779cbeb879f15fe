//! Value Object 定義
//!
//! ドメイン層で扱う識別子・値を型として表現します。
//! 生成時にバリデーションを行い、不正な値がドメインに入り込まないようにします。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ValueObjectError;

/// Room ID の最大長
pub const ROOM_ID_MAX_LEN: usize = 64;

/// 新規 Player の初期位置
pub const SPAWN_POSITION: Position = Position { x: 850.0, y: 1040.0 };

/// Room ID（URL パスパラメータから生成される部屋の識別子）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RoomId(String);

impl RoomId {
    /// 新しい RoomId を作成
    ///
    /// 空文字列、空白を含む文字列、`ROOM_ID_MAX_LEN` を超える文字列はエラー。
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        if value.is_empty() {
            return Err(ValueObjectError::RoomIdEmpty);
        }
        if value.chars().count() > ROOM_ID_MAX_LEN {
            return Err(ValueObjectError::RoomIdTooLong(ROOM_ID_MAX_LEN));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(ValueObjectError::RoomIdInvalid(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User ID（上流の認証層が保証する信頼済みの利用者識別子）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// 新しい UserId を作成（空文字列・空白のみはエラー）
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        if value.trim().is_empty() {
            return Err(ValueObjectError::UserIdEmpty);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Space ID（永続ストアと対応付く数値 ID）
///
/// `0` は「永続化しない一時的な部屋」を表します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SpaceId(u64);

impl SpaceId {
    /// 永続化しない部屋を表す Space ID
    pub const EPHEMERAL: SpaceId = SpaceId(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Room ID から Space ID を導出する
    ///
    /// 数値として解釈できない Room ID は `EPHEMERAL` になります。
    pub fn from_room_id(room_id: &RoomId) -> Self {
        room_id
            .as_str()
            .parse::<u64>()
            .map(Self)
            .unwrap_or(Self::EPHEMERAL)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 永続ストアに保存すべき部屋かどうか
    pub fn is_durable(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection ID（1 本の WebSocket 接続を一意に識別する）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// ランダムな ConnectionId を生成
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 2 次元座標（最後に書き込まれた値が有効、履歴は持たない）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Default for Position {
    fn default() -> Self {
        SPAWN_POSITION
    }
}

/// 在席ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    #[default]
    Online,
    Away,
    Busy,
    Dnd,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerStatus::Online => "online",
            PlayerStatus::Away => "away",
            PlayerStatus::Busy => "busy",
            PlayerStatus::Dnd => "dnd",
        }
    }
}

impl FromStr for PlayerStatus {
    type Err = ValueObjectError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "online" => Ok(PlayerStatus::Online),
            "away" => Ok(PlayerStatus::Away),
            "busy" => Ok(PlayerStatus::Busy),
            "dnd" => Ok(PlayerStatus::Dnd),
            other => Err(ValueObjectError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_accepts_numeric_and_slug_values() {
        // テスト項目: 数値・スラッグ形式の Room ID が生成できる
        // given (前提条件):
        let numeric = "42".to_string();
        let slug = "design-review".to_string();

        // when (操作):
        let numeric_id = RoomId::new(numeric);
        let slug_id = RoomId::new(slug);

        // then (期待する結果):
        assert_eq!(numeric_id.unwrap().as_str(), "42");
        assert_eq!(slug_id.unwrap().as_str(), "design-review");
    }

    #[test]
    fn test_room_id_rejects_invalid_values() {
        // テスト項目: 空・空白入り・長すぎる Room ID はエラーになる
        // given (前提条件):
        let too_long = "a".repeat(ROOM_ID_MAX_LEN + 1);

        // when (操作):
        let empty = RoomId::new(String::new());
        let spaced = RoomId::new("a b".to_string());
        let long = RoomId::new(too_long);

        // then (期待する結果):
        assert_eq!(empty, Err(ValueObjectError::RoomIdEmpty));
        assert_eq!(spaced, Err(ValueObjectError::RoomIdInvalid("a b".to_string())));
        assert_eq!(long, Err(ValueObjectError::RoomIdTooLong(ROOM_ID_MAX_LEN)));
    }

    #[test]
    fn test_user_id_rejects_blank_value() {
        // テスト項目: 空白のみの User ID はエラーになる
        // given (前提条件):
        let blank = "   ".to_string();

        // when (操作):
        let result = UserId::new(blank);

        // then (期待する結果):
        assert_eq!(result, Err(ValueObjectError::UserIdEmpty));
    }

    #[test]
    fn test_space_id_from_numeric_room_id() {
        // テスト項目: 数値の Room ID から永続化対象の Space ID が導出される
        // given (前提条件):
        let room_id = RoomId::new("7".to_string()).unwrap();

        // when (操作):
        let space_id = SpaceId::from_room_id(&room_id);

        // then (期待する結果):
        assert_eq!(space_id.value(), 7);
        assert!(space_id.is_durable());
    }

    #[test]
    fn test_space_id_from_non_numeric_room_id_is_ephemeral() {
        // テスト項目: 数値でない Room ID は一時的な部屋（Space ID 0）になる
        // given (前提条件):
        let room_id = RoomId::new("scratch".to_string()).unwrap();

        // when (操作):
        let space_id = SpaceId::from_room_id(&room_id);

        // then (期待する結果):
        assert_eq!(space_id, SpaceId::EPHEMERAL);
        assert!(!space_id.is_durable());
    }

    #[test]
    fn test_player_status_round_trips_through_str() {
        // テスト項目: ステータス文字列とドメイン値が相互変換できる
        // given (前提条件):
        let statuses = ["online", "away", "busy", "dnd"];

        // when (操作) / then (期待する結果):
        for status in statuses {
            let parsed: PlayerStatus = status.parse().unwrap();
            assert_eq!(parsed.as_str(), status);
        }
        assert_eq!(
            "meeting".parse::<PlayerStatus>(),
            Err(ValueObjectError::UnknownStatus("meeting".to_string()))
        );
    }

    #[test]
    fn test_player_status_serializes_lowercase() {
        // テスト項目: ステータスは小文字の JSON 文字列としてシリアライズされる
        // given (前提条件):
        let status = PlayerStatus::Dnd;

        // when (操作):
        let json = serde_json::to_string(&status).unwrap();

        // then (期待する結果):
        assert_eq!(json, "\"dnd\"");
    }
}
