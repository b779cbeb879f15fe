//! Domain Entity と DTO の相互変換

use crate::domain::{ChatMessage, Player, RoomId, UserId, UserProfile, entity};
use crate::infrastructure::dto::websocket as dto;

// ========================================
// Domain Entity → DTO
// ========================================

impl dto::PlayerDto {
    pub fn from_player(player: &Player, room_id: &RoomId) -> Self {
        Self {
            id: player.id.as_str().to_string(),
            name: player.name.clone(),
            space_id: room_id.as_str().to_string(),
            nickname: player.nickname.clone(),
            position: player.position,
            status: player.status,
        }
    }
}

impl From<entity::ChatMessage> for dto::ChatMessageDto {
    fn from(model: entity::ChatMessage) -> Self {
        Self {
            time: model.time,
            content: model.content,
            author: model.author,
        }
    }
}

impl dto::PositionContent {
    pub fn from_player(player: &Player, room_id: &RoomId) -> Self {
        Self {
            player_id: player.id.as_str().to_string(),
            space_id: room_id.as_str().to_string(),
            position: player.position,
            player_name: player.name.clone(),
            player_nickname: player.nickname.clone(),
            status: player.status,
        }
    }
}

impl dto::PlayerJoinedContent {
    pub fn from_player(player: &Player, room_id: &RoomId) -> Self {
        Self {
            player_id: player.id.as_str().to_string(),
            player_name: player.name.clone(),
            player_nickname: player.nickname.clone(),
            space_id: room_id.as_str().to_string(),
            position: player.position,
            status: player.status,
        }
    }
}

impl dto::PlayerLeftContent {
    pub fn from_player(player: &Player, room_id: &RoomId) -> Self {
        Self {
            player_id: player.id.as_str().to_string(),
            player_name: player.name.clone(),
            space_id: room_id.as_str().to_string(),
            player_nickname: player.nickname.clone(),
        }
    }
}

impl dto::PlayerStatusContent {
    pub fn from_player(player: &Player, room_id: &RoomId) -> Self {
        Self {
            player_id: player.id.as_str().to_string(),
            player_name: player.name.clone(),
            player_nickname: player.nickname.clone(),
            space_id: room_id.as_str().to_string(),
            status: player.status,
        }
    }
}

impl dto::ChatPublishedContent {
    /// 作者はクライアントの申告ではなく認証済みの利用者情報から決める
    pub fn authored_by(profile: &UserProfile, room_id: &RoomId, content: String) -> Self {
        Self {
            space_id: room_id.as_str().to_string(),
            content,
            author: profile.display_name().to_string(),
        }
    }
}

impl dto::StatusChangeContent {
    pub fn user_id(&self) -> Option<UserId> {
        UserId::new(self.user_id.clone()).ok()
    }
}

// ========================================
// DTO → Domain Entity
// ========================================

impl dto::ChatPublishedContent {
    pub fn into_chat_message(self, time: chrono::DateTime<chrono::Utc>) -> ChatMessage {
        ChatMessage {
            time,
            author: self.author,
            content: self.content,
        }
    }
}
