//! HTTP API response DTOs.

use serde::Serialize;

/// `GET /api/rooms` の要素
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummaryDto {
    pub id: String,
    pub participants: usize,
}

/// `GET /api/rooms`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomsDto {
    pub presence: Vec<RoomSummaryDto>,
    pub whiteboard: Vec<RoomSummaryDto>,
}
