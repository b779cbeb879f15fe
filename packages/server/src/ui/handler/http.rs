//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{Json, extract::State};

use crate::{
    domain::RoomId,
    infrastructure::dto::http::{RoomSummaryDto, RoomsDto},
    ui::state::AppState,
};

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Get the rooms held by this process
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<RoomsDto> {
    let presence = state.presence.room_summaries().await;
    let whiteboard = state.whiteboard.room_summaries().await;

    // Domain Model から DTO への変換
    Json(RoomsDto {
        presence: to_summaries(presence),
        whiteboard: to_summaries(whiteboard),
    })
}

fn to_summaries(rooms: Vec<(RoomId, usize)>) -> Vec<RoomSummaryDto> {
    rooms
        .into_iter()
        .map(|(id, participants)| RoomSummaryDto {
            id: id.into_string(),
            participants,
        })
        .collect()
}
