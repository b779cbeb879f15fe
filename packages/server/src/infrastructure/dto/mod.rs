//! Data Transfer Objects (DTOs).
//!
//! - `websocket`: WebSocket / cluster bus message DTOs and the envelope codec
//! - `http`: HTTP API response DTOs

pub mod conversion;
pub mod http;
pub mod websocket;
