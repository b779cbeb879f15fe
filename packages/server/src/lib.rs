//! Real-time room synchronization for the Hearth virtual office.
//!
//! Presence rooms keep players' positions, statuses and a short chat history;
//! whiteboard rooms keep a shared scene that is saved to the durable store
//! after a quiet period. Rooms are fanned out across server processes through
//! a cluster bus.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
