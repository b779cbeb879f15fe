//! Shared utilities for the Hearth workspace.

pub mod logger;
pub mod time;
