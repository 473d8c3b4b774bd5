//! # djbot common library
//!
//! Shared code for the djbot workspace:
//! - Configuration loading (TOML + environment + defaults)
//! - Control-surface credential verification
//! - Event types (`BotEvent`) and the broadcast `EventBus`
//! - Error type and small time helpers

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
