//! Playback engine and its command protocol

pub mod announce;
pub mod commands;
pub mod engine;

pub use announce::Announcer;
pub use commands::{SessionCommand, SessionOp};
pub use engine::{EngineOptions, PlaybackEngine};
