//! # djbot
//!
//! Single-session music bot: one queue of downloaded tracks played through an
//! external audio sink, controlled from a console and a Basic-authenticated
//! HTTP surface.
//!
//! **Architecture:** the playback engine task is the only owner of session
//! state. Front ends go through the control bridge, which sends it commands
//! and awaits the replies.

pub mod acquire;
pub mod api;
pub mod console;
pub mod control;
pub mod error;
pub mod janitor;
pub mod playback;
pub mod session;
pub mod voice;

pub use control::{spawn_session, ControlHandle, ControlReply, ControlRequest, SessionParts};
pub use error::{Error, Result};
