//! Playback-related type definitions
//!
//! Supporting types shared by the engine, the snapshot and the event stream.

use serde::{Deserialize, Serialize};

/// Playback engine phase
///
/// `Idle` is the polling phase; `Starting`, `Restarting` and `Draining` are
/// transient phases the engine passes through while (re)launching or finishing
/// a stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnginePhase {
    #[default]
    Idle,
    Starting,
    Playing,
    Paused,
    Restarting,
    Draining,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnginePhase::Idle => write!(f, "idle"),
            EnginePhase::Starting => write!(f, "starting"),
            EnginePhase::Playing => write!(f, "playing"),
            EnginePhase::Paused => write!(f, "paused"),
            EnginePhase::Restarting => write!(f, "restarting"),
            EnginePhase::Draining => write!(f, "draining"),
        }
    }
}

/// Loop mode (mutually exclusive)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Delete each track after it plays
    #[default]
    Off,
    /// Replay the current track indefinitely
    Single,
    /// Requeue finished tracks at the tail, never delete
    Queue,
}

impl std::fmt::Display for LoopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopMode::Off => write!(f, "off"),
            LoopMode::Single => write!(f, "single"),
            LoopMode::Queue => write!(f, "queue"),
        }
    }
}

/// Why a track stopped being current
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// Stream reached its natural end
    Completed,
    /// User skipped
    Skipped,
    /// User stopped or left
    Stopped,
    /// Stream could not be started
    Failed,
}
