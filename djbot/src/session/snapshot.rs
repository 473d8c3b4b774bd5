//! Point-in-time session snapshot
//!
//! The JSON shape returned by every control request.

use crate::session::state::SessionState;
use djbot_common::events::{EnginePhase, LoopMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Title of the current track
    pub current: Option<String>,
    /// Queued titles, head first
    pub queue: Vec<String>,
    #[serde(rename = "loop")]
    pub loop_single: bool,
    pub loop_queue: bool,
    /// Current track duration in seconds (0 when unknown or idle)
    pub duration: f64,
    /// Current position in seconds
    pub position: f64,
    /// Volume percent (0-100)
    pub volume: u8,
    pub paused: bool,
    /// In-progress acquisitions: query → elapsed seconds
    pub downloads: BTreeMap<String, f64>,
    /// Available voice channels: id → name
    pub channels: BTreeMap<String, String>,
    pub connected: bool,
    pub phase: EnginePhase,
}

impl SessionSnapshot {
    pub fn capture(
        state: &SessionState,
        phase: EnginePhase,
        channels: BTreeMap<String, String>,
        now: Instant,
    ) -> Self {
        let current = state.current();
        Self {
            current: current.map(|t| t.title().to_string()),
            queue: state.queue().iter().map(|t| t.title().to_string()).collect(),
            loop_single: state.loop_mode() == LoopMode::Single,
            loop_queue: state.loop_mode() == LoopMode::Queue,
            duration: current.map(|t| t.duration_seconds()).unwrap_or(0.0),
            position: if current.is_some() { state.position_at(now) } else { 0.0 },
            volume: volume_percent(state.volume()),
            paused: state.is_paused(),
            downloads: state.downloads().elapsed(),
            channels,
            connected: state.connection().is_some(),
            phase,
        }
    }
}

/// 0.0-1.0 → 0-100
pub fn volume_percent(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u8
}
