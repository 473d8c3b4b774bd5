//! Event types for the djbot event system
//!
//! Provides the shared `BotEvent` enum and the broadcast `EventBus` used to
//! relay session changes to every connected observer (SSE clients, console).

mod playback_types;

pub use playback_types::{EnginePhase, FinishReason, LoopMode};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Session event types
///
/// Serialized with an internal `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum BotEvent {
    /// Engine phase changed (e.g. Playing → Paused)
    PlaybackStateChanged {
        old_state: EnginePhase,
        new_state: EnginePhase,
        timestamp: DateTime<Utc>,
    },

    /// A freshly dequeued track started playing
    TrackStarted {
        title: String,
        duration_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// A track stopped being current
    TrackFinished {
        title: String,
        reason: FinishReason,
        timestamp: DateTime<Utc>,
    },

    /// Queue contents changed
    QueueChanged {
        length: usize,
        timestamp: DateTime<Utc>,
    },

    /// Volume changed (0.0-1.0)
    VolumeChanged {
        volume: f32,
        timestamp: DateTime<Utc>,
    },

    /// Stream relaunched at a new offset
    Seeked {
        position_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// Loop mode toggled
    LoopModeChanged {
        mode: LoopMode,
        timestamp: DateTime<Utc>,
    },

    /// Acquisition of a query began
    DownloadStarted {
        query: String,
        timestamp: DateTime<Utc>,
    },

    /// Acquisition of a query ended (either way)
    DownloadFinished {
        query: String,
        success: bool,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Voice connection established or torn down
    ConnectionChanged {
        channel: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl BotEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            BotEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            BotEvent::TrackStarted { .. } => "TrackStarted",
            BotEvent::TrackFinished { .. } => "TrackFinished",
            BotEvent::QueueChanged { .. } => "QueueChanged",
            BotEvent::VolumeChanged { .. } => "VolumeChanged",
            BotEvent::Seeked { .. } => "Seeked",
            BotEvent::LoopModeChanged { .. } => "LoopModeChanged",
            BotEvent::DownloadStarted { .. } => "DownloadStarted",
            BotEvent::DownloadFinished { .. } => "DownloadFinished",
            BotEvent::ConnectionChanged { .. } => "ConnectionChanged",
        }
    }
}

/// Broadcast bus for `BotEvent`s
///
/// Cheap to clone; all clones share one channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BotEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: BotEvent) -> Result<usize, broadcast::error::SendError<BotEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: BotEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
