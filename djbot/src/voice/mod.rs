//! Voice sink boundary
//!
//! The sink owns the connection to an audio output and plays one stream at
//! a time. It has no live parameter control: seek, volume and resume are
//! done by the engine as stop-and-restart with a new [`StreamOptions`].

pub mod ffmpeg;

pub use ffmpeg::FfmpegSink;

use crate::error::Result;
use crate::session::ConnectionHandle;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Start offset and volume for one stream launch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamOptions {
    /// Seconds into the file
    pub start_offset: f64,
    /// Linear gain, 0.0-1.0
    pub volume: f32,
}

impl StreamOptions {
    pub fn new(start_offset: f64, volume: f32) -> Self {
        Self {
            start_offset: start_offset.max(0.0),
            volume: volume.clamp(0.0, 1.0),
        }
    }

    /// Options placed before the input (`-ss <offset>`), empty at offset 0
    pub fn before_options(&self) -> Vec<String> {
        if self.start_offset > 0.0 {
            vec!["-ss".to_string(), format!("{:.3}", self.start_offset)]
        } else {
            Vec::new()
        }
    }

    /// Output filter options (`-filter:a volume=<v>`)
    pub fn filter_options(&self) -> Vec<String> {
        vec!["-filter:a".to_string(), format!("volume={:.2}", self.volume)]
    }
}

/// One stream launch
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub path: PathBuf,
    pub options: StreamOptions,
    /// Echoed back in [`StreamEnded`] so stale completions can be told apart
    pub generation: u64,
}

/// End-of-stream notification
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEnded {
    pub generation: u64,
    /// Set when the stream ended abnormally
    pub error: Option<String>,
}

/// External audio output
#[async_trait]
pub trait VoiceSink: Send + Sync {
    /// Connectable targets: id → display name
    fn channels(&self) -> BTreeMap<String, String>;

    async fn connect(&self, channel_id: &str) -> Result<ConnectionHandle>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Start a stream, replacing any active one
    ///
    /// Returns once the stream is running. Exactly one [`StreamEnded`]
    /// carrying the request's generation is sent to `on_end` when it stops,
    /// whether naturally or through [`VoiceSink::stop`].
    async fn play(
        &self,
        request: StreamRequest,
        on_end: mpsc::UnboundedSender<StreamEnded>,
    ) -> Result<()>;

    /// Stop the active stream, if any
    async fn stop(&self) -> Result<()>;
}
