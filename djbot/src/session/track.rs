//! Track model

use serde::Serialize;
use std::path::{Path, PathBuf};

/// A resolved, playable audio item
///
/// Immutable once created by the acquisition pipeline. The file at
/// `filepath` is owned by the session and deleted once the track will not
/// be replayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    title: String,
    filepath: PathBuf,
    source_query: String,
    duration_seconds: f64,
}

impl Track {
    pub fn new(
        title: impl Into<String>,
        filepath: impl Into<PathBuf>,
        source_query: impl Into<String>,
        duration_seconds: f64,
    ) -> Self {
        let duration_seconds = if duration_seconds.is_finite() && duration_seconds > 0.0 {
            duration_seconds
        } else {
            0.0
        };
        Self {
            title: title.into(),
            filepath: filepath.into(),
            source_query: source_query.into(),
            duration_seconds,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    /// Query used to acquire this track, reused by "replay previous"
    pub fn source_query(&self) -> &str {
        &self.source_query
    }

    /// Duration in seconds, 0.0 when unknown
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }
}
