//! Track acquisition pipeline
//!
//! Resolves a query string into a playable [`Track`] by delegating to a
//! [`TrackResolver`]. This layer owns the in-progress registry, per-kind
//! timeouts and output validation. It does not enforce queue capacity;
//! callers check that before acquiring.

pub mod registry;
pub mod resolver;

pub use registry::{DownloadGuard, DownloadRegistry};
pub use resolver::{ExternalResolver, Resolved, TrackResolver};

use crate::error::{DownloadFailure, Error, Result};
use crate::session::Track;
use djbot_common::config::AcquisitionConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

static SPOTIFY_TRACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:open\.)?spotify\.com/track/").expect("valid regex")
});

static PLAYLIST_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]list=([^&\s]+)").expect("valid regex"));

static YT_MUSIC_PLAYLIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"music\.youtube\.com/playlist\?list=([^&\s]+)").expect("valid regex")
});

/// How a query is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Direct Spotify track link, handled by the specialised tool
    SpotifyTrack,
    /// Collection reference; callers expand it into single acquisitions
    Playlist,
    /// Search string or any other URL, handled by the general resolver
    Generic,
}

impl QueryKind {
    pub fn classify(query: &str) -> Self {
        if SPOTIFY_TRACK.is_match(query) {
            QueryKind::SpotifyTrack
        } else if PLAYLIST_LIST.is_match(query) {
            QueryKind::Playlist
        } else {
            QueryKind::Generic
        }
    }
}

/// Rewrite YouTube Music playlist links to the plain YouTube form
pub fn normalize_playlist_url(url: &str) -> String {
    match YT_MUSIC_PLAYLIST.captures(url) {
        Some(caps) => format!("https://www.youtube.com/playlist?list={}", &caps[1]),
        None => url.trim().to_string(),
    }
}

/// Time budgets for the external steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionTimeouts {
    pub generic: Duration,
    pub specialized: Duration,
    pub probe: Duration,
}

impl AcquisitionTimeouts {
    fn for_kind(&self, kind: QueryKind) -> Duration {
        match kind {
            QueryKind::SpotifyTrack => self.specialized,
            QueryKind::Playlist | QueryKind::Generic => self.generic,
        }
    }
}

impl From<&AcquisitionConfig> for AcquisitionTimeouts {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            generic: Duration::from_secs(config.generic_timeout_secs),
            specialized: Duration::from_secs(config.specialized_timeout_secs),
            probe: Duration::from_secs(config.probe_timeout_secs),
        }
    }
}

/// Query → Track pipeline
pub struct Acquirer {
    resolver: Arc<dyn TrackResolver>,
    registry: DownloadRegistry,
    work_dir: PathBuf,
    timeouts: AcquisitionTimeouts,
}

impl Acquirer {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        registry: DownloadRegistry,
        work_dir: impl Into<PathBuf>,
        timeouts: AcquisitionTimeouts,
    ) -> Self {
        Self {
            resolver,
            registry,
            work_dir: work_dir.into(),
            timeouts,
        }
    }

    pub fn registry(&self) -> &DownloadRegistry {
        &self.registry
    }

    /// Resolve `query` into a validated track
    ///
    /// The query is listed in the download registry for exactly the
    /// lifetime of this call, including when the returned future is
    /// dropped before completion.
    pub async fn acquire(&self, query: &str) -> Result<Track> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::BadRequest("empty query".to_string()));
        }

        let _guard = self.registry.register(query);
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let kind = QueryKind::classify(query);
        let budget = self.timeouts.for_kind(kind);
        info!(query = %query, kind = ?kind, "Acquiring track");

        let resolved = match timeout(budget, self.resolver.resolve(query, kind, &self.work_dir)).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(query = %query, timeout_secs = budget.as_secs(), "Acquisition timed out");
                return Err(Error::DownloadTimeout(budget.as_secs()));
            }
        };

        validate(&resolved).await?;

        let duration = match resolved.duration_seconds {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => self.probe(&resolved.filepath).await,
        };

        info!(query = %query, title = %resolved.title, duration, "Track acquired");
        Ok(Track::new(resolved.title, resolved.filepath, query, duration))
    }

    /// Duration probe fallback; never fails, unknown is 0.0
    async fn probe(&self, path: &Path) -> f64 {
        match timeout(self.timeouts.probe, self.resolver.probe_duration(path)).await {
            Ok(Ok(d)) if d.is_finite() && d > 0.0 => d,
            Ok(Ok(_)) => 0.0,
            Ok(Err(e)) => {
                debug!(path = %path.display(), error = %e, "Duration probe failed");
                0.0
            }
            Err(_) => {
                debug!(path = %path.display(), "Duration probe timed out");
                0.0
            }
        }
    }

    /// Expand a playlist URL into per-entry queries
    pub async fn expand_playlist(&self, url: &str) -> Result<Vec<String>> {
        let url = normalize_playlist_url(url);
        if url.is_empty() {
            return Err(Error::BadRequest("empty playlist url".to_string()));
        }
        let budget = self.timeouts.generic;
        let entries = timeout(budget, self.resolver.expand_playlist(&url))
            .await
            .map_err(|_| Error::DownloadTimeout(budget.as_secs()))??;
        info!(url = %url, entries = entries.len(), "Playlist expanded");
        Ok(entries)
    }
}

async fn validate(resolved: &Resolved) -> Result<()> {
    let path = &resolved.filepath;
    let is_file = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(DownloadFailure::NoOutputProduced(format!(
            "{} not found on disk",
            path.display()
        ))
        .into());
    }

    let has_stem = path
        .file_stem()
        .map(|s| !s.is_empty())
        .unwrap_or(false);
    let has_ext = path
        .extension()
        .map(|s| !s.is_empty())
        .unwrap_or(false);
    if !has_stem || !has_ext {
        return Err(DownloadFailure::InvalidMetadata(format!(
            "{} has no identifier or extension",
            path.display()
        ))
        .into());
    }

    if resolved.title.trim().is_empty() {
        return Err(DownloadFailure::InvalidMetadata("empty title".to_string()).into());
    }
    Ok(())
}
