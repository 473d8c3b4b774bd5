//! Test helpers for djbot integration tests
//!
//! - FakeSink: in-memory voice sink that records every stream launch
//! - FakeResolver: writes small files into the work dir instead of
//!   running external tools
//! - TestSession: a running engine with both fakes wired in

#![allow(dead_code)]

use async_trait::async_trait;
use djbot::acquire::{AcquisitionTimeouts, QueryKind, Resolved, TrackResolver};
use djbot::error::{DownloadFailure, Error, Result};
use djbot::playback::EngineOptions;
use djbot::session::ConnectionHandle;
use djbot::voice::{StreamEnded, StreamRequest, VoiceSink};
use djbot::{spawn_session, ControlHandle, SessionParts};
use djbot_common::events::EventBus;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_CHANNEL: &str = "default";

/// Duration reported for tracks unless a query says otherwise
pub const TRACK_SECONDS: f64 = 200.0;

// ========================================
// Voice sink
// ========================================

struct ActiveStream {
    generation: u64,
    on_end: mpsc::UnboundedSender<StreamEnded>,
}

/// Voice sink that never produces sound
///
/// Mirrors the real sink's contract: replacing or stopping a stream sends
/// its end notification, and every launch is recorded.
#[derive(Default)]
pub struct FakeSink {
    connected: Mutex<Option<String>>,
    active: Mutex<Option<ActiveStream>>,
    plays: Mutex<Vec<StreamRequest>>,
    failing: Mutex<HashSet<PathBuf>>,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Launches of `path` fail with a playback source error
    pub fn fail_path(&self, path: impl Into<PathBuf>) {
        self.failing.lock().unwrap().insert(path.into());
    }

    pub fn plays(&self) -> Vec<StreamRequest> {
        self.plays.lock().unwrap().clone()
    }

    pub fn play_count(&self) -> usize {
        self.plays.lock().unwrap().len()
    }

    pub fn last_play(&self) -> Option<StreamRequest> {
        self.plays.lock().unwrap().last().cloned()
    }

    pub fn is_streaming(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    pub fn connected_to(&self) -> Option<String> {
        self.connected.lock().unwrap().clone()
    }

    /// End the active stream as if the file ran out (or broke, with `error`)
    pub fn end_active(&self, error: Option<&str>) -> bool {
        match self.active.lock().unwrap().take() {
            Some(active) => {
                let _ = active.on_end.send(StreamEnded {
                    generation: active.generation,
                    error: error.map(str::to_string),
                });
                true
            }
            None => false,
        }
    }

    fn channel_name(id: &str) -> Option<String> {
        match id {
            DEFAULT_CHANNEL => Some("Default".to_string()),
            "lounge" => Some("Lounge".to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl VoiceSink for FakeSink {
    fn channels(&self) -> BTreeMap<String, String> {
        [DEFAULT_CHANNEL, "lounge"]
            .iter()
            .filter_map(|id| Self::channel_name(id).map(|name| (id.to_string(), name)))
            .collect()
    }

    async fn connect(&self, channel_id: &str) -> Result<ConnectionHandle> {
        let name = Self::channel_name(channel_id)
            .ok_or_else(|| Error::NotInVoiceChannel(format!("unknown channel '{}'", channel_id)))?;
        self.stop().await?;
        *self.connected.lock().unwrap() = Some(channel_id.to_string());
        Ok(ConnectionHandle {
            channel_id: channel_id.to_string(),
            channel_name: name,
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop().await?;
        *self.connected.lock().unwrap() = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.lock().unwrap().is_some()
    }

    async fn play(
        &self,
        request: StreamRequest,
        on_end: mpsc::UnboundedSender<StreamEnded>,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotInVoiceChannel("not connected".to_string()));
        }
        if self.failing.lock().unwrap().contains(&request.path) {
            return Err(Error::PlaybackSource(format!(
                "cannot open {}",
                request.path.display()
            )));
        }

        self.stop().await?;
        *self.active.lock().unwrap() = Some(ActiveStream {
            generation: request.generation,
            on_end,
        });
        self.plays.lock().unwrap().push(request);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(active) = self.active.lock().unwrap().take() {
            let _ = active.on_end.send(StreamEnded {
                generation: active.generation,
                error: None,
            });
        }
        Ok(())
    }
}

// ========================================
// Resolver
// ========================================

/// What the fake resolver does for a query
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Write `<query>.m4a`, reporting `duration` (or none)
    Produce { duration: Option<f64> },
    /// Exit with a tool failure
    Fail,
    /// Never finish
    Hang,
    /// Report a file that does not exist
    NoFile,
    /// Produce a file but report a blank title
    BlankTitle,
}

pub struct FakeResolver {
    behaviors: Mutex<HashMap<String, Behavior>>,
    playlists: Mutex<HashMap<String, Vec<String>>>,
    probe: Mutex<Option<f64>>,
    resolved: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(HashMap::new()),
            playlists: Mutex::new(HashMap::new()),
            probe: Mutex::new(None),
            resolved: Mutex::new(Vec::new()),
        })
    }

    pub fn on(&self, query: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(query.to_string(), behavior);
    }

    pub fn playlist(&self, url: &str, entries: &[&str]) {
        self.playlists.lock().unwrap().insert(
            url.to_string(),
            entries.iter().map(|e| e.to_string()).collect(),
        );
    }

    /// Duration returned by the probe; `None` makes the probe fail
    pub fn set_probe(&self, duration: Option<f64>) {
        *self.probe.lock().unwrap() = duration;
    }

    /// Queries passed to `resolve`, in order
    pub fn resolved(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }

    /// File a query is written to
    pub fn path_for(work_dir: &Path, query: &str) -> PathBuf {
        let stem: String = query
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        work_dir.join(format!("{}.m4a", stem))
    }
}

#[async_trait]
impl TrackResolver for FakeResolver {
    async fn resolve(&self, query: &str, _kind: QueryKind, work_dir: &Path) -> Result<Resolved> {
        self.resolved.lock().unwrap().push(query.to_string());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or(Behavior::Produce {
                duration: Some(TRACK_SECONDS),
            });

        let path = Self::path_for(work_dir, query);
        match behavior {
            Behavior::Produce { duration } => {
                std::fs::write(&path, b"not really audio")?;
                Ok(Resolved {
                    title: query.to_string(),
                    filepath: path,
                    duration_seconds: duration,
                })
            }
            Behavior::BlankTitle => {
                std::fs::write(&path, b"not really audio")?;
                Ok(Resolved {
                    title: "  ".to_string(),
                    filepath: path,
                    duration_seconds: Some(TRACK_SECONDS),
                })
            }
            Behavior::Fail => {
                Err(DownloadFailure::ToolFailed(format!("no results for '{}'", query)).into())
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::NoFile => Ok(Resolved {
                title: query.to_string(),
                filepath: path,
                duration_seconds: Some(TRACK_SECONDS),
            }),
        }
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        (*self.probe.lock().unwrap()).ok_or_else(|| {
            DownloadFailure::ToolFailed(format!("ffprobe failed on {}", path.display())).into()
        })
    }

    async fn expand_playlist(&self, url: &str) -> Result<Vec<String>> {
        self.playlists
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DownloadFailure::ToolFailed(format!("unknown playlist {}", url)).into())
    }
}

// ========================================
// Session
// ========================================

pub fn test_timeouts() -> AcquisitionTimeouts {
    AcquisitionTimeouts {
        generic: Duration::from_secs(30),
        specialized: Duration::from_secs(60),
        probe: Duration::from_secs(5),
    }
}

/// A running session backed by the fakes
pub struct TestSession {
    pub control: ControlHandle,
    pub task: JoinHandle<()>,
    pub sink: Arc<FakeSink>,
    pub resolver: Arc<FakeResolver>,
    pub events: EventBus,
    pub dir: TempDir,
}

impl TestSession {
    pub fn start() -> Self {
        Self::start_with(FakeSink::new(), FakeResolver::new())
    }

    pub fn start_with(sink: Arc<FakeSink>, resolver: Arc<FakeResolver>) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let events = EventBus::new(256);
        let (control, task) = spawn_session(SessionParts {
            sink: sink.clone(),
            resolver: resolver.clone(),
            work_dir: dir.path().to_path_buf(),
            timeouts: test_timeouts(),
            events: events.clone(),
            engine: EngineOptions::default(),
            announcer: None,
            default_channel: Some(DEFAULT_CHANNEL.to_string()),
        });
        Self {
            control,
            task,
            sink,
            resolver,
            events,
            dir,
        }
    }

    pub fn path_for(&self, query: &str) -> PathBuf {
        FakeResolver::path_for(self.dir.path(), query)
    }

    pub async fn add(&self, query: &str) -> String {
        self.control.add(query).await.expect("add should succeed")
    }

    pub async fn position(&self) -> f64 {
        self.control
            .position()
            .await
            .expect("session running")
            .expect("a track is current")
    }

    /// Wait until the sink has seen `count` launches
    pub async fn wait_for_plays(&self, count: usize) {
        let sink = self.sink.clone();
        wait_for(&format!("{} stream launches", count), move || {
            sink.play_count() >= count
        })
        .await;
    }

    /// Wait until the engine reports `title` as current
    pub async fn wait_for_current(&self, title: Option<&str>) {
        for _ in 0..400 {
            let snapshot = self.control.snapshot().await.expect("session running");
            if snapshot.current.as_deref() == title {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for current track {:?}", title);
    }

    pub async fn shutdown(self) {
        self.control.shutdown().await.expect("shutdown");
        self.task.await.expect("engine task");
    }
}

/// Poll `condition` until it holds, failing the test after a while
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// `a` is within `tolerance` of `b`
pub fn approx(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}
