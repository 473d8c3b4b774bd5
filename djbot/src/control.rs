//! Control bridge
//!
//! Front ends (the HTTP thread, the console) never touch session state.
//! They hold a [`ControlHandle`], which turns each [`ControlRequest`] into
//! engine commands and returns the outcome together with a fresh snapshot.
//!
//! Acquisition runs outside the engine, so downloads never block playback
//! of already-queued tracks; only the final append goes through the engine.
//! Seek, volume, pause and resume read and rewrite the position basis
//! across several round trips and are serialised by `position_lock`.

use crate::acquire::{
    normalize_playlist_url, AcquisitionTimeouts, Acquirer, DownloadRegistry, QueryKind,
    TrackResolver,
};
use crate::error::{Error, Result};
use crate::playback::{Announcer, EngineOptions, PlaybackEngine, SessionCommand, SessionOp};
use crate::session::{Placement, SessionSnapshot, Track, QUEUE_CAPACITY};
use crate::voice::VoiceSink;
use djbot_common::events::{BotEvent, EventBus};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A request from any front end
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Skip,
    Stop,
    Pause,
    Resume,
    Clear,
    Loop,
    LoopQueue,
    Add(String),
    AddPlaylist(String),
    RemovePlaylist,
    /// 1-based queue position
    Remove(usize),
    /// Channel id, or the configured default
    Join(Option<String>),
    Leave,
    /// Seconds
    Seek(f64),
    /// Percent, 0-100
    SetVolume(u8),
    Previous,
    Status,
}

impl ControlRequest {
    /// Parse a command name plus named parameters
    ///
    /// Used by the HTTP surface (`?cmd=add&query=...`).
    pub fn parse(cmd: &str, params: &HashMap<String, String>) -> Result<Self> {
        let param = |name: &str| {
            params
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let required = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| param(*n))
                .map(str::to_string)
                .ok_or_else(|| Error::BadRequest(format!("'{}' requires '{}'", cmd, names[0])))
        };

        let request = match cmd.trim().to_ascii_lowercase().as_str() {
            "skip" => ControlRequest::Skip,
            "stop" => ControlRequest::Stop,
            "pause" => ControlRequest::Pause,
            "resume" => ControlRequest::Resume,
            "clear" => ControlRequest::Clear,
            "loop" => ControlRequest::Loop,
            "loopqueue" => ControlRequest::LoopQueue,
            "leave" => ControlRequest::Leave,
            "previous" => ControlRequest::Previous,
            "status" | "queue" => ControlRequest::Status,
            "removeplaylist" => ControlRequest::RemovePlaylist,
            "add" | "play" => ControlRequest::Add(required(&["query", "url"])?),
            "playlist" | "addplaylist" => ControlRequest::AddPlaylist(required(&["url", "query"])?),
            "remove" => ControlRequest::Remove(parse_index(&required(&["index"])?)?),
            "join" => ControlRequest::Join(param("channel").map(str::to_string)),
            "seek" => ControlRequest::Seek(parse_seconds(&required(&["position"])?)?),
            "volume" => ControlRequest::SetVolume(parse_level(&required(&["level"])?)?),
            "" => return Err(Error::BadRequest("missing command".to_string())),
            other => return Err(Error::BadRequest(format!("unknown command '{}'", other))),
        };
        Ok(request)
    }

    /// Whether `submit` runs this request in the background
    fn is_background(&self) -> bool {
        matches!(
            self,
            ControlRequest::Add(_) | ControlRequest::AddPlaylist(_) | ControlRequest::Previous
        )
    }
}

pub fn parse_index(value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| Error::BadRequest(format!("invalid index '{}'", value)))
}

pub fn parse_seconds(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::BadRequest(format!("invalid position '{}'", value)))
}

pub fn parse_level(value: &str) -> Result<u8> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| Error::BadRequest(format!("volume must be 0-100, got '{}'", value)))
}

/// Outcome of a control request
#[derive(Debug, Clone, Serialize)]
pub struct ControlReply {
    pub message: String,
    pub snapshot: SessionSnapshot,
}

/// Cloneable handle onto the session owner
#[derive(Clone)]
pub struct ControlHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    acquirer: Arc<Acquirer>,
    events: EventBus,
    /// Runtime that owns background acquisitions
    runtime: Handle,
    position_lock: Arc<Mutex<()>>,
    default_channel: Option<String>,
}

impl ControlHandle {
    /// Must be called from within the runtime that should run background work
    pub fn new(
        commands: mpsc::UnboundedSender<SessionCommand>,
        acquirer: Arc<Acquirer>,
        events: EventBus,
        default_channel: Option<String>,
    ) -> Self {
        Self {
            commands,
            acquirer,
            events,
            runtime: Handle::current(),
            position_lock: Arc::new(Mutex::new(())),
            default_channel,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run a request to completion, then snapshot
    pub async fn execute(&self, request: ControlRequest) -> Result<ControlReply> {
        let message = self.run(request).await?;
        Ok(ControlReply {
            message,
            snapshot: self.snapshot().await?,
        })
    }

    /// Like `execute`, but downloads are only checked and accepted
    ///
    /// Preconditions (voice connection, free capacity) are verified before
    /// returning; the acquisition itself continues in the background and
    /// shows up in the snapshot's `downloads`.
    pub async fn submit(&self, request: ControlRequest) -> Result<ControlReply> {
        if !request.is_background() {
            return self.execute(request).await;
        }

        self.ensure_voice(None).await?;
        if self.capacity().await? == 0 {
            return Err(Error::QueueFull(QUEUE_CAPACITY));
        }

        let label = match &request {
            ControlRequest::Add(q) | ControlRequest::AddPlaylist(q) => q.trim().to_string(),
            _ => "previous".to_string(),
        };
        // Listed as in progress before the snapshot is taken
        let guard = self.acquirer.registry().register(&label);

        let this = self.clone();
        let query = label.clone();
        self.runtime.spawn(async move {
            let _guard = guard;
            match this.run(request).await {
                Ok(message) => info!("{}", message),
                Err(e) => warn!(query = %query, "Background request failed: {}", e),
            }
        });

        Ok(ControlReply {
            message: format!("Accepted: {}", label),
            snapshot: self.snapshot().await?,
        })
    }

    async fn run(&self, request: ControlRequest) -> Result<String> {
        match request {
            ControlRequest::Skip => self.control(SessionOp::Skip).await,
            ControlRequest::Stop => self.control(SessionOp::Stop).await,
            ControlRequest::Pause => {
                let _guard = self.position_lock.lock().await;
                self.control(SessionOp::Pause).await
            }
            ControlRequest::Resume => {
                let _guard = self.position_lock.lock().await;
                self.control(SessionOp::Resume).await
            }
            ControlRequest::Clear => self.control(SessionOp::Clear).await,
            ControlRequest::Loop => self.control(SessionOp::ToggleLoop).await,
            ControlRequest::LoopQueue => self.control(SessionOp::ToggleLoopQueue).await,
            ControlRequest::Add(query) => self.add(&query).await,
            ControlRequest::AddPlaylist(url) => self.add_playlist(&url).await,
            ControlRequest::RemovePlaylist => self.control(SessionOp::RemovePlaylist).await,
            ControlRequest::Remove(index) => self.control(SessionOp::Remove(index)).await,
            ControlRequest::Join(channel) => self.join(channel.as_deref()).await,
            ControlRequest::Leave => self.control(SessionOp::Leave).await,
            ControlRequest::Seek(position) => self.seek(position).await,
            ControlRequest::SetVolume(level) => self.set_volume(level).await,
            ControlRequest::Previous => self.previous().await,
            ControlRequest::Status => Ok(String::new()),
        }
    }

    // ------------------------------------------------------------------
    // Engine round trips
    // ------------------------------------------------------------------

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    async fn control(&self, op: SessionOp) -> Result<String> {
        self.request(|reply| SessionCommand::Control { op, reply }).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(SessionCommand::Inspect).await
    }

    pub async fn position(&self) -> Result<Option<f64>> {
        self.request(SessionCommand::Position).await
    }

    pub async fn capacity(&self) -> Result<usize> {
        self.request(SessionCommand::Capacity).await
    }

    pub async fn referenced_files(&self) -> Result<HashSet<PathBuf>> {
        self.request(SessionCommand::ReferencedFiles).await
    }

    async fn append(&self, track: Track, placement: Placement) -> Result<usize> {
        self.request(|reply| SessionCommand::Append {
            track,
            placement,
            reply,
        })
        .await?
    }

    async fn restart(&self, offset: Option<f64>, volume: Option<f32>) -> Result<String> {
        self.request(|reply| SessionCommand::Restart {
            offset,
            volume,
            reply,
        })
        .await?
    }

    /// Stop playback, disconnect and end the engine task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(SessionCommand::Shutdown).await
    }

    // ------------------------------------------------------------------
    // Compound operations
    // ------------------------------------------------------------------

    async fn join(&self, channel: Option<&str>) -> Result<String> {
        let channel = channel
            .map(str::to_string)
            .or_else(|| self.default_channel.clone())
            .ok_or_else(|| Error::NotInVoiceChannel("no channel given".to_string()))?;
        self.control(SessionOp::Join(channel)).await
    }

    /// Join the default channel unless already connected
    pub async fn ensure_voice(&self, channel: Option<&str>) -> Result<()> {
        if self.snapshot().await?.connected {
            return Ok(());
        }
        self.join(channel).await.map(|_| ())
    }

    /// Acquire and queue one query (playlist links are expanded)
    pub async fn add(&self, query: &str) -> Result<String> {
        if QueryKind::classify(query) == QueryKind::Playlist {
            return self.add_playlist(query).await;
        }
        self.ensure_voice(None).await?;
        let (track, position) = self.acquire_and_append(query, Placement::Back).await?;
        Ok(format!("Added {} to queue (position {})", track.title(), position))
    }

    async fn acquire_and_append(&self, query: &str, placement: Placement) -> Result<(Track, usize)> {
        if self.capacity().await? == 0 {
            return Err(Error::QueueFull(QUEUE_CAPACITY));
        }

        self.events.emit_lossy(BotEvent::DownloadStarted {
            query: query.to_string(),
            timestamp: djbot_common::time::now(),
        });
        let acquired = self.acquirer.acquire(query).await;
        self.events.emit_lossy(BotEvent::DownloadFinished {
            query: query.to_string(),
            success: acquired.is_ok(),
            message: match &acquired {
                Ok(track) => track.title().to_string(),
                Err(e) => e.to_string(),
            },
            timestamp: djbot_common::time::now(),
        });

        let track = acquired?;
        let position = self.append(track.clone(), placement).await?;
        Ok((track, position))
    }

    /// Expand a playlist and queue entries until the queue is full
    ///
    /// Partial success: tracks already added stay queued. An entry that
    /// fails to download is skipped; a full queue ends the expansion.
    pub async fn add_playlist(&self, url: &str) -> Result<String> {
        self.ensure_voice(None).await?;
        if self.capacity().await? == 0 {
            return Err(Error::QueueFull(QUEUE_CAPACITY));
        }

        let url = normalize_playlist_url(url);
        self.control(SessionOp::BeginPlaylist).await?;
        let entries = self.acquirer.expand_playlist(&url).await?;

        let mut added = 0;
        for entry in &entries {
            if self.capacity().await? == 0 {
                break;
            }
            match self.acquire_and_append(entry, Placement::Playlist).await {
                Ok(_) => added += 1,
                Err(Error::QueueFull(_)) => break,
                Err(Error::SessionClosed) => return Err(Error::SessionClosed),
                Err(e) => warn!(entry = %entry, "Playlist entry skipped: {}", e),
            }
        }

        info!(url = %url, added, total = entries.len(), "Playlist added");
        Ok(format!("Added {} songs from playlist", added))
    }

    /// Re-acquire the previously played track and play it now
    pub async fn previous(&self) -> Result<String> {
        let Some(query) = self.request(SessionCommand::PreviousQuery).await? else {
            return Ok("No previous track".to_string());
        };
        self.ensure_voice(None).await?;
        let (track, _) = self.acquire_and_append(&query, Placement::Front).await?;
        Ok(format!("Replaying {}", track.title()))
    }

    pub async fn seek(&self, position: f64) -> Result<String> {
        let _guard = self.position_lock.lock().await;
        self.restart(Some(position.max(0.0)), None).await
    }

    pub async fn set_volume(&self, level: u8) -> Result<String> {
        let _guard = self.position_lock.lock().await;
        let volume = f32::from(level.min(100)) / 100.0;
        // The engine reads the live position when it relaunches
        self.restart(None, Some(volume)).await
    }
}

/// Everything needed to start a session
pub struct SessionParts {
    pub sink: Arc<dyn VoiceSink>,
    pub resolver: Arc<dyn TrackResolver>,
    pub work_dir: PathBuf,
    pub timeouts: AcquisitionTimeouts,
    pub events: EventBus,
    pub engine: EngineOptions,
    pub announcer: Option<Announcer>,
    pub default_channel: Option<String>,
}

/// Start the engine task on the current runtime and return its handle
pub fn spawn_session(parts: SessionParts) -> (ControlHandle, JoinHandle<()>) {
    let downloads = DownloadRegistry::new();
    let acquirer = Arc::new(Acquirer::new(
        parts.resolver,
        downloads.clone(),
        parts.work_dir,
        parts.timeouts,
    ));

    let (tx, rx) = mpsc::unbounded_channel();
    let engine = PlaybackEngine::new(parts.sink, downloads, parts.events.clone(), parts.engine)
        .with_announcer(parts.announcer);
    let task = tokio::spawn(engine.run(rx));

    let control = ControlHandle::new(tx, acquirer, parts.events, parts.default_channel);
    (control, task)
}
