//! Playback engine
//!
//! The single owner of [`SessionState`]. One task runs [`PlaybackEngine::run`],
//! reading [`SessionCommand`]s, end-of-stream notifications and a polling
//! tick, and handles each to completion before taking the next. Nothing else
//! touches the state, so mutations are totally ordered.
//!
//! # Phases
//!
//! ```text
//! Idle ──dequeue──▶ Starting ──ok──▶ Playing ──end──▶ Draining ──▶ Idle
//!                      │ fail            │  ▲
//!                      ▼                 ▼  │ resume
//!                 next track            Paused
//!
//! Playing ──seek/volume──▶ Restarting ──▶ Playing
//! ```
//!
//! The voice sink has no live controls, so pause, resume, seek and volume
//! are all stop-then-relaunch at a computed offset. Each launch carries a new
//! generation number; end notifications from older generations are the
//! synthetic completions of streams we stopped ourselves and are ignored.

use crate::acquire::DownloadRegistry;
use crate::error::{Error, Result};
use crate::playback::announce::Announcer;
use crate::playback::commands::{SessionCommand, SessionOp};
use crate::session::snapshot::volume_percent;
use crate::session::{Disposition, Placement, PositionBasis, SessionSnapshot, SessionState, Track};
use crate::voice::{StreamEnded, StreamOptions, StreamRequest, VoiceSink};
use djbot_common::events::{BotEvent, EnginePhase, EventBus, FinishReason, LoopMode};
use djbot_common::time::format_seconds;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A stream that fails within this long of launching is a failed start
const STARTUP_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Idle polling interval
    pub poll_interval: Duration,
    /// Starting volume, 0.0-1.0
    pub initial_volume: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            initial_volume: 1.0,
        }
    }
}

pub struct PlaybackEngine {
    state: SessionState,
    sink: Arc<dyn VoiceSink>,
    events: EventBus,
    announcer: Option<Announcer>,
    phase: EnginePhase,
    /// Whether the engine should pull from the queue
    ///
    /// Cleared by stop and leave; set again by join, resume or an append.
    driving: bool,
    /// Set by handlers that want the queue head started after replying
    kick: bool,
    generation: u64,
    ended_tx: mpsc::UnboundedSender<StreamEnded>,
    ended_rx: mpsc::UnboundedReceiver<StreamEnded>,
    poll_interval: Duration,
}

impl PlaybackEngine {
    pub fn new(
        sink: Arc<dyn VoiceSink>,
        downloads: DownloadRegistry,
        events: EventBus,
        options: EngineOptions,
    ) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            state: SessionState::new(options.initial_volume, downloads),
            sink,
            events,
            announcer: None,
            phase: EnginePhase::Idle,
            driving: false,
            kick: false,
            generation: 0,
            ended_tx,
            ended_rx,
            poll_interval: options.poll_interval,
        }
    }

    /// Narrate each track before it starts
    pub fn with_announcer(mut self, announcer: Option<Announcer>) -> Self {
        self.announcer = announcer;
        self
    }

    /// Engine loop; returns on `Shutdown` or when every command sender is gone
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        info!("Playback engine started");
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(ended) = self.ended_rx.recv() => self.on_stream_ended(ended).await,
                _ = ticker.tick() => self.poll().await,
            }

            if std::mem::take(&mut self.kick) {
                self.advance().await;
            }
        }

        self.shutdown().await;
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Control { op, reply } => {
                debug!(?op, "Control request");
                let result = self.control(op).await;
                let _ = reply.send(result);
            }
            SessionCommand::Append {
                track,
                placement,
                reply,
            } => {
                let result = self.append(track, placement).await;
                let _ = reply.send(result);
            }
            SessionCommand::Restart {
                offset,
                volume,
                reply,
            } => {
                let result = self.restart(offset, volume).await;
                let _ = reply.send(result);
            }
            SessionCommand::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Position(reply) => {
                let position = self
                    .state
                    .current()
                    .map(|_| self.state.position_at(Instant::now()));
                let _ = reply.send(position);
            }
            SessionCommand::Capacity(reply) => {
                let _ = reply.send(self.state.remaining_capacity());
            }
            SessionCommand::PreviousQuery(reply) => {
                let _ = reply.send(self.state.previous_query());
            }
            SessionCommand::ReferencedFiles(reply) => {
                let _ = reply.send(self.state.referenced_files());
            }
            SessionCommand::Shutdown(reply) => {
                // Handled in run; answer anyway so callers never hang
                let _ = reply.send(());
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(&self.state, self.phase, self.sink.channels(), Instant::now())
    }

    // ------------------------------------------------------------------
    // Control operations
    // ------------------------------------------------------------------

    async fn control(&mut self, op: SessionOp) -> Result<String> {
        match op {
            SessionOp::Skip => {
                let Some(title) = self.current_title() else {
                    return Ok("Nothing is playing".to_string());
                };
                self.interrupt(FinishReason::Skipped).await;
                self.kick = true;
                Ok(format!("Skipped {}", title))
            }

            SessionOp::Stop => {
                self.driving = false;
                self.invalidate_stream().await;
                if let Some(track) = self.state.drop_current() {
                    self.emit_finished(&track, FinishReason::Stopped);
                    self.discard(track).await;
                }
                self.set_phase(EnginePhase::Idle);
                Ok("Stopped".to_string())
            }

            SessionOp::Pause => {
                if self.phase != EnginePhase::Playing {
                    return Ok("Nothing is playing".to_string());
                }
                self.invalidate_stream().await;
                let at = self.state.mark_paused(Instant::now());
                self.set_phase(EnginePhase::Paused);
                Ok(format!("Paused at {}", format_seconds(at)))
            }

            SessionOp::Resume => {
                if self.state.current().is_none() {
                    // After a stop, resume restarts the driver on what is left
                    if self.state.queue().is_empty() || self.state.connection().is_none() {
                        return Ok("Nothing is paused".to_string());
                    }
                    self.driving = true;
                    self.kick = true;
                    return Ok("Resuming queue".to_string());
                }
                if !self.state.is_paused() {
                    return Ok("Nothing is paused".to_string());
                }
                self.driving = true;
                let at = self.relaunch().await?;
                Ok(format!("Resumed at {}", format_seconds(at)))
            }

            SessionOp::Clear => {
                let removed = self.state.clear();
                let count = removed.len();
                for track in removed {
                    self.discard(track).await;
                }
                self.emit_queue_changed();
                Ok(format!("Queue cleared ({} removed)", count))
            }

            SessionOp::ToggleLoop => {
                let mode = self.state.toggle_loop();
                self.events.emit_lossy(BotEvent::LoopModeChanged {
                    mode,
                    timestamp: djbot_common::time::now(),
                });
                Ok(format!("Loop is now {}", on_off(mode == LoopMode::Single)))
            }

            SessionOp::ToggleLoopQueue => {
                let mode = self.state.toggle_loop_queue();
                self.events.emit_lossy(BotEvent::LoopModeChanged {
                    mode,
                    timestamp: djbot_common::time::now(),
                });
                Ok(format!("Queue loop is now {}", on_off(mode == LoopMode::Queue)))
            }

            SessionOp::Remove(index) => match self.state.remove(index) {
                Some(track) => {
                    let title = track.title().to_string();
                    self.discard(track).await;
                    self.emit_queue_changed();
                    Ok(format!("Removed {}", title))
                }
                None => {
                    debug!(index, queue_len = self.state.queue().len(), "Remove out of range ignored");
                    Ok(Error::InvalidIndex(index).to_string())
                }
            },

            SessionOp::RemovePlaylist => {
                let removed = self.state.take_playlist_tracks();
                let count = removed.len();
                for track in removed {
                    self.discard(track).await;
                }
                self.emit_queue_changed();
                Ok(format!("Removed {} playlist tracks", count))
            }

            SessionOp::BeginPlaylist => {
                self.state.begin_playlist();
                Ok("Playlist started".to_string())
            }

            SessionOp::Join(channel_id) => self.join(&channel_id).await,

            SessionOp::Leave => self.leave().await,
        }
    }

    async fn join(&mut self, channel_id: &str) -> Result<String> {
        if let Some(existing) = self.state.connection() {
            if existing.channel_id == channel_id {
                return Ok(format!("Already in {}", existing.channel_name));
            }
        }

        // Switching outputs stops the stream; carry on from the same spot
        let was_playing = self.phase == EnginePhase::Playing;
        if was_playing {
            self.invalidate_stream().await;
            self.state.mark_paused(Instant::now());
            self.set_phase(EnginePhase::Paused);
        }

        let handle = match self.sink.connect(channel_id).await {
            Ok(handle) => handle,
            Err(e) => {
                // Still on the old channel; pick up where we stopped
                if was_playing {
                    if let Err(relaunch_err) = self.relaunch().await {
                        warn!("Relaunch after failed join failed: {}", relaunch_err);
                    }
                }
                return Err(e);
            }
        };
        let message = format!("Joined {}", handle.channel_name);
        self.events.emit_lossy(BotEvent::ConnectionChanged {
            channel: Some(handle.channel_id.clone()),
            timestamp: djbot_common::time::now(),
        });
        self.state.set_connection(Some(handle));
        self.driving = true;
        self.kick = true;

        if was_playing {
            self.relaunch().await?;
        }
        Ok(message)
    }

    async fn leave(&mut self) -> Result<String> {
        let Some(handle) = self.state.connection().cloned() else {
            return Err(Error::NotInVoiceChannel("not connected".to_string()));
        };

        self.driving = false;
        self.invalidate_stream().await;
        if let Some(track) = self.state.drop_current() {
            self.emit_finished(&track, FinishReason::Stopped);
            self.discard(track).await;
        }
        if let Err(e) = self.sink.disconnect().await {
            warn!("Voice disconnect failed: {}", e);
        }
        self.state.set_connection(None);
        self.events.emit_lossy(BotEvent::ConnectionChanged {
            channel: None,
            timestamp: djbot_common::time::now(),
        });
        self.set_phase(EnginePhase::Idle);
        Ok(format!("Left {}", handle.channel_name))
    }

    async fn append(&mut self, track: Track, placement: Placement) -> Result<usize> {
        // Replaying a track to the front replaces whatever is current
        if placement == Placement::Front
            && self.state.current().is_some()
            && self.state.remaining_capacity() > 0
        {
            self.interrupt(FinishReason::Skipped).await;
        }

        match self.state.enqueue(track.clone(), placement) {
            Ok(position) => {
                info!(title = %track.title(), position, "Track queued");
                self.emit_queue_changed();
                if self.state.connection().is_some() {
                    self.driving = true;
                    self.kick = true;
                }
                Ok(position)
            }
            Err(e) => {
                warn!(title = %track.title(), "Track rejected: {}", e);
                self.discard(track).await;
                Err(e)
            }
        }
    }

    /// Seek and volume: update the stored values, then relaunch if playing
    async fn restart(&mut self, offset: Option<f64>, volume: Option<f32>) -> Result<String> {
        if let Some(volume) = volume {
            self.state.set_volume(volume);
            self.events.emit_lossy(BotEvent::VolumeChanged {
                volume: self.state.volume(),
                timestamp: djbot_common::time::now(),
            });
        }

        let message = match (offset, volume) {
            (_, Some(_)) => format!("Volume set to {}%", volume_percent(self.state.volume())),
            (Some(offset), None) => format!("Seeked to {}", format_seconds(offset)),
            (None, None) => "Restarted".to_string(),
        };

        if self.state.current().is_none() {
            return Ok(if volume.is_some() {
                message
            } else {
                "Nothing is playing".to_string()
            });
        }

        if self.state.is_paused() {
            // Applied when playback resumes
            if let Some(offset) = offset {
                self.state.set_paused_position(offset);
                self.emit_seeked(offset.max(0.0));
            }
            return Ok(message);
        }

        if let Some(offset) = offset {
            self.state.set_seek_target(offset);
        }
        let at = self.relaunch().await?;
        if offset.is_some() {
            self.emit_seeked(at);
        }
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Stream lifecycle
    // ------------------------------------------------------------------

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Stop the active stream; its end notification becomes stale
    async fn invalidate_stream(&mut self) {
        self.generation += 1;
        if let Err(e) = self.sink.stop().await {
            warn!("Failed to stop stream: {}", e);
        }
    }

    /// Relaunch the current track at the seek target or current position
    async fn relaunch(&mut self) -> Result<f64> {
        let Some(track) = self.state.current().cloned() else {
            return Ok(0.0);
        };
        let now = Instant::now();
        let offset = self
            .state
            .take_seek_target()
            .unwrap_or_else(|| self.state.position_at(now))
            .max(0.0);

        self.set_phase(EnginePhase::Restarting);
        let generation = self.next_generation();
        let request = StreamRequest {
            path: track.filepath().to_path_buf(),
            options: StreamOptions::new(offset, self.state.volume()),
            generation,
        };

        match self.sink.play(request, self.ended_tx.clone()).await {
            Ok(()) => {
                self.state.mark_playing(offset, Instant::now());
                self.set_phase(EnginePhase::Playing);
                debug!(title = %track.title(), offset, generation, "Stream relaunched");
                Ok(offset)
            }
            Err(e) => {
                error!(title = %track.title(), "Relaunch failed, moving on: {}", e);
                self.fail_current().await;
                self.kick = true;
                Err(e)
            }
        }
    }

    /// Start the queue head, skipping tracks whose stream cannot start
    async fn advance(&mut self) {
        if !self.driving || self.state.connection().is_none() || self.state.current().is_some() {
            return;
        }

        while let Some(track) = self.state.begin_next() {
            self.set_phase(EnginePhase::Starting);
            self.emit_queue_changed();
            self.announce(&track).await;

            let generation = self.next_generation();
            let request = StreamRequest {
                path: track.filepath().to_path_buf(),
                options: StreamOptions::new(0.0, self.state.volume()),
                generation,
            };

            match self.sink.play(request, self.ended_tx.clone()).await {
                Ok(()) => {
                    self.state.mark_playing(0.0, Instant::now());
                    self.set_phase(EnginePhase::Playing);
                    info!(title = %track.title(), generation, "Now playing");
                    self.events.emit_lossy(BotEvent::TrackStarted {
                        title: track.title().to_string(),
                        duration_seconds: track.duration_seconds(),
                        timestamp: djbot_common::time::now(),
                    });
                    return;
                }
                Err(e) => {
                    error!(title = %track.title(), "Playback source error, trying next track: {}", e);
                    self.fail_current().await;
                }
            }
        }

        self.set_phase(EnginePhase::Idle);
    }

    async fn announce(&mut self, track: &Track) {
        if self.announcer.is_none() {
            return;
        }
        let generation = self.next_generation();
        let volume = self.state.volume();
        if let Some(announcer) = &self.announcer {
            let text = format!("Now playing: {}", track.title());
            if let Err(e) = announcer
                .announce(self.sink.as_ref(), &text, volume, generation)
                .await
            {
                warn!(title = %track.title(), "Announcement skipped: {}", e);
            }
        }
    }

    async fn on_stream_ended(&mut self, ended: StreamEnded) {
        if ended.generation != self.generation || self.phase != EnginePhase::Playing {
            debug!(
                generation = ended.generation,
                current = self.generation,
                "Ignoring stale stream end"
            );
            return;
        }

        if let Some(error) = &ended.error {
            let elapsed = match self.state.position_basis() {
                PositionBasis::Playing { anchor, .. } => Instant::now().saturating_duration_since(anchor),
                _ => Duration::ZERO,
            };
            if elapsed < STARTUP_GRACE {
                error!(title = ?self.current_title(), "Playback source error: {}", error);
                self.fail_current().await;
                self.advance().await;
                return;
            }
            warn!(title = ?self.current_title(), "Stream ended abnormally: {}", error);
        }

        self.set_phase(EnginePhase::Draining);
        self.complete_current(FinishReason::Completed).await;
        self.set_phase(EnginePhase::Idle);
        self.advance().await;
    }

    /// Stop the stream and run post-completion bookkeeping without advancing
    async fn interrupt(&mut self, reason: FinishReason) {
        self.invalidate_stream().await;
        self.complete_current(reason).await;
        self.set_phase(EnginePhase::Idle);
    }

    /// Loop bookkeeping for the track that just stopped being current
    async fn complete_current(&mut self, reason: FinishReason) {
        let Some(disposition) = self.state.finish_current() else {
            return;
        };
        match disposition {
            Disposition::Requeued(track) => {
                debug!(title = %track.title(), mode = %self.state.loop_mode(), "Track requeued");
                self.emit_finished(&track, reason);
            }
            Disposition::Discard(track) => {
                if self.state.loop_mode() != LoopMode::Off {
                    warn!(title = %track.title(), "Queue full, looped track dropped");
                }
                self.emit_finished(&track, reason);
                self.discard(track).await;
            }
        }
        self.emit_queue_changed();
    }

    /// Drop the current track after its stream failed
    async fn fail_current(&mut self) {
        if let Some(track) = self.state.drop_current() {
            self.emit_finished(&track, FinishReason::Failed);
            self.discard(track).await;
        }
        self.set_phase(EnginePhase::Idle);
    }

    /// Delete a track's file unless another entry still uses it
    async fn discard(&self, track: Track) {
        let path = track.filepath();
        if self.state.is_referenced(path) {
            debug!(path = %path.display(), "File still referenced, kept");
            return;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Deleted track file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Track file already gone")
            }
            Err(e) => warn!(path = %path.display(), "Failed to delete track file: {}", e),
        }
    }

    async fn poll(&mut self) {
        if self.phase != EnginePhase::Idle {
            return;
        }
        if self.state.current().is_none()
            && self.state.position_basis() != PositionBasis::Stopped
        {
            self.state.reset_position();
        }
        if !self.state.queue().is_empty() {
            self.advance().await;
        }
    }

    async fn shutdown(&mut self) {
        self.driving = false;
        self.invalidate_stream().await;
        if self.state.connection().is_some() {
            if let Err(e) = self.sink.disconnect().await {
                warn!("Voice disconnect failed: {}", e);
            }
            self.state.set_connection(None);
        }
        self.set_phase(EnginePhase::Idle);
        info!("Playback engine stopped");
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn current_title(&self) -> Option<String> {
        self.state.current().map(|t| t.title().to_string())
    }

    fn set_phase(&mut self, phase: EnginePhase) {
        if self.phase == phase {
            return;
        }
        debug!(from = %self.phase, to = %phase, "Engine phase");
        self.events.emit_lossy(BotEvent::PlaybackStateChanged {
            old_state: self.phase,
            new_state: phase,
            timestamp: djbot_common::time::now(),
        });
        self.phase = phase;
    }

    fn emit_queue_changed(&self) {
        self.events.emit_lossy(BotEvent::QueueChanged {
            length: self.state.queue().len(),
            timestamp: djbot_common::time::now(),
        });
    }

    fn emit_finished(&self, track: &Track, reason: FinishReason) {
        self.events.emit_lossy(BotEvent::TrackFinished {
            title: track.title().to_string(),
            reason,
            timestamp: djbot_common::time::now(),
        });
    }

    fn emit_seeked(&self, position_seconds: f64) {
        self.events.emit_lossy(BotEvent::Seeked {
            position_seconds,
            timestamp: djbot_common::time::now(),
        });
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
