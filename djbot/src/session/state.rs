//! Session state model
//!
//! Pure, synchronous bookkeeping. Only the playback engine's task holds a
//! `SessionState`; every other context reaches it through the control
//! bridge. Time-dependent methods take `now` explicitly.

use crate::acquire::registry::DownloadRegistry;
use crate::error::{Error, Result};
use crate::session::track::Track;
use djbot_common::events::LoopMode;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::time::Instant;

/// Maximum number of queued tracks
pub const QUEUE_CAPACITY: usize = 10;

/// How the current position is derived
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionBasis {
    /// Nothing playing; position is 0
    Stopped,
    /// Stream running; position = `offset + (now - anchor)`
    Playing { anchor: Instant, offset: f64 },
    /// Frozen position in seconds
    Paused { at: f64 },
}

impl PositionBasis {
    pub fn position_at(&self, now: Instant) -> f64 {
        match *self {
            PositionBasis::Stopped => 0.0,
            PositionBasis::Playing { anchor, offset } => {
                offset + now.saturating_duration_since(anchor).as_secs_f64()
            }
            PositionBasis::Paused { at } => at,
        }
    }
}

/// Opaque reference to the connected voice channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub channel_id: String,
    pub channel_name: String,
}

/// Where an appended track goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Tail of the queue
    Back,
    /// Head of the queue (replay previous)
    Front,
    /// Tail of the queue, remembered as part of the latest playlist
    Playlist,
}

/// What happened to a track that stopped being current
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Put back in the queue by the loop mode; file retained
    Requeued(Track),
    /// Will not be replayed; its file may be deleted
    Discard(Track),
}

/// The single mutable session record
#[derive(Debug)]
pub struct SessionState {
    queue: VecDeque<Track>,
    history: Vec<Track>,
    current: Option<Track>,
    loop_mode: LoopMode,
    volume: f32,
    connection: Option<ConnectionHandle>,
    position: PositionBasis,
    seek_target: Option<f64>,
    last_playlist_files: HashSet<PathBuf>,
    downloads: DownloadRegistry,
}

impl SessionState {
    pub fn new(volume: f32, downloads: DownloadRegistry) -> Self {
        Self {
            queue: VecDeque::with_capacity(QUEUE_CAPACITY),
            history: Vec::new(),
            current: None,
            loop_mode: LoopMode::Off,
            volume: volume.clamp(0.0, 1.0),
            connection: None,
            position: PositionBasis::Stopped,
            seek_target: None,
            last_playlist_files: HashSet::new(),
            downloads,
        }
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn queue(&self) -> &VecDeque<Track> {
        &self.queue
    }

    pub fn history(&self) -> &[Track] {
        &self.history
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref()
    }

    pub fn downloads(&self) -> &DownloadRegistry {
        &self.downloads
    }

    pub fn last_playlist_files(&self) -> &HashSet<PathBuf> {
        &self.last_playlist_files
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Free queue slots
    ///
    /// While a loop mode is active the current track reserves one slot,
    /// since it will be put back into the queue when it finishes.
    pub fn remaining_capacity(&self) -> usize {
        let reserved = usize::from(self.current.is_some() && self.loop_mode != LoopMode::Off);
        QUEUE_CAPACITY.saturating_sub(self.queue.len() + reserved)
    }

    /// Append a track; returns its 1-based queue position
    pub fn enqueue(&mut self, track: Track, placement: Placement) -> Result<usize> {
        if self.remaining_capacity() == 0 {
            return Err(Error::QueueFull(QUEUE_CAPACITY));
        }
        match placement {
            Placement::Front => {
                self.queue.push_front(track);
                Ok(1)
            }
            Placement::Back => {
                self.queue.push_back(track);
                Ok(self.queue.len())
            }
            Placement::Playlist => {
                self.last_playlist_files.insert(track.filepath().to_path_buf());
                self.queue.push_back(track);
                Ok(self.queue.len())
            }
        }
    }

    /// Dequeue the head: it becomes `current` and is appended to history
    pub fn begin_next(&mut self) -> Option<Track> {
        let track = self.queue.pop_front()?;
        self.history.push(track.clone());
        self.current = Some(track.clone());
        self.position = PositionBasis::Stopped;
        self.seek_target = None;
        Some(track)
    }

    /// Post-completion bookkeeping for the current track
    ///
    /// `Single` puts it back at the head, `Queue` at the tail, `Off`
    /// discards it. A requeue that would overflow the queue discards instead.
    pub fn finish_current(&mut self) -> Option<Disposition> {
        let track = self.current.take()?;
        self.reset_position();

        let disposition = match self.loop_mode {
            LoopMode::Off => Disposition::Discard(track),
            _ if self.queue.len() >= QUEUE_CAPACITY => Disposition::Discard(track),
            LoopMode::Single => {
                self.queue.push_front(track.clone());
                Disposition::Requeued(track)
            }
            LoopMode::Queue => {
                self.queue.push_back(track.clone());
                Disposition::Requeued(track)
            }
        };
        Some(disposition)
    }

    /// Drop the current track without loop bookkeeping (stop, leave, failure)
    pub fn drop_current(&mut self) -> Option<Track> {
        self.reset_position();
        self.current.take()
    }

    /// Remove by 1-based position; out of range is a no-op returning `None`
    pub fn remove(&mut self, position: usize) -> Option<Track> {
        if position == 0 {
            return None;
        }
        let track = self.queue.remove(position - 1)?;
        self.last_playlist_files.remove(track.filepath());
        Some(track)
    }

    /// Empty the queue, returning what was in it
    pub fn clear(&mut self) -> Vec<Track> {
        self.last_playlist_files.clear();
        self.queue.drain(..).collect()
    }

    /// Forget the previous playlist's files before a new expansion
    pub fn begin_playlist(&mut self) {
        self.last_playlist_files.clear();
    }

    /// Remove every queued track that came from the latest playlist
    pub fn take_playlist_tracks(&mut self) -> Vec<Track> {
        let files = std::mem::take(&mut self.last_playlist_files);
        let (removed, kept): (Vec<Track>, Vec<Track>) = self
            .queue
            .drain(..)
            .partition(|t| files.contains(t.filepath()));
        self.queue = kept.into();
        removed
    }

    /// Query to re-acquire for "replay previous"
    ///
    /// The track before the current one, or the last played track when
    /// nothing is current.
    pub fn previous_query(&self) -> Option<String> {
        let back = if self.current.is_some() { 2 } else { 1 };
        self.history
            .len()
            .checked_sub(back)
            .map(|i| self.history[i].source_query().to_string())
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// True while any queued or current track uses `path`
    pub fn is_referenced(&self, path: &Path) -> bool {
        self.current.iter().any(|t| t.filepath() == path)
            || self.queue.iter().any(|t| t.filepath() == path)
    }

    /// Every file still needed by the session
    pub fn referenced_files(&self) -> HashSet<PathBuf> {
        self.current
            .iter()
            .chain(self.queue.iter())
            .map(|t| t.filepath().to_path_buf())
            .collect()
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    /// Toggle `Single` (turning it on turns `Queue` off)
    pub fn toggle_loop(&mut self) -> LoopMode {
        self.loop_mode = if self.loop_mode == LoopMode::Single {
            LoopMode::Off
        } else {
            LoopMode::Single
        };
        self.loop_mode
    }

    /// Toggle `Queue` (turning it on turns `Single` off)
    pub fn toggle_loop_queue(&mut self) -> LoopMode {
        self.loop_mode = if self.loop_mode == LoopMode::Queue {
            LoopMode::Off
        } else {
            LoopMode::Queue
        };
        self.loop_mode
    }

    /// Set volume, clamped to 0.0-1.0
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_connection(&mut self, connection: Option<ConnectionHandle>) {
        self.connection = connection;
    }

    // ------------------------------------------------------------------
    // Position
    // ------------------------------------------------------------------

    pub fn position_basis(&self) -> PositionBasis {
        self.position
    }

    pub fn position_at(&self, now: Instant) -> f64 {
        self.position.position_at(now)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.position, PositionBasis::Paused { .. })
    }

    /// Stream (re)started at `offset` seconds
    pub fn mark_playing(&mut self, offset: f64, now: Instant) {
        self.position = PositionBasis::Playing {
            anchor: now,
            offset: offset.max(0.0),
        };
    }

    /// Freeze the live position; returns it
    pub fn mark_paused(&mut self, now: Instant) -> f64 {
        let at = self.position.position_at(now);
        self.position = PositionBasis::Paused { at };
        at
    }

    /// Move the frozen position while paused
    pub fn set_paused_position(&mut self, at: f64) {
        self.position = PositionBasis::Paused { at: at.max(0.0) };
    }

    pub fn reset_position(&mut self) {
        self.position = PositionBasis::Stopped;
        self.seek_target = None;
    }

    /// Request the next stream start to begin at `target` seconds
    pub fn set_seek_target(&mut self, target: f64) {
        self.seek_target = Some(target.max(0.0));
    }

    pub fn take_seek_target(&mut self) -> Option<f64> {
        self.seek_target.take()
    }
}
