//! Engine command protocol
//!
//! Every mutation of session state arrives at the engine task as one of
//! these messages and is executed to completion before the next is read.
//! Replies travel back on a oneshot channel.

use crate::error::Result;
use crate::session::{Placement, SessionSnapshot, Track};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Transport and queue operations with a human-readable outcome
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOp {
    Skip,
    Stop,
    Pause,
    Resume,
    Clear,
    ToggleLoop,
    ToggleLoopQueue,
    /// 1-based queue position
    Remove(usize),
    RemovePlaylist,
    /// Forget the previous playlist's files before a new expansion
    BeginPlaylist,
    /// Connect to a channel id
    Join(String),
    Leave,
}

#[derive(Debug)]
pub enum SessionCommand {
    Control {
        op: SessionOp,
        reply: oneshot::Sender<Result<String>>,
    },

    /// Append an acquired track; replies with its 1-based position
    ///
    /// `Placement::Front` interrupts the current track so the appended one
    /// plays next.
    Append {
        track: Track,
        placement: Placement,
        reply: oneshot::Sender<Result<usize>>,
    },

    /// Relaunch the current stream
    ///
    /// `offset: None` keeps the position at the moment of relaunch;
    /// `volume: None` keeps the current volume.
    Restart {
        offset: Option<f64>,
        volume: Option<f32>,
        reply: oneshot::Sender<Result<String>>,
    },

    Inspect(oneshot::Sender<SessionSnapshot>),

    /// Position of the current track, `None` when nothing is current
    Position(oneshot::Sender<Option<f64>>),

    /// Free queue slots
    Capacity(oneshot::Sender<usize>),

    /// Source query of the previously played track
    PreviousQuery(oneshot::Sender<Option<String>>),

    /// Files still referenced by the queue or the current track
    ReferencedFiles(oneshot::Sender<HashSet<PathBuf>>),

    /// Stop playback, disconnect and end the engine task
    Shutdown(oneshot::Sender<()>),
}
