//! Error types for djbot
//!
//! One enum carries every failure a control request can surface. Each
//! variant renders a short human-readable message that the console prints
//! verbatim and the HTTP surface wraps in a JSON body.

use thiserror::Error;

/// Why an acquisition produced no usable track
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadFailure {
    /// Resolver finished but nothing usable appeared on disk
    #[error("no output produced: {0}")]
    NoOutputProduced(String),

    /// Resolver output lacked an identifier, extension or title
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// External tool could not be run or exited with failure
    #[error("tool failed: {0}")]
    ToolFailed(String),
}

/// Main error type for djbot
#[derive(Error, Debug)]
pub enum Error {
    /// Queue capacity invariant would be violated
    #[error("Queue limit reached ({0})")]
    QueueFull(usize),

    /// Join/play precondition not met
    #[error("Not in a voice channel: {0}")]
    NotInVoiceChannel(String),

    /// Acquisition exceeded its time budget; the tool was killed
    #[error("Download timed out after {0}s")]
    DownloadTimeout(u64),

    /// Acquisition failed
    #[error("Download failed: {0}")]
    DownloadFailed(#[from] DownloadFailure),

    /// External stream failed to start
    #[error("Playback source error: {0}")]
    PlaybackSource(String),

    /// Queue position out of range
    #[error("No track at position {0}")]
    InvalidIndex(usize),

    /// Control-surface credentials missing or wrong
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Unrecognised control command or missing parameter
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session owner is gone (engine task ended)
    #[error("Session is not running")]
    SessionClosed,

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable kind used in HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            Error::QueueFull(_) => "queue_full",
            Error::NotInVoiceChannel(_) => "not_in_voice_channel",
            Error::DownloadTimeout(_) => "download_timeout",
            Error::DownloadFailed(DownloadFailure::NoOutputProduced(_)) => "no_output_produced",
            Error::DownloadFailed(DownloadFailure::InvalidMetadata(_)) => "invalid_metadata",
            Error::DownloadFailed(DownloadFailure::ToolFailed(_)) => "download_failed",
            Error::PlaybackSource(_) => "playback_source_error",
            Error::InvalidIndex(_) => "invalid_index",
            Error::AuthenticationFailed(_) => "authentication_failed",
            Error::BadRequest(_) => "bad_request",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
            Error::SessionClosed => "session_closed",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<djbot_common::Error> for Error {
    fn from(err: djbot_common::Error) -> Self {
        match err {
            djbot_common::Error::Io(e) => Error::Io(e),
            djbot_common::Error::Config(msg) => Error::Config(msg),
            djbot_common::Error::InvalidInput(msg) => Error::BadRequest(msg),
            djbot_common::Error::Internal(msg) => Error::Internal(msg),
        }
    }
}

/// Convenience Result type using djbot Error
pub type Result<T> = std::result::Result<T, Error>;
