//! Session state: the single mutable record of queue, history, current
//! track, loop flags, volume and position, owned by the playback engine.

pub mod snapshot;
pub mod state;
pub mod track;

pub use snapshot::SessionSnapshot;
pub use state::{
    ConnectionHandle, Disposition, Placement, PositionBasis, SessionState, QUEUE_CAPACITY,
};
pub use track::Track;
