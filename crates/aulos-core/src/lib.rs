#![forbid(unsafe_code)]

//! Shared vocabulary types for the aulos playback engine.
//!
//! Everything here is plain data: stream kinds, access units, formats and
//! discontinuity markers that flow between the streaming session, the packet
//! queues and the playback controller. No I/O, no async.

mod discontinuity;
mod format;
mod kind;
mod track;
mod unit;

pub use discontinuity::{DiscontinuityExtra, DiscontinuityFlags};
pub use format::{Format, mime};
pub use kind::{StreamKind, StreamKindSet};
pub use track::TrackInfo;
pub use unit::AccessUnit;
