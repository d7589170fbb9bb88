//! The abstract media-source contract the controller drives.
//!
//! A [`Source`] produces per-track access units through per-kind dequeue
//! calls and reports lifecycle changes through [`SourceEvent`]s on the
//! notify channel handed to `prepare_async`. Concrete sources (adaptive
//! streaming, transport streams, local containers) live elsewhere; callers
//! hold a trait handle, never a concrete type.

use async_trait::async_trait;
use aulos_core::{AccessUnit, Format, StreamKind, StreamKindSet, TrackInfo};
use tokio::sync::{mpsc, oneshot};

pub use aulos_queue::Dequeue;

use crate::error::PlayError;

/// Capabilities a source advertises; may change mid-stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceFlags {
    pub can_pause: bool,
    pub can_seek: bool,
    /// Duration grows while playing (live streams); the controller polls it.
    pub dynamic_duration: bool,
}

/// Payload of a successful prepare.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceInfo {
    pub duration_us: Option<i64>,
    pub flags: SourceFlags,
}

/// Notifications a source posts to the controller.
#[derive(Debug)]
pub enum SourceEvent {
    Prepared {
        result: Result<SourceInfo, String>,
    },
    FlagsChanged {
        flags: SourceFlags,
    },
    SeekComplete,
    BufferingStart,
    BufferingEnd,
    VideoSizeChanged {
        width: u32,
        height: u32,
    },
    /// Timed subtitle payload; subtitles bypass the decoders.
    Subtitle {
        unit: AccessUnit,
    },
    /// The source is about to change the elementary streams behind the given
    /// tracks; the controller must flush and shut the decoders down, then
    /// ack. Dropping the ack is allowed (e.g. controller already resetting).
    RequireDecoderShutdown {
        kinds: StreamKindSet,
        ack: oneshot::Sender<()>,
    },
    Error {
        message: String,
    },
}

/// Channel on which a source delivers [`SourceEvent`]s.
pub type SourceNotify = mpsc::UnboundedSender<SourceEvent>;

/// The source contract.
///
/// `dequeue_access_unit` and `get_format` are non-blocking reads of
/// internally synchronized queues; everything else posts into the source's
/// own task. `stop` and the track calls await a reply and must not be
/// invoked from the source's own execution context.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Begin preparing; completion arrives as [`SourceEvent::Prepared`].
    fn prepare_async(&self, notify: SourceNotify);

    fn start(&self);

    /// Disconnect and release; returns once the source has wound down.
    async fn stop(&self);

    fn pause(&self);

    fn resume(&self);

    /// Format of `kind`'s elementary stream, once known.
    fn get_format(&self, kind: StreamKind) -> Option<Format>;

    /// Pop the next access unit or control marker for `kind`.
    fn dequeue_access_unit(&self, kind: StreamKind) -> Dequeue;

    fn duration_us(&self) -> Option<i64>;

    async fn track_info(&self) -> Vec<TrackInfo>;

    async fn select_track(&self, index: usize, select: bool) -> Result<(), PlayError>;

    /// Reposition; completion arrives as [`SourceEvent::SeekComplete`].
    fn seek_to(&self, time_us: i64);

    /// Real-time sources pace rendering against the wall clock.
    fn is_real_time(&self) -> bool;
}
