//! The renderer contract.
//!
//! The renderer owns A/V sync: it paces queued frames against the audio
//! clock (or the wall clock for real-time sources), reports positions and
//! per-track end-of-stream, and measures how late video is running — the
//! controller's frame-drop policy keys off that lateness.

use std::sync::Arc;

use aulos_core::{AccessUnit, StreamKind};
use tokio::sync::mpsc;

use crate::types::AudioSinkHandle;

/// Notifications a renderer posts back to the controller.
#[derive(Clone, Debug)]
pub enum RendererEvent {
    /// All buffers of `kind` before EOS have been rendered (or an error
    /// stopped the track).
    Eos {
        kind: StreamKind,
        error: Option<String>,
    },
    /// Periodic progress report while rendering.
    Position {
        position_us: i64,
        video_late_by_us: i64,
    },
    FlushComplete {
        kind: StreamKind,
    },
    VideoRenderingStart,
}

/// Channel on which a renderer delivers [`RendererEvent`]s.
pub type RendererNotify = mpsc::UnboundedSender<RendererEvent>;

pub trait Renderer: Send + Sync {
    fn queue_frame(&self, kind: StreamKind, unit: AccessUnit);

    fn queue_eos(&self, kind: StreamKind, error: Option<String>);

    /// Drop queued frames of `kind`; reply with `FlushComplete`.
    fn flush(&self, kind: StreamKind);

    fn pause(&self);

    fn resume(&self);

    /// The timeline jumped; re-anchor A/V sync at the next queued frames.
    fn signal_time_discontinuity(&self);
}

/// Builds the renderer when playback starts.
pub type RendererFactory = Arc<
    dyn Fn(Option<AudioSinkHandle>, RendererNotify, /* real_time */ bool) -> Arc<dyn Renderer>
        + Send
        + Sync,
>;
