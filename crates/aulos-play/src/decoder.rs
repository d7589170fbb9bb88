//! The decoder contract.
//!
//! Decoders are opaque host-supplied sinks: the controller configures them,
//! answers their input requests with access units, and drives flush/shutdown
//! during discontinuities. All responses come back asynchronously as
//! [`DecoderEvent`]s on the notify channel the factory received.

use std::sync::Arc;

use aulos_core::{AccessUnit, Format, StreamKind};
use tokio::sync::mpsc;

/// What the controller feeds a decoder in response to `NeedInput`.
#[derive(Clone, Debug)]
pub enum DecoderInput {
    Unit(AccessUnit),
    /// The track hit a discontinuity; stop requesting input until resumed.
    Discontinuity,
    Eos { error: Option<String> },
}

/// Notifications a decoder posts back to the controller.
#[derive(Clone, Debug)]
pub enum DecoderEvent {
    /// The decoder wants one more access unit.
    NeedInput,
    /// A decoded (still compressed-domain here) buffer ready for rendering.
    Output { unit: AccessUnit },
    OutputFormatChanged { format: Format },
    FlushComplete,
    ShutdownComplete,
    Eos { error: Option<String> },
    Error { message: String },
}

/// Channel on which a decoder delivers [`DecoderEvent`]s.
pub type DecoderNotify = mpsc::UnboundedSender<DecoderEvent>;

pub trait Decoder: Send + Sync {
    fn configure(&self, format: Format);

    fn feed(&self, input: DecoderInput);

    /// Discard in-flight buffers; reply with `FlushComplete`.
    fn flush(&self);

    /// Resume requesting input after a completed flush.
    fn resume(&self);

    /// Release the codec; reply with `ShutdownComplete`.
    fn shutdown(&self);
}

/// Builds a decoder for one track. Called from the controller whenever a
/// track's format becomes available and a matching output sink exists.
pub type DecoderFactory =
    Arc<dyn Fn(StreamKind, DecoderNotify) -> Arc<dyn Decoder> + Send + Sync>;
