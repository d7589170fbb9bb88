#![forbid(unsafe_code)]

//! Per-track packet queues of timed access units.
//!
//! A [`PacketQueue`] is the seam between a media source's demultiplexing side
//! (the producer, running on its own task) and the playback controller (the
//! consumer). It is a FIFO of access units interleaved with typed
//! discontinuity markers, with buffered-duration accounting and an
//! end-of-stream latch.
//!
//! All methods take `&self`; the queue carries its own lock. Producers and
//! consumers live on different tasks by design.

use std::collections::VecDeque;
use std::sync::Arc;

use aulos_core::{AccessUnit, DiscontinuityExtra, DiscontinuityFlags, Format};
use parking_lot::Mutex;
use thiserror::Error;

/// Terminal state of a queue once its producer is done.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("end of stream")]
    EndOfStream,

    #[error("stream error: {0}")]
    Stream(String),
}

/// Outcome of a [`PacketQueue::dequeue`] call.
#[derive(Clone, Debug)]
pub enum Dequeue {
    /// The next access unit in presentation order.
    Unit(AccessUnit),
    /// A discontinuity marker; the consumer must flush before reading on.
    Discontinuity {
        flags: DiscontinuityFlags,
        extra: DiscontinuityExtra,
    },
    /// Empty right now, but the producer is still running.
    WouldBlock,
    /// Empty and the producer signalled completion (clean or failed).
    Finished(QueueError),
}

enum Entry {
    Unit(AccessUnit),
    Discontinuity {
        flags: DiscontinuityFlags,
        extra: DiscontinuityExtra,
    },
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<Entry>,
    format: Option<Format>,
    final_result: Option<QueueError>,
}

/// A cloneable handle to one track's packet FIFO.
#[derive(Clone, Default)]
pub struct PacketQueue {
    inner: Arc<Mutex<Inner>>,
}

impl PacketQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one access unit.
    pub fn queue_access_unit(&self, unit: AccessUnit) {
        let mut inner = self.inner.lock();
        inner.final_result = None;
        inner.entries.push_back(Entry::Unit(unit));
    }

    /// Append a discontinuity marker.
    pub fn queue_discontinuity(&self, flags: DiscontinuityFlags, extra: DiscontinuityExtra) {
        let mut inner = self.inner.lock();
        inner.final_result = None;
        inner.entries.push_back(Entry::Discontinuity { flags, extra });
    }

    /// Pop the next entry, if any.
    pub fn dequeue(&self) -> Dequeue {
        let mut inner = self.inner.lock();
        match inner.entries.pop_front() {
            Some(Entry::Unit(unit)) => Dequeue::Unit(unit),
            Some(Entry::Discontinuity { flags, extra }) => Dequeue::Discontinuity { flags, extra },
            None => match &inner.final_result {
                Some(err) => Dequeue::Finished(err.clone()),
                None => Dequeue::WouldBlock,
            },
        }
    }

    /// Whether a dequeue would yield an entry, or the terminal result if the
    /// queue is drained and its producer is done.
    pub fn has_buffer_available(&self) -> Result<bool, QueueError> {
        let inner = self.inner.lock();
        if !inner.entries.is_empty() {
            return Ok(true);
        }
        match &inner.final_result {
            Some(err) => Err(err.clone()),
            None => Ok(false),
        }
    }

    /// Buffered duration in microseconds.
    ///
    /// Summed per run of units between discontinuity markers, since
    /// timestamps restart across a discontinuity.
    pub fn buffered_duration_us(&self) -> (i64, Option<QueueError>) {
        let inner = self.inner.lock();

        let mut total: i64 = 0;
        let mut run_first: Option<i64> = None;
        let mut run_last: i64 = 0;
        for entry in &inner.entries {
            match entry {
                Entry::Unit(unit) => {
                    if run_first.is_none() {
                        run_first = Some(unit.pts_us);
                    }
                    run_last = unit.pts_us;
                }
                Entry::Discontinuity { .. } => {
                    if let Some(first) = run_first.take() {
                        total += (run_last - first).max(0);
                    }
                }
            }
        }
        if let Some(first) = run_first {
            total += (run_last - first).max(0);
        }

        (total, inner.final_result.clone())
    }

    /// Latch the terminal result. Consumers see it once the FIFO drains.
    pub fn signal_eos(&self, err: QueueError) {
        self.inner.lock().final_result = Some(err);
    }

    /// Drop all queued entries and any latched terminal result.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.final_result = None;
    }

    pub fn set_format(&self, format: Format) {
        self.inner.lock().format = Some(format);
    }

    pub fn format(&self) -> Option<Format> {
        self.inner.lock().format.clone()
    }
}
