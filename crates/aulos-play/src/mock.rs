//! Scripted decoder/renderer doubles for controller tests.
//!
//! The mocks behave like cooperative actors: a [`MockDecoder`] immediately
//! acknowledges flush/shutdown, requests input when resumed, and keeps
//! requesting one unit per fed unit while running. A [`MockRenderer`]
//! records everything and lets tests inject position/EOS reports.

use std::sync::Arc;

use aulos_core::{AccessUnit, Format, StreamKind};
use parking_lot::Mutex;

use crate::{
    decoder::{Decoder, DecoderEvent, DecoderInput, DecoderNotify},
    renderer::{Renderer, RendererEvent, RendererNotify},
};

#[derive(Default)]
struct DecoderState {
    configured: Option<Format>,
    fed: Vec<DecoderInput>,
    flush_count: u32,
    shutdown_count: u32,
    resumed_count: u32,
    halted: bool,
}

/// A decoder that requests input as long as it is running.
pub struct MockDecoder {
    kind: StreamKind,
    notify: DecoderNotify,
    state: Mutex<DecoderState>,
    /// Echo every fed unit back as output (so renderer paths run).
    echo_output: bool,
}

impl MockDecoder {
    pub fn new(kind: StreamKind, notify: DecoderNotify) -> Arc<Self> {
        Arc::new(Self {
            kind,
            notify,
            state: Mutex::new(DecoderState::default()),
            echo_output: true,
        })
    }

    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    #[must_use]
    pub fn fed_units(&self) -> Vec<AccessUnit> {
        self.state
            .lock()
            .fed
            .iter()
            .filter_map(|input| match input {
                DecoderInput::Unit(unit) => Some(unit.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn flush_count(&self) -> u32 {
        self.state.lock().flush_count
    }

    #[must_use]
    pub fn shutdown_count(&self) -> u32 {
        self.state.lock().shutdown_count
    }

    #[must_use]
    pub fn resumed_count(&self) -> u32 {
        self.state.lock().resumed_count
    }

    #[must_use]
    pub fn configured_format(&self) -> Option<Format> {
        self.state.lock().configured.clone()
    }

    fn send(&self, event: DecoderEvent) {
        let _ = self.notify.send(event);
    }
}

impl Decoder for MockDecoder {
    fn configure(&self, format: Format) {
        self.state.lock().configured = Some(format);
        self.send(DecoderEvent::NeedInput);
    }

    fn feed(&self, input: DecoderInput) {
        let mut state = self.state.lock();
        match &input {
            DecoderInput::Unit(unit) => {
                if self.echo_output && !state.halted {
                    self.send(DecoderEvent::Output { unit: unit.clone() });
                }
                if !state.halted {
                    self.send(DecoderEvent::NeedInput);
                }
            }
            DecoderInput::Discontinuity => {
                // Stop asking until resumed.
                state.halted = true;
            }
            DecoderInput::Eos { error } => {
                state.halted = true;
                self.send(DecoderEvent::Eos {
                    error: error.clone(),
                });
            }
        }
        state.fed.push(input);
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        state.flush_count += 1;
        state.halted = true;
        self.send(DecoderEvent::FlushComplete);
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        state.resumed_count += 1;
        state.halted = false;
        self.send(DecoderEvent::NeedInput);
    }

    fn shutdown(&self) {
        self.state.lock().shutdown_count += 1;
        self.send(DecoderEvent::ShutdownComplete);
    }
}

#[derive(Default)]
struct RendererState {
    frames: Vec<(StreamKind, AccessUnit)>,
    eos: Vec<(StreamKind, Option<String>)>,
    flushes: Vec<StreamKind>,
    paused: bool,
    resume_count: u32,
    time_discontinuities: u32,
}

/// A renderer that records what it is given.
pub struct MockRenderer {
    notify: RendererNotify,
    state: Mutex<RendererState>,
}

impl MockRenderer {
    pub fn new(notify: RendererNotify) -> Arc<Self> {
        Arc::new(Self {
            notify,
            state: Mutex::new(RendererState::default()),
        })
    }

    #[must_use]
    pub fn queued_frames(&self, kind: StreamKind) -> Vec<AccessUnit> {
        self.state
            .lock()
            .frames
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, unit)| unit.clone())
            .collect()
    }

    #[must_use]
    pub fn eos_tracks(&self) -> Vec<(StreamKind, Option<String>)> {
        self.state.lock().eos.clone()
    }

    #[must_use]
    pub fn flushed_tracks(&self) -> Vec<StreamKind> {
        self.state.lock().flushes.clone()
    }

    #[must_use]
    pub fn resume_count(&self) -> u32 {
        self.state.lock().resume_count
    }

    #[must_use]
    pub fn time_discontinuities(&self) -> u32 {
        self.state.lock().time_discontinuities
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Report a position (and video lateness) as if rendering progressed.
    pub fn report_position(&self, position_us: i64, video_late_by_us: i64) {
        let _ = self.notify.send(RendererEvent::Position {
            position_us,
            video_late_by_us,
        });
    }

    /// Report that `kind` drained past its EOS marker.
    pub fn report_eos(&self, kind: StreamKind, error: Option<String>) {
        let _ = self.notify.send(RendererEvent::Eos { kind, error });
    }
}

impl Renderer for MockRenderer {
    fn queue_frame(&self, kind: StreamKind, unit: AccessUnit) {
        self.state.lock().frames.push((kind, unit));
    }

    fn queue_eos(&self, kind: StreamKind, error: Option<String>) {
        self.state.lock().eos.push((kind, error.clone()));
        // Rendering is instantaneous here: surface the EOS right back.
        let _ = self.notify.send(RendererEvent::Eos { kind, error });
    }

    fn flush(&self, kind: StreamKind) {
        self.state.lock().flushes.push(kind);
        let _ = self.notify.send(RendererEvent::FlushComplete { kind });
    }

    fn pause(&self) {
        self.state.lock().paused = true;
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        state.resume_count += 1;
    }

    fn signal_time_discontinuity(&self) {
        self.state.lock().time_discontinuities += 1;
    }
}
