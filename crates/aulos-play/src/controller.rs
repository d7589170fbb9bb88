//! The playback controller actor.
//!
//! Owns one [`Source`], up to two decoders (audio/video) and one renderer,
//! and drives prepare/start/pause/seek/reset plus surface and track changes
//! through a deferred-action queue gated by the dual-track flush protocol:
//!
//! - Any operation that must not race with in-flight decoder buffers (seek,
//!   reset, surface change, track-driven decoder shutdown) pushes its flush
//!   prologue and the operation itself onto the FIFO deferred queue, then
//!   kicks the affected decoders' flushes.
//! - Per-track [`FlushStatus`] walks `Flushing → Flushed` (or
//!   `FlushingThenShutdown → ShuttingDown → ShutDown`); the unaffected peer
//!   is parked at `AwaitingPeer` (or marked `Flushed` when it has no
//!   decoder) so single-track flushes still complete.
//! - Once both tracks sit at a terminal marker, any pending time
//!   discontinuity reaches the renderer, the decoders resume, both statuses
//!   reset and the deferred queue drains — resuming the renderer first
//!   whenever a track is `AwaitingPeer`, because a decoder will not request
//!   more input while the renderer holds all its buffers paused.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use aulos_core::{
    AccessUnit, DiscontinuityExtra, DiscontinuityFlags, StreamKind, TrackInfo,
};
use aulos_events::{EventBus, PlayerEvent};
use aulos_queue::QueueError;
use aulos_worker::{Actor, Context, Generation, Handle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::{
    decoder::{Decoder, DecoderEvent, DecoderInput},
    error::PlayError,
    player::PlayerConfig,
    renderer::{Renderer, RendererEvent},
    source::{Dequeue, Source, SourceEvent, SourceFlags},
    types::{AudioSinkHandle, FlushStatus, PlayState, SurfaceHandle},
};

const SCAN_RETRY_DELAY: Duration = Duration::from_millis(100);
const WOULD_BLOCK_RETRY_DELAY: Duration = Duration::from_millis(10);
const SUBTITLE_POLL_DELAY: Duration = Duration::from_millis(100);
const DURATION_POLL_DELAY: Duration = Duration::from_secs(1);
/// Video frames later than this are drop candidates.
const VIDEO_LATE_DROP_THRESHOLD_US: i64 = 100_000;

pub(crate) enum PlayerMsg {
    SetDataSource {
        source: Arc<dyn Source>,
    },
    Prepare,
    Start,
    Pause,
    Resume,
    SeekTo {
        time_us: i64,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    SetSurface {
        surface: Option<SurfaceHandle>,
    },
    SetAudioSink {
        sink: Option<AudioSinkHandle>,
    },
    GetTrackInfo {
        reply: oneshot::Sender<Vec<TrackInfo>>,
    },
    SelectTrack {
        index: usize,
        select: bool,
        reply: oneshot::Sender<Result<(), PlayError>>,
    },
    ScanSources {
        generation: u64,
    },
    PollDuration {
        generation: u64,
    },
    FetchSubtitle {
        generation: u64,
    },
    FromSource(SourceEvent),
    FromDecoder {
        kind: StreamKind,
        event: DecoderEvent,
    },
    FromRenderer(RendererEvent),
}

/// Deferred operations, executed FIFO once no track is mid-flush.
enum DeferredAction {
    Seek { time_us: i64 },
    SetSurface { surface: Option<SurfaceHandle> },
    ShutdownDecoders { audio: bool, video: bool },
    FlushDecoders,
    ScanSources,
    Reset,
    PostMessage { ack: oneshot::Sender<()> },
}

#[derive(Default)]
struct TrackSlot {
    decoder: Option<Arc<dyn Decoder>>,
    flush: FlushStatus,
    skip_render_until_us: Option<i64>,
    eos: bool,
}

pub(crate) struct Controller {
    config: PlayerConfig,
    bus: EventBus,
    state: PlayState,

    source: Option<Arc<dyn Source>>,
    source_flags: SourceFlags,
    surface: Option<SurfaceHandle>,
    audio_sink: Option<AudioSinkHandle>,
    renderer: Option<Arc<dyn Renderer>>,

    audio: TrackSlot,
    video: TrackSlot,

    deferred: VecDeque<DeferredAction>,
    time_discontinuity_pending: bool,
    reset_reply: Option<oneshot::Sender<()>>,

    scan_generation: Generation,
    scan_pending: bool,
    poll_generation: Generation,
    subtitle_generation: Generation,

    started: bool,
    video_is_avc: bool,
    video_late_by_us: i64,
    frames_total: u64,
    frames_dropped: u64,
}

impl Controller {
    pub(crate) fn new(config: PlayerConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            state: PlayState::Idle,
            source: None,
            source_flags: SourceFlags::default(),
            surface: None,
            audio_sink: None,
            renderer: None,
            audio: TrackSlot::default(),
            video: TrackSlot::default(),
            deferred: VecDeque::new(),
            time_discontinuity_pending: false,
            reset_reply: None,
            scan_generation: Generation::new(),
            scan_pending: false,
            poll_generation: Generation::new(),
            subtitle_generation: Generation::new(),
            started: false,
            video_is_avc: false,
            video_late_by_us: 0,
            frames_total: 0,
            frames_dropped: 0,
        }
    }

    fn slot(&self, kind: StreamKind) -> &TrackSlot {
        match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
            StreamKind::Subtitle => unreachable!("subtitles have no decoder slot"),
            _ => unreachable!("no decoder slot for {kind:?}"),
        }
    }

    fn slot_mut(&mut self, kind: StreamKind) -> &mut TrackSlot {
        match kind {
            StreamKind::Audio => &mut self.audio,
            StreamKind::Video => &mut self.video,
            StreamKind::Subtitle => unreachable!("subtitles have no decoder slot"),
            _ => unreachable!("no decoder slot for {kind:?}"),
        }
    }

    fn invalid_operation(&self, what: &str) {
        warn!(what, state = self.state.name(), "operation invalid in this state");
        self.bus.publish(PlayerEvent::Error {
            message: format!("{what} invalid in state {}", self.state.name()),
        });
    }

    // -- lifecycle -----------------------------------------------------------

    fn on_set_data_source(&mut self, source: Arc<dyn Source>) {
        if self.state != PlayState::Idle {
            self.invalid_operation("setDataSource");
            return;
        }
        debug!("data source set");
        self.source = Some(source);
        self.state = PlayState::Uninitialized;
    }

    fn on_prepare(&mut self, ctx: &mut Context<PlayerMsg>) {
        if self.state != PlayState::Uninitialized {
            self.invalid_operation("prepare");
            return;
        }
        let Some(source) = &self.source else {
            self.invalid_operation("prepare");
            return;
        };

        self.state = PlayState::Preparing;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ctx.handle();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handle.post(PlayerMsg::FromSource(event));
            }
        });
        source.prepare_async(tx);
    }

    fn on_start(&mut self, ctx: &mut Context<PlayerMsg>) {
        match self.state {
            PlayState::Paused => {
                self.on_resume();
                return;
            }
            PlayState::Prepared => {}
            _ => {
                self.invalid_operation("start");
                return;
            }
        }
        let Some(source) = self.source.clone() else {
            self.invalid_operation("start");
            return;
        };

        info!("starting playback");
        self.audio.eos = false;
        self.video.eos = false;
        self.audio.skip_render_until_us = None;
        self.video.skip_render_until_us = None;
        self.video_late_by_us = 0;
        self.frames_total = 0;
        self.frames_dropped = 0;
        self.started = true;
        self.state = PlayState::Started;

        source.start();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ctx.handle();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handle.post(PlayerMsg::FromRenderer(event));
            }
        });
        self.renderer = Some((self.config.renderer_factory)(
            self.audio_sink,
            tx,
            source.is_real_time(),
        ));

        self.post_scan_sources(ctx);
        self.subtitle_generation.bump();
        ctx.handle().post(PlayerMsg::FetchSubtitle {
            generation: self.subtitle_generation.current(),
        });
    }

    fn on_pause(&mut self) {
        if self.state != PlayState::Started {
            self.invalid_operation("pause");
            return;
        }
        let (Some(source), Some(renderer)) = (&self.source, &self.renderer) else {
            self.invalid_operation("pause");
            return;
        };
        debug!("pausing");
        source.pause();
        renderer.pause();
        self.state = PlayState::Paused;
    }

    fn on_resume(&mut self) {
        if self.state != PlayState::Paused {
            self.invalid_operation("resume");
            return;
        }
        let (Some(source), Some(renderer)) = (&self.source, &self.renderer) else {
            self.invalid_operation("resume");
            return;
        };
        debug!("resuming");
        source.resume();
        renderer.resume();
        self.state = PlayState::Started;
    }

    async fn on_seek(&mut self, ctx: &mut Context<PlayerMsg>, time_us: i64) {
        if self.source.is_none() {
            self.invalid_operation("seekTo");
            return;
        }
        debug!(time_us, "seek requested");
        self.deferred.push_back(DeferredAction::FlushDecoders);
        self.deferred.push_back(DeferredAction::Seek { time_us });
        self.process_deferred_actions(ctx).await;
    }

    async fn on_reset(&mut self, ctx: &mut Context<PlayerMsg>, reply: oneshot::Sender<()>) {
        debug!("reset requested");
        self.reset_reply = Some(reply);
        self.deferred.push_back(DeferredAction::ShutdownDecoders {
            audio: true,
            video: true,
        });
        self.deferred.push_back(DeferredAction::Reset);
        self.process_deferred_actions(ctx).await;
    }

    async fn on_set_surface(
        &mut self,
        ctx: &mut Context<PlayerMsg>,
        surface: Option<SurfaceHandle>,
    ) {
        debug!(?surface, "surface change requested");
        self.deferred.push_back(DeferredAction::ShutdownDecoders {
            audio: false,
            video: true,
        });
        let rescan = surface.is_some();
        self.deferred.push_back(DeferredAction::SetSurface { surface });
        if rescan {
            // A new surface means the video decoder can be instantiated again.
            self.deferred.push_back(DeferredAction::ScanSources);
        }
        self.process_deferred_actions(ctx).await;
    }

    /// The source is about to swap elementary streams: flush + shut down the
    /// named decoders, rescan, then deliver the ack.
    async fn queue_decoder_shutdown(
        &mut self,
        ctx: &mut Context<PlayerMsg>,
        audio: bool,
        video: bool,
        ack: oneshot::Sender<()>,
    ) {
        info!(audio, video, "source requests decoder shutdown");
        self.deferred
            .push_back(DeferredAction::ShutdownDecoders { audio, video });
        self.deferred.push_back(DeferredAction::ScanSources);
        self.deferred.push_back(DeferredAction::PostMessage { ack });
        self.process_deferred_actions(ctx).await;
    }

    // -- source scan / decoder instantiation ---------------------------------

    fn post_scan_sources(&mut self, ctx: &mut Context<PlayerMsg>) {
        if self.scan_pending {
            return;
        }
        self.scan_pending = true;
        ctx.handle().post(PlayerMsg::ScanSources {
            generation: self.scan_generation.current(),
        });
    }

    fn on_scan_sources(&mut self, ctx: &mut Context<PlayerMsg>, generation: u64) {
        if !self.scan_generation.is_current(generation) {
            return;
        }
        self.scan_pending = false;
        if !self.started {
            return;
        }

        trace!(
            have_audio = self.audio.decoder.is_some(),
            have_video = self.video.decoder.is_some(),
            "scanning sources"
        );
        let had_any = self.audio.decoder.is_some() || self.video.decoder.is_some();

        if self.surface.is_some() {
            self.instantiate_decoder(ctx, StreamKind::Video);
        }
        if self.audio_sink.is_some() {
            self.instantiate_decoder(ctx, StreamKind::Audio);
        }

        if !had_any && (self.audio.decoder.is_some() || self.video.decoder.is_some()) {
            // First time we've found anything playable.
            if self.source_flags.dynamic_duration {
                self.schedule_poll_duration(ctx);
            }
        }

        let still_missing = (self.audio.decoder.is_none() && self.audio_sink.is_some())
            || (self.video.decoder.is_none() && self.surface.is_some());
        if still_missing {
            self.scan_pending = true;
            ctx.handle().post_delayed(
                PlayerMsg::ScanSources { generation },
                SCAN_RETRY_DELAY,
            );
        }
    }

    fn instantiate_decoder(&mut self, ctx: &mut Context<PlayerMsg>, kind: StreamKind) {
        if self.slot(kind).decoder.is_some() {
            return;
        }
        let Some(source) = &self.source else {
            return;
        };
        let Some(format) = source.get_format(kind) else {
            return; // format not known yet, the scan will retry
        };

        if kind == StreamKind::Video {
            self.video_is_avc = format.is_avc();
        }

        debug!(?kind, mime = %format.mime, "instantiating decoder");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ctx.handle();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handle.post(PlayerMsg::FromDecoder { kind, event });
            }
        });

        let decoder = (self.config.decoder_factory)(kind, tx);
        decoder.configure(format);
        self.slot_mut(kind).decoder = Some(decoder);
    }

    fn schedule_poll_duration(&mut self, ctx: &mut Context<PlayerMsg>) {
        ctx.handle().post(PlayerMsg::PollDuration {
            generation: self.poll_generation.current(),
        });
    }

    fn on_poll_duration(&mut self, ctx: &mut Context<PlayerMsg>, generation: u64) {
        if !self.poll_generation.is_current(generation) {
            return;
        }
        if let Some(duration_us) = self.source.as_ref().and_then(|s| s.duration_us()) {
            self.bus.publish(PlayerEvent::Duration { duration_us });
        }
        ctx.handle()
            .post_delayed(PlayerMsg::PollDuration { generation }, DURATION_POLL_DELAY);
    }

    fn on_fetch_subtitle(&mut self, ctx: &mut Context<PlayerMsg>, generation: u64) {
        if !self.subtitle_generation.is_current(generation) {
            return;
        }
        if !self.started {
            return;
        }
        let Some(source) = &self.source else {
            return;
        };

        match source.dequeue_access_unit(StreamKind::Subtitle) {
            Dequeue::Unit(unit) => {
                self.publish_subtitle(&unit);
                ctx.handle().post(PlayerMsg::FetchSubtitle { generation });
            }
            Dequeue::Discontinuity { .. } | Dequeue::WouldBlock => {
                ctx.handle()
                    .post_delayed(PlayerMsg::FetchSubtitle { generation }, SUBTITLE_POLL_DELAY);
            }
            Dequeue::Finished(_) => {}
        }
    }

    fn publish_subtitle(&self, unit: &AccessUnit) {
        self.bus.publish(PlayerEvent::Subtitle {
            pts_us: unit.pts_us,
            duration_us: unit.duration_us,
            text: String::from_utf8_lossy(&unit.data).into_owned(),
        });
    }

    // -- input feeding -------------------------------------------------------

    async fn feed_decoder_input(&mut self, ctx: &mut Context<PlayerMsg>, kind: StreamKind) {
        if self.slot(kind).flush.is_flushing() {
            if let Some(decoder) = &self.slot(kind).decoder {
                decoder.feed(DecoderInput::Discontinuity);
            }
            return;
        }
        let Some(source) = self.source.clone() else {
            return;
        };

        loop {
            match source.dequeue_access_unit(kind) {
                Dequeue::WouldBlock => {
                    ctx.handle().post_delayed(
                        PlayerMsg::FromDecoder {
                            kind,
                            event: DecoderEvent::NeedInput,
                        },
                        WOULD_BLOCK_RETRY_DELAY,
                    );
                    return;
                }
                Dequeue::Discontinuity { flags, extra } => {
                    self.handle_input_discontinuity(ctx, kind, flags, extra).await;
                    return;
                }
                Dequeue::Finished(err) => {
                    let error = match err {
                        QueueError::EndOfStream => None,
                        QueueError::Stream(message) => Some(message),
                    };
                    if let Some(decoder) = &self.slot(kind).decoder {
                        decoder.feed(DecoderInput::Eos { error });
                    }
                    return;
                }
                Dequeue::Unit(unit) => {
                    if kind == StreamKind::Video {
                        self.frames_total += 1;
                        if self.video_late_by_us > VIDEO_LATE_DROP_THRESHOLD_US
                            && self.video_is_avc
                            && !is_avc_reference_frame(&unit.data)
                        {
                            // Too late to matter and nothing references it.
                            self.frames_dropped += 1;
                            trace!(pts_us = unit.pts_us, "dropping late non-reference frame");
                            continue;
                        }
                    }
                    if let Some(decoder) = &self.slot(kind).decoder {
                        decoder.feed(DecoderInput::Unit(unit));
                    }
                    return;
                }
            }
        }
    }

    async fn handle_input_discontinuity(
        &mut self,
        ctx: &mut Context<PlayerMsg>,
        kind: StreamKind,
        flags: DiscontinuityFlags,
        extra: DiscontinuityExtra,
    ) {
        let format_change = flags.changes_format_of(kind);
        let time_change = flags.has_time();
        info!(?kind, format_change, time_change, "input discontinuity");

        let slot = self.slot_mut(kind);
        slot.skip_render_until_us = None;
        if time_change {
            if let Some(resume_at) = extra.resume_at_media_time_us {
                info!(?kind, resume_at, "suppressing rendering until media time");
                slot.skip_render_until_us = Some(resume_at);
            }
        }
        self.time_discontinuity_pending |= time_change;

        if format_change || time_change {
            if self.audio.flush == FlushStatus::None && self.video.flush == FlushStatus::None {
                // Resume scanning sources once the flush completes.
                self.deferred.push_front(DeferredAction::ScanSources);
            }
            if let Some(decoder) = &self.slot(kind).decoder {
                decoder.feed(DecoderInput::Discontinuity);
            }
            self.flush_decoder(kind, format_change);
            self.process_deferred_actions(ctx).await;
        } else {
            // This track is unaffected by the discontinuity.
            self.slot_mut(kind).flush = FlushStatus::Flushed;
            self.finish_flush_if_possible(ctx).await;
            ctx.handle().post_delayed(
                PlayerMsg::FromDecoder {
                    kind,
                    event: DecoderEvent::NeedInput,
                },
                WOULD_BLOCK_RETRY_DELAY,
            );
        }
    }

    // -- flush protocol ------------------------------------------------------

    fn flush_decoder(&mut self, kind: StreamKind, need_shutdown: bool) {
        debug!(?kind, need_shutdown, "flushing decoder");
        if self.slot(kind).decoder.is_none() {
            info!(?kind, "flush requested without a decoder present");
        }

        // No new decoders until this flush settles.
        self.scan_generation.bump();
        self.scan_pending = false;

        if let Some(decoder) = &self.slot(kind).decoder {
            decoder.flush();
        }
        if let Some(renderer) = &self.renderer {
            renderer.flush(kind);
        }

        let slot = self.slot_mut(kind);
        debug_assert!(
            matches!(slot.flush, FlushStatus::None | FlushStatus::AwaitingPeer),
            "flush requested while track already {:?}",
            slot.flush
        );
        slot.flush = if need_shutdown {
            FlushStatus::FlushingThenShutdown
        } else {
            FlushStatus::Flushing
        };

        let peer = match kind {
            StreamKind::Audio => &mut self.video,
            _ => &mut self.audio,
        };
        if peer.flush == FlushStatus::None {
            // A lone-track flush must still complete: park the peer, or mark
            // it done outright when it has no decoder.
            peer.flush = if peer.decoder.is_some() {
                FlushStatus::AwaitingPeer
            } else {
                FlushStatus::Flushed
            };
        }
    }

    async fn on_flush_complete(&mut self, ctx: &mut Context<PlayerMsg>, kind: StreamKind) {
        let slot = self.slot_mut(kind);
        debug_assert!(
            slot.flush.is_flushing(),
            "unsolicited flush completion while {:?}",
            slot.flush
        );
        let need_shutdown = slot.flush == FlushStatus::FlushingThenShutdown;
        slot.flush = FlushStatus::Flushed;
        if kind == StreamKind::Video {
            self.video_late_by_us = 0;
        }
        debug!(?kind, need_shutdown, "decoder flush completed");

        if need_shutdown {
            let slot = self.slot_mut(kind);
            if let Some(decoder) = &slot.decoder {
                decoder.shutdown();
                slot.flush = FlushStatus::ShuttingDown;
            }
        }
        self.finish_flush_if_possible(ctx).await;
    }

    async fn on_shutdown_complete(&mut self, ctx: &mut Context<PlayerMsg>, kind: StreamKind) {
        let slot = self.slot_mut(kind);
        debug_assert!(
            slot.flush == FlushStatus::ShuttingDown,
            "unsolicited shutdown completion while {:?}",
            slot.flush
        );
        slot.decoder = None;
        slot.flush = FlushStatus::ShutDown;
        debug!(?kind, "decoder shut down");
        self.finish_flush_if_possible(ctx).await;
    }

    async fn finish_flush_if_possible(&mut self, ctx: &mut Context<PlayerMsg>) {
        if !self.audio.flush.is_terminal() || !self.video.flush.is_terminal() {
            return;
        }
        debug!("both tracks are flushed now");

        if self.time_discontinuity_pending {
            if let Some(renderer) = &self.renderer {
                renderer.signal_time_discontinuity();
            }
            self.time_discontinuity_pending = false;
        }

        if let Some(decoder) = &self.audio.decoder {
            decoder.resume();
        }
        if let Some(decoder) = &self.video.decoder {
            decoder.resume();
        }

        self.audio.flush = FlushStatus::None;
        self.video.flush = FlushStatus::None;

        self.process_deferred_actions(ctx).await;
    }

    async fn process_deferred_actions(&mut self, ctx: &mut Context<PlayerMsg>) {
        while !self.deferred.is_empty() {
            if self.renderer.is_some()
                && (self.audio.flush == FlushStatus::AwaitingPeer
                    || self.video.flush == FlushStatus::AwaitingPeer)
            {
                // A decoder will not request more input while the renderer
                // holds all its buffers paused, so the parked track's
                // discontinuity would never arrive: let the renderer run.
                if let Some(renderer) = &self.renderer {
                    renderer.resume();
                }
            }

            if self.audio.flush != FlushStatus::None || self.video.flush != FlushStatus::None {
                trace!(
                    audio = ?self.audio.flush,
                    video = ?self.video.flush,
                    "postponing deferred actions until flush completes"
                );
                break;
            }

            let Some(action) = self.deferred.pop_front() else {
                break;
            };
            self.execute(ctx, action).await;
        }
    }

    async fn execute(&mut self, ctx: &mut Context<PlayerMsg>, action: DeferredAction) {
        match action {
            DeferredAction::Seek { time_us } => self.perform_seek(time_us),
            DeferredAction::SetSurface { surface } => self.perform_set_surface(surface),
            DeferredAction::ShutdownDecoders { audio, video } => {
                self.perform_decoder_shutdown(audio, video);
            }
            DeferredAction::FlushDecoders => self.perform_decoder_flush(),
            DeferredAction::ScanSources => self.perform_scan_sources(ctx),
            DeferredAction::Reset => self.perform_reset(ctx).await,
            DeferredAction::PostMessage { ack } => {
                let _ = ack.send(());
            }
        }
    }

    fn perform_seek(&mut self, time_us: i64) {
        debug!(time_us, "performing seek");
        if let Some(source) = &self.source {
            source.seek_to(time_us);
            self.bus.publish(PlayerEvent::Position {
                position_us: time_us,
                video_late_by_us: 0,
            });
        }
        // Everything's flushed; playback continues from the new position.
    }

    fn perform_set_surface(&mut self, surface: Option<SurfaceHandle>) {
        debug!(?surface, "performing surface change");
        self.surface = surface;
    }

    fn perform_decoder_flush(&mut self) {
        debug!("performing decoder flush");
        if self.audio.decoder.is_none() && self.video.decoder.is_none() {
            return;
        }
        self.time_discontinuity_pending = true;
        if self.audio.decoder.is_some() {
            self.flush_decoder(StreamKind::Audio, false);
        }
        if self.video.decoder.is_some() {
            self.flush_decoder(StreamKind::Video, false);
        }
    }

    fn perform_decoder_shutdown(&mut self, audio: bool, video: bool) {
        debug!(audio, video, "performing decoder shutdown");
        if (!audio || self.audio.decoder.is_none()) && (!video || self.video.decoder.is_none()) {
            return;
        }
        self.time_discontinuity_pending = true;

        // Tracks with nothing to shut down are complete from the start.
        if self.audio.flush == FlushStatus::None && (!audio || self.audio.decoder.is_none()) {
            self.audio.flush = FlushStatus::Flushed;
        }
        if self.video.flush == FlushStatus::None && (!video || self.video.decoder.is_none()) {
            self.video.flush = FlushStatus::Flushed;
        }

        if audio && self.audio.decoder.is_some() {
            self.flush_decoder(StreamKind::Audio, true);
        }
        if video && self.video.decoder.is_some() {
            self.flush_decoder(StreamKind::Video, true);
        }
    }

    fn perform_scan_sources(&mut self, ctx: &mut Context<PlayerMsg>) {
        debug!("performing scan sources");
        if !self.started {
            return;
        }
        if self.audio.decoder.is_none() || self.video.decoder.is_none() {
            self.post_scan_sources(ctx);
        }
    }

    async fn perform_reset(&mut self, _ctx: &mut Context<PlayerMsg>) {
        debug!("performing reset");
        debug_assert!(self.audio.decoder.is_none());
        debug_assert!(self.video.decoder.is_none());

        self.poll_generation.bump();
        self.subtitle_generation.bump();
        self.scan_generation.bump();
        self.scan_pending = false;

        self.renderer = None;

        if let Some(source) = self.source.take() {
            source.stop().await;
        }

        self.started = false;
        self.state = PlayState::Idle;
        self.source_flags = SourceFlags::default();
        self.audio = TrackSlot::default();
        self.video = TrackSlot::default();
        self.time_discontinuity_pending = false;
        self.frames_total = 0;
        self.frames_dropped = 0;
        self.video_late_by_us = 0;

        if let Some(reply) = self.reset_reply.take() {
            let _ = reply.send(());
        }
        self.bus.publish(PlayerEvent::ResetComplete);
    }

    // -- rendering -----------------------------------------------------------

    fn render_buffer(&mut self, kind: StreamKind, unit: AccessUnit) {
        if self.slot(kind).flush.is_flushing() {
            // The decoder wants all its buffers back to complete the flush;
            // don't let stale output sit in the renderer's queue.
            trace!(?kind, "discarding output produced mid-flush");
            return;
        }

        let slot = self.slot_mut(kind);
        if let Some(skip_until) = slot.skip_render_until_us {
            if unit.pts_us < skip_until {
                trace!(?kind, pts_us = unit.pts_us, "dropping buffer as requested");
                return;
            }
            slot.skip_render_until_us = None;
        }

        if let Some(renderer) = &self.renderer {
            renderer.queue_frame(kind, unit);
        }
    }

    fn on_renderer_eos(&mut self, kind: StreamKind, error: Option<String>) {
        match kind {
            StreamKind::Audio => self.audio.eos = true,
            StreamKind::Video => self.video.eos = true,
            StreamKind::Subtitle => return,
            _ => return,
        }
        if let Some(message) = error {
            warn!(?kind, message, "track ended with error");
            self.bus.publish(PlayerEvent::Error { message });
        } else {
            debug!(?kind, "track reached end of stream");
        }

        let audio_done = self.audio.eos || self.audio.decoder.is_none();
        let video_done = self.video.eos || self.video.decoder.is_none();
        if audio_done && video_done {
            info!("playback complete");
            self.bus.publish(PlayerEvent::PlaybackComplete);
        }
    }

    // -- source events -------------------------------------------------------

    async fn on_source_event(&mut self, ctx: &mut Context<PlayerMsg>, event: SourceEvent) {
        match event {
            SourceEvent::Prepared { result } => {
                if self.state != PlayState::Preparing {
                    // Stale notification from a source the caller already
                    // reset away.
                    return;
                }
                match result {
                    Ok(info) => {
                        self.state = PlayState::Prepared;
                        self.source_flags = info.flags;
                        self.bus.publish(PlayerEvent::PrepareComplete { result: Ok(()) });
                        if let Some(duration_us) = info.duration_us {
                            self.bus.publish(PlayerEvent::Duration { duration_us });
                        }
                    }
                    Err(message) => {
                        self.state = PlayState::Uninitialized;
                        self.bus.publish(PlayerEvent::PrepareComplete {
                            result: Err(message),
                        });
                    }
                }
            }
            SourceEvent::FlagsChanged { flags } => {
                let had_dynamic = self.source_flags.dynamic_duration;
                if had_dynamic && !flags.dynamic_duration {
                    self.poll_generation.bump();
                } else if !had_dynamic
                    && flags.dynamic_duration
                    && (self.audio.decoder.is_some() || self.video.decoder.is_some())
                {
                    self.schedule_poll_duration(ctx);
                }
                self.source_flags = flags;
            }
            SourceEvent::SeekComplete => {
                self.bus.publish(PlayerEvent::SeekComplete);
            }
            SourceEvent::BufferingStart => self.bus.publish(PlayerEvent::BufferingStart),
            SourceEvent::BufferingEnd => self.bus.publish(PlayerEvent::BufferingEnd),
            SourceEvent::VideoSizeChanged { width, height } => {
                self.bus.publish(PlayerEvent::VideoSizeChanged { width, height });
            }
            SourceEvent::Subtitle { unit } => self.publish_subtitle(&unit),
            SourceEvent::RequireDecoderShutdown { kinds, ack } => {
                self.queue_decoder_shutdown(
                    ctx,
                    kinds.contains(StreamKind::Audio),
                    kinds.contains(StreamKind::Video),
                    ack,
                )
                .await;
            }
            SourceEvent::Error { message } => {
                warn!(message, "source error");
                self.bus.publish(PlayerEvent::Error { message });
            }
        }
    }

    async fn on_decoder_event(
        &mut self,
        ctx: &mut Context<PlayerMsg>,
        kind: StreamKind,
        event: DecoderEvent,
    ) {
        match event {
            DecoderEvent::NeedInput => self.feed_decoder_input(ctx, kind).await,
            DecoderEvent::Output { unit } => self.render_buffer(kind, unit),
            DecoderEvent::OutputFormatChanged { format } => {
                if kind == StreamKind::Video {
                    if let (Some(width), Some(height)) = (format.width, format.height) {
                        self.bus.publish(PlayerEvent::VideoSizeChanged { width, height });
                    }
                }
            }
            DecoderEvent::FlushComplete => self.on_flush_complete(ctx, kind).await,
            DecoderEvent::ShutdownComplete => self.on_shutdown_complete(ctx, kind).await,
            DecoderEvent::Eos { error } => {
                if let Some(renderer) = &self.renderer {
                    renderer.queue_eos(kind, error);
                }
            }
            DecoderEvent::Error { message } => {
                warn!(?kind, message, "decoder error, ending track");
                if let Some(renderer) = &self.renderer {
                    renderer.queue_eos(kind, Some(message));
                }
            }
        }
    }

    fn on_renderer_event(&mut self, event: RendererEvent) {
        match event {
            RendererEvent::Eos { kind, error } => self.on_renderer_eos(kind, error),
            RendererEvent::Position {
                position_us,
                video_late_by_us,
            } => {
                self.video_late_by_us = video_late_by_us;
                self.bus.publish(PlayerEvent::Position {
                    position_us,
                    video_late_by_us,
                });
                self.bus.publish(PlayerEvent::FrameStats {
                    total: self.frames_total,
                    dropped: self.frames_dropped,
                });
            }
            RendererEvent::FlushComplete { kind } => {
                trace!(?kind, "renderer flush completed");
            }
            RendererEvent::VideoRenderingStart => {
                self.bus.publish(PlayerEvent::VideoRenderingStart);
            }
        }
    }
}

impl Actor for Controller {
    type Msg = PlayerMsg;

    async fn handle(&mut self, msg: PlayerMsg, ctx: &mut Context<PlayerMsg>) {
        match msg {
            PlayerMsg::SetDataSource { source } => self.on_set_data_source(source),
            PlayerMsg::Prepare => self.on_prepare(ctx),
            PlayerMsg::Start => self.on_start(ctx),
            PlayerMsg::Pause => self.on_pause(),
            PlayerMsg::Resume => self.on_resume(),
            PlayerMsg::SeekTo { time_us } => self.on_seek(ctx, time_us).await,
            PlayerMsg::Reset { reply } => self.on_reset(ctx, reply).await,
            PlayerMsg::SetSurface { surface } => self.on_set_surface(ctx, surface).await,
            PlayerMsg::SetAudioSink { sink } => {
                self.audio_sink = sink;
            }
            PlayerMsg::GetTrackInfo { reply } => {
                let tracks = match &self.source {
                    Some(source) => source.track_info().await,
                    None => Vec::new(),
                };
                let _ = reply.send(tracks);
            }
            PlayerMsg::SelectTrack {
                index,
                select,
                reply,
            } => {
                let result = match &self.source {
                    Some(source) => source.select_track(index, select).await,
                    None => Err(PlayError::NoSource),
                };
                let _ = reply.send(result);
            }
            PlayerMsg::ScanSources { generation } => self.on_scan_sources(ctx, generation),
            PlayerMsg::PollDuration { generation } => self.on_poll_duration(ctx, generation),
            PlayerMsg::FetchSubtitle { generation } => self.on_fetch_subtitle(ctx, generation),
            PlayerMsg::FromSource(event) => self.on_source_event(ctx, event).await,
            PlayerMsg::FromDecoder { kind, event } => {
                self.on_decoder_event(ctx, kind, event).await;
            }
            PlayerMsg::FromRenderer(event) => self.on_renderer_event(event),
        }
    }
}

/// Whether an AVC access unit contains a reference frame.
///
/// Walks Annex-B NAL units; the first VCL NAL decides: `nal_ref_idc == 0`
/// means nothing later references this frame, so it is safe to drop.
fn is_avc_reference_frame(data: &[u8]) -> bool {
    let mut i = 0;
    while i + 3 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let header = data[i + 3];
            let nal_type = header & 0x1f;
            if (1..=5).contains(&nal_type) {
                return (header >> 5) & 0x03 != 0;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    // Without a parseable VCL NAL, err on the side of keeping the frame.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annex_b(nal_header: u8) -> Vec<u8> {
        let mut data = vec![0, 0, 0, 1, nal_header];
        data.extend_from_slice(&[0x11; 8]);
        data
    }

    #[test]
    fn non_reference_slice_is_droppable() {
        // nal_ref_idc = 0, type 1 (non-IDR slice).
        assert!(!is_avc_reference_frame(&annex_b(0x01)));
    }

    #[test]
    fn reference_slice_is_kept() {
        // nal_ref_idc = 3, type 5 (IDR).
        assert!(is_avc_reference_frame(&annex_b(0x65)));
        // nal_ref_idc = 2, type 1.
        assert!(is_avc_reference_frame(&annex_b(0x41)));
    }

    #[test]
    fn sei_before_slice_is_skipped() {
        // SEI (type 6, ref_idc 0) followed by a reference slice.
        let mut data = vec![0, 0, 0, 1, 0x06, 0xaa];
        data.extend_from_slice(&[0, 0, 0, 1, 0x65]);
        data.extend_from_slice(&[0x22; 4]);
        assert!(is_avc_reference_frame(&data));
    }

    #[test]
    fn garbage_defaults_to_reference() {
        assert!(is_avc_reference_frame(b"no start codes here"));
    }
}
