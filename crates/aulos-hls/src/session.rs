//! The streaming session.
//!
//! One session turns one manifest URI into a live set of per-kind byte
//! streams: it ranks the bandwidth variants, owns the segment fetchers, and
//! runs the reconfiguration protocol that adds/removes/reassigns fetchers
//! whenever bandwidth, track selection or the playback position changes.
//!
//! Reconfiguration is strictly single-flight. It proceeds in phases:
//!
//! 1. resolve the per-kind URI set for the chosen variant;
//! 2. pause still-wanted fetchers (or stop all of them on a seek) and wait
//!    for every one to acknowledge;
//! 3. if any kind's URI changed, ask the controller to shut the affected
//!    decoders down and continue on its ack;
//! 4. recompute the start anchor, resume retained fetchers, clear queues
//!    and start fetchers for new URIs, then schedule the next bandwidth
//!    check.
//!
//! A second trigger while one is in flight is deferred and retried; it never
//! runs concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::time::Duration;

use aulos_core::{StreamKind, StreamKindSet, TrackInfo, mime};
use aulos_events::{EventBus, SessionEvent};
use aulos_net::Fetch;
use aulos_play::{PlayError, SourceEvent, SourceFlags, SourceInfo, SourceNotify};
use aulos_queue::{PacketQueue, QueueError};
use aulos_worker::{Actor, Context, Generation, Handle};
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{
    HlsError, HlsResult,
    config::HlsConfig,
    fetcher::{Assignment, FetcherEvent, FetcherMsg, SegmentFetcher},
    keys::KeyCache,
    parsing::{self, Manifest},
    playlist::{BandwidthVariant, VariantManifest},
};

const CONFIG_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Messages accepted by a [`StreamingSession`].
pub enum SessionMsg {
    SetNotify {
        notify: SourceNotify,
    },
    Connect,
    Pause,
    Resume,
    Seek {
        time_us: i64,
    },
    GetTrackInfo {
        reply: oneshot::Sender<Vec<TrackInfo>>,
    },
    SelectTrack {
        index: usize,
        select: bool,
        reply: oneshot::Sender<Result<(), PlayError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    CheckBandwidth {
        generation: u64,
    },
    RetryConfiguration {
        time_us: i64,
        index: usize,
        pick_track: bool,
    },
    DecoderShutdownAck {
        generation: u64,
    },
    Fetcher {
        uri: Url,
        event: FetcherEvent,
    },
}

/// State shared lock-free with the source adapter.
pub(crate) struct SessionShared {
    active: AtomicU8,
    last_dequeued_us: [AtomicI64; 3],
    duration_us: AtomicI64,
    real_time: AtomicBool,
}

fn kind_index(kind: StreamKind) -> usize {
    match kind {
        StreamKind::Audio => 0,
        StreamKind::Video => 1,
        StreamKind::Subtitle => 2,
        _ => unreachable!("no kind index for {kind:?}"),
    }
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicU8::new(0),
            last_dequeued_us: [AtomicI64::new(-1), AtomicI64::new(-1), AtomicI64::new(-1)],
            duration_us: AtomicI64::new(-1),
            real_time: AtomicBool::new(false),
        }
    }

    pub(crate) fn active(&self) -> StreamKindSet {
        StreamKindSet::from_bits(self.active.load(Ordering::Acquire))
    }

    fn set_active(&self, kinds: StreamKindSet) {
        self.active.store(kinds.bits(), Ordering::Release);
    }

    pub(crate) fn note_dequeued(&self, kind: StreamKind, pts_us: i64) {
        self.last_dequeued_us[kind_index(kind)].store(pts_us, Ordering::Release);
    }

    fn max_last_dequeued_us(&self) -> i64 {
        self.last_dequeued_us
            .iter()
            .map(|v| v.load(Ordering::Acquire))
            .max()
            .unwrap_or(-1)
    }

    pub(crate) fn duration_us(&self) -> i64 {
        self.duration_us.load(Ordering::Acquire)
    }

    pub(crate) fn is_real_time(&self) -> bool {
        self.real_time.load(Ordering::Acquire)
    }
}

struct FetcherRecord {
    handle: Handle<FetcherMsg>,
    /// Observed overall duration in microseconds; `-1` until known.
    duration_us: i64,
    prepared: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ConfigPhase {
    AwaitingFetchers,
    AwaitingDecoderShutdown,
}

struct PendingConfig {
    time_us: i64,
    index: usize,
    uri_set: HashMap<Url, StreamKindSet>,
    awaiting_acks: usize,
    phase: ConfigPhase,
    initial: bool,
}

pub struct StreamingSession {
    url: Url,
    fetch: Arc<dyn Fetch>,
    keys: Arc<KeyCache>,
    config: Arc<HlsConfig>,
    bus: EventBus,
    shared: Arc<SessionShared>,
    queues: HashMap<StreamKind, PacketQueue>,

    notify: Option<SourceNotify>,
    manifest: Option<VariantManifest>,
    variants: Vec<BandwidthVariant>,
    fetchers: HashMap<Url, FetcherRecord>,
    prev_uris: HashMap<StreamKind, Url>,

    current_index: usize,
    in_flight: Option<PendingConfig>,
    pending_disconnect: Option<oneshot::Sender<()>>,
    initial_configured: bool,
    prepared_sent: bool,
    last_flags: SourceFlags,

    /// Per-kind rendition pick: global index into `manifest.renditions`.
    current_picks: HashMap<StreamKind, usize>,
    track_overrides: HashMap<StreamKind, usize>,

    check_generation: Generation,
    config_generation: Generation,
}

impl StreamingSession {
    pub(crate) fn new(
        url: Url,
        fetch: Arc<dyn Fetch>,
        config: Arc<HlsConfig>,
        bus: EventBus,
        shared: Arc<SessionShared>,
        queues: HashMap<StreamKind, PacketQueue>,
    ) -> Self {
        let keys = Arc::new(KeyCache::new(fetch.clone()));
        Self {
            url,
            fetch,
            keys,
            config,
            bus,
            shared,
            queues,
            notify: None,
            manifest: None,
            variants: Vec::new(),
            fetchers: HashMap::new(),
            prev_uris: HashMap::new(),
            current_index: 0,
            in_flight: None,
            pending_disconnect: None,
            initial_configured: false,
            prepared_sent: false,
            last_flags: SourceFlags::default(),
            current_picks: HashMap::new(),
            track_overrides: HashMap::new(),
            check_generation: Generation::new(),
            config_generation: Generation::new(),
        }
    }

    fn send_notify(&self, event: SourceEvent) {
        if let Some(notify) = &self.notify {
            let _ = notify.send(event);
        }
    }

    fn flags(&self) -> SourceFlags {
        let live = self.shared.is_real_time();
        SourceFlags {
            can_pause: true,
            can_seek: !live,
            dynamic_duration: live,
        }
    }

    async fn on_connect(&mut self, ctx: &mut Context<SessionMsg>) {
        info!(url = %self.url, "connecting streaming session");
        let result = self.load_manifest().await;
        let initial_index = match result {
            Ok(index) => index,
            Err(err) => {
                warn!(url = %self.url, error = %err, "connect failed");
                self.bus.publish(SessionEvent::Error {
                    message: err.to_string(),
                    recoverable: false,
                });
                self.send_notify(SourceEvent::Prepared {
                    result: Err(err.to_string()),
                });
                return;
            }
        };
        self.change_configuration(ctx, 0, initial_index, true);
    }

    async fn load_manifest(&mut self) -> HlsResult<usize> {
        let bytes = self.fetch.fetch_bytes(&self.url, None).await?;
        match parsing::parse_manifest(&bytes)? {
            Manifest::Variant(manifest) => {
                let mut variants: Vec<BandwidthVariant> = manifest
                    .variants
                    .iter()
                    .enumerate()
                    .map(|(playlist_index, v)| BandwidthVariant {
                        playlist_index,
                        bandwidth_bps: v.bandwidth_bps,
                    })
                    .collect();
                if variants.is_empty() {
                    return Err(HlsError::PlaylistParse(
                        "variant manifest lists no variants".to_string(),
                    ));
                }
                variants.sort_by_key(|v| (v.bandwidth_bps, v.playlist_index));

                // Trust provider ordering: the first-listed variant is the
                // preferred default.
                let initial = variants
                    .iter()
                    .position(|v| v.playlist_index == 0)
                    .unwrap_or(0);

                info!(
                    variants = variants.len(),
                    initial_index = initial,
                    "variant manifest loaded"
                );
                self.manifest = Some(manifest);
                self.variants = variants;
                Ok(initial)
            }
            Manifest::Media(_) => {
                // Single-rendition manifest: synthesize one dummy variant.
                debug!(url = %self.url, "single-rendition manifest");
                self.manifest = None;
                self.variants = vec![BandwidthVariant {
                    playlist_index: 0,
                    bandwidth_bps: 0,
                }];
                Ok(0)
            }
        }
    }

    /// Entry point of the reconfiguration protocol (phases 1–2).
    fn change_configuration(
        &mut self,
        ctx: &mut Context<SessionMsg>,
        time_us: i64,
        index: usize,
        pick_track: bool,
    ) {
        if self.in_flight.is_some() {
            trace!(time_us, index, "reconfiguration in flight, deferring");
            ctx.handle().post_delayed(
                SessionMsg::RetryConfiguration {
                    time_us,
                    index,
                    pick_track,
                },
                CONFIG_RETRY_DELAY,
            );
            return;
        }

        let uri_set = match self.resolve_uri_set(index, pick_track) {
            Ok(set) => set,
            Err(err) => {
                self.fatal(&err);
                return;
            }
        };

        debug!(
            time_us,
            index,
            uris = uri_set.len(),
            fetchers = self.fetchers.len(),
            "reconfiguration begins"
        );

        let pending = PendingConfig {
            time_us,
            index,
            uri_set,
            awaiting_acks: self.fetchers.len(),
            phase: ConfigPhase::AwaitingFetchers,
            initial: !self.initial_configured,
        };

        for (uri, record) in &self.fetchers {
            // Not a seek and still wanted: keep the fetcher's cursor warm.
            if time_us < 0 && pending.uri_set.contains_key(uri) {
                record.handle.post(FetcherMsg::Pause);
            } else {
                record.handle.post(FetcherMsg::Stop);
            }
        }

        let none_pending = pending.awaiting_acks == 0;
        self.in_flight = Some(pending);
        if none_pending {
            self.continue_configuration(ctx);
        }
    }

    /// Phase 3: decoder-shutdown request for kinds whose URI changed.
    fn continue_configuration(&mut self, ctx: &mut Context<SessionMsg>) {
        if self.pending_disconnect.is_some() {
            self.in_flight = None;
            if let Some(reply) = self.pending_disconnect.take() {
                self.finish_disconnect(ctx, reply);
            }
            return;
        }

        let Some(pending) = &mut self.in_flight else {
            return;
        };

        let mut changed = StreamKindSet::empty();
        for (kind, prev_uri) in &self.prev_uris {
            let unchanged = pending
                .uri_set
                .iter()
                .any(|(uri, kinds)| kinds.contains(*kind) && uri == prev_uri);
            if !unchanged {
                changed.insert(*kind);
            }
        }
        // Subtitles have no decoder to shut down.
        changed.remove(StreamKind::Subtitle);

        if !changed.is_empty() && !pending.initial {
            if let Some(notify) = &self.notify {
                debug!(kinds = ?changed, "requesting decoder shutdown");
                pending.phase = ConfigPhase::AwaitingDecoderShutdown;
                let generation = self.config_generation.bump();
                let (ack_tx, ack_rx) = oneshot::channel();
                let _ = notify.send(SourceEvent::RequireDecoderShutdown {
                    kinds: changed,
                    ack: ack_tx,
                });
                let handle = ctx.handle();
                // Continue on ack; a dropped ack also continues so a
                // resetting controller cannot wedge the session.
                tokio::spawn(async move {
                    let _ = ack_rx.await;
                    handle.post(SessionMsg::DecoderShutdownAck { generation });
                });
                return;
            }
        }

        self.finish_configuration(ctx);
    }

    /// Phase 4: apply the new fetcher set.
    fn finish_configuration(&mut self, ctx: &mut Context<SessionMsg>) {
        let Some(pending) = self.in_flight.take() else {
            return;
        };

        let seek = pending.time_us >= 0 && !pending.initial;
        // Live anchor: an explicit time on seek, else continue from the most
        // recently dequeued media time.
        let start_time_us = if pending.time_us >= 0 {
            pending.time_us
        } else {
            self.shared.max_last_dequeued_us()
        };

        let mut active = StreamKindSet::empty();
        for (uri, kinds) in &pending.uri_set {
            let assignment: Assignment = kinds
                .iter()
                .filter_map(|kind| Some((kind, self.queues.get(&kind)?.clone())))
                .collect();

            if let Some(record) = self.fetchers.get(uri) {
                record.handle.post(FetcherMsg::Resume {
                    assignment: Some(assignment),
                });
            } else {
                for kind in kinds.iter() {
                    if let Some(queue) = self.queues.get(&kind) {
                        queue.clear();
                    }
                }
                debug!(uri = %uri, kinds = ?kinds, start_time_us, "starting fetcher");
                let fetcher = SegmentFetcher::new(
                    uri.clone(),
                    ctx.handle(),
                    self.fetch.clone(),
                    self.keys.clone(),
                    self.config.clone(),
                    self.bus.clone(),
                );
                let handle = aulos_worker::spawn(fetcher);
                handle.post(FetcherMsg::Start {
                    assignment,
                    start_time_us,
                });
                self.fetchers.insert(
                    uri.clone(),
                    FetcherRecord {
                        handle,
                        duration_us: -1,
                        prepared: false,
                    },
                );
            }

            for kind in kinds.iter() {
                active.insert(kind);
                self.prev_uris.insert(kind, uri.clone());
            }
        }
        self.prev_uris.retain(|kind, _| active.contains(*kind));
        self.shared.set_active(active);

        let from_index = self.current_index;
        self.current_index = pending.index;
        if !pending.initial && from_index != pending.index {
            info!(from_index, to_index = pending.index, "variant applied");
            self.bus.publish(SessionEvent::VariantApplied {
                from_index,
                to_index: pending.index,
                bandwidth_bps: self.variants[pending.index].bandwidth_bps,
            });
        }
        self.initial_configured = true;

        if seek {
            self.send_notify(SourceEvent::SeekComplete);
        }

        if let Some(reply) = self.pending_disconnect.take() {
            self.finish_disconnect(ctx, reply);
            return;
        }

        let generation = self.check_generation.bump();
        ctx.handle().post_delayed(
            SessionMsg::CheckBandwidth { generation },
            self.config.bandwidth_check_interval,
        );
    }

    /// Per-kind URI resolution for `index`'s variant (phase 1).
    fn resolve_uri_set(
        &mut self,
        index: usize,
        pick_track: bool,
    ) -> HlsResult<HashMap<Url, StreamKindSet>> {
        let mut set: HashMap<Url, StreamKindSet> = HashMap::new();

        let Some(manifest) = self.manifest.clone() else {
            set.insert(
                self.url.clone(),
                StreamKindSet::from(StreamKind::Audio).with(StreamKind::Video),
            );
            return Ok(set);
        };

        let playlist_index = self
            .variants
            .get(index)
            .ok_or(HlsError::VariantNotFound(index))?
            .playlist_index;
        let variant = manifest
            .variants
            .get(playlist_index)
            .ok_or(HlsError::VariantNotFound(playlist_index))?;
        let variant_url = self
            .url
            .join(&variant.uri)
            .map_err(|e| HlsError::InvalidUrl(format!("variant {}: {e}", variant.uri)))?;

        let mut variant_kinds = StreamKindSet::from(StreamKind::Audio).with(StreamKind::Video);

        if let Some(group) = &variant.audio_group {
            if let Some(uri) = self.pick_rendition(&manifest, StreamKind::Audio, group, pick_track)
            {
                let audio_url = self
                    .url
                    .join(&uri)
                    .map_err(|e| HlsError::InvalidUrl(format!("audio rendition {uri}: {e}")))?;
                if audio_url != variant_url {
                    variant_kinds.remove(StreamKind::Audio);
                    set.entry(audio_url)
                        .or_default()
                        .insert(StreamKind::Audio);
                }
            }
        }

        if let Some(group) = &variant.subtitle_group {
            if let Some(uri) =
                self.pick_rendition(&manifest, StreamKind::Subtitle, group, pick_track)
            {
                let subtitle_url = self
                    .url
                    .join(&uri)
                    .map_err(|e| HlsError::InvalidUrl(format!("subtitle rendition {uri}: {e}")))?;
                set.entry(subtitle_url)
                    .or_default()
                    .insert(StreamKind::Subtitle);
            }
        }

        let entry = set.entry(variant_url).or_default();
        for kind in variant_kinds.iter() {
            entry.insert(kind);
        }
        Ok(set)
    }

    /// Choose a rendition within `group`, honoring explicit track selection
    /// and optionally re-randomizing the pick.
    fn pick_rendition(
        &mut self,
        manifest: &VariantManifest,
        kind: StreamKind,
        group: &str,
        pick_track: bool,
    ) -> Option<String> {
        let candidates: Vec<(usize, &crate::playlist::Rendition)> = manifest
            .renditions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.kind == kind && r.group_id == group && r.uri.is_some())
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let chosen = if let Some(&override_index) = self.track_overrides.get(&kind) {
            candidates
                .iter()
                .find(|(i, _)| *i == override_index)
                .copied()
        } else if pick_track && self.config.pick_renditions_at_random && candidates.len() > 1 {
            Some(candidates[rand::rng().random_range(0..candidates.len())])
        } else {
            candidates
                .iter()
                .find(|(_, r)| r.is_default)
                .or_else(|| candidates.iter().find(|(_, r)| r.autoselect))
                .copied()
        };

        let (global_index, rendition) = chosen.or_else(|| candidates.first().copied())?;
        self.current_picks.insert(kind, global_index);
        rendition.uri.clone()
    }

    fn track_list(&self) -> Vec<TrackInfo> {
        let Some(manifest) = &self.manifest else {
            return Vec::new();
        };
        manifest
            .renditions
            .iter()
            .enumerate()
            .map(|(index, rendition)| {
                let guessed_mime = match rendition.kind {
                    StreamKind::Audio => mime::AUDIO_AAC,
                    StreamKind::Video => mime::VIDEO_AVC,
                    StreamKind::Subtitle => mime::TEXT_VTT,
                    _ => unreachable!("no mime for {:?}", rendition.kind),
                };
                let mut info = TrackInfo::new(rendition.kind, guessed_mime);
                info.language = rendition.language.clone();
                info.selected = self.current_picks.get(&rendition.kind) == Some(&index);
                info
            })
            .collect()
    }

    fn on_select_track(
        &mut self,
        ctx: &mut Context<SessionMsg>,
        index: usize,
        select: bool,
    ) -> Result<(), PlayError> {
        let Some(manifest) = &self.manifest else {
            return Err(PlayError::TrackNotFound(index));
        };
        let rendition = manifest
            .renditions
            .get(index)
            .ok_or(PlayError::TrackNotFound(index))?;
        let kind = rendition.kind;

        if select {
            self.track_overrides.insert(kind, index);
        } else if self.track_overrides.get(&kind) == Some(&index) {
            self.track_overrides.remove(&kind);
        } else {
            return Err(PlayError::TrackNotFound(index));
        }

        debug!(index, select, ?kind, "track selection changed");
        self.change_configuration(ctx, -1, self.current_index, false);
        Ok(())
    }

    fn bandwidth_index(&self) -> usize {
        if self.variants.len() <= 1 {
            return 0;
        }
        let Some(estimate) = self.fetch.estimate_bandwidth_bps() else {
            return 0;
        };
        let usable = (estimate as f64 * self.config.bandwidth_safety_margin) as u64;

        // Variants are sorted ascending: take the highest that fits, or the
        // lowest if none do.
        let mut index = 0;
        for (i, variant) in self.variants.iter().enumerate() {
            if variant.bandwidth_bps <= usable {
                index = i;
            }
        }
        trace!(estimate, usable, index, "bandwidth index computed");
        index
    }

    fn on_check_bandwidth(&mut self, ctx: &mut Context<SessionMsg>, generation: u64) {
        if !self.check_generation.is_current(generation) {
            return;
        }
        if self.in_flight.is_some() {
            // The running reconfiguration reschedules the check when done.
            return;
        }

        let target = self.bandwidth_index();
        if target != self.current_index {
            info!(
                from_index = self.current_index,
                to_index = target,
                "bandwidth check triggers reconfiguration"
            );
            self.change_configuration(ctx, -1, target, false);
        } else {
            ctx.handle().post_delayed(
                SessionMsg::CheckBandwidth { generation },
                self.config.bandwidth_check_interval,
            );
        }
    }

    /// One fetcher acknowledged a pause/stop during phase 2.
    fn on_fetcher_ack(&mut self, ctx: &mut Context<SessionMsg>) {
        if let Some(pending) = &mut self.in_flight {
            if pending.phase == ConfigPhase::AwaitingFetchers && pending.awaiting_acks > 0 {
                pending.awaiting_acks -= 1;
                if pending.awaiting_acks == 0 {
                    self.continue_configuration(ctx);
                }
            }
        }
    }

    fn on_fetcher_event(&mut self, ctx: &mut Context<SessionMsg>, uri: Url, event: FetcherEvent) {
        match event {
            FetcherEvent::Started => {}
            FetcherEvent::Paused => self.on_fetcher_ack(ctx),
            FetcherEvent::Stopped => {
                self.fetchers.remove(&uri);
                self.on_fetcher_ack(ctx);
            }
            FetcherEvent::DurationUpdate { duration_us, live } => {
                if let Some(record) = self.fetchers.get_mut(&uri) {
                    record.duration_us = duration_us;
                }
                let max = self
                    .fetchers
                    .values()
                    .map(|r| r.duration_us)
                    .max()
                    .unwrap_or(-1);
                self.shared.duration_us.store(max, Ordering::Release);
                self.shared.real_time.store(live, Ordering::Release);

                let flags = self.flags();
                if flags != self.last_flags {
                    self.last_flags = flags;
                    self.send_notify(SourceEvent::FlagsChanged { flags });
                }
            }
            FetcherEvent::Prepared => {
                if let Some(record) = self.fetchers.get_mut(&uri) {
                    record.prepared = true;
                }
                if !self.prepared_sent && self.fetchers.values().all(|r| r.prepared) {
                    self.prepared_sent = true;
                    let duration_us = self.shared.duration_us();
                    info!(duration_us, "session prepared");
                    self.send_notify(SourceEvent::Prepared {
                        result: Ok(SourceInfo {
                            duration_us: (duration_us >= 0).then_some(duration_us),
                            flags: self.flags(),
                        }),
                    });
                }
            }
            FetcherEvent::BufferLow => {
                self.bus.publish(SessionEvent::BufferingStart);
                self.send_notify(SourceEvent::BufferingStart);
            }
            FetcherEvent::BufferRecovered => {
                self.bus.publish(SessionEvent::BufferingEnd);
                self.send_notify(SourceEvent::BufferingEnd);
            }
            FetcherEvent::EndOfStream => {
                self.bus.publish(SessionEvent::EndOfStream);
            }
            FetcherEvent::Error { message } => {
                warn!(uri = %uri, message, "fetcher error, failing session");
                for queue in self.queues.values() {
                    queue.signal_eos(QueueError::Stream(message.clone()));
                }
                self.send_notify(SourceEvent::Error { message });
            }
        }
    }

    fn fatal(&mut self, err: &HlsError) {
        warn!(error = %err, "session error");
        for queue in self.queues.values() {
            queue.signal_eos(QueueError::Stream(err.to_string()));
        }
        self.bus.publish(SessionEvent::Error {
            message: err.to_string(),
            recoverable: false,
        });
        self.send_notify(SourceEvent::Error {
            message: err.to_string(),
        });
    }

    fn finish_disconnect(&mut self, ctx: &mut Context<SessionMsg>, reply: oneshot::Sender<()>) {
        info!(url = %self.url, "session disconnecting");
        self.config_generation.bump();
        self.check_generation.bump();
        self.in_flight = None;
        for (_, record) in self.fetchers.drain() {
            record.handle.post(FetcherMsg::Stop);
        }
        for queue in self.queues.values() {
            queue.signal_eos(QueueError::EndOfStream);
        }
        self.shared.set_active(StreamKindSet::empty());
        let _ = reply.send(());
        ctx.stop();
    }
}

impl Actor for StreamingSession {
    type Msg = SessionMsg;

    async fn handle(&mut self, msg: SessionMsg, ctx: &mut Context<SessionMsg>) {
        match msg {
            SessionMsg::SetNotify { notify } => {
                self.notify = Some(notify);
            }
            SessionMsg::Connect => self.on_connect(ctx).await,
            SessionMsg::Pause => {
                for record in self.fetchers.values() {
                    record.handle.post(FetcherMsg::Pause);
                }
            }
            SessionMsg::Resume => {
                for record in self.fetchers.values() {
                    record.handle.post(FetcherMsg::Resume { assignment: None });
                }
            }
            SessionMsg::Seek { time_us } => {
                debug!(time_us, "seek requested");
                self.change_configuration(ctx, time_us, self.current_index, false);
            }
            SessionMsg::GetTrackInfo { reply } => {
                let _ = reply.send(self.track_list());
            }
            SessionMsg::SelectTrack {
                index,
                select,
                reply,
            } => {
                let result = self.on_select_track(ctx, index, select);
                let _ = reply.send(result);
            }
            SessionMsg::Disconnect { reply } => {
                let waiting_on_fetchers = self
                    .in_flight
                    .as_ref()
                    .is_some_and(|p| p.phase == ConfigPhase::AwaitingFetchers);
                if waiting_on_fetchers {
                    // Fetcher acks arrive promptly; let them drain first.
                    self.pending_disconnect = Some(reply);
                } else {
                    self.finish_disconnect(ctx, reply);
                }
            }
            SessionMsg::CheckBandwidth { generation } => {
                self.on_check_bandwidth(ctx, generation);
            }
            SessionMsg::RetryConfiguration {
                time_us,
                index,
                pick_track,
            } => {
                self.change_configuration(ctx, time_us, index, pick_track);
            }
            SessionMsg::DecoderShutdownAck { generation } => {
                if !self.config_generation.is_current(generation) {
                    return;
                }
                if self
                    .in_flight
                    .as_ref()
                    .is_some_and(|p| p.phase == ConfigPhase::AwaitingDecoderShutdown)
                {
                    self.finish_configuration(ctx);
                }
            }
            SessionMsg::Fetcher { uri, event } => {
                self.on_fetcher_event(ctx, uri, event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aulos_net::MemoryFetch;
    use aulos_worker::testing::ActorHarness;

    use super::*;
    use crate::playlist::{Rendition, VariantStream};

    fn test_session(fetch: Arc<MemoryFetch>) -> StreamingSession {
        let url = Url::parse("http://x/master.m3u8").unwrap();
        let queues: HashMap<StreamKind, PacketQueue> = StreamKind::ALL
            .into_iter()
            .map(|kind| (kind, PacketQueue::new()))
            .collect();
        StreamingSession::new(
            url,
            fetch,
            Arc::new(HlsConfig::default()),
            EventBus::new(16),
            Arc::new(SessionShared::new()),
            queues,
        )
    }

    fn ranked_variants() -> Vec<BandwidthVariant> {
        vec![
            BandwidthVariant {
                playlist_index: 1,
                bandwidth_bps: 500_000,
            },
            BandwidthVariant {
                playlist_index: 2,
                bandwidth_bps: 1_000_000,
            },
            BandwidthVariant {
                playlist_index: 0,
                bandwidth_bps: 2_000_000,
            },
        ]
    }

    #[tokio::test]
    async fn bandwidth_index_applies_safety_margin() {
        let fetch = Arc::new(MemoryFetch::new());
        let mut session = test_session(fetch.clone());
        session.variants = ranked_variants();

        // 1300k * 0.8 = 1040k: enough for the 1000k variant, not the 2000k.
        fetch.set_bandwidth_bps(Some(1_300_000));
        assert_eq!(session.bandwidth_index(), 1);
    }

    #[tokio::test]
    async fn bandwidth_index_without_estimate_is_lowest() {
        let fetch = Arc::new(MemoryFetch::new());
        let mut session = test_session(fetch.clone());
        session.variants = ranked_variants();

        fetch.set_bandwidth_bps(None);
        assert_eq!(session.bandwidth_index(), 0);
    }

    #[tokio::test]
    async fn bandwidth_index_below_all_variants_is_lowest() {
        let fetch = Arc::new(MemoryFetch::new());
        let mut session = test_session(fetch.clone());
        session.variants = ranked_variants();

        fetch.set_bandwidth_bps(Some(100_000));
        assert_eq!(session.bandwidth_index(), 0);
    }

    #[tokio::test]
    async fn bandwidth_index_with_single_variant_is_fixed() {
        let fetch = Arc::new(MemoryFetch::new());
        let mut session = test_session(fetch.clone());
        session.variants = vec![BandwidthVariant {
            playlist_index: 0,
            bandwidth_bps: 0,
        }];

        fetch.set_bandwidth_bps(Some(50_000_000));
        assert_eq!(session.bandwidth_index(), 0);
    }

    fn two_uri_manifest() -> VariantManifest {
        VariantManifest {
            variants: vec![VariantStream {
                uri: "v0.m3u8".to_string(),
                bandwidth_bps: 1_000_000,
                codecs: None,
                audio_group: Some("aud".to_string()),
                subtitle_group: None,
            }],
            renditions: vec![Rendition {
                kind: StreamKind::Audio,
                group_id: "aud".to_string(),
                name: "main".to_string(),
                language: None,
                uri: Some("audio.m3u8".to_string()),
                is_default: true,
                autoselect: true,
            }],
        }
    }

    /// Phase 2 of a reconfiguration completes only once *every* fetcher has
    /// acknowledged its pause/stop.
    #[tokio::test(start_paused = true)]
    async fn reconfiguration_waits_for_all_fetcher_acks() {
        let fetch = Arc::new(MemoryFetch::new());
        let mut session = test_session(fetch.clone());
        session.manifest = Some(two_uri_manifest());
        session.variants = vec![BandwidthVariant {
            playlist_index: 0,
            bandwidth_bps: 1_000_000,
        }];
        session.initial_configured = true;

        let video_url = Url::parse("http://x/v0.m3u8").unwrap();
        let audio_url = Url::parse("http://x/audio.m3u8").unwrap();
        session
            .prev_uris
            .insert(StreamKind::Video, video_url.clone());
        session
            .prev_uris
            .insert(StreamKind::Audio, audio_url.clone());

        let mut harness = ActorHarness::new(session);

        // Two live fetcher actors owned by the session under test.
        for url in [&video_url, &audio_url] {
            let fetcher = SegmentFetcher::new(
                url.clone(),
                harness.handle(),
                fetch.clone(),
                Arc::new(KeyCache::new(fetch.clone())),
                Arc::new(HlsConfig::default()),
                EventBus::new(16),
            );
            let handle = aulos_worker::spawn(fetcher);
            harness.actor_mut().fetchers.insert(
                url.clone(),
                FetcherRecord {
                    handle,
                    duration_us: -1,
                    prepared: false,
                },
            );
        }

        // A seek stops both fetchers and must wait for both acks.
        harness.deliver(SessionMsg::Seek { time_us: 0 }).await;
        {
            let pending = harness.actor().in_flight.as_ref().expect("in flight");
            assert_eq!(pending.awaiting_acks, 2);
        }

        // Let the fetcher actors process their Stop messages.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        let mut acks = Vec::new();
        while let Some(msg) = harness.next_captured() {
            if matches!(
                msg,
                SessionMsg::Fetcher {
                    event: FetcherEvent::Stopped,
                    ..
                }
            ) {
                acks.push(msg);
            }
        }
        assert_eq!(acks.len(), 2, "both fetchers must acknowledge the stop");

        harness.deliver(acks.remove(0)).await;
        {
            let pending = harness.actor().in_flight.as_ref().expect("still in flight");
            assert_eq!(
                pending.awaiting_acks, 1,
                "one ack must not complete the phase"
            );
        }

        harness.deliver(acks.remove(0)).await;
        assert!(
            harness.actor().in_flight.is_none(),
            "second ack completes the reconfiguration"
        );
    }

    /// A second trigger while a reconfiguration is in flight is deferred,
    /// never run concurrently.
    #[tokio::test(start_paused = true)]
    async fn concurrent_reconfiguration_is_deferred() {
        let fetch = Arc::new(MemoryFetch::new());
        let mut session = test_session(fetch.clone());
        session.manifest = Some(two_uri_manifest());
        session.variants = vec![BandwidthVariant {
            playlist_index: 0,
            bandwidth_bps: 1_000_000,
        }];
        session.initial_configured = true;

        let video_url = Url::parse("http://x/v0.m3u8").unwrap();
        let mut harness = ActorHarness::new(session);

        let fetcher = SegmentFetcher::new(
            video_url.clone(),
            harness.handle(),
            fetch.clone(),
            Arc::new(KeyCache::new(fetch.clone())),
            Arc::new(HlsConfig::default()),
            EventBus::new(16),
        );
        let handle = aulos_worker::spawn(fetcher);
        harness.actor_mut().fetchers.insert(
            video_url,
            FetcherRecord {
                handle,
                duration_us: -1,
                prepared: false,
            },
        );

        harness.deliver(SessionMsg::Seek { time_us: 0 }).await;
        assert!(harness.actor().in_flight.is_some());

        // Second seek while the first is mid-flight: deferred as a retry.
        harness
            .deliver(SessionMsg::Seek { time_us: 5_000_000 })
            .await;
        assert!(
            harness.actor().in_flight.is_some(),
            "the in-flight reconfiguration is untouched"
        );

        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        let retried = std::iter::from_fn(|| harness.next_captured()).any(|msg| {
            matches!(
                msg,
                SessionMsg::RetryConfiguration {
                    time_us: 5_000_000,
                    ..
                }
            )
        });
        assert!(retried, "the deferred trigger must come back as a retry");
    }
}
