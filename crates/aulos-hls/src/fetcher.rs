//! The per-URI segment fetcher.
//!
//! One fetcher actor owns a monotonic sequence-number cursor into one media
//! playlist, reloading it on a backoff schedule while live, fetching and
//! decrypting segments, and demultiplexing them into the packet queues it
//! was assigned. Downloading is paced by buffered duration: while every
//! assigned queue holds less than the configured floor, the fetcher
//! downloads; otherwise it idles and rechecks every second.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aulos_core::{DiscontinuityExtra, DiscontinuityFlags, Format, StreamKind, mime};
use aulos_events::{EventBus, SessionEvent};
use aulos_net::{Fetch, RangeSpec};
use aulos_queue::{PacketQueue, QueueError};
use aulos_worker::{Actor, Context, Generation, Handle};
use bytes::Bytes;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{
    HlsError, HlsResult,
    config::HlsConfig,
    demux::{self, SniffedFormat, TsDemuxer},
    keys::{KeyCache, build_iv, decrypt_segment},
    parsing,
    playlist::{CipherMethod, MediaPlaylist, RefreshState},
    session::SessionMsg,
};

/// Which packet queues this fetcher feeds, by stream kind.
pub type Assignment = HashMap<StreamKind, PacketQueue>;

/// Messages accepted by a [`SegmentFetcher`].
pub enum FetcherMsg {
    Start {
        assignment: Assignment,
        /// Media time to start from; `-1` means the live edge.
        start_time_us: i64,
    },
    /// Continue after a pause, optionally with a new queue assignment.
    Resume { assignment: Option<Assignment> },
    Pause,
    Stop,
    DownloadNext { generation: u64 },
    MonitorQueue { generation: u64 },
}

/// Notifications a fetcher posts back to its owning session.
#[derive(Clone, Debug)]
pub enum FetcherEvent {
    Started,
    Paused,
    Stopped,
    /// Rough overall duration recomputed from a (re)loaded playlist.
    DurationUpdate { duration_us: i64, live: bool },
    /// First segment demultiplexed; formats are becoming available.
    Prepared,
    /// Every assigned queue ran dry while downloads are behind.
    BufferLow,
    BufferRecovered,
    /// Clean end of a complete playlist.
    EndOfStream,
    Error { message: String },
}

pub struct SegmentFetcher {
    uri: Url,
    session: Handle<SessionMsg>,
    fetch: Arc<dyn Fetch>,
    keys: Arc<KeyCache>,
    config: Arc<HlsConfig>,
    bus: EventBus,

    assignment: Assignment,
    playlist: Option<MediaPlaylist>,
    playlist_bytes: Bytes,
    last_playlist_fetch: Option<Instant>,
    refresh: RefreshState,

    /// Sequence cursor; `-1` until resolved against a loaded playlist.
    seq_number: i64,
    start_time_us: i64,
    retries: u32,

    running: bool,
    startup: bool,
    pending_discontinuity: bool,
    starved: bool,
    prepared_sent: bool,
    generation: Generation,

    /// Continuation PTS for ID3/ADTS audio across segments.
    audio_next_pts_us: Option<i64>,
    ts_demuxer: Option<Box<dyn TsDemuxer>>,
}

impl SegmentFetcher {
    pub fn new(
        uri: Url,
        session: Handle<SessionMsg>,
        fetch: Arc<dyn Fetch>,
        keys: Arc<KeyCache>,
        config: Arc<HlsConfig>,
        bus: EventBus,
    ) -> Self {
        Self {
            uri,
            session,
            fetch,
            keys,
            config,
            bus,
            assignment: Assignment::new(),
            playlist: None,
            playlist_bytes: Bytes::new(),
            last_playlist_fetch: None,
            refresh: RefreshState::Initial,
            seq_number: -1,
            start_time_us: -1,
            retries: 0,
            running: false,
            startup: false,
            pending_discontinuity: false,
            starved: false,
            prepared_sent: false,
            generation: Generation::new(),
            audio_next_pts_us: None,
            ts_demuxer: None,
        }
    }

    fn notify(&self, event: FetcherEvent) {
        self.session.post(SessionMsg::Fetcher {
            uri: self.uri.clone(),
            event,
        });
    }

    fn fail(&mut self, err: &HlsError) {
        warn!(uri = %self.uri, error = %err, "segment fetcher failed");
        for queue in self.assignment.values() {
            queue.signal_eos(QueueError::Stream(err.to_string()));
        }
        self.bus.publish(SessionEvent::Error {
            message: err.to_string(),
            recoverable: false,
        });
        self.notify(FetcherEvent::Error {
            message: err.to_string(),
        });
        self.running = false;
    }

    fn finish(&mut self) {
        debug!(uri = %self.uri, "playlist complete, all segments queued");
        for queue in self.assignment.values() {
            queue.signal_eos(QueueError::EndOfStream);
        }
        self.notify(FetcherEvent::EndOfStream);
        self.running = false;
    }

    /// Minimum buffered duration across the assigned queues, or `None` once
    /// any queue reached a terminal state.
    fn min_buffered_us(&self) -> Option<i64> {
        let mut min = i64::MAX;
        for queue in self.assignment.values() {
            let (buffered, finished) = queue.buffered_duration_us();
            if finished.is_some() {
                return None;
            }
            min = min.min(buffered);
        }
        (min != i64::MAX).then_some(min)
    }

    async fn reload_playlist_if_stale(&mut self) -> HlsResult<()> {
        let stale = match (&self.playlist, self.last_playlist_fetch) {
            (None, _) | (_, None) => true,
            (Some(playlist), Some(at)) => {
                !playlist.end_list && at.elapsed() >= self.refresh.min_reload_age(playlist)
            }
        };
        if !stale {
            return Ok(());
        }

        let bytes = self.fetch.fetch_bytes(&self.uri, None).await?;
        self.last_playlist_fetch = Some(Instant::now());

        if !self.playlist_bytes.is_empty() && bytes == self.playlist_bytes {
            self.refresh = self.refresh.advance();
            trace!(uri = %self.uri, refresh = ?self.refresh, "playlist unchanged");
            return Ok(());
        }

        let playlist = parsing::parse_media_playlist(&bytes)?;
        let duration_us = playlist.total_duration().as_micros() as i64;
        let live = !playlist.end_list;
        debug!(
            uri = %self.uri,
            segments = playlist.entries.len(),
            first_sequence = playlist.first_sequence(),
            live,
            "playlist (re)loaded"
        );

        self.refresh = RefreshState::Initial;
        self.playlist_bytes = bytes;
        self.playlist = Some(playlist);
        self.notify(FetcherEvent::DurationUpdate { duration_us, live });
        Ok(())
    }

    fn resolve_start_sequence(&mut self) {
        let Some(playlist) = &self.playlist else {
            return;
        };
        if self.seq_number >= 0 {
            return;
        }

        if (playlist.end_list || playlist.is_event) && self.start_time_us >= 0 {
            self.seq_number =
                playlist.sequence_for_time(Duration::from_micros(self.start_time_us as u64));
        } else if !playlist.end_list {
            // Live: hold back from the edge, clamped to the window start.
            let edge =
                playlist.last_sequence() - i64::from(self.config.live_edge_hold_back_segments);
            self.seq_number = edge.max(playlist.first_sequence());
        } else {
            self.seq_number = playlist.first_sequence();
        }

        info!(
            uri = %self.uri,
            sequence = self.seq_number,
            start_time_us = self.start_time_us,
            "resolved starting sequence"
        );
    }

    async fn on_download_next(&mut self, ctx: &mut Context<FetcherMsg>) {
        if let Err(err) = self.reload_playlist_if_stale().await {
            // A playlist that fails to parse cannot be fixed by retrying.
            let transient = matches!(err, HlsError::Net(_)) && self.is_live();
            if transient && self.retries < self.config.max_live_retries {
                self.retry_later(ctx, "playlist reload failed");
                return;
            }
            self.fail(&err);
            return;
        }

        self.resolve_start_sequence();
        let Some(playlist) = self.playlist.clone() else {
            return;
        };

        let first = playlist.first_sequence();
        let last = playlist.last_sequence();

        if self.seq_number < first {
            // Fell behind the window: jump forward and mark the gap.
            warn!(
                uri = %self.uri,
                sequence = self.seq_number,
                first, "behind live window, jumping to its start"
            );
            self.seq_number = first;
            self.pending_discontinuity = true;
            self.retries = 0;
        } else if self.seq_number > last {
            if playlist.end_list {
                self.finish();
                return;
            }
            if self.retries < self.config.max_live_retries {
                self.retry_later(ctx, "waiting for live window to advance");
                return;
            }
            // The live window stopped advancing ahead of us.
            self.fail(&HlsError::Malformed(
                "live playlist stopped advancing".to_string(),
            ));
            return;
        }

        match self.download_one(ctx, &playlist).await {
            Ok(()) => {
                self.retries = 0;
                self.seq_number += 1;
                let generation = self.generation.current();
                ctx.handle().post(FetcherMsg::MonitorQueue { generation });
            }
            Err(err) => match err {
                HlsError::Net(_) if self.is_live() && self.retries < self.config.max_live_retries =>
                {
                    self.retry_later(ctx, "segment fetch failed near live edge");
                }
                err => self.fail(&err),
            },
        }
    }

    fn is_live(&self) -> bool {
        self.playlist.as_ref().is_some_and(|p| !p.end_list)
    }

    fn retry_later(&mut self, ctx: &mut Context<FetcherMsg>, reason: &str) {
        self.retries += 1;
        debug!(
            uri = %self.uri,
            attempt = self.retries,
            max = self.config.max_live_retries,
            reason, "scheduling download retry"
        );
        let generation = self.generation.current();
        ctx.handle().post_delayed(
            FetcherMsg::DownloadNext { generation },
            self.config.live_retry_delay,
        );
    }

    async fn download_one(
        &mut self,
        _ctx: &mut Context<FetcherMsg>,
        playlist: &MediaPlaylist,
    ) -> HlsResult<()> {
        let sequence = self.seq_number;
        let entry_index = (sequence - playlist.media_sequence) as usize;
        let entry = playlist
            .entry_for_sequence(sequence)
            .ok_or_else(|| HlsError::Malformed(format!("sequence {sequence} out of window")))?
            .clone();

        let segment_url = self
            .uri
            .join(&entry.uri)
            .map_err(|e| HlsError::InvalidUrl(format!("segment {}: {e}", entry.uri)))?;
        let range = entry
            .byte_range
            .map(|r| RangeSpec::new(r.offset, Some(r.length)));

        trace!(uri = %segment_url, sequence, ?range, "fetching segment");
        let raw = self.fetch.fetch_bytes(&segment_url, range).await?;
        let fetched_len = raw.len() as u64;

        let data = self.decrypt(playlist, entry_index, sequence, raw).await?;

        // Startup, seek and window jumps restart the timeline for consumers.
        let segment_start_us = playlist.time_for_sequence(sequence).as_micros() as i64;
        let marker = self.pending_discontinuity || entry.discontinuity || self.startup;
        if marker {
            debug!(uri = %self.uri, sequence, "queueing time discontinuity");
            for queue in self.assignment.values() {
                queue.queue_discontinuity(
                    DiscontinuityFlags::TIME,
                    DiscontinuityExtra::default(),
                );
            }
            if let Some(ts) = self.ts_demuxer.as_mut() {
                ts.signal_discontinuity(DiscontinuityFlags::TIME, DiscontinuityExtra::default());
            }
            // Audio timestamps must re-anchor from the next PRIV frame.
            self.audio_next_pts_us = None;
        }
        self.pending_discontinuity = false;
        self.startup = false;

        match demux::sniff(&data) {
            SniffedFormat::TransportStream => self.feed_transport_stream(&data)?,
            SniffedFormat::WebVtt => self.queue_webvtt(&entry, segment_start_us, &data),
            SniffedFormat::ElementaryAudio => self.queue_elementary_audio(&data)?,
        }

        self.bus.publish(SessionEvent::SegmentFetched {
            sequence,
            bytes: fetched_len,
        });
        if !self.prepared_sent {
            self.prepared_sent = true;
            self.notify(FetcherEvent::Prepared);
        }
        Ok(())
    }

    async fn decrypt(
        &mut self,
        playlist: &MediaPlaylist,
        entry_index: usize,
        sequence: i64,
        raw: Bytes,
    ) -> HlsResult<Bytes> {
        let Some(cipher) = playlist.effective_cipher(entry_index) else {
            return Ok(raw);
        };

        match &cipher.method {
            CipherMethod::None => Ok(raw),
            CipherMethod::Aes128 => {
                let key_uri = cipher.uri.as_deref().ok_or_else(|| {
                    HlsError::Malformed("AES-128 key declared without a URI".to_string())
                })?;
                let key_url = self
                    .uri
                    .join(key_uri)
                    .map_err(|e| HlsError::InvalidUrl(format!("key {key_uri}: {e}")))?;

                let (key, cached) = self.keys.get_key(&key_url).await?;
                self.bus.publish(SessionEvent::KeyFetched {
                    uri: key_url.to_string(),
                    cached,
                });

                let iv = build_iv(cipher.iv_hex.as_deref(), sequence)?;
                decrypt_segment(&raw, &key, &iv)
            }
            CipherMethod::Other(method) => Err(HlsError::Unsupported(format!(
                "cipher method {method:?}"
            ))),
        }
    }

    fn feed_transport_stream(&mut self, data: &[u8]) -> HlsResult<()> {
        let demuxer = match self.ts_demuxer.as_mut() {
            Some(demuxer) => demuxer,
            None => {
                let factory = self.config.ts_demuxer_factory.as_ref().ok_or_else(|| {
                    HlsError::Unsupported(
                        "transport-stream segment but no demultiplexer installed".to_string(),
                    )
                })?;
                self.ts_demuxer.insert(factory(&self.assignment))
            }
        };
        demuxer.feed(data)
    }

    fn queue_webvtt(&self, entry: &crate::playlist::PlaylistEntry, start_us: i64, data: &[u8]) {
        let Some(queue) = self.assignment.get(&StreamKind::Subtitle) else {
            return;
        };
        if queue.format().is_none() {
            queue.set_format(Format::new(mime::TEXT_VTT));
        }
        let unit = aulos_core::AccessUnit::new(start_us, Bytes::copy_from_slice(data))
            .with_duration(entry.duration.as_micros() as i64);
        queue.queue_access_unit(unit);
    }

    fn queue_elementary_audio(&mut self, data: &[u8]) -> HlsResult<()> {
        let Some(queue) = self.assignment.get(&StreamKind::Audio) else {
            warn!(uri = %self.uri, "audio segment but no audio queue assigned");
            return Ok(());
        };

        let lead = demux::parse_id3_lead(data)?;
        let start_pts_us = lead
            .anchor_pts_us
            .or(self.audio_next_pts_us)
            .ok_or_else(|| {
                HlsError::Malformed(
                    "audio segment carries no transport-stream timestamp anchor".to_string(),
                )
            })?;

        let segment = demux::parse_adts_frames(&data[lead.data_offset..], start_pts_us)?;
        if queue.format().is_none() {
            queue.set_format(segment.format.clone());
        }
        for unit in segment.units {
            queue.queue_access_unit(unit);
        }
        self.audio_next_pts_us = Some(segment.next_pts_us);
        Ok(())
    }

    fn on_monitor_queue(&mut self, ctx: &mut Context<FetcherMsg>) {
        if !self.running {
            return;
        }
        let Some(min_buffered) = self.min_buffered_us() else {
            return; // a queue is finished; nothing left to pace
        };

        let floor_us = self.config.buffer_floor.as_micros() as i64;
        if min_buffered == 0 && !self.starved && self.prepared_sent {
            self.starved = true;
            self.notify(FetcherEvent::BufferLow);
        } else if min_buffered >= floor_us && self.starved {
            self.starved = false;
            self.notify(FetcherEvent::BufferRecovered);
        }

        let generation = self.generation.current();
        if min_buffered < floor_us {
            ctx.handle().post(FetcherMsg::DownloadNext { generation });
        } else {
            trace!(uri = %self.uri, min_buffered, "buffer full, idling");
            ctx.handle().post_delayed(
                FetcherMsg::MonitorQueue { generation },
                self.config.queue_recheck,
            );
        }
    }
}

impl Actor for SegmentFetcher {
    type Msg = FetcherMsg;

    async fn handle(&mut self, msg: FetcherMsg, ctx: &mut Context<FetcherMsg>) {
        match msg {
            FetcherMsg::Start {
                assignment,
                start_time_us,
            } => {
                debug!(uri = %self.uri, start_time_us, "fetcher starting");
                self.assignment = assignment;
                self.start_time_us = start_time_us;
                self.seq_number = -1;
                self.retries = 0;
                self.running = true;
                self.startup = true;
                self.generation.bump();
                let generation = self.generation.current();
                ctx.handle().post(FetcherMsg::DownloadNext { generation });
                self.notify(FetcherEvent::Started);
            }
            FetcherMsg::Resume { assignment } => {
                debug!(uri = %self.uri, "fetcher resuming");
                if let Some(assignment) = assignment {
                    self.assignment = assignment;
                }
                self.running = true;
                self.generation.bump();
                let generation = self.generation.current();
                ctx.handle().post(FetcherMsg::MonitorQueue { generation });
                self.notify(FetcherEvent::Started);
            }
            FetcherMsg::Pause => {
                debug!(uri = %self.uri, "fetcher paused");
                self.running = false;
                self.generation.bump();
                self.notify(FetcherEvent::Paused);
            }
            FetcherMsg::Stop => {
                debug!(uri = %self.uri, "fetcher stopped");
                self.running = false;
                self.generation.bump();
                self.notify(FetcherEvent::Stopped);
                ctx.stop();
            }
            FetcherMsg::DownloadNext { generation } => {
                if !self.running || !self.generation.is_current(generation) {
                    return;
                }
                self.on_download_next(ctx).await;
            }
            FetcherMsg::MonitorQueue { generation } => {
                if !self.generation.is_current(generation) {
                    return;
                }
                self.on_monitor_queue(ctx);
            }
        }
    }
}
