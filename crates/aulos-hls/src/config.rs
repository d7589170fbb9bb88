use std::time::Duration;

use crate::demux::TsDemuxerFactory;

/// Tunables for a streaming session.
pub struct HlsConfig {
    /// Downloading pauses once every assigned queue buffers this much.
    pub buffer_floor: Duration,
    /// Recheck interval while the buffer floor is met.
    pub queue_recheck: Duration,
    /// Interval between periodic bandwidth checks.
    pub bandwidth_check_interval: Duration,
    /// Fraction of the estimated throughput considered usable.
    pub bandwidth_safety_margin: f64,
    /// How many segments behind the live edge playback starts.
    pub live_edge_hold_back_segments: u32,
    /// Delay between retries near the live edge.
    pub live_retry_delay: Duration,
    /// Retries before a transient live-edge failure escalates.
    pub max_live_retries: u32,
    /// Re-randomize alternate-rendition picks when track picking is
    /// requested during reconfiguration.
    pub pick_renditions_at_random: bool,
    /// Host-provided transport-stream demultiplexer; TS segments fail as
    /// unsupported content without one.
    pub ts_demuxer_factory: Option<TsDemuxerFactory>,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            buffer_floor: Duration::from_secs(10),
            queue_recheck: Duration::from_secs(1),
            bandwidth_check_interval: Duration::from_secs(10),
            bandwidth_safety_margin: 0.8,
            live_edge_hold_back_segments: 3,
            live_retry_delay: Duration::from_secs(3),
            max_live_retries: 5,
            pick_renditions_at_random: true,
            ts_demuxer_factory: None,
        }
    }
}

impl std::fmt::Debug for HlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HlsConfig")
            .field("buffer_floor", &self.buffer_floor)
            .field("queue_recheck", &self.queue_recheck)
            .field("bandwidth_check_interval", &self.bandwidth_check_interval)
            .field("bandwidth_safety_margin", &self.bandwidth_safety_margin)
            .field(
                "live_edge_hold_back_segments",
                &self.live_edge_hold_back_segments,
            )
            .field("live_retry_delay", &self.live_retry_delay)
            .field("max_live_retries", &self.max_live_retries)
            .field("pick_renditions_at_random", &self.pick_renditions_at_random)
            .field(
                "ts_demuxer_factory",
                &self.ts_demuxer_factory.as_ref().map(|_| "<factory>"),
            )
            .finish()
    }
}
