//! Segment content sniffing and the in-crate demultiplexers.
//!
//! Three segment payloads are recognized:
//!
//! - **MPEG transport stream** (0x47 sync byte every 188 bytes): handed to an
//!   external [`TsDemuxer`] — box/PES parsing is not this crate's business.
//! - **WEBVTT** subtitle segments: queued whole, timestamped by summed
//!   preceding segment durations.
//! - **ID3-tagged elementary audio** (ADTS): the first segment's mandatory
//!   ID3 PRIV frame carries an 8-byte big-endian 90kHz counter that anchors
//!   all per-frame presentation times; frames are then walked by header
//!   length and timestamped from the declared sample rate.

use std::collections::HashMap;
use std::sync::Arc;

use aulos_core::{
    AccessUnit, DiscontinuityExtra, DiscontinuityFlags, Format, StreamKind, mime,
};
use aulos_queue::PacketQueue;
use bytes::Bytes;

use crate::{HlsError, HlsResult};

/// External transport-stream demultiplexer contract.
///
/// Implementations own the packet queues they were created over and push
/// parsed access units into them as bytes are fed.
pub trait TsDemuxer: Send {
    /// Feed one segment's worth of transport-stream bytes.
    fn feed(&mut self, data: &[u8]) -> HlsResult<()>;

    /// Propagate a discontinuity to all streams the demuxer feeds.
    fn signal_discontinuity(&mut self, flags: DiscontinuityFlags, extra: DiscontinuityExtra);
}

/// Builds a [`TsDemuxer`] over the packet queues a fetcher is serving.
pub type TsDemuxerFactory =
    Arc<dyn Fn(&HashMap<StreamKind, PacketQueue>) -> Box<dyn TsDemuxer> + Send + Sync>;

/// What a segment's bytes look like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SniffedFormat {
    TransportStream,
    WebVtt,
    ElementaryAudio,
}

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Classify a segment payload by content, not by file extension.
#[must_use]
pub fn sniff(data: &[u8]) -> SniffedFormat {
    if data.len() >= TS_PACKET_SIZE && data[0] == TS_SYNC_BYTE {
        let packets_to_check = (data.len() / TS_PACKET_SIZE).min(5);
        if (0..packets_to_check).all(|i| data[i * TS_PACKET_SIZE] == TS_SYNC_BYTE) {
            return SniffedFormat::TransportStream;
        }
    }

    let text = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    if text.starts_with(b"WEBVTT") {
        return SniffedFormat::WebVtt;
    }

    SniffedFormat::ElementaryAudio
}

// ---------------------------------------------------------------------------
// ID3 anchor timestamp
// ---------------------------------------------------------------------------

/// PRIV owner identifier whose payload is the 90kHz anchor counter.
const ANCHOR_PRIV_OWNER: &[u8] = b"com.apple.streaming.transportStreamTimestamp";

fn syncsafe_u32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, &b| (acc << 7) | u32::from(b & 0x7f))
}

/// Result of skipping the leading ID3v2 tags of an audio segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Id3Lead {
    /// Anchor presentation time in microseconds, if a PRIV frame carried one.
    pub anchor_pts_us: Option<i64>,
    /// Offset of the first byte after the tag block.
    pub data_offset: usize,
}

/// Parse the ID3v2 tag(s) at the start of `data`.
///
/// Multiple consecutive tags are allowed; the last anchor wins. Returns the
/// offset where the elementary stream begins.
pub fn parse_id3_lead(data: &[u8]) -> HlsResult<Id3Lead> {
    let mut offset = 0;
    let mut anchor_pts_us = None;

    while data.len() >= offset + 10 && &data[offset..offset + 3] == b"ID3" {
        let major_version = data[offset + 3];
        let flags = data[offset + 5];
        let tag_size = syncsafe_u32(&data[offset + 6..offset + 10]) as usize;
        let has_footer = flags & 0x10 != 0;

        let body_start = offset + 10;
        let body_end = (body_start + tag_size).min(data.len());
        if let Some(ts) = find_anchor_priv(&data[body_start..body_end], major_version) {
            // 90kHz ticks to microseconds.
            anchor_pts_us = Some((ts as i64) * 100 / 9);
        }

        offset = body_end + if has_footer { 10 } else { 0 };
    }

    Ok(Id3Lead {
        anchor_pts_us,
        data_offset: offset.min(data.len()),
    })
}

fn find_anchor_priv(mut body: &[u8], major_version: u8) -> Option<u64> {
    while body.len() >= 10 {
        let id = &body[..4];
        if id.iter().all(|&b| b == 0) {
            break; // padding
        }
        let size = if major_version >= 4 {
            syncsafe_u32(&body[4..8]) as usize
        } else {
            u32::from_be_bytes([body[4], body[5], body[6], body[7]]) as usize
        };
        let frame_end = (10 + size).min(body.len());
        if id == b"PRIV" {
            let frame = &body[10..frame_end];
            if let Some(payload) = frame
                .strip_prefix(ANCHOR_PRIV_OWNER)
                .and_then(|rest| rest.strip_prefix(&[0u8]))
            {
                if payload.len() >= 8 {
                    let mut ticks = [0u8; 8];
                    ticks.copy_from_slice(&payload[..8]);
                    return Some(u64::from_be_bytes(ticks));
                }
            }
        }
        body = &body[frame_end..];
    }
    None
}

// ---------------------------------------------------------------------------
// ADTS elementary audio
// ---------------------------------------------------------------------------

const ADTS_SAMPLING_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Access units walked out of one ADTS segment.
pub struct AdtsSegment {
    pub format: Format,
    pub units: Vec<AccessUnit>,
    /// Presentation time immediately after the last frame.
    pub next_pts_us: i64,
}

/// Walk the ADTS frames of `data` (already past any ID3 tags), assigning
/// presentation times from `start_pts_us` and the declared sample rate.
pub fn parse_adts_frames(data: &[u8], start_pts_us: i64) -> HlsResult<AdtsSegment> {
    let mut units = Vec::new();
    let mut offset = 0;
    let mut pts_us = start_pts_us;
    let mut format: Option<Format> = None;

    while offset + 7 <= data.len() {
        let header = &data[offset..];
        if header[0] != 0xff || header[1] & 0xf6 != 0xf0 {
            return Err(HlsError::Malformed(format!(
                "lost ADTS sync at offset {offset}"
            )));
        }

        let sampling_index = usize::from((header[2] >> 2) & 0x0f);
        let sample_rate = *ADTS_SAMPLING_RATES.get(sampling_index).ok_or_else(|| {
            HlsError::Malformed(format!("bad ADTS sampling-frequency index {sampling_index}"))
        })?;
        let channels = u16::from(((header[2] & 0x01) << 2) | (header[3] >> 6));
        let frame_length = (usize::from(header[3] & 0x03) << 11)
            | (usize::from(header[4]) << 3)
            | (usize::from(header[5]) >> 5);

        if frame_length < 7 || offset + frame_length > data.len() {
            return Err(HlsError::Malformed(format!(
                "ADTS frame length {frame_length} exceeds segment at offset {offset}"
            )));
        }

        if format.is_none() {
            format = Some(Format::audio(mime::AUDIO_AAC, sample_rate, channels));
        }

        units.push(AccessUnit::new(
            pts_us,
            Bytes::copy_from_slice(&data[offset..offset + frame_length]),
        ));

        // 1024 samples per frame, rounded to the nearest microsecond.
        let frame_duration_us =
            (1024 * 1_000_000 + i64::from(sample_rate >> 1)) / i64::from(sample_rate);
        pts_us += frame_duration_us;
        offset += frame_length;
    }

    let format = format.ok_or_else(|| {
        HlsError::Malformed("audio segment contains no ADTS frames".to_string())
    })?;

    Ok(AdtsSegment {
        format,
        units,
        next_pts_us: pts_us,
    })
}
