#![forbid(unsafe_code)]
#![allow(dead_code)]

//! Shared fixtures for streaming-session integration tests.

use std::sync::Arc;
use std::time::Duration;

use aes::Aes128;
use aulos_core::StreamKind;
use aulos_net::MemoryFetch;
use aulos_play::{Dequeue, Source, SourceEvent, SourceNotify};
use aulos_queue::QueueError;
use cbc::{
    Encryptor,
    cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
};
use tokio::sync::mpsc;

pub const WAIT_BUDGET: Duration = Duration::from_secs(120);
const ANCHOR_OWNER: &[u8] = b"com.apple.streaming.transportStreamTimestamp";

/// One ADTS frame (44.1kHz stereo) with an arbitrary payload.
pub fn adts_frame(payload: &[u8]) -> Vec<u8> {
    let frame_length = 7 + payload.len();
    let mut frame = vec![0u8; 7];
    frame[0] = 0xff;
    frame[1] = 0xf1;
    frame[2] = (1 << 6) | (4 << 2);
    frame[3] = (2 << 6) | ((frame_length >> 11) & 0x03) as u8;
    frame[4] = (frame_length >> 3) as u8;
    frame[5] = ((frame_length as u8 & 0x07) << 5) | 0x1f;
    frame[6] = 0xfc;
    frame.extend_from_slice(payload);
    frame
}

/// An ID3-tagged elementary audio segment whose PRIV frame anchors
/// presentation time at `anchor_ticks_90k`.
pub fn audio_segment(anchor_ticks_90k: u64, payload: &[u8]) -> Vec<u8> {
    let mut frame_body = Vec::new();
    frame_body.extend_from_slice(ANCHOR_OWNER);
    frame_body.push(0);
    frame_body.extend_from_slice(&anchor_ticks_90k.to_be_bytes());

    let mut tag_body = Vec::new();
    tag_body.extend_from_slice(b"PRIV");
    tag_body.extend_from_slice(&(frame_body.len() as u32).to_be_bytes());
    tag_body.extend_from_slice(&[0, 0]);
    tag_body.extend_from_slice(&frame_body);

    let mut segment = Vec::new();
    segment.extend_from_slice(b"ID3\x03\x00\x00");
    let size = tag_body.len() as u32;
    segment.extend_from_slice(&[
        ((size >> 21) & 0x7f) as u8,
        ((size >> 14) & 0x7f) as u8,
        ((size >> 7) & 0x7f) as u8,
        (size & 0x7f) as u8,
    ]);
    segment.extend_from_slice(&tag_body);
    segment.extend_from_slice(&adts_frame(payload));
    segment
}

pub fn encrypt_aes128(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    let encryptor = Encryptor::<Aes128>::new(key.into(), iv.into());
    let padded_len = plaintext.len() + (16 - plaintext.len() % 16);
    let mut buf = vec![0u8; padded_len];
    buf[..plaintext.len()].copy_from_slice(plaintext);
    encryptor
        .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
        .expect("encrypt_padded_mut failed")
        .to_vec()
}

/// IV the fetcher derives when the playlist declares none: big-endian
/// sequence number in the low half.
pub fn sequence_iv(sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&sequence.to_be_bytes());
    iv
}

pub fn notify_channel() -> (SourceNotify, mpsc::UnboundedReceiver<SourceEvent>) {
    mpsc::unbounded_channel()
}

/// Wait for a source event matching `pred`.
pub async fn wait_source_event(
    rx: &mut mpsc::UnboundedReceiver<SourceEvent>,
    pred: impl Fn(&SourceEvent) -> bool,
) -> SourceEvent {
    tokio::time::timeout(WAIT_BUDGET, async {
        loop {
            let event = rx.recv().await.expect("notify channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for source event")
}

/// Everything a track produced, in order, up to its terminal state.
#[derive(Debug, Default)]
pub struct Drained {
    pub units: Vec<aulos_core::AccessUnit>,
    pub discontinuities: usize,
    pub terminal: Option<QueueError>,
}

/// Poll `kind` until it finishes, collecting units and markers.
pub async fn drain_track(source: &dyn Source, kind: StreamKind) -> Drained {
    tokio::time::timeout(WAIT_BUDGET, async {
        let mut drained = Drained::default();
        loop {
            match source.dequeue_access_unit(kind) {
                Dequeue::Unit(unit) => drained.units.push(unit),
                Dequeue::Discontinuity { .. } => drained.discontinuities += 1,
                Dequeue::WouldBlock => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Dequeue::Finished(err) => {
                    drained.terminal = Some(err);
                    return drained;
                }
            }
        }
    })
    .await
    .expect("timed out draining track")
}

/// A memory fetch, with test logging initialized on the side.
pub fn memory_fetch() -> Arc<MemoryFetch> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Arc::new(MemoryFetch::new())
}
