#![forbid(unsafe_code)]

//! AES-128 segment decryption end to end: key caching, cipher metadata
//! inheritance, sequence-number IVs.

mod fixture;

use aulos_core::StreamKind;
use aulos_events::{Event, EventBus, SessionEvent};
use aulos_hls::{HlsConfig, HlsSource};
use aulos_play::SourceEvent;
use aulos_play::Source;
use aulos_queue::QueueError;
use fixture::{
    audio_segment, drain_track, encrypt_aes128, memory_fetch, notify_channel, sequence_iv,
    wait_source_event,
};
use url::Url;

// The key is declared once; the second entry inherits it.
const PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\
#EXTINF:4.0,\n\
seg0.aac\n\
#EXTINF:4.0,\n\
seg1.aac\n\
#EXT-X-ENDLIST\n";

#[tokio::test(start_paused = true)]
async fn encrypted_segments_decrypt_and_cache_the_key() {
    let key = [0x5au8; 16];
    let seg0 = audio_segment(0, b"clear zero");
    let seg1 = audio_segment(360_000, b"clear one");

    let fetch = memory_fetch();
    fetch.insert("http://x/media.m3u8", PLAYLIST.as_bytes().to_vec());
    fetch.insert("http://x/key.bin", key.to_vec());
    // No IV attribute: the IV is the big-endian media sequence number.
    fetch.insert(
        "http://x/seg0.aac",
        encrypt_aes128(&seg0, &key, &sequence_iv(0)),
    );
    fetch.insert(
        "http://x/seg1.aac",
        encrypt_aes128(&seg1, &key, &sequence_iv(1)),
    );

    let bus = EventBus::new(128);
    let mut bus_rx = bus.subscribe();

    let url = Url::parse("http://x/media.m3u8").unwrap();
    let source = HlsSource::new(url, fetch.clone(), HlsConfig::default(), bus);

    let (notify, mut events) = notify_channel();
    source.prepare_async(notify);
    wait_source_event(&mut events, |e| matches!(e, SourceEvent::Prepared { .. })).await;

    let drained = drain_track(&source, StreamKind::Audio).await;
    assert_eq!(drained.terminal, Some(QueueError::EndOfStream));
    assert_eq!(drained.units.len(), 2);
    // Decrypted payloads demultiplex to the original frames and anchors.
    assert_eq!(drained.units[0].pts_us, 0);
    assert!(drained.units[0].data.ends_with(b"clear zero"));
    assert_eq!(drained.units[1].pts_us, 4_000_000);
    assert!(drained.units[1].data.ends_with(b"clear one"));

    // One key URI, one fetch: the second segment hits the cache.
    assert_eq!(fetch.fetch_count("http://x/key.bin"), 1);

    let mut key_events = Vec::new();
    while let Ok(event) = bus_rx.try_recv() {
        if let Event::Session(SessionEvent::KeyFetched { cached, .. }) = event {
            key_events.push(cached);
        }
    }
    assert_eq!(key_events, vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn unknown_cipher_method_fails_the_stream() {
    let playlist = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"key.bin\"\n\
#EXTINF:4.0,\n\
seg0.aac\n\
#EXT-X-ENDLIST\n";

    let fetch = memory_fetch();
    fetch.insert("http://x/media.m3u8", playlist.as_bytes().to_vec());
    fetch.insert("http://x/key.bin", vec![0u8; 16]);
    fetch.insert("http://x/seg0.aac", audio_segment(0, b"payload"));

    let url = Url::parse("http://x/media.m3u8").unwrap();
    let source = HlsSource::new(url, fetch, HlsConfig::default(), EventBus::new(64));

    let (notify, mut events) = notify_channel();
    source.prepare_async(notify);

    // No retry for unsupported content: the error is immediate.
    let event = wait_source_event(&mut events, |e| matches!(e, SourceEvent::Error { .. })).await;
    let SourceEvent::Error { message } = event else {
        unreachable!()
    };
    assert!(message.contains("unsupported"), "got: {message}");

    let drained = drain_track(&source, StreamKind::Audio).await;
    assert!(matches!(drained.terminal, Some(QueueError::Stream(_))));
}
