#![forbid(unsafe_code)]

//! A plain media playlist: one synthetic bandwidth variant, no switching.

mod fixture;

use std::time::Duration;

use aulos_core::StreamKind;
use aulos_events::{Event, EventBus, SessionEvent};
use aulos_hls::{HlsConfig, HlsSource};
use aulos_play::{Source, SourceEvent};
use aulos_queue::QueueError;
use fixture::{audio_segment, drain_track, memory_fetch, notify_channel, wait_source_event};
use url::Url;

const PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXTINF:4.0,\n\
seg0.aac\n\
#EXTINF:4.0,\n\
seg1.aac\n\
#EXT-X-ENDLIST\n";

#[tokio::test(start_paused = true)]
async fn single_rendition_plays_through_and_never_switches() {
    let fetch = memory_fetch();
    fetch.insert("http://x/media.m3u8", PLAYLIST.as_bytes().to_vec());
    // Anchors at 1s and 5s of 90kHz time.
    fetch.insert("http://x/seg0.aac", audio_segment(90_000, b"first"));
    fetch.insert("http://x/seg1.aac", audio_segment(450_000, b"second"));
    // A bandwidth estimate exists; with a single synthetic variant it must
    // never trigger a reconfiguration.
    fetch.set_bandwidth_bps(Some(50_000_000));

    let bus = EventBus::new(128);
    let mut bus_rx = bus.subscribe();

    let url = Url::parse("http://x/media.m3u8").unwrap();
    let source = HlsSource::new(url, fetch.clone(), HlsConfig::default(), bus);

    let (notify, mut events) = notify_channel();
    source.prepare_async(notify);

    let prepared =
        wait_source_event(&mut events, |e| matches!(e, SourceEvent::Prepared { .. })).await;
    let SourceEvent::Prepared { result } = prepared else {
        unreachable!()
    };
    let info = result.expect("prepare must succeed");
    assert_eq!(info.duration_us, Some(8_000_000));
    assert!(!info.flags.dynamic_duration);

    let drained = drain_track(&source, StreamKind::Audio).await;
    assert_eq!(drained.terminal, Some(QueueError::EndOfStream));
    // One startup discontinuity, then one frame per segment at its anchor.
    assert_eq!(drained.discontinuities, 1);
    assert_eq!(drained.units.len(), 2);
    assert_eq!(drained.units[0].pts_us, 1_000_000);
    assert_eq!(drained.units[1].pts_us, 5_000_000);

    let format = source.get_format(StreamKind::Audio).expect("audio format");
    assert_eq!(format.sample_rate, Some(44_100));

    // Let several bandwidth-check intervals elapse.
    tokio::time::sleep(Duration::from_secs(35)).await;

    let mut switches = 0;
    while let Ok(event) = bus_rx.try_recv() {
        if matches!(event, Event::Session(SessionEvent::VariantApplied { .. })) {
            switches += 1;
        }
    }
    assert_eq!(switches, 0, "a single-variant session never reconfigures");

    // The only playlist ever fetched is the one we connected to.
    assert!(
        fetch
            .fetch_log()
            .iter()
            .all(|u| u.starts_with("http://x/")),
    );
}
