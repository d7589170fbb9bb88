#![forbid(unsafe_code)]

//! Seeking: fetchers restart at the mapped segment and consumers see a
//! fresh timeline behind a discontinuity marker.

mod fixture;

use std::time::Duration;

use aulos_core::StreamKind;
use aulos_events::EventBus;
use aulos_hls::{HlsConfig, HlsSource};
use aulos_play::{Dequeue, Source, SourceEvent};
use fixture::{WAIT_BUDGET, audio_segment, memory_fetch, notify_channel, wait_source_event};
use url::Url;

const PLAYLIST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-MEDIA-SEQUENCE:0\n\
#EXTINF:4.0,\n\
seg0.aac\n\
#EXTINF:4.0,\n\
seg1.aac\n\
#EXTINF:4.0,\n\
seg2.aac\n\
#EXT-X-ENDLIST\n";

#[tokio::test(start_paused = true)]
async fn seek_restarts_at_the_mapped_segment() {
    let fetch = memory_fetch();
    fetch.insert("http://x/media.m3u8", PLAYLIST.as_bytes().to_vec());
    for (seq, anchor) in [(0u32, 0u64), (1, 360_000), (2, 720_000)] {
        fetch.insert(
            &format!("http://x/seg{seq}.aac"),
            audio_segment(anchor, format!("segment {seq}").as_bytes()),
        );
    }

    let url = Url::parse("http://x/media.m3u8").unwrap();
    let source = HlsSource::new(url, fetch.clone(), HlsConfig::default(), EventBus::new(64));

    let (notify, mut events) = notify_channel();
    source.prepare_async(notify);
    wait_source_event(&mut events, |e| matches!(e, SourceEvent::Prepared { .. })).await;

    // Consume the head of the stream first.
    let first_unit = tokio::time::timeout(WAIT_BUDGET, async {
        loop {
            match source.dequeue_access_unit(StreamKind::Audio) {
                Dequeue::Unit(unit) => return unit,
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(first_unit.pts_us, 0);

    // Seek into the third segment.
    source.seek_to(8_000_000);
    wait_source_event(&mut events, |e| matches!(e, SourceEvent::SeekComplete)).await;

    // The repositioned stream starts with a discontinuity, then the segment
    // containing the seek target.
    let (marker_seen, unit) = tokio::time::timeout(WAIT_BUDGET, async {
        let mut marker_seen = false;
        loop {
            match source.dequeue_access_unit(StreamKind::Audio) {
                Dequeue::Unit(unit) => return (marker_seen, unit),
                Dequeue::Discontinuity { flags, .. } => {
                    assert!(flags.has_time());
                    marker_seen = true;
                }
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .unwrap();
    assert!(marker_seen, "seek must queue a time discontinuity first");
    assert_eq!(unit.pts_us, 8_000_000);
    assert!(unit.data.ends_with(b"segment 2"));

    assert!(fetch.fetch_count("http://x/seg2.aac") > 0);
}
