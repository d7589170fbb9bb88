#![forbid(unsafe_code)]

//! Bandwidth-driven variant switching through the full reconfiguration
//! protocol, decoder-shutdown handshake included.

mod fixture;

use aulos_core::StreamKind;
use aulos_events::{Event, EventBus, SessionEvent};
use aulos_hls::{HlsConfig, HlsSource};
use aulos_play::{Source, SourceEvent};
use fixture::{WAIT_BUDGET, audio_segment, memory_fetch, notify_channel, wait_source_event};
use url::Url;

// Listed order puts the 2 Mbit/s rendition first: providers lead with their
// preferred default.
const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=2000000\n\
high/prog.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=500000\n\
low/prog.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=1000000\n\
mid/prog.m3u8\n";

fn live_playlist(segments: usize) -> String {
    let mut text = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for i in 0..segments {
        text.push_str("#EXTINF:4.0,\n");
        text.push_str(&format!("seg{i}.aac\n"));
    }
    text
}

#[tokio::test(start_paused = true)]
async fn bandwidth_estimate_switches_variant_with_shutdown_handshake() {
    let fetch = memory_fetch();
    fetch.insert("http://x/master.m3u8", MASTER.as_bytes().to_vec());
    let playlist = live_playlist(30);
    for prefix in ["high", "low", "mid"] {
        fetch.insert(
            &format!("http://x/{prefix}/prog.m3u8"),
            playlist.as_bytes().to_vec(),
        );
        for seq in 0..30 {
            fetch.insert(
                &format!("http://x/{prefix}/seg{seq}.aac"),
                audio_segment(seq as u64 * 360_000, prefix.as_bytes()),
            );
        }
    }
    // 1.3 Mbit/s estimated; 80% margin leaves 1.04 Mbit/s usable: the
    // 1 Mbit/s variant fits, the initial 2 Mbit/s one does not.
    fetch.set_bandwidth_bps(Some(1_300_000));

    let bus = EventBus::new(256);
    let mut bus_rx = bus.subscribe();

    let url = Url::parse("http://x/master.m3u8").unwrap();
    let source = HlsSource::new(url, fetch.clone(), HlsConfig::default(), bus);

    let (notify, mut events) = notify_channel();
    source.prepare_async(notify);
    wait_source_event(&mut events, |e| matches!(e, SourceEvent::Prepared { .. })).await;

    // First fetches come from the first-listed (2 Mbit/s) rendition.
    assert!(
        fetch.fetch_count("http://x/high/prog.m3u8") > 0,
        "initial variant must be the first-listed one"
    );

    // The periodic bandwidth check asks us to shut the affected decoders
    // down before it swaps fetchers; play the controller's part.
    let event = wait_source_event(&mut events, |e| {
        matches!(e, SourceEvent::RequireDecoderShutdown { .. })
    })
    .await;
    let SourceEvent::RequireDecoderShutdown { kinds, ack } = event else {
        unreachable!()
    };
    assert!(kinds.contains(StreamKind::Audio));
    assert!(kinds.contains(StreamKind::Video));
    ack.send(()).unwrap();

    // The switch lands on the 1 Mbit/s variant.
    let applied = tokio::time::timeout(WAIT_BUDGET, async {
        loop {
            if let Ok(Event::Session(SessionEvent::VariantApplied {
                to_index,
                bandwidth_bps,
                ..
            })) = bus_rx.recv().await
            {
                return (to_index, bandwidth_bps);
            }
        }
    })
    .await
    .expect("timed out waiting for the variant switch");
    assert_eq!(applied.1, 1_000_000);

    // And segments start flowing from the mid-rate playlist.
    tokio::time::timeout(WAIT_BUDGET, async {
        loop {
            if fetch.fetch_count("http://x/mid/prog.m3u8") > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("the mid-rate playlist is never fetched");
}
