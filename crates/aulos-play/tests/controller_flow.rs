#![forbid(unsafe_code)]

//! Lifecycle flows: prepare, start, render, EOS aggregation, pause, reset.


use aulos_core::{AccessUnit, Format, StreamKind, mime};
use aulos_events::PlayerEvent;
use aulos_play::{AudioSinkHandle, SurfaceHandle};
use aulos_queue::QueueError;
use bytes::Bytes;
use fixture::Deck;

fn unit(pts_us: i64) -> AccessUnit {
    AccessUnit::new(pts_us, Bytes::from_static(&[0x11; 16]))
}

async fn prepared_deck() -> Deck {
    let mut deck = Deck::new();
    deck.player.set_data_source(deck.source.clone());
    deck.player.prepare_async();
    deck.wait_player_event(|e| matches!(e, PlayerEvent::PrepareComplete { result: Ok(()) }))
        .await;
    deck
}

#[tokio::test(start_paused = true)]
async fn prepare_start_feeds_decoder_and_renderer() {
    let mut deck = prepared_deck().await;

    let audio_queue = deck.source.queue(StreamKind::Audio);
    audio_queue.set_format(Format::audio(mime::AUDIO_AAC, 44_100, 2));
    audio_queue.queue_access_unit(unit(0));
    audio_queue.queue_access_unit(unit(23_220));

    deck.player.set_audio_sink(Some(AudioSinkHandle(1)));
    deck.player.start();

    deck.wait_until(|| deck.decoder(StreamKind::Audio).is_some()).await;
    let decoder = deck.decoder(StreamKind::Audio).unwrap();
    assert_eq!(
        decoder.configured_format().unwrap().mime,
        mime::AUDIO_AAC
    );

    deck.wait_until(|| decoder.fed_units().len() == 2).await;
    deck.wait_until(|| deck.renderer().queued_frames(StreamKind::Audio).len() == 2)
        .await;

    // No surface: no video decoder was ever created.
    assert_eq!(deck.decoder_count(StreamKind::Video), 0);
}

#[tokio::test(start_paused = true)]
async fn end_of_stream_completes_playback() {
    let mut deck = prepared_deck().await;

    let audio_queue = deck.source.queue(StreamKind::Audio);
    audio_queue.set_format(Format::audio(mime::AUDIO_AAC, 44_100, 2));
    audio_queue.queue_access_unit(unit(0));
    audio_queue.signal_eos(QueueError::EndOfStream);

    deck.player.set_audio_sink(Some(AudioSinkHandle(1)));
    deck.player.start();

    deck.wait_player_event(|e| matches!(e, PlayerEvent::PlaybackComplete))
        .await;

    let decoder = deck.decoder(StreamKind::Audio).unwrap();
    assert_eq!(decoder.fed_units().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stream_error_surfaces_as_player_error() {
    let mut deck = prepared_deck().await;

    let audio_queue = deck.source.queue(StreamKind::Audio);
    audio_queue.set_format(Format::audio(mime::AUDIO_AAC, 44_100, 2));
    audio_queue.signal_eos(QueueError::Stream("segment fetch failed".into()));

    deck.player.set_audio_sink(Some(AudioSinkHandle(1)));
    deck.player.start();

    let event = deck
        .wait_player_event(|e| matches!(e, PlayerEvent::Error { .. }))
        .await;
    let PlayerEvent::Error { message } = event else {
        unreachable!()
    };
    assert!(message.contains("segment fetch failed"));
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_reach_source_and_renderer() {
    let mut deck = prepared_deck().await;

    let audio_queue = deck.source.queue(StreamKind::Audio);
    audio_queue.set_format(Format::audio(mime::AUDIO_AAC, 44_100, 2));

    deck.player.set_audio_sink(Some(AudioSinkHandle(1)));
    deck.player.start();
    deck.wait_until(|| !deck.renderers.lock().is_empty()).await;

    deck.player.pause();
    deck.wait_until(|| deck.source.is_paused()).await;
    assert!(deck.renderer().is_paused());

    deck.player.resume();
    deck.wait_until(|| !deck.source.is_paused()).await;
    assert!(!deck.renderer().is_paused());
}

#[tokio::test(start_paused = true)]
async fn reset_shuts_down_decoders_and_releases_source() {
    let mut deck = prepared_deck().await;

    let audio_queue = deck.source.queue(StreamKind::Audio);
    audio_queue.set_format(Format::audio(mime::AUDIO_AAC, 44_100, 2));
    let video_queue = deck.source.queue(StreamKind::Video);
    video_queue.set_format(Format::video(mime::VIDEO_AVC, 1280, 720));

    deck.player.set_audio_sink(Some(AudioSinkHandle(1)));
    deck.player.set_surface(Some(SurfaceHandle(7)));
    deck.player.start();
    deck.wait_until(|| {
        deck.decoder(StreamKind::Audio).is_some() && deck.decoder(StreamKind::Video).is_some()
    })
    .await;

    let audio_decoder = deck.decoder(StreamKind::Audio).unwrap();
    let video_decoder = deck.decoder(StreamKind::Video).unwrap();

    deck.player.reset().await.unwrap();

    assert_eq!(audio_decoder.shutdown_count(), 1);
    assert_eq!(video_decoder.shutdown_count(), 1);
    assert!(deck.source.is_stopped());
    deck.wait_player_event(|e| matches!(e, PlayerEvent::ResetComplete))
        .await;
}

#[tokio::test(start_paused = true)]
async fn late_avc_non_reference_frames_are_dropped() {
    let mut deck = prepared_deck().await;

    let video_queue = deck.source.queue(StreamKind::Video);
    video_queue.set_format(Format::video(mime::VIDEO_AVC, 1280, 720));

    deck.player.set_surface(Some(SurfaceHandle(7)));
    deck.player.start();
    deck.wait_until(|| deck.decoder(StreamKind::Video).is_some()).await;
    deck.wait_until(|| !deck.renderers.lock().is_empty()).await;

    // Report video running 200ms late before any input is queued.
    deck.renderer().report_position(1_000_000, 200_000);
    deck.wait_player_event(|e| matches!(e, PlayerEvent::Position { .. }))
        .await;

    // Three non-reference slices (nal_ref_idc == 0, type 1): droppable.
    let non_ref = Bytes::from_static(&[0, 0, 0, 1, 0x01, 0xaa, 0xbb, 0xcc]);
    // One IDR slice (nal_ref_idc == 3, type 5): must be kept.
    let idr = Bytes::from_static(&[0, 0, 0, 1, 0x65, 0xdd, 0xee, 0xff]);
    for pts in [0i64, 40_000, 80_000] {
        video_queue.queue_access_unit(AccessUnit::new(pts, non_ref.clone()));
    }
    video_queue.queue_access_unit(AccessUnit::new(120_000, idr));

    let decoder = deck.decoder(StreamKind::Video).unwrap();
    deck.wait_until(|| decoder.fed_units().len() == 1).await;
    assert_eq!(decoder.fed_units()[0].pts_us, 120_000);

    deck.renderer().report_position(1_100_000, 200_000);
    let event = deck
        .wait_player_event(|e| matches!(e, PlayerEvent::FrameStats { dropped, .. } if *dropped > 0))
        .await;
    let PlayerEvent::FrameStats { total, dropped } = event else {
        unreachable!()
    };
    assert_eq!(dropped, 3);
    assert_eq!(total, 4);
}
