#![forbid(unsafe_code)]

//! Pluggable media-playback engine with an adaptive HTTP-streaming source.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use aulos::{
//!     EventBus, HlsConfig, HlsSource, HttpFetch, Player, PlayerConfig,
//! };
//!
//! # fn factories() -> PlayerConfig { unimplemented!() }
//! # async fn demo() {
//! let bus = EventBus::new(128);
//! let fetch = Arc::new(HttpFetch::default());
//!
//! let url = url::Url::parse("https://example.com/master.m3u8").unwrap();
//! let source = Arc::new(HlsSource::new(url, fetch, HlsConfig::default(), bus.clone()));
//!
//! let player = Player::new(factories(), bus);
//! player.set_data_source(source);
//! player.prepare_async();
//! # }
//! ```

pub use aulos_core::{
    AccessUnit, DiscontinuityExtra, DiscontinuityFlags, Format, StreamKind, StreamKindSet,
    TrackInfo, mime,
};
pub use aulos_events::{Event, EventBus, PlayerEvent, SessionEvent};
pub use aulos_hls::{HlsConfig, HlsError, HlsSource, TsDemuxer, TsDemuxerFactory};
pub use aulos_net::{Fetch, HttpFetch, MemoryFetch, NetError, NetOptions, RangeSpec};
pub use aulos_play::{
    AudioSinkHandle, Decoder, DecoderEvent, DecoderFactory, DecoderInput, Dequeue, PlayError,
    PlayState, Player, PlayerConfig, Renderer, RendererEvent, RendererFactory, Source,
    SourceEvent, SourceFlags, SurfaceHandle,
};
pub use aulos_queue::{PacketQueue, QueueError};
pub use aulos_worker::{Actor, Generation, Handle};
