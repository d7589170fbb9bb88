#![forbid(unsafe_code)]

//! Adaptive HTTP-streaming source for the aulos playback engine.
//!
//! The subsystem turns one manifest URI into per-track streams of timed
//! access units: a [`StreamingSession`](session::StreamingSession) ranks
//! bandwidth variants and owns one [`SegmentFetcher`](fetcher::SegmentFetcher)
//! per active media URI; fetchers reload playlists on a backoff schedule,
//! decrypt AES-128 segments and demultiplex them into packet queues.
//! [`HlsSource`] wraps a session behind the abstract source contract the
//! playback controller consumes.

pub mod config;
pub mod demux;
pub mod fetcher;
pub mod keys;
pub mod parsing;
pub mod playlist;
pub mod session;
pub mod source;

mod error;

pub use config::HlsConfig;
pub use demux::{TsDemuxer, TsDemuxerFactory};
pub use error::{HlsError, HlsResult};
pub use source::HlsSource;
