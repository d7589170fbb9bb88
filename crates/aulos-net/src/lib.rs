#![forbid(unsafe_code)]

//! Byte-range fetch contract and HTTP client for aulos sources.
//!
//! Sources consume the network through the [`Fetch`] trait only: whole or
//! ranged byte fetches plus a bandwidth estimate fed by observed transfers.
//! [`HttpFetch`] is the production implementation (HTTP(S) via reqwest,
//! `file://` via tokio::fs); [`MemoryFetch`] backs tests.

mod client;
mod error;
mod estimator;
mod memory;
mod traits;
mod types;

pub use client::HttpFetch;
pub use error::{NetError, NetResult};
pub use estimator::BandwidthEstimator;
pub use memory::MemoryFetch;
pub use traits::Fetch;
pub use types::{NetOptions, RangeSpec};
