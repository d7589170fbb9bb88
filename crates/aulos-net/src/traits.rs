use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::{NetResult, RangeSpec};

/// The only view sources have of the network.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    /// Fetch all bytes of `url`, or the given byte range of it.
    async fn fetch_bytes(&self, url: &Url, range: Option<RangeSpec>) -> NetResult<Bytes>;

    /// Most recent throughput estimate in bits per second.
    ///
    /// `None` until enough transfers have been observed.
    fn estimate_bandwidth_bps(&self) -> Option<u64>;
}
