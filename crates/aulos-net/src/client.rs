use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

use crate::{
    error::{NetError, NetResult},
    estimator::BandwidthEstimator,
    traits::Fetch,
    types::{NetOptions, RangeSpec},
};

/// Production [`Fetch`] implementation.
///
/// HTTP(S) via reqwest, `file://` via tokio::fs. Every completed transfer
/// feeds the bandwidth estimator.
pub struct HttpFetch {
    inner: Client,
    options: NetOptions,
    estimator: BandwidthEstimator,
}

impl HttpFetch {
    /// # Panics
    ///
    /// Panics if the `reqwest::Client` builder fails to build.
    #[must_use]
    pub fn new(options: NetOptions) -> Self {
        let inner = Client::builder()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .expect("failed to build reqwest client");
        Self {
            inner,
            options,
            estimator: BandwidthEstimator::new(),
        }
    }

    async fn fetch_file(&self, url: &Url, range: Option<RangeSpec>) -> NetResult<Bytes> {
        let path = url
            .to_file_path()
            .map_err(|()| NetError::InvalidUrl(format!("not a file path: {url}")))?;
        let data = tokio::fs::read(&path).await?;

        let bytes = match range {
            None => Bytes::from(data),
            Some(range) => {
                let start = usize::try_from(range.offset)
                    .map_err(|_| NetError::InvalidUrl(format!("range offset too large: {url}")))?;
                if start > data.len() {
                    return Err(NetError::NotFound(format!(
                        "range start {start} beyond end of {url}"
                    )));
                }
                let end = match range.length {
                    Some(length) => (start + length as usize).min(data.len()),
                    None => data.len(),
                };
                Bytes::copy_from_slice(&data[start..end])
            }
        };
        Ok(bytes)
    }

    async fn fetch_http(&self, url: &Url, range: Option<RangeSpec>) -> NetResult<Bytes> {
        let mut req = self
            .inner
            .get(url.clone())
            .timeout(self.options.request_timeout);
        if let Some(range) = range {
            req = req.header("Range", range.to_header_value());
        }

        let started = Instant::now();
        let resp = req.send().await?;
        let status = resp.status();

        if !(status.is_success() || status.as_u16() == 206) {
            return Err(NetError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = resp.bytes().await?;
        self.estimator.record(bytes.len() as u64, started.elapsed());

        trace!(
            url = %url,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetch complete"
        );
        Ok(bytes)
    }
}

impl Default for HttpFetch {
    fn default() -> Self {
        Self::new(NetOptions::default())
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    async fn fetch_bytes(&self, url: &Url, range: Option<RangeSpec>) -> NetResult<Bytes> {
        debug!(url = %url, ?range, "fetch_bytes");
        match url.scheme() {
            "file" => self.fetch_file(url, range).await,
            "http" | "https" => self.fetch_http(url, range).await,
            other => Err(NetError::InvalidUrl(format!(
                "unsupported scheme {other}: {url}"
            ))),
        }
    }

    fn estimate_bandwidth_bps(&self) -> Option<u64> {
        self.estimator.estimate_bps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn file_scheme_reads_local_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let url = Url::from_file_path(file.path()).unwrap();
        let fetch = HttpFetch::default();

        let all = fetch.fetch_bytes(&url, None).await.unwrap();
        assert_eq!(&all[..], b"0123456789");

        let ranged = fetch
            .fetch_bytes(&url, Some(RangeSpec::new(2, Some(4))))
            .await
            .unwrap();
        assert_eq!(&ranged[..], b"2345");

        let tail = fetch
            .fetch_bytes(&url, Some(RangeSpec::new(7, None)))
            .await
            .unwrap();
        assert_eq!(&tail[..], b"789");
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected() {
        let fetch = HttpFetch::default();
        let url = Url::parse("ftp://example.com/a.ts").unwrap();
        let err = fetch.fetch_bytes(&url, None).await.unwrap_err();
        assert!(matches!(err, NetError::InvalidUrl(_)));
    }
}
