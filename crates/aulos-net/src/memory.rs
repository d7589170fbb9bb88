use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

use crate::{
    error::{NetError, NetResult},
    traits::Fetch,
    types::RangeSpec,
};

#[derive(Default)]
struct Inner {
    resources: HashMap<String, Bytes>,
    bandwidth_bps: Option<u64>,
    fetch_log: Vec<String>,
    failures: HashMap<String, u32>,
}

/// In-memory [`Fetch`] implementation for tests.
///
/// Resources are keyed by full URL string. Supports scripted transient
/// failures and a settable bandwidth estimate, and records every fetched URL
/// so tests can assert reload/retry behavior.
#[derive(Default)]
pub struct MemoryFetch {
    inner: Mutex<Inner>,
}

impl MemoryFetch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, data: impl Into<Bytes>) {
        self.inner
            .lock()
            .resources
            .insert(url.to_string(), data.into());
    }

    pub fn remove(&self, url: &str) {
        self.inner.lock().resources.remove(url);
    }

    pub fn set_bandwidth_bps(&self, bps: Option<u64>) {
        self.inner.lock().bandwidth_bps = bps;
    }

    /// Make the next `count` fetches of `url` fail with an HTTP 503.
    pub fn fail_next(&self, url: &str, count: u32) {
        self.inner.lock().failures.insert(url.to_string(), count);
    }

    /// How many times `url` has been fetched (including failed attempts).
    #[must_use]
    pub fn fetch_count(&self, url: &str) -> usize {
        self.inner
            .lock()
            .fetch_log
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    #[must_use]
    pub fn fetch_log(&self) -> Vec<String> {
        self.inner.lock().fetch_log.clone()
    }
}

#[async_trait]
impl Fetch for MemoryFetch {
    async fn fetch_bytes(&self, url: &Url, range: Option<RangeSpec>) -> NetResult<Bytes> {
        let key = url.to_string();
        let mut inner = self.inner.lock();
        inner.fetch_log.push(key.clone());

        if let Some(remaining) = inner.failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NetError::HttpStatus {
                    url: key,
                    status: 503,
                });
            }
        }

        let data = inner
            .resources
            .get(&key)
            .cloned()
            .ok_or(NetError::HttpStatus {
                url: key,
                status: 404,
            })?;

        let bytes = match range {
            None => data,
            Some(range) => {
                let start = (range.offset as usize).min(data.len());
                let end = match range.length {
                    Some(length) => (start + length as usize).min(data.len()),
                    None => data.len(),
                };
                data.slice(start..end)
            }
        };
        Ok(bytes)
    }

    fn estimate_bandwidth_bps(&self) -> Option<u64> {
        self.inner.lock().bandwidth_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_inserted_resources_with_ranges() {
        let fetch = MemoryFetch::new();
        fetch.insert("http://x/seg.ts", &b"abcdef"[..]);

        let url = Url::parse("http://x/seg.ts").unwrap();
        let all = fetch.fetch_bytes(&url, None).await.unwrap();
        assert_eq!(&all[..], b"abcdef");

        let part = fetch
            .fetch_bytes(&url, Some(RangeSpec::new(1, Some(3))))
            .await
            .unwrap();
        assert_eq!(&part[..], b"bcd");

        assert_eq!(fetch.fetch_count("http://x/seg.ts"), 2);
    }

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let fetch = MemoryFetch::new();
        fetch.insert("http://x/a", &b"ok"[..]);
        fetch.fail_next("http://x/a", 2);

        let url = Url::parse("http://x/a").unwrap();
        assert!(fetch.fetch_bytes(&url, None).await.is_err());
        assert!(fetch.fetch_bytes(&url, None).await.is_err());
        assert!(fetch.fetch_bytes(&url, None).await.is_ok());
    }
}
