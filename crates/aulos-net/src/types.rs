use std::time::Duration;

/// A byte range of a remote resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub offset: u64,
    /// `None` means "to the end".
    pub length: Option<u64>,
}

impl RangeSpec {
    #[must_use]
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Render as an HTTP `Range` header value.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        match self.length {
            Some(length) if length > 0 => {
                format!("bytes={}-{}", self.offset, self.offset + length - 1)
            }
            _ => format!("bytes={}-", self.offset),
        }
    }
}

/// Tunables for [`crate::HttpFetch`].
#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 8,
        }
    }
}
