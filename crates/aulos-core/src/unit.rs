use bytes::Bytes;

/// One timed, decode-ready unit of compressed media data.
#[derive(Clone, Debug)]
pub struct AccessUnit {
    /// Presentation timestamp in microseconds.
    pub pts_us: i64,
    /// Duration in microseconds, when the container declares one
    /// (subtitle cues do, elementary audio frames usually don't).
    pub duration_us: Option<i64>,
    /// The compressed payload.
    pub data: Bytes,
}

impl AccessUnit {
    #[must_use]
    pub fn new(pts_us: i64, data: Bytes) -> Self {
        Self {
            pts_us,
            duration_us: None,
            data,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }
}
