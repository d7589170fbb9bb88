/// Events published by a streaming session.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A reconfiguration applied a different bandwidth variant.
    VariantApplied {
        from_index: usize,
        to_index: usize,
        bandwidth_bps: u64,
    },
    SegmentFetched {
        sequence: i64,
        bytes: u64,
    },
    KeyFetched {
        uri: String,
        cached: bool,
    },
    BufferingStart,
    BufferingEnd,
    Error {
        message: String,
        recoverable: bool,
    },
    EndOfStream,
}
