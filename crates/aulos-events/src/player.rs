/// Events published by the playback controller.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum PlayerEvent {
    PrepareComplete {
        result: Result<(), String>,
    },
    Duration {
        duration_us: i64,
    },
    SeekComplete,
    ResetComplete,
    /// Both existing tracks reached end of stream.
    PlaybackComplete,
    VideoRenderingStart,
    VideoSizeChanged {
        width: u32,
        height: u32,
    },
    /// Periodic position report while playing.
    Position {
        position_us: i64,
        video_late_by_us: i64,
    },
    /// Running total/dropped video frame counters, reported with positions.
    FrameStats {
        total: u64,
        dropped: u64,
    },
    BufferingStart,
    BufferingEnd,
    Subtitle {
        pts_us: i64,
        duration_us: Option<i64>,
        text: String,
    },
    Error {
        message: String,
    },
}
