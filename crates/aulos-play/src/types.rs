/// Lifecycle state of the playback controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PlayState {
    #[default]
    Idle,
    Uninitialized,
    Preparing,
    Prepared,
    Started,
    Paused,
}

impl PlayState {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PlayState::Idle => "idle",
            PlayState::Uninitialized => "uninitialized",
            PlayState::Preparing => "preparing",
            PlayState::Prepared => "prepared",
            PlayState::Started => "started",
            PlayState::Paused => "paused",
        }
    }
}

/// Per-track flush progress.
///
/// `None` is both the initial state and the only state a new flush may start
/// from. `Flushed`/`ShutDown` are transient terminal markers consumed once
/// *both* tracks reach one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlushStatus {
    #[default]
    None,
    /// The peer track initiated a flush; this track waits for the matching
    /// discontinuity to reach its own decoder.
    AwaitingPeer,
    Flushing,
    FlushingThenShutdown,
    ShuttingDown,
    Flushed,
    ShutDown,
}

impl FlushStatus {
    /// A flush is in progress on this track.
    #[must_use]
    pub fn is_flushing(self) -> bool {
        matches!(
            self,
            FlushStatus::Flushing | FlushStatus::FlushingThenShutdown
        )
    }

    /// Terminal marker: the track is done with its part of the flush.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, FlushStatus::Flushed | FlushStatus::ShutDown)
    }
}

/// Opaque handle to a host-provided video surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// Opaque handle to a host-provided audio output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioSinkHandle(pub u64);
