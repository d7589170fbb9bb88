use crate::StreamKind;

/// What changed across a discontinuity, as a combinable mask.
///
/// A discontinuity is not an error: it is a typed marker queued between
/// access units when the timeline restarts or a track's format changes.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscontinuityFlags(u8);

impl DiscontinuityFlags {
    pub const NONE: Self = Self(0);
    /// The media timeline restarts (seek, explicit playlist discontinuity).
    pub const TIME: Self = Self(1 << 0);
    /// The audio elementary-stream format changes.
    pub const AUDIO_FORMAT: Self = Self(1 << 1);
    /// The video elementary-stream format changes.
    pub const VIDEO_FORMAT: Self = Self(1 << 2);

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub fn has_time(self) -> bool {
        self.0 & Self::TIME.0 != 0
    }

    /// Whether this discontinuity changes the format of `kind`'s stream.
    #[must_use]
    pub fn changes_format_of(self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Audio => self.0 & Self::AUDIO_FORMAT.0 != 0,
            StreamKind::Video => self.0 & Self::VIDEO_FORMAT.0 != 0,
            StreamKind::Subtitle => false,
        }
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Debug for DiscontinuityFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.has_time() {
            parts.push("TIME");
        }
        if self.changes_format_of(StreamKind::Audio) {
            parts.push("AUDIO_FORMAT");
        }
        if self.changes_format_of(StreamKind::Video) {
            parts.push("VIDEO_FORMAT");
        }
        if parts.is_empty() {
            parts.push("NONE");
        }
        write!(f, "DiscontinuityFlags({})", parts.join("|"))
    }
}

/// Optional payload attached to a discontinuity marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscontinuityExtra {
    /// Suppress rendering of this track until the given media time.
    ///
    /// Set when a track switch re-enters the stream mid-segment: already
    /// decoded-but-stale frames before this time must not reach the screen.
    pub resume_at_media_time_us: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = DiscontinuityFlags::TIME.union(DiscontinuityFlags::VIDEO_FORMAT);
        assert!(flags.has_time());
        assert!(flags.changes_format_of(StreamKind::Video));
        assert!(!flags.changes_format_of(StreamKind::Audio));
        assert!(!flags.changes_format_of(StreamKind::Subtitle));
    }
}
