//! Parsed playlist model.
//!
//! These are the session's own types; manifest text parsing lives in
//! [`crate::parsing`]. Entries keep their *declared* cipher metadata only —
//! the effective cipher for a segment is resolved by scanning backward, so
//! metadata inherits from the nearest preceding entry that declared it.

use std::time::Duration;

use aulos_core::StreamKind;

/// One bitrate rendition of a variant manifest.
///
/// The collection owned by a session is sorted ascending by bandwidth and
/// immutable once the manifest is loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BandwidthVariant {
    /// Index into the manifest's listed variants.
    pub playlist_index: usize,
    pub bandwidth_bps: u64,
}

/// A parsed variant (multi-bitrate) manifest.
#[derive(Clone, Debug, Default)]
pub struct VariantManifest {
    /// Variants in listed order.
    pub variants: Vec<VariantStream>,
    /// Alternate renditions (audio/subtitle groups).
    pub renditions: Vec<Rendition>,
}

/// One listed variant stream.
#[derive(Clone, Debug)]
pub struct VariantStream {
    pub uri: String,
    pub bandwidth_bps: u64,
    pub codecs: Option<String>,
    pub audio_group: Option<String>,
    pub subtitle_group: Option<String>,
}

/// One alternate rendition entry.
#[derive(Clone, Debug)]
pub struct Rendition {
    pub kind: StreamKind,
    pub group_id: String,
    pub name: String,
    pub language: Option<String>,
    /// `None` means the rendition's media is muxed into the variant stream.
    pub uri: Option<String>,
    pub is_default: bool,
    pub autoselect: bool,
}

/// Segment encryption method, as declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CipherMethod {
    /// Explicit `NONE`: decryption is a no-op from here on.
    None,
    Aes128,
    Other(String),
}

/// Cipher metadata declared on a playlist entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherInfo {
    pub method: CipherMethod,
    pub uri: Option<String>,
    /// Raw hex IV attribute (with or without `0x` prefix), if declared.
    pub iv_hex: Option<String>,
}

/// A resolved byte range of a segment URI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

/// One media segment entry, ordered by media time.
#[derive(Clone, Debug)]
pub struct PlaylistEntry {
    pub uri: String,
    pub duration: Duration,
    /// Cipher metadata declared on this entry, if any (see module docs).
    pub cipher: Option<CipherInfo>,
    pub byte_range: Option<ByteRange>,
    /// Timeline restarts before this segment.
    pub discontinuity: bool,
}

/// A parsed media playlist.
#[derive(Clone, Debug)]
pub struct MediaPlaylist {
    pub entries: Vec<PlaylistEntry>,
    pub target_duration: Duration,
    /// Sequence number of the first entry.
    pub media_sequence: i64,
    /// `true` once the playlist is complete (VOD, or a live stream that
    /// ended); complete playlists are never reloaded.
    pub end_list: bool,
    /// EVENT playlists grow at the end but never mutate existing entries,
    /// so start-time mapping over them is reliable.
    pub is_event: bool,
}

impl MediaPlaylist {
    #[must_use]
    pub fn first_sequence(&self) -> i64 {
        self.media_sequence
    }

    #[must_use]
    pub fn last_sequence(&self) -> i64 {
        self.media_sequence + self.entries.len() as i64 - 1
    }

    #[must_use]
    pub fn entry_for_sequence(&self, sequence: i64) -> Option<&PlaylistEntry> {
        let index = usize::try_from(sequence.checked_sub(self.media_sequence)?).ok()?;
        self.entries.get(index)
    }

    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.entries.iter().map(|e| e.duration).sum()
    }

    /// Media time at which the segment with `sequence` starts, relative to
    /// the start of the playlist window.
    #[must_use]
    pub fn time_for_sequence(&self, sequence: i64) -> Duration {
        let index = (sequence - self.media_sequence).max(0) as usize;
        self.entries
            .iter()
            .take(index)
            .map(|e| e.duration)
            .sum()
    }

    /// Sequence number of the segment containing `time`, by summing segment
    /// durations from the start of the window. Past the end, the last
    /// sequence is returned.
    #[must_use]
    pub fn sequence_for_time(&self, time: Duration) -> i64 {
        let mut elapsed = Duration::ZERO;
        for (index, entry) in self.entries.iter().enumerate() {
            elapsed += entry.duration;
            if elapsed > time {
                return self.media_sequence + index as i64;
            }
        }
        self.last_sequence()
    }

    /// The cipher in effect for the entry at `index`: the nearest declaration
    /// at or before it.
    #[must_use]
    pub fn effective_cipher(&self, index: usize) -> Option<&CipherInfo> {
        self.entries
            .iter()
            .take(index + 1)
            .rev()
            .find_map(|entry| entry.cipher.as_ref())
    }
}

/// Backoff ladder for reloading a live playlist.
///
/// Advances one stage per reload that yields unchanged content; resets to
/// `Initial` whenever a reload actually changes something.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefreshState {
    #[default]
    Initial,
    FirstUnchanged,
    SecondUnchanged,
    ThirdUnchanged,
}

impl RefreshState {
    #[must_use]
    pub fn advance(self) -> Self {
        match self {
            RefreshState::Initial => RefreshState::FirstUnchanged,
            RefreshState::FirstUnchanged => RefreshState::SecondUnchanged,
            RefreshState::SecondUnchanged | RefreshState::ThirdUnchanged => {
                RefreshState::ThirdUnchanged
            }
        }
    }

    /// Minimum playlist age before the next reload.
    #[must_use]
    pub fn min_reload_age(self, playlist: &MediaPlaylist) -> Duration {
        match self {
            RefreshState::Initial => playlist
                .entries
                .last()
                .map(|e| e.duration)
                .unwrap_or(playlist.target_duration),
            RefreshState::FirstUnchanged => playlist.target_duration / 2,
            RefreshState::SecondUnchanged => playlist.target_duration * 3 / 2,
            RefreshState::ThirdUnchanged => playlist.target_duration * 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(uri: &str, secs: u64) -> PlaylistEntry {
        PlaylistEntry {
            uri: uri.to_string(),
            duration: Duration::from_secs(secs),
            cipher: None,
            byte_range: None,
            discontinuity: false,
        }
    }

    fn playlist(entries: Vec<PlaylistEntry>) -> MediaPlaylist {
        MediaPlaylist {
            entries,
            target_duration: Duration::from_secs(6),
            media_sequence: 10,
            end_list: false,
            is_event: false,
        }
    }

    #[test]
    fn sequence_window() {
        let playlist = playlist(vec![entry("a", 6), entry("b", 6), entry("c", 6)]);
        assert_eq!(playlist.first_sequence(), 10);
        assert_eq!(playlist.last_sequence(), 12);
        assert!(playlist.entry_for_sequence(9).is_none());
        assert_eq!(playlist.entry_for_sequence(11).unwrap().uri, "b");
        assert!(playlist.entry_for_sequence(13).is_none());
    }

    #[test]
    fn time_mapping_sums_durations() {
        let playlist = playlist(vec![entry("a", 6), entry("b", 4), entry("c", 6)]);
        assert_eq!(playlist.sequence_for_time(Duration::ZERO), 10);
        assert_eq!(playlist.sequence_for_time(Duration::from_secs(5)), 10);
        assert_eq!(playlist.sequence_for_time(Duration::from_secs(6)), 11);
        assert_eq!(playlist.sequence_for_time(Duration::from_secs(9)), 11);
        assert_eq!(playlist.sequence_for_time(Duration::from_secs(60)), 12);
        assert_eq!(playlist.time_for_sequence(12), Duration::from_secs(10));
    }

    #[test]
    fn cipher_inherits_from_preceding_entry() {
        let mut entries = vec![entry("a", 6), entry("b", 6), entry("c", 6)];
        entries[1].cipher = Some(CipherInfo {
            method: CipherMethod::Aes128,
            uri: Some("key.bin".to_string()),
            iv_hex: None,
        });
        let playlist = playlist(entries);

        assert!(playlist.effective_cipher(0).is_none());
        assert_eq!(
            playlist.effective_cipher(1).unwrap().method,
            CipherMethod::Aes128
        );
        // Inherited by the following entry that declares nothing.
        assert_eq!(
            playlist.effective_cipher(2).unwrap().uri.as_deref(),
            Some("key.bin")
        );
    }

    #[test]
    fn refresh_ladder_escalates() {
        let playlist = playlist(vec![entry("a", 4)]);
        let mut state = RefreshState::Initial;

        assert_eq!(state.min_reload_age(&playlist), Duration::from_secs(4));
        state = state.advance();
        assert_eq!(state.min_reload_age(&playlist), Duration::from_secs(3));
        state = state.advance();
        assert_eq!(state.min_reload_age(&playlist), Duration::from_secs(9));
        state = state.advance();
        assert_eq!(state.min_reload_age(&playlist), Duration::from_secs(18));
        // Saturates at the top.
        assert_eq!(state.advance(), RefreshState::ThirdUnchanged);
    }
}
