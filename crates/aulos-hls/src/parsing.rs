//! m3u8 manifest text → playlist model conversion.
//!
//! The text format itself is handled by the `m3u8-rs` crate; this module
//! only maps its AST into [`crate::playlist`] types, resolving running
//! byte-range offsets on the way.

use std::time::Duration;

use aulos_core::StreamKind;
use m3u8_rs::{AlternativeMediaType, KeyMethod, Playlist};

use crate::{
    HlsError, HlsResult,
    playlist::{
        ByteRange, CipherInfo, CipherMethod, MediaPlaylist, PlaylistEntry, Rendition,
        VariantManifest, VariantStream,
    },
};

/// Either kind of parsed manifest.
#[derive(Clone, Debug)]
pub enum Manifest {
    Variant(VariantManifest),
    Media(MediaPlaylist),
}

/// Parse a top-level manifest, which may be a variant manifest or a plain
/// media playlist.
pub fn parse_manifest(data: &[u8]) -> HlsResult<Manifest> {
    let (_, playlist) =
        m3u8_rs::parse_playlist(data).map_err(|e| HlsError::PlaylistParse(e.to_string()))?;

    match playlist {
        Playlist::MasterPlaylist(master) => Ok(Manifest::Variant(convert_master(master))),
        Playlist::MediaPlaylist(media) => Ok(Manifest::Media(convert_media(media))),
    }
}

/// Parse a media playlist.
pub fn parse_media_playlist(data: &[u8]) -> HlsResult<MediaPlaylist> {
    match parse_manifest(data)? {
        Manifest::Media(media) => Ok(media),
        Manifest::Variant(_) => Err(HlsError::PlaylistParse(
            "expected a media playlist, found a variant manifest".to_string(),
        )),
    }
}

fn convert_master(master: m3u8_rs::MasterPlaylist) -> VariantManifest {
    let variants = master
        .variants
        .into_iter()
        .filter(|v| !v.is_i_frame)
        .map(|v| VariantStream {
            uri: v.uri,
            bandwidth_bps: v.bandwidth,
            codecs: v.codecs,
            audio_group: v.audio,
            subtitle_group: v.subtitles,
        })
        .collect();

    let renditions = master
        .alternatives
        .into_iter()
        .filter_map(|alt| {
            let kind = match alt.media_type {
                AlternativeMediaType::Audio => StreamKind::Audio,
                AlternativeMediaType::Video => StreamKind::Video,
                AlternativeMediaType::Subtitles => StreamKind::Subtitle,
                // Closed captions are carried inside the video stream; there
                // is nothing to fetch for them.
                _ => return None,
            };
            Some(Rendition {
                kind,
                group_id: alt.group_id,
                name: alt.name,
                language: alt.language,
                uri: alt.uri,
                is_default: alt.default,
                autoselect: alt.autoselect,
            })
        })
        .collect();

    VariantManifest {
        variants,
        renditions,
    }
}

fn convert_media(media: m3u8_rs::MediaPlaylist) -> MediaPlaylist {
    let mut entries = Vec::with_capacity(media.segments.len());
    let mut running_offset: u64 = 0;

    for segment in media.segments {
        let cipher = segment.key.as_ref().map(|key| CipherInfo {
            method: match &key.method {
                KeyMethod::None => CipherMethod::None,
                KeyMethod::AES128 => CipherMethod::Aes128,
                other => CipherMethod::Other(format!("{other:?}")),
            },
            uri: key.uri.clone(),
            iv_hex: key.iv.clone(),
        });

        // BYTERANGE without an explicit offset continues where the previous
        // range of the same resource ended.
        let byte_range = segment.byte_range.as_ref().map(|range| {
            let offset = range.offset.unwrap_or(running_offset);
            running_offset = offset + range.length;
            ByteRange {
                offset,
                length: range.length,
            }
        });

        entries.push(PlaylistEntry {
            uri: segment.uri,
            duration: Duration::from_secs_f64(f64::from(segment.duration)),
            cipher,
            byte_range,
            discontinuity: segment.discontinuity,
        });
    }

    let is_event = matches!(
        media.playlist_type,
        Some(m3u8_rs::MediaPlaylistType::Event)
    );

    MediaPlaylist {
        entries,
        target_duration: Duration::from_secs(media.target_duration),
        media_sequence: media.media_sequence as i64,
        end_list: media.end_list,
        is_event,
    }
}
