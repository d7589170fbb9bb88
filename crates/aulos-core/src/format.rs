/// Mime strings for the formats this engine routes.
pub mod mime {
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    pub const VIDEO_AVC: &str = "video/avc";
    pub const TEXT_VTT: &str = "text/vtt";
}

/// Describes the elementary-stream format of one track.
///
/// This is what a source hands the controller when a track becomes
/// available and what the controller passes to a decoder's `configure`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct Format {
    pub mime: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Format {
    #[must_use]
    pub fn new(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: None,
            channels: None,
            width: None,
            height: None,
        }
    }

    #[must_use]
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        let mut format = Self::new(mime);
        format.sample_rate = Some(sample_rate);
        format.channels = Some(channels);
        format
    }

    #[must_use]
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        let mut format = Self::new(mime);
        format.width = Some(width);
        format.height = Some(height);
        format
    }

    #[must_use]
    pub fn is_avc(&self) -> bool {
        self.mime.eq_ignore_ascii_case(mime::VIDEO_AVC)
    }
}
