use thiserror::Error;

/// Streaming-session errors.
///
/// `Malformed` and `Unsupported` are terminal for the content: retrying
/// cannot fix corrupt bytes or an unknown cipher. Network failures surface
/// as `Net` and may be retried near the live edge before escalating.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("network error: {0}")]
    Net(#[from] aulos_net::NetError),

    #[error("playlist parse error: {0}")]
    PlaylistParse(String),

    #[error("variant not found: index {0}")]
    VariantNotFound(usize),

    #[error("malformed content: {0}")]
    Malformed(String),

    #[error("unsupported content: {0}")]
    Unsupported(String),

    #[error("key processing failed: {0}")]
    Key(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("session is gone")]
    SessionGone,
}

pub type HlsResult<T> = Result<T, HlsError>;
