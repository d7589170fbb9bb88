use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlayError {
    #[error("invalid operation in state {state}")]
    InvalidState { state: &'static str },

    #[error("no data source set")]
    NoSource,

    #[error("track not found: {0}")]
    TrackNotFound(usize),

    #[error("source error: {0}")]
    Source(String),

    #[error("player is gone")]
    PlayerGone,

    #[error("{0}")]
    Internal(String),
}
