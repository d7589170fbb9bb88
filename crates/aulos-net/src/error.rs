use thiserror::Error;

/// Fetch-layer errors.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("resource not found: {0}")]
    NotFound(String),
}

pub type NetResult<T> = Result<T, NetError>;
