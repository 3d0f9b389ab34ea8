use thiserror::Error;

#[derive(Error, Debug)]
pub enum TorrentError {
    #[error("Bencode parsing error: {0}")]
    Bencode(String),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Handshake mismatch")]
    HandshakeMismatch,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Transport closed by remote")]
    TransportClosed,

    #[error("{0} messages are never sent by this client")]
    UnsupportedMessage(&'static str),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(String),
}

impl From<url::ParseError> for TorrentError {
    fn from(err: url::ParseError) -> Self {
        TorrentError::UrlParse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TorrentError>;
