mod connection;
mod handshake;
mod message;

pub use connection::{serve_upload, Downloader, PeerConnection};
pub use handshake::{Handshake, HANDSHAKE_LEN, PROTOCOL_STRING};
pub use message::WireMessage;

/// Choke/interest bookkeeping for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// Whether the remote is choking us
    pub am_choked: bool,
    /// Whether we declared interest to the remote
    pub am_interested: bool,
    /// Whether we are choking the remote
    pub choking_peer: bool,
    /// Whether the remote declared interest in our data
    pub peer_interested: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            am_choked: true,
            am_interested: false,
            choking_peer: true,
            peer_interested: false,
        }
    }
}
