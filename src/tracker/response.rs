use crate::bencode::BencodeValue;
use crate::error::{Result, TorrentError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// What the engine consumes from an announce: a polling interval and a
/// batch of candidate peer addresses.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds to wait before the next announce
    pub interval: u64,
    /// Number of seeders, if reported
    pub complete: Option<u64>,
    /// Number of leechers, if reported
    pub incomplete: Option<u64>,
    /// Identifier to echo on later announces, if handed out
    pub tracker_id: Option<String>,
    pub peers: Vec<SocketAddr>,
}

impl AnnounceResponse {
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        if let Some(failure) = value.get(b"failure reason") {
            let reason = failure.as_str().unwrap_or("unknown failure").to_string();
            return Err(TorrentError::Tracker(reason));
        }

        let interval = value
            .get(b"interval")
            .and_then(|v| v.as_integer())
            .ok_or_else(|| TorrentError::Tracker("missing 'interval' field".to_string()))?
            as u64;

        let complete = value
            .get(b"complete")
            .and_then(|v| v.as_integer())
            .map(|i| i as u64);

        let incomplete = value
            .get(b"incomplete")
            .and_then(|v| v.as_integer())
            .map(|i| i as u64);

        let tracker_id = value
            .get(b"tracker id")
            .and_then(|v| v.as_str())
            .map(String::from);

        let peers = value
            .get(b"peers")
            .and_then(|v| v.as_bytes())
            .map(parse_compact_peers)
            .ok_or_else(|| TorrentError::Tracker("missing compact 'peers' field".to_string()))?;

        Ok(AnnounceResponse {
            interval,
            complete,
            incomplete,
            tracker_id,
            peers,
        })
    }
}

/// Compact peer list: 6 bytes per peer, 4-byte IPv4 address followed by
/// a big-endian port. Trailing partial entries are ignored.
fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}
