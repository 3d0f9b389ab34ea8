use crate::bencode::BencodeValue;
use crate::error::{Result, TorrentError};

/// The `info` dictionary of a single-file torrent.
///
/// Multi-file torrents are out of scope for this client and are rejected
/// at parse time.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Suggested output file name
    pub name: String,
    /// Number of bytes in each piece (the last piece may be shorter)
    pub piece_length: u64,
    /// Total length of the file
    pub total_length: u64,
}

impl TorrentInfo {
    fn from_bencode(value: &BencodeValue) -> Result<Self> {
        let name = value
            .get(b"name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TorrentError::InvalidTorrent("missing 'name' field".to_string()))?
            .to_string();

        let piece_length = value
            .get(b"piece length")
            .and_then(|v| v.as_integer())
            .filter(|&len| len > 0)
            .ok_or_else(|| {
                TorrentError::InvalidTorrent("missing or invalid 'piece length' field".to_string())
            })? as u64;

        if value.get(b"files").is_some() {
            return Err(TorrentError::InvalidTorrent(
                "multi-file torrents are not supported".to_string(),
            ));
        }

        let total_length = value
            .get(b"length")
            .and_then(|v| v.as_integer())
            .filter(|&len| len >= 0)
            .ok_or_else(|| {
                TorrentError::InvalidTorrent("missing or invalid 'length' field".to_string())
            })? as u64;

        Ok(TorrentInfo {
            name,
            piece_length,
            total_length,
        })
    }

    /// Number of pieces the file divides into.
    pub fn piece_count(&self) -> u32 {
        self.total_length.div_ceil(self.piece_length) as u32
    }

    /// Expected length of piece `index`: `piece_length` for all but the
    /// last piece, which holds the remainder.
    pub fn piece_size(&self, index: u32) -> u64 {
        if u64::from(index) + 1 == u64::from(self.piece_count()) {
            let remainder = self.total_length % self.piece_length;
            if remainder == 0 {
                self.piece_length
            } else {
                remainder
            }
        } else {
            self.piece_length
        }
    }
}

/// Parsed contents of a `.torrent` file.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// URL of the tracker
    pub announce: String,
    /// Contents description
    pub info: TorrentInfo,
    /// SHA1 digest of the bencoded info dictionary
    pub info_hash: [u8; 20],
}

impl Metainfo {
    /// Assemble from a decoded top-level dictionary plus the info hash,
    /// which must be computed over the exact serialized `info` bytes.
    pub fn from_bencode(value: &BencodeValue, info_hash: [u8; 20]) -> Result<Self> {
        let announce = value
            .get(b"announce")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TorrentError::InvalidTorrent("missing 'announce' field".to_string()))?
            .to_string();

        let info_value = value
            .get(b"info")
            .ok_or_else(|| TorrentError::InvalidTorrent("missing 'info' field".to_string()))?;

        let info = TorrentInfo::from_bencode(info_value)?;

        Ok(Metainfo {
            announce,
            info,
            info_hash,
        })
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}
