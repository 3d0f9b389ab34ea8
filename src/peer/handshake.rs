use crate::error::{Result, TorrentError};

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Fixed size of the handshake preamble:
/// 1 (pstrlen) + 19 (pstr) + 8 (reserved) + 20 (info hash) + 20 (peer id)
pub const HANDSHAKE_LEN: usize = 68;

/// The fixed 68-byte preamble exchanged before any framed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_STRING.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_STRING);
        // bytes 20..28 are the reserved zeros
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parse a received preamble. A wrong protocol string is a
    /// `HandshakeMismatch`; the caller still has to compare the info hash
    /// against its own.
    pub fn parse(data: &[u8; HANDSHAKE_LEN]) -> Result<Self> {
        if data[0] as usize != PROTOCOL_STRING.len() || &data[1..20] != PROTOCOL_STRING {
            return Err(TorrentError::HandshakeMismatch);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Handshake { info_hash, peer_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trip() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = handshake.to_bytes();

        assert_eq!(bytes.len(), HANDSHAKE_LEN);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL_STRING);
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(Handshake::parse(&bytes).unwrap(), handshake);
    }

    #[test]
    fn wrong_protocol_string_is_a_mismatch() {
        let mut bytes = Handshake::new([1u8; 20], [2u8; 20]).to_bytes();
        bytes[1] = b'x';
        assert!(matches!(
            Handshake::parse(&bytes),
            Err(TorrentError::HandshakeMismatch)
        ));

        let mut bytes = Handshake::new([1u8; 20], [2u8; 20]).to_bytes();
        bytes[0] = 18;
        assert!(Handshake::parse(&bytes).is_err());
    }
}
