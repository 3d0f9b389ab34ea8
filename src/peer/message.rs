use crate::error::{Result, TorrentError};
use bytes::{Buf, BufMut, BytesMut};

/// Messages of the peer wire protocol.
///
/// Every frame is a 4-byte big-endian length prefix followed by a 1-byte
/// id and the payload; a zero length prefix is a keep-alive. These values
/// are only ever built by this codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// Piece availability notice (receive-only for this client)
    Have { piece_index: u32 },
    /// Availability bitmap (receive-only, kept raw for informational use)
    Bitfield { bitmap: Vec<u8> },
    /// Whole-piece request: begin is always 0 and length the piece length
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl WireMessage {
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;
    const CANCEL: u8 = 8;

    /// Serialize to the framed wire form.
    ///
    /// `Have` and `Bitfield` cannot be sent: an uploader here always holds
    /// the complete file, so availability advertising is unimplemented and
    /// asking for it is a caller bug.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();

        match self {
            WireMessage::KeepAlive => {
                buf.put_u32(0);
            }
            WireMessage::Choke => {
                buf.put_u32(1);
                buf.put_u8(Self::CHOKE);
            }
            WireMessage::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(Self::UNCHOKE);
            }
            WireMessage::Interested => {
                buf.put_u32(1);
                buf.put_u8(Self::INTERESTED);
            }
            WireMessage::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(Self::NOT_INTERESTED);
            }
            WireMessage::Have { .. } => {
                return Err(TorrentError::UnsupportedMessage("have"));
            }
            WireMessage::Bitfield { .. } => {
                return Err(TorrentError::UnsupportedMessage("bitfield"));
            }
            WireMessage::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13); // 1 + 4 + 4 + 4
                buf.put_u8(Self::REQUEST);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            WireMessage::Piece {
                index,
                begin,
                block,
            } => {
                buf.put_u32((9 + block.len()) as u32);
                buf.put_u8(Self::PIECE);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            WireMessage::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(Self::CANCEL);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
        }

        Ok(buf.to_vec())
    }

    /// Deserialize a full frame, length prefix included.
    pub fn from_bytes(mut data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(TorrentError::MalformedMessage(
                "frame shorter than length prefix".to_string(),
            ));
        }

        let declared = data.get_u32() as usize;
        if data.len() != declared {
            return Err(TorrentError::MalformedMessage(format!(
                "length prefix {} disagrees with {} payload bytes",
                declared,
                data.len()
            )));
        }

        if declared == 0 {
            return Ok(WireMessage::KeepAlive);
        }

        let id = data.get_u8();
        let payload_len = declared - 1;

        let expect_len = |expected: usize| -> Result<()> {
            if payload_len == expected {
                Ok(())
            } else {
                Err(TorrentError::MalformedMessage(format!(
                    "id {id} carries {payload_len} payload bytes, expected {expected}"
                )))
            }
        };

        match id {
            Self::CHOKE => expect_len(0).map(|_| WireMessage::Choke),
            Self::UNCHOKE => expect_len(0).map(|_| WireMessage::Unchoke),
            Self::INTERESTED => expect_len(0).map(|_| WireMessage::Interested),
            Self::NOT_INTERESTED => expect_len(0).map(|_| WireMessage::NotInterested),
            Self::HAVE => {
                expect_len(4)?;
                Ok(WireMessage::Have {
                    piece_index: data.get_u32(),
                })
            }
            Self::BITFIELD => Ok(WireMessage::Bitfield {
                bitmap: data.to_vec(),
            }),
            Self::REQUEST => {
                expect_len(12)?;
                Ok(WireMessage::Request {
                    index: data.get_u32(),
                    begin: data.get_u32(),
                    length: data.get_u32(),
                })
            }
            Self::PIECE => {
                if payload_len < 8 {
                    return Err(TorrentError::MalformedMessage(
                        "piece frame shorter than its header".to_string(),
                    ));
                }
                Ok(WireMessage::Piece {
                    index: data.get_u32(),
                    begin: data.get_u32(),
                    block: data.to_vec(),
                })
            }
            Self::CANCEL => {
                expect_len(12)?;
                Ok(WireMessage::Cancel {
                    index: data.get_u32(),
                    begin: data.get_u32(),
                    length: data.get_u32(),
                })
            }
            _ => Err(TorrentError::MalformedMessage(format!(
                "unknown message id: {id}"
            ))),
        }
    }
}
