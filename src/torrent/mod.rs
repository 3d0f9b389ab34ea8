mod metainfo;

pub use metainfo::{Metainfo, TorrentInfo};

use crate::bencode::{decode, decode_prefix};
use crate::error::{Result, TorrentError};
use sha1::{Digest, Sha1};
use std::path::Path;
use tokio::fs;

/// Load and parse a .torrent file
pub async fn load_torrent_file<P: AsRef<Path>>(path: P) -> Result<Metainfo> {
    let data = fs::read(path).await?;
    parse_torrent(&data)
}

/// Parse torrent data from bytes
pub fn parse_torrent(data: &[u8]) -> Result<Metainfo> {
    let value = decode(data)?;

    // The swarm identity is the digest of the info dict exactly as it
    // appears on disk, not of a re-encoding.
    let mut hasher = Sha1::new();
    hasher.update(raw_info_span(data)?);

    Metainfo::from_bencode(&value, hasher.finalize().into())
}

/// Walk the top-level dictionary to find the byte range its `info` value
/// occupies.
fn raw_info_span(data: &[u8]) -> Result<&[u8]> {
    if data.first() != Some(&b'd') {
        return Err(TorrentError::InvalidTorrent(
            "top-level value is not a dictionary".to_string(),
        ));
    }

    let mut pos = 1;
    while data.get(pos).is_some_and(|&b| b != b'e') {
        let (key, key_len) = decode_prefix(&data[pos..])?;
        pos += key_len;
        let (_, value_len) = decode_prefix(&data[pos..])?;
        if key.as_bytes() == Some(b"info") {
            return Ok(&data[pos..pos + value_len]);
        }
        pos += value_len;
    }

    Err(TorrentError::InvalidTorrent(
        "missing 'info' field".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{encode, BencodeValue};
    use sha1::{Digest, Sha1};
    use std::collections::BTreeMap;

    fn sample_torrent(piece_length: i64, total_length: i64) -> Vec<u8> {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), BencodeValue::Bytes(b"sample.txt".to_vec()));
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(piece_length));
        info.insert(b"length".to_vec(), BencodeValue::Integer(total_length));

        let mut top = BTreeMap::new();
        top.insert(
            b"announce".to_vec(),
            BencodeValue::Bytes(b"http://127.0.0.1:8080/".to_vec()),
        );
        top.insert(b"info".to_vec(), BencodeValue::Dict(info));
        encode(&BencodeValue::Dict(top))
    }

    #[test]
    fn parses_single_file_torrent() {
        let metainfo = parse_torrent(&sample_torrent(4, 10)).unwrap();
        assert_eq!(metainfo.announce, "http://127.0.0.1:8080/");
        assert_eq!(metainfo.info.name, "sample.txt");
        assert_eq!(metainfo.info.piece_length, 4);
        assert_eq!(metainfo.info.total_length, 10);
        assert_eq!(metainfo.info.piece_count(), 3);
    }

    #[test]
    fn last_piece_holds_the_remainder() {
        let metainfo = parse_torrent(&sample_torrent(4, 10)).unwrap();
        assert_eq!(metainfo.info.piece_size(0), 4);
        assert_eq!(metainfo.info.piece_size(1), 4);
        assert_eq!(metainfo.info.piece_size(2), 2);

        let aligned = parse_torrent(&sample_torrent(4, 8)).unwrap();
        assert_eq!(aligned.info.piece_count(), 2);
        assert_eq!(aligned.info.piece_size(1), 4);
    }

    #[test]
    fn info_hash_matches_encoded_info_dict() {
        let data = sample_torrent(4, 10);
        let metainfo = parse_torrent(&data).unwrap();

        let top = decode(&data).unwrap();
        let mut hasher = Sha1::new();
        hasher.update(encode(top.get(b"info").unwrap()));
        let expected: [u8; 20] = hasher.finalize().into();

        assert_eq!(metainfo.info_hash, expected);
    }

    #[test]
    fn info_hash_covers_the_exact_serialized_span() {
        // keys deliberately out of canonical order; a re-encoding of the
        // decoded dict would produce different top-level bytes
        let info = b"d6:lengthi10e4:name10:sample.txt12:piece lengthi4ee";
        let mut data = Vec::new();
        data.extend_from_slice(b"d4:info");
        data.extend_from_slice(info);
        data.extend_from_slice(b"8:announce8:http://te");

        let mut hasher = Sha1::new();
        hasher.update(info);
        let expected: [u8; 20] = hasher.finalize().into();

        let metainfo = parse_torrent(&data).unwrap();
        assert_eq!(metainfo.info_hash, expected);
        assert_eq!(metainfo.announce, "http://t");
    }

    #[test]
    fn multi_file_torrent_is_rejected() {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), BencodeValue::Bytes(b"dir".to_vec()));
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(4));
        info.insert(b"files".to_vec(), BencodeValue::List(vec![]));

        let mut top = BTreeMap::new();
        top.insert(b"announce".to_vec(), BencodeValue::Bytes(b"http://t".to_vec()));
        top.insert(b"info".to_vec(), BencodeValue::Dict(info));

        assert!(parse_torrent(&encode(&BencodeValue::Dict(top))).is_err());
    }
}
