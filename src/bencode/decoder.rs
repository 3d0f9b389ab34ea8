use super::BencodeValue;
use crate::error::{Result, TorrentError};
use std::collections::BTreeMap;

/// Decode a single bencoded value, requiring that it spans the whole input.
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    let (value, consumed) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(TorrentError::Bencode(format!(
            "{} trailing bytes after value",
            data.len() - consumed
        )));
    }
    Ok(value)
}

/// Decode the value at the start of `data`, returning it together with the
/// number of bytes its encoding occupies. The consumed length is what lets
/// callers hash the exact serialized form of a sub-value.
pub fn decode_prefix(data: &[u8]) -> Result<(BencodeValue, usize)> {
    let mut parser = Parser { data, pos: 0 };
    let value = parser.value()?;
    Ok((value, parser.pos))
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn value(&mut self) -> Result<BencodeValue> {
        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(),
            b'd' => self.dict(),
            b'0'..=b'9' => Ok(BencodeValue::Bytes(self.byte_string()?)),
            c => Err(TorrentError::Bencode(format!(
                "invalid token: {}",
                c as char
            ))),
        }
    }

    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| TorrentError::Bencode("unexpected end of input".to_string()))
    }

    fn integer(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'i'
        let end = self.find(b'e')?;
        let text = std::str::from_utf8(&self.data[self.pos..end])
            .map_err(|_| TorrentError::Bencode("non-ASCII integer".to_string()))?;
        let num = text
            .parse::<i64>()
            .map_err(|_| TorrentError::Bencode(format!("invalid integer: {text:?}")))?;
        self.pos = end + 1;
        Ok(BencodeValue::Integer(num))
    }

    fn byte_string(&mut self) -> Result<Vec<u8>> {
        let colon = self.find(b':')?;
        let len_text = std::str::from_utf8(&self.data[self.pos..colon])
            .map_err(|_| TorrentError::Bencode("invalid string length".to_string()))?;
        let len = len_text
            .parse::<usize>()
            .map_err(|_| TorrentError::Bencode(format!("invalid string length: {len_text:?}")))?;

        let start = colon + 1;
        if start + len > self.data.len() {
            return Err(TorrentError::Bencode(
                "string length exceeds input".to_string(),
            ));
        }
        self.pos = start + len;
        Ok(self.data[start..start + len].to_vec())
    }

    fn list(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'l'
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.value()?);
        }
        self.pos += 1; // 'e'
        Ok(BencodeValue::List(items))
    }

    fn dict(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // 'd'
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(TorrentError::Bencode(
                    "dictionary key must be a string".to_string(),
                ));
            }
            let key = self.byte_string()?;
            let value = self.value()?;
            entries.insert(key, value);
        }
        self.pos += 1; // 'e'
        Ok(BencodeValue::Dict(entries))
    }

    fn find(&self, byte: u8) -> Result<usize> {
        self.data[self.pos..]
            .iter()
            .position(|&b| b == byte)
            .map(|offset| self.pos + offset)
            .ok_or_else(|| {
                TorrentError::Bencode(format!("missing '{}' terminator", byte as char))
            })
    }
}
