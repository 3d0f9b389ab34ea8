use crate::error::{Result, TorrentError};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// In-memory slot storage for the pieces of a single file.
///
/// Slot `i` is empty until a whole piece is written into it; once filled
/// it holds exactly `piece_length` bytes, except the last slot which
/// holds the remainder. The TransferManager is the only owner.
pub struct PieceStore {
    piece_length: u64,
    total_length: u64,
    slots: Vec<Vec<u8>>,
}

impl PieceStore {
    /// Pre-allocate empty slots for a download.
    pub fn new(piece_length: u64, total_length: u64) -> Self {
        let count = total_length.div_ceil(piece_length) as usize;
        Self {
            piece_length,
            total_length,
            slots: vec![Vec::new(); count],
        }
    }

    /// Load a completed file into slots, for seeding.
    pub async fn from_file<P: AsRef<Path>>(
        path: P,
        piece_length: u64,
        total_length: u64,
    ) -> Result<Self> {
        let data = fs::read(path.as_ref()).await?;
        if data.len() as u64 != total_length {
            return Err(TorrentError::Storage(format!(
                "{} is {} bytes, torrent describes {}",
                path.as_ref().display(),
                data.len(),
                total_length
            )));
        }

        let mut store = Self::new(piece_length, total_length);
        for (index, chunk) in data.chunks(piece_length as usize).enumerate() {
            store.slots[index] = chunk.to_vec();
        }

        info!(
            "preloaded {} pieces from {}",
            store.piece_count(),
            path.as_ref().display()
        );
        Ok(store)
    }

    pub fn piece_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Length slot `index` must hold once filled.
    pub fn expected_len(&self, index: u32) -> u64 {
        if u64::from(index) + 1 == self.slots.len() as u64 {
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

    /// Fill slot `index` with a whole piece. A block of the wrong size
    /// is rejected so the caller can treat the sender as a bad peer.
    pub fn write_piece(&mut self, index: u32, block: &[u8]) -> Result<()> {
        if index as usize >= self.slots.len() {
            return Err(TorrentError::Storage(format!(
                "piece index {index} out of range"
            )));
        }

        let expected = self.expected_len(index);
        if block.len() as u64 != expected {
            return Err(TorrentError::Storage(format!(
                "piece {index} is {} bytes, expected {expected}",
                block.len()
            )));
        }

        self.slots[index as usize] = block.to_vec();
        debug!("stored piece {} ({} bytes)", index, block.len());
        Ok(())
    }

    /// Read back the full contents of slot `index`.
    pub fn read_piece(&self, index: u32) -> Result<Vec<u8>> {
        let slot = self
            .slots
            .get(index as usize)
            .ok_or_else(|| TorrentError::Storage(format!("piece index {index} out of range")))?;

        if slot.len() as u64 != self.expected_len(index) {
            return Err(TorrentError::Storage(format!(
                "piece {index} has not been downloaded"
            )));
        }
        Ok(slot.clone())
    }

    pub fn is_filled(&self, index: u32) -> bool {
        self.slots
            .get(index as usize)
            .map(|slot| slot.len() as u64 == self.expected_len(index))
            .unwrap_or(false)
    }

    pub fn is_complete(&self) -> bool {
        (0..self.piece_count()).all(|index| self.is_filled(index))
    }

    /// Total bytes held across filled slots.
    pub fn filled_bytes(&self) -> u64 {
        (0..self.piece_count())
            .filter(|&index| self.is_filled(index))
            .map(|index| self.expected_len(index))
            .sum()
    }

    /// Concatenate the slots in index order into the output file.
    pub async fn assemble<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = fs::File::create(path.as_ref()).await?;
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.len() as u64 != self.expected_len(index as u32) {
                return Err(TorrentError::Storage(format!(
                    "cannot assemble: piece {index} is missing"
                )));
            }
            file.write_all(slot).await?;
        }
        file.flush().await?;

        info!(
            "assembled {} pieces into {}",
            self.piece_count(),
            path.as_ref().display()
        );
        Ok(())
    }
}
