use crate::error::{Result, TorrentError};
use crate::peer::{serve_upload, Downloader};
use crate::storage::PieceStore;
use crate::torrent::TorrentInfo;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Size of the outgoing connection pool; incoming connections are capped
/// at the same number.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Owns the piece store, the assignment counter, the transfer counters
/// and the peer-address queue. Connections never touch any of these
/// directly; everything goes through the methods here.
pub struct TransferManager {
    info: TorrentInfo,
    info_hash: [u8; 20],
    client_id: [u8; 20],
    max_connections: usize,
    store: Mutex<PieceStore>,
    /// Bytes already present when the store was handed over, so a
    /// seeding manager reports nothing left to fetch.
    preloaded: u64,
    /// Next piece index to hand out; every index is issued at most once.
    next_index: Mutex<u32>,
    downloaded: AtomicU64,
    uploaded: AtomicU64,
    active_incoming: AtomicUsize,
    peer_tx: mpsc::Sender<SocketAddr>,
    /// Shared by the whole downloader pool.
    peer_rx: Mutex<mpsc::Receiver<SocketAddr>>,
}

impl TransferManager {
    pub fn new(
        info: TorrentInfo,
        info_hash: [u8; 20],
        client_id: [u8; 20],
        store: PieceStore,
        max_connections: usize,
    ) -> Self {
        // collect twice the number of addresses we can use at once
        let (peer_tx, peer_rx) = mpsc::channel(2 * max_connections);
        let preloaded = store.filled_bytes();
        Self {
            info,
            info_hash,
            client_id,
            max_connections,
            store: Mutex::new(store),
            preloaded,
            next_index: Mutex::new(0),
            downloaded: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
            active_incoming: AtomicUsize::new(0),
            peer_tx,
            peer_rx: Mutex::new(peer_rx),
        }
    }

    pub fn info(&self) -> &TorrentInfo {
        &self.info
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    pub fn client_id(&self) -> [u8; 20] {
        self.client_id
    }

    pub fn piece_size(&self, index: u32) -> u64 {
        self.info.piece_size(index)
    }

    /// Largest frame a well-behaved peer can send us: a whole-piece
    /// message, or a bitfield covering every piece.
    pub fn frame_limit(&self) -> usize {
        let bitfield_len = self.info.piece_count() as usize / 8 + 8;
        9 + (self.info.piece_length as usize).max(bitfield_len)
    }

    /// Hand out the next piece index, or `None` once all have been issued.
    pub async fn next_assignment(&self) -> Option<u32> {
        let mut next = self.next_index.lock().await;
        if *next < self.info.piece_count() {
            let index = *next;
            *next += 1;
            debug!("assigned piece {}", index);
            Some(index)
        } else {
            None
        }
    }

    /// Store a downloaded piece and account its bytes.
    pub async fn handle_received_block(&self, index: u32, begin: u32, block: Vec<u8>) -> Result<()> {
        debug!(
            "received block for piece {} at offset {} ({} bytes)",
            index,
            begin,
            block.len()
        );
        self.store.lock().await.write_piece(index, &block)?;
        self.downloaded.fetch_add(block.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    /// Read a stored piece for upload and account the requested length.
    pub async fn check_for_block(&self, index: u32, begin: u32, length: u32) -> Result<Vec<u8>> {
        debug!(
            "serving piece {} at offset {} ({} bytes requested)",
            index, begin, length
        );
        let block = self.store.lock().await.read_piece(index)?;
        self.uploaded.fetch_add(u64::from(length), Ordering::AcqRel);
        Ok(block)
    }

    /// Enqueue discovered peers, silently dropping what no longer fits.
    pub fn add_peers(&self, addrs: &[SocketAddr]) {
        for &addr in addrs {
            if self.peer_tx.try_send(addr).is_err() {
                debug!("peer queue full, dropping {}", addr);
            }
        }
    }

    /// Whether another tracker announce would be worthwhile.
    pub fn wants_more_peers(&self) -> bool {
        self.peer_tx.capacity() > 0
    }

    /// Dequeue the next candidate address, suspending until one arrives.
    pub async fn next_peer(&self) -> SocketAddr {
        let mut rx = self.peer_rx.lock().await;
        match rx.recv().await {
            Some(addr) => addr,
            // the manager holds a sender, so this cannot resolve; park
            None => std::future::pending().await,
        }
    }

    /// Return a still-usable address to the queue. Best effort: if the
    /// queue is full the address is lost.
    pub fn requeue_peer(&self, addr: SocketAddr) {
        if self.peer_tx.try_send(addr).is_err() {
            debug!("peer queue full, not recycling {}", addr);
        }
    }

    /// Take ownership of an accepted socket. Rejected without a
    /// handshake when the incoming pool is full.
    pub fn accept_incoming(self: &Arc<Self>, stream: TcpStream) {
        let mut active = self.active_incoming.load(Ordering::Acquire);
        loop {
            if active >= self.max_connections {
                debug!("incoming connection limit reached, rejecting peer");
                drop(stream);
                return;
            }
            match self.active_incoming.compare_exchange(
                active,
                active + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => active = current,
            }
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = serve_upload(stream, Arc::clone(&manager)).await {
                debug!("upload connection ended: {}", err);
            }
            manager.active_incoming.fetch_sub(1, Ordering::AcqRel);
        });
    }

    pub fn incoming_connections(&self) -> usize {
        self.active_incoming.load(Ordering::Acquire)
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Acquire)
    }

    pub fn bytes_left(&self) -> u64 {
        self.info
            .total_length
            .saturating_sub(self.preloaded + self.downloaded())
    }

    /// Drive the downloader pool to completion, then assemble the output
    /// file. Returns only after every piece has been stored.
    pub async fn run(self: Arc<Self>, output: &Path) -> Result<()> {
        let mut pool = JoinSet::new();
        for _ in 0..self.max_connections {
            pool.spawn(Downloader::new(Arc::clone(&self)).run());
        }

        while let Some(joined) = pool.join_next().await {
            joined.map_err(|err| TorrentError::Io(std::io::Error::other(err)))??;
        }

        let store = self.store.lock().await;
        if !store.is_complete() {
            return Err(TorrentError::Storage(
                "download finished with missing pieces".to_string(),
            ));
        }
        store.assemble(output).await?;

        info!(
            "transfer complete: {} bytes downloaded, {} uploaded",
            self.downloaded(),
            self.uploaded()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Handshake, HANDSHAKE_LEN};
    use rand::Rng;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const INFO_HASH: [u8; 20] = [7u8; 20];

    fn test_info(piece_length: u64, total_length: u64) -> TorrentInfo {
        TorrentInfo {
            name: "test".to_string(),
            piece_length,
            total_length,
        }
    }

    fn scratch_path(tag: &str) -> PathBuf {
        let nonce: u32 = rand::thread_rng().gen();
        std::env::temp_dir().join(format!("minnow-{tag}-{nonce}"))
    }

    fn seeded_manager(content: &[u8], piece_length: u64, pool: usize) -> Arc<TransferManager> {
        let total = content.len() as u64;
        let mut store = PieceStore::new(piece_length, total);
        for (index, chunk) in content.chunks(piece_length as usize).enumerate() {
            store.write_piece(index as u32, chunk).unwrap();
        }
        Arc::new(TransferManager::new(
            test_info(piece_length, total),
            INFO_HASH,
            [1u8; 20],
            store,
            pool,
        ))
    }

    async fn spawn_seeder(manager: Arc<TransferManager>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                manager.accept_incoming(stream);
            }
        });
        addr
    }

    #[tokio::test]
    async fn assignments_are_unique_and_exhaust() {
        let manager = TransferManager::new(
            test_info(4, 10),
            INFO_HASH,
            [2u8; 20],
            PieceStore::new(4, 10),
            2,
        );

        assert_eq!(manager.info().piece_count(), 3);
        let mut seen = HashSet::new();
        for _ in 0..3 {
            assert!(seen.insert(manager.next_assignment().await.unwrap()));
        }
        assert_eq!(seen, HashSet::from([0, 1, 2]));
        assert_eq!(manager.next_assignment().await, None);
        assert_eq!(manager.next_assignment().await, None);
    }

    #[tokio::test]
    async fn peer_queue_is_bounded_and_drops_overflow() {
        let manager = TransferManager::new(
            test_info(4, 10),
            INFO_HASH,
            [2u8; 20],
            PieceStore::new(4, 10),
            2,
        );

        assert!(manager.wants_more_peers());
        let addrs: Vec<SocketAddr> = (0..6)
            .map(|i| format!("10.0.0.{}:6881", i + 1).parse().unwrap())
            .collect();
        manager.add_peers(&addrs);

        // capacity is twice the pool size; the rest were dropped
        assert!(!manager.wants_more_peers());
        for addr in &addrs[..4] {
            assert_eq!(manager.next_peer().await, *addr);
        }
        assert!(manager.wants_more_peers());
    }

    #[tokio::test]
    async fn byte_counters_track_transfers() {
        let manager = seeded_manager(b"abcdefghij", 4, 2);
        assert_eq!(manager.bytes_left(), 0);
        assert_eq!(manager.check_for_block(0, 0, 4).await.unwrap(), b"abcd");
        assert_eq!(manager.check_for_block(2, 0, 2).await.unwrap(), b"ij");
        assert_eq!(manager.uploaded(), 6);
        assert!(manager.check_for_block(3, 0, 4).await.is_err());

        let leech = TransferManager::new(
            test_info(4, 10),
            INFO_HASH,
            [2u8; 20],
            PieceStore::new(4, 10),
            2,
        );
        leech
            .handle_received_block(1, 0, b"efgh".to_vec())
            .await
            .unwrap();
        assert_eq!(leech.downloaded(), 4);
        assert_eq!(leech.bytes_left(), 6);
        assert!(leech.handle_received_block(1, 0, b"xyz".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn three_piece_file_transfers_end_to_end() {
        let content = b"abcdefghij";
        let seeder = seeded_manager(content, 4, 4);
        let seed_addr = spawn_seeder(Arc::clone(&seeder)).await;

        let leecher = Arc::new(TransferManager::new(
            test_info(4, 10),
            INFO_HASH,
            [2u8; 20],
            PieceStore::new(4, 10),
            4,
        ));
        leecher.add_peers(&[seed_addr]);

        let output = scratch_path("e2e");
        Arc::clone(&leecher).run(&output).await.unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), content);
        assert_eq!(leecher.downloaded(), 10);
        assert_eq!(seeder.uploaded(), 10);
        let _ = tokio::fs::remove_file(&output).await;
    }

    #[tokio::test]
    async fn downloader_abandons_a_peer_that_closes_after_handshake() {
        let content = b"hi";
        let seeder = seeded_manager(content, 2, 2);
        let good_addr = spawn_seeder(seeder).await;

        // completes the handshake, then hangs up
        let flaky = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let flaky_addr = flaky.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = flaky.accept().await.unwrap();
            let mut buf = [0u8; HANDSHAKE_LEN];
            stream.read_exact(&mut buf).await.unwrap();
            stream
                .write_all(&Handshake::new(INFO_HASH, [9u8; 20]).to_bytes())
                .await
                .unwrap();
            stream.shutdown().await.unwrap();
        });

        let leecher = Arc::new(TransferManager::new(
            test_info(2, 2),
            INFO_HASH,
            [2u8; 20],
            PieceStore::new(2, 2),
            2,
        ));
        leecher.add_peers(&[flaky_addr, good_addr]);

        let output = scratch_path("retry");
        Arc::clone(&leecher).run(&output).await.unwrap();

        assert_eq!(tokio::fs::read(&output).await.unwrap(), content);
        let _ = tokio::fs::remove_file(&output).await;
    }

    #[tokio::test]
    async fn incoming_connections_beyond_the_limit_are_rejected() {
        let seeder = seeded_manager(b"abcdefghij", 4, 1);
        let addr = spawn_seeder(Arc::clone(&seeder)).await;

        // first peer completes its handshake and stays connected
        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(&Handshake::new(INFO_HASH, [3u8; 20]).to_bytes())
            .await
            .unwrap();
        let mut reply = [0u8; HANDSHAKE_LEN];
        first.read_exact(&mut reply).await.unwrap();
        assert_eq!(Handshake::parse(&reply).unwrap().peer_id, [1u8; 20]);
        assert_eq!(seeder.incoming_connections(), 1);

        // the second is closed without any handshake bytes
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut probe = [0u8; 1];
        assert_eq!(second.read(&mut probe).await.unwrap(), 0);
        assert_eq!(seeder.incoming_connections(), 1);
    }
}
