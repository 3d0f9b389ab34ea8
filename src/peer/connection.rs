use super::{Handshake, PeerState, WireMessage, HANDSHAKE_LEN};
use crate::error::{Result, TorrentError};
use crate::transfer::TransferManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// A live, handshaken connection to one peer.
///
/// Owns the transport and the choke/interest flags; the role-specific
/// state machines live in [`Downloader`] and [`serve_upload`].
pub struct PeerConnection {
    stream: TcpStream,
    addr: SocketAddr,
    peer_id: [u8; 20],
    state: PeerState,
    /// Upper bound on accepted frame sizes; anything larger is treated
    /// as a broken peer rather than read into memory.
    frame_limit: usize,
}

impl PeerConnection {
    /// Open an outgoing connection: dial, send our handshake, then read
    /// and verify the reply.
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_id: [u8; 20],
        frame_limit: usize,
    ) -> Result<Self> {
        debug!("connecting to peer {}", addr);
        let mut stream = TcpStream::connect(addr).await?;

        stream
            .write_all(&Handshake::new(info_hash, our_id).to_bytes())
            .await?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(eof_as_closed)?;

        let reply = Handshake::parse(&buf)?;
        if reply.info_hash != info_hash {
            return Err(TorrentError::HandshakeMismatch);
        }

        debug!("handshake with {} complete", addr);
        Ok(Self {
            stream,
            addr,
            peer_id: reply.peer_id,
            state: PeerState::default(),
            frame_limit,
        })
    }

    /// Take over an accepted socket: read and verify the remote's
    /// handshake first, then reply with our own.
    pub async fn accept(
        mut stream: TcpStream,
        info_hash: [u8; 20],
        our_id: [u8; 20],
        frame_limit: usize,
    ) -> Result<Self> {
        let addr = stream.peer_addr()?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(eof_as_closed)?;

        let offered = Handshake::parse(&buf)?;
        if offered.info_hash != info_hash {
            // the protocol defines no error reply for a bad handshake
            return Err(TorrentError::HandshakeMismatch);
        }

        stream
            .write_all(&Handshake::new(info_hash, our_id).to_bytes())
            .await?;

        debug!("accepted handshake from {}", addr);
        Ok(Self {
            stream,
            addr,
            peer_id: offered.peer_id,
            state: PeerState::default(),
            frame_limit,
        })
    }

    /// Write one framed message and update our side of the state flags.
    pub async fn send(&mut self, message: &WireMessage) -> Result<()> {
        let bytes = message.to_bytes()?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;

        match message {
            WireMessage::Choke => self.state.choking_peer = true,
            WireMessage::Unchoke => self.state.choking_peer = false,
            WireMessage::Interested => self.state.am_interested = true,
            WireMessage::NotInterested => self.state.am_interested = false,
            _ => {}
        }

        debug!("sent to {}: {:?}", self.addr, message);
        Ok(())
    }

    /// Read one framed message, updating the remote's state flags.
    /// A stream that ends mid-message surfaces as `TransportClosed`.
    pub async fn receive(&mut self) -> Result<WireMessage> {
        let mut prefix = [0u8; 4];
        self.stream
            .read_exact(&mut prefix)
            .await
            .map_err(eof_as_closed)?;

        let length = u32::from_be_bytes(prefix) as usize;
        if length > self.frame_limit {
            return Err(TorrentError::MalformedMessage(format!(
                "frame of {length} bytes exceeds the {} byte limit",
                self.frame_limit
            )));
        }

        let mut frame = vec![0u8; 4 + length];
        frame[..4].copy_from_slice(&prefix);
        self.stream
            .read_exact(&mut frame[4..])
            .await
            .map_err(eof_as_closed)?;

        let message = WireMessage::from_bytes(&frame)?;

        match &message {
            WireMessage::Choke => self.state.am_choked = true,
            WireMessage::Unchoke => self.state.am_choked = false,
            WireMessage::Interested => self.state.peer_interested = true,
            WireMessage::NotInterested => self.state.peer_interested = false,
            _ => {}
        }

        debug!("received from {}: {:?}", self.addr, message);
        Ok(message)
    }

    pub async fn shutdown(mut self) {
        let _ = self.stream.shutdown().await;
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn peer_id(&self) -> &[u8; 20] {
        &self.peer_id
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }
}

fn eof_as_closed(err: std::io::Error) -> TorrentError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TorrentError::TransportClosed
    } else {
        TorrentError::Io(err)
    }
}

/// Outgoing state machine: pulls piece assignments and candidate peers
/// from the manager until the assignment counter runs out.
pub struct Downloader {
    manager: Arc<TransferManager>,
    conn: Option<PeerConnection>,
}

impl Downloader {
    pub fn new(manager: Arc<TransferManager>) -> Self {
        Self {
            manager,
            conn: None,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            let Some(index) = self.manager.next_assignment().await else {
                // The remaining pieces belong to other downloaders. Hand
                // the live peer back so they can reuse it.
                if let Some(conn) = self.conn.take() {
                    let addr = conn.addr();
                    conn.shutdown().await;
                    self.manager.requeue_peer(addr);
                }
                debug!("no assignments left, downloader exiting");
                return Ok(());
            };

            self.fetch_piece(index).await?;
        }
    }

    /// Drive one piece to completion, switching peers as often as needed.
    /// The assignment is only released once the piece has been stored.
    async fn fetch_piece(&mut self, index: u32) -> Result<()> {
        let length = self.manager.piece_size(index) as u32;

        loop {
            if self.conn.is_none() {
                let fresh = self.acquire_peer().await;
                self.conn = Some(fresh);
            }
            let Some(conn) = self.conn.as_mut() else {
                continue;
            };

            if !conn.state().am_choked {
                let request = WireMessage::Request {
                    index,
                    begin: 0,
                    length,
                };
                if let Err(err) = conn.send(&request).await {
                    debug!("request to {} failed: {}, trying next peer", conn.addr(), err);
                    self.drop_peer().await;
                    continue;
                }
            }

            match conn.receive().await {
                Ok(WireMessage::Piece {
                    index: received,
                    begin,
                    block,
                }) => {
                    if let Err(err) = self
                        .manager
                        .handle_received_block(received, begin, block)
                        .await
                    {
                        warn!("rejecting block from {}: {}", conn.addr(), err);
                        self.drop_peer().await;
                        continue;
                    }
                    info!("piece {} downloaded", index);
                    return Ok(());
                }
                // choke/unchoke already updated the state flags
                Ok(_) => {}
                Err(err) => {
                    debug!("peer {} lost: {}, keeping assignment", conn.addr(), err);
                    self.drop_peer().await;
                }
            }
        }
    }

    /// Keep dequeuing candidate addresses until a handshake sticks.
    /// Failed candidates are discarded, not requeued.
    async fn acquire_peer(&self) -> PeerConnection {
        loop {
            let addr = self.manager.next_peer().await;
            let mut conn = match PeerConnection::connect(
                addr,
                self.manager.info_hash(),
                self.manager.client_id(),
                self.manager.frame_limit(),
            )
            .await
            {
                Ok(conn) => conn,
                Err(err) => {
                    debug!("peer {} discarded: {}", addr, err);
                    continue;
                }
            };

            match conn.send(&WireMessage::Interested).await {
                Ok(()) => return conn,
                Err(err) => {
                    debug!("peer {} discarded: {}", addr, err);
                    conn.shutdown().await;
                }
            }
        }
    }

    async fn drop_peer(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.shutdown().await;
        }
    }
}

/// Incoming state machine: verify the handshake, then serve whole-piece
/// requests until the remote goes away.
pub async fn serve_upload(stream: TcpStream, manager: Arc<TransferManager>) -> Result<()> {
    let mut conn = PeerConnection::accept(
        stream,
        manager.info_hash(),
        manager.client_id(),
        manager.frame_limit(),
    )
    .await?;
    info!("serving peer {}", conn.addr());

    loop {
        let message = match conn.receive().await {
            Ok(message) => message,
            Err(TorrentError::TransportClosed) => {
                debug!("peer {} disconnected", conn.addr());
                return Ok(());
            }
            Err(err) => {
                warn!("aborting upload to {}: {}", conn.addr(), err);
                return Err(err);
            }
        };

        match message {
            WireMessage::Interested => {
                if conn.state().choking_peer {
                    conn.send(&WireMessage::Unchoke).await?;
                }
            }
            WireMessage::Request {
                index,
                begin,
                length,
            } => {
                if conn.state().choking_peer {
                    debug!("request from {} dropped while choking", conn.addr());
                    continue;
                }
                let block = manager.check_for_block(index, begin, length).await?;
                conn.send(&WireMessage::Piece {
                    index,
                    begin: 0,
                    block,
                })
                .await?;
            }
            WireMessage::Cancel { index, .. } => {
                // sends complete before the next read, so there is never
                // an in-flight transfer left to abort here
                debug!("cancel for piece {} from {}", index, conn.addr());
            }
            // not-interested already reset the flag; the rest carry no
            // meaning for an uploader that holds the whole file
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PieceStore;
    use crate::torrent::TorrentInfo;
    use tokio::net::TcpListener;

    const FRAME_LIMIT: usize = 1024;

    #[tokio::test]
    async fn matching_info_hash_completes_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [7u8; 20];

        let acceptor = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            PeerConnection::accept(stream, info_hash, [2u8; 20], FRAME_LIMIT).await
        });

        let outgoing = PeerConnection::connect(addr, info_hash, [1u8; 20], FRAME_LIMIT)
            .await
            .unwrap();
        let incoming = acceptor.await.unwrap().unwrap();

        assert_eq!(outgoing.peer_id(), &[2u8; 20]);
        assert_eq!(incoming.peer_id(), &[1u8; 20]);
        assert!(outgoing.state().am_choked);
        assert!(!outgoing.state().am_interested);
    }

    #[tokio::test]
    async fn differing_info_hash_fails_both_sides() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let acceptor = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            PeerConnection::accept(stream, [7u8; 20], [2u8; 20], FRAME_LIMIT).await
        });

        let outgoing = PeerConnection::connect(addr, [8u8; 20], [1u8; 20], FRAME_LIMIT).await;

        assert!(matches!(
            acceptor.await.unwrap(),
            Err(TorrentError::HandshakeMismatch)
        ));
        // the acceptor hung up without replying
        assert!(outgoing.is_err());
    }

    #[tokio::test]
    async fn framed_messages_update_state_flags() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [7u8; 20];

        let acceptor = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = PeerConnection::accept(stream, info_hash, [2u8; 20], FRAME_LIMIT)
                .await
                .unwrap();
            assert_eq!(conn.receive().await.unwrap(), WireMessage::Interested);
            assert!(conn.state().peer_interested);
            conn.send(&WireMessage::Unchoke).await.unwrap();
            assert!(!conn.state().choking_peer);
            conn
        });

        let mut outgoing = PeerConnection::connect(addr, info_hash, [1u8; 20], FRAME_LIMIT)
            .await
            .unwrap();
        outgoing.send(&WireMessage::Interested).await.unwrap();
        assert!(outgoing.state().am_interested);

        assert_eq!(outgoing.receive().await.unwrap(), WireMessage::Unchoke);
        assert!(!outgoing.state().am_choked);

        acceptor.await.unwrap();
    }

    #[tokio::test]
    async fn upload_serves_repeatedly_and_drops_choked_requests() {
        let info_hash = [7u8; 20];
        let mut store = PieceStore::new(4, 10);
        store.write_piece(0, b"abcd").unwrap();
        store.write_piece(1, b"efgh").unwrap();
        store.write_piece(2, b"ij").unwrap();
        let manager = Arc::new(TransferManager::new(
            TorrentInfo {
                name: "test".to_string(),
                piece_length: 4,
                total_length: 10,
            },
            info_hash,
            [2u8; 20],
            store,
            2,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move {
                let (stream, _) = listener.accept().await.unwrap();
                serve_upload(stream, manager).await
            }
        });

        let mut conn = PeerConnection::connect(addr, info_hash, [1u8; 20], FRAME_LIMIT)
            .await
            .unwrap();

        // sent before declaring interest: silently dropped, so the next
        // reply on the wire is the Unchoke, not a Piece
        conn.send(&WireMessage::Request {
            index: 0,
            begin: 0,
            length: 4,
        })
        .await
        .unwrap();
        conn.send(&WireMessage::Interested).await.unwrap();
        assert_eq!(conn.receive().await.unwrap(), WireMessage::Unchoke);

        for (index, block) in [
            (0u32, b"abcd".to_vec()),
            (1, b"efgh".to_vec()),
            (2, b"ij".to_vec()),
        ] {
            conn.send(&WireMessage::Request {
                index,
                begin: 0,
                length: block.len() as u32,
            })
            .await
            .unwrap();
            assert_eq!(
                conn.receive().await.unwrap(),
                WireMessage::Piece {
                    index,
                    begin: 0,
                    block
                }
            );
        }

        // a clean disconnect ends the serving loop without an error
        conn.shutdown().await;
        assert!(server.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn closed_stream_reads_as_transport_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [7u8; 20];

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let conn = PeerConnection::accept(stream, info_hash, [2u8; 20], FRAME_LIMIT)
                .await
                .unwrap();
            conn.shutdown().await;
        });

        let mut outgoing = PeerConnection::connect(addr, info_hash, [1u8; 20], FRAME_LIMIT)
            .await
            .unwrap();
        assert!(matches!(
            outgoing.receive().await,
            Err(TorrentError::TransportClosed)
        ));
    }
}
