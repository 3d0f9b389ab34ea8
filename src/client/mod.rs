use crate::error::Result;
use crate::storage::PieceStore;
use crate::torrent::{load_torrent_file, Metainfo};
use crate::tracker::{generate_client_id, AnnounceRequest, TrackerClient, TrackerEvent};
use crate::transfer::{TransferManager, DEFAULT_MAX_CONNECTIONS};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Configuration for the client
pub struct ClientConfig {
    pub download_dir: String,
    pub listen_port: u16,
    pub max_connections: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: "./downloads".to_string(),
            listen_port: 6881,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Ties the tracker, the transfer manager and the listening endpoint
/// together for one torrent.
pub struct TorrentClient {
    config: ClientConfig,
    client_id: [u8; 20],
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        let client_id = generate_client_id();
        info!("client initialized with id {}", hex::encode(client_id));
        Self { config, client_id }
    }

    /// Download a torrent to completion, then stay in the swarm as a
    /// seeder until interrupted.
    pub async fn download(&self, torrent_path: &Path) -> Result<()> {
        let metainfo = load_torrent_file(torrent_path).await?;
        log_torrent(&metainfo);

        let store = PieceStore::new(metainfo.info.piece_length, metainfo.info.total_length);
        let manager = Arc::new(TransferManager::new(
            metainfo.info.clone(),
            metainfo.info_hash,
            self.client_id,
            store,
            self.config.max_connections,
        ));

        let tracker = TrackerClient::new();
        let first = tracker
            .announce(
                &metainfo.announce,
                &self.request(&manager, Some(TrackerEvent::Started)),
            )
            .await?;
        manager.add_peers(&first.peers);

        tokio::fs::create_dir_all(&self.config.download_dir).await?;
        let output = Path::new(&self.config.download_dir).join(&manager.info().name);

        // keep topping the peer queue up from the tracker while pieces
        // are still outstanding
        let refresher = tokio::spawn(refresh_peers(
            Arc::clone(&manager),
            metainfo.announce.clone(),
            self.client_id,
            self.config.listen_port,
            Duration::from_secs(first.interval.max(1)),
            first.tracker_id.clone(),
        ));

        let outcome = tokio::select! {
            result = Arc::clone(&manager).run(&output) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        refresher.abort();

        let Some(result) = outcome else {
            info!("interrupted, leaving the swarm");
            self.announce_quietly(&tracker, &metainfo, &manager, TrackerEvent::Stopped)
                .await;
            return Ok(());
        };
        result?;

        info!("download complete: {}", output.display());
        self.announce_quietly(&tracker, &metainfo, &manager, TrackerEvent::Completed)
            .await;
        self.serve(&manager, &tracker, &metainfo).await
    }

    /// Seed an already-downloaded file until interrupted.
    pub async fn seed(&self, torrent_path: &Path, file: Option<&Path>) -> Result<()> {
        let metainfo = load_torrent_file(torrent_path).await?;
        log_torrent(&metainfo);

        let source = match file {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(&metainfo.info.name),
        };
        let store = PieceStore::from_file(
            &source,
            metainfo.info.piece_length,
            metainfo.info.total_length,
        )
        .await?;

        let manager = Arc::new(TransferManager::new(
            metainfo.info.clone(),
            metainfo.info_hash,
            self.client_id,
            store,
            self.config.max_connections,
        ));

        let tracker = TrackerClient::new();
        self.announce_quietly(&tracker, &metainfo, &manager, TrackerEvent::Started)
            .await;
        self.announce_quietly(&tracker, &metainfo, &manager, TrackerEvent::Completed)
            .await;
        self.serve(&manager, &tracker, &metainfo).await
    }

    /// Accept and serve incoming peers until ctrl-c.
    async fn serve(
        &self,
        manager: &Arc<TransferManager>,
        tracker: &TrackerClient,
        metainfo: &Metainfo,
    ) -> Result<()> {
        let listener =
            TcpListener::bind(("0.0.0.0", self.config.listen_port)).await?;
        info!("seeding on port {}", self.config.listen_port);

        let accept_loop = async {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("incoming connection from {}", addr);
                        manager.accept_incoming(stream);
                    }
                    Err(err) => warn!("accept failed: {}", err),
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, leaving the swarm");
                self.announce_quietly(tracker, metainfo, manager, TrackerEvent::Stopped)
                    .await;
            }
        }
        Ok(())
    }

    fn request(
        &self,
        manager: &TransferManager,
        event: Option<TrackerEvent>,
    ) -> AnnounceRequest {
        AnnounceRequest {
            info_hash: manager.info_hash(),
            peer_id: self.client_id,
            port: self.config.listen_port,
            uploaded: manager.uploaded(),
            downloaded: manager.downloaded(),
            left: manager.bytes_left(),
            event,
            tracker_id: None,
        }
    }

    async fn announce_quietly(
        &self,
        tracker: &TrackerClient,
        metainfo: &Metainfo,
        manager: &TransferManager,
        event: TrackerEvent,
    ) {
        if let Err(err) = tracker
            .announce(&metainfo.announce, &self.request(manager, Some(event)))
            .await
        {
            warn!("'{}' announce failed: {}", event.as_str(), err);
        }
    }
}

impl Default for TorrentClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

fn log_torrent(metainfo: &Metainfo) {
    info!("torrent: {}", metainfo.info.name);
    info!(
        "{} bytes in {} pieces of {}",
        metainfo.info.total_length,
        metainfo.info.piece_count(),
        metainfo.info.piece_length
    );
    info!("info hash: {}", metainfo.info_hash_hex());
}

/// Periodically re-announce while the peer queue has room.
async fn refresh_peers(
    manager: Arc<TransferManager>,
    announce_url: String,
    client_id: [u8; 20],
    port: u16,
    interval: Duration,
    tracker_id: Option<String>,
) {
    let tracker = TrackerClient::new();
    loop {
        // sleep first; the initial announce was just made
        tokio::time::sleep(interval).await;
        if !manager.wants_more_peers() {
            continue;
        }

        let request = AnnounceRequest {
            info_hash: manager.info_hash(),
            peer_id: client_id,
            port,
            uploaded: manager.uploaded(),
            downloaded: manager.downloaded(),
            left: manager.bytes_left(),
            event: None,
            tracker_id: tracker_id.clone(),
        };
        match tracker.announce(&announce_url, &request).await {
            Ok(more) => manager.add_peers(&more.peers),
            Err(err) => warn!("tracker refresh failed: {}", err),
        }
    }
}
