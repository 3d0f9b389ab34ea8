use super::{AnnounceRequest, AnnounceResponse};
use crate::bencode::decode;
use crate::error::{Result, TorrentError};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

/// HTTP announce client.
pub struct TrackerClient {
    client: Client,
}

impl TrackerClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Announce to the tracker and parse the returned peer list.
    pub async fn announce(
        &self,
        announce_url: &str,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse> {
        // validate up front; the query itself is appended raw because the
        // info hash and peer id are pre-encoded bytes
        let base = Url::parse(announce_url)?;
        let separator = if base.query().is_some() { '&' } else { '?' };
        let url = format!("{announce_url}{separator}{}", request.to_query_string());
        debug!("announcing: {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(TorrentError::Tracker(format!("HTTP error: {status}")));
        }

        let parsed = AnnounceResponse::from_bencode(&decode(&body)?)?;
        info!(
            "tracker returned {} peers (interval {}s)",
            parsed.peers.len(),
            parsed.interval
        );
        Ok(parsed)
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}
