/// Events reported to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

/// Parameters of one announce request.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    /// Port this client accepts peer connections on
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: Option<TrackerEvent>,
    /// Identifier handed out by the tracker on a previous announce
    pub tracker_id: Option<String>,
}

impl AnnounceRequest {
    /// Build the query string. Assembled by hand because the info hash
    /// and peer id are raw bytes that need percent-encoding as-is.
    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            percent_encode(&self.info_hash),
            percent_encode(&self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        );

        if let Some(event) = self.event {
            query.push_str("&event=");
            query.push_str(event.as_str());
        }
        if let Some(tracker_id) = &self.tracker_id {
            query.push_str("&trackerid=");
            query.push_str(tracker_id);
        }

        query
    }
}

fn percent_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("%{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_percent_encodes_the_digests() {
        let request = AnnounceRequest {
            info_hash: [0xAB; 20],
            peer_id: [0x01; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 4,
            left: 6,
            event: Some(TrackerEvent::Started),
            tracker_id: None,
        };

        let query = request.to_query_string();
        assert!(query.starts_with(&format!("info_hash={}", "%ab".repeat(20))));
        assert!(query.contains(&format!("peer_id={}", "%01".repeat(20))));
        assert!(query.contains("port=6881"));
        assert!(query.contains("downloaded=4"));
        assert!(query.contains("left=6"));
        assert!(query.contains("compact=1"));
        assert!(query.ends_with("event=started"));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let request = AnnounceRequest {
            info_hash: [0; 20],
            peer_id: [0; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 0,
            event: None,
            tracker_id: Some("17".to_string()),
        };

        let query = request.to_query_string();
        assert!(!query.contains("event="));
        assert!(query.contains("trackerid=17"));
    }
}
