mod client;
mod request;
mod response;

pub use client::TrackerClient;
pub use request::{AnnounceRequest, TrackerEvent};
pub use response::AnnounceResponse;

use rand::Rng;

/// Generate a random peer ID
/// Format: -MN0001-<12 random chars>
pub fn generate_client_id() -> [u8; 20] {
    let mut client_id = [0u8; 20];
    client_id[0..8].copy_from_slice(b"-MN0001-");

    let mut rng = rand::thread_rng();
    for byte in &mut client_id[8..] {
        *byte = rng.gen_range(b'0'..=b'z');
    }

    client_id
}
