use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::transport::{RawEvent, SessionInfo};

/// Stable dedup key for one sensor event.
///
/// The node's counter restarts on every power cycle, so the host-side session start is
/// folded in: retransmissions within a session collide, equal readings from different
/// sessions do not.
pub fn external_id(node_name: &str, session_started_at: DateTime<Utc>, event: &RawEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(session_started_at.timestamp_millis().to_be_bytes());
    hasher.update(event.sequence.to_be_bytes());
    hasher.update(event.magnitude.to_bits().to_be_bytes());
    let digest = hasher.finalize();

    format!("sensor_{}", hex::encode(&digest[..16]))
}

pub fn external_id_for(session: &SessionInfo, event: &RawEvent) -> String {
    external_id(&session.node_name, session.started_at, event)
}
