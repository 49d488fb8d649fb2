//! Shared identifiers and small value types used across components (§3).

use std::time::Instant;

use bitchat_crypto::Fingerprint;

/// 8-byte peer identifier, displayed as 16 hex characters. May rotate across
/// reconnects; [`Fingerprint`] is the identity that persists.
pub type PeerId = [u8; 8];

pub fn peer_id_to_hex(id: &PeerId) -> String {
    id.iter().map(|b| format!("{b:02x}")).collect()
}

pub type ChannelName = String;

/// What `PeerRegistry` knows about one peer (§3).
#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub id: PeerId,
    pub nickname: String,
    pub connected: bool,
    pub direct: bool,
    pub noise_pub: [u8; 32],
    pub signing_pub: [u8; 32],
    pub verified: bool,
    pub last_seen: Instant,
    pub rssi: Option<i16>,
}

impl PeerInfo {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_signing_key(&self.signing_pub)
    }
}

/// Transport-side tracking of repeated connection attempts to one address
/// (§3). Lives in the host's `Transport` implementation; modeled here so
/// `bitchat-core` can offer a reusable building block.
#[derive(Clone, Debug)]
pub struct ConnectionAttempt {
    pub attempts: u8,
    pub last_attempt: Instant,
}

impl ConnectionAttempt {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            last_attempt: Instant::now(),
        }
    }

    pub fn is_expired(&self, retry_delay: std::time::Duration) -> bool {
        self.last_attempt.elapsed() >= retry_delay * 2
    }

    pub fn may_retry(&self, retry_delay: std::time::Duration, max_attempts: u8) -> bool {
        self.attempts < max_attempts && self.last_attempt.elapsed() >= retry_delay
    }
}

impl Default for ConnectionAttempt {
    fn default() -> Self {
        Self::new()
    }
}

/// A blacklisted transport address (§3).
#[derive(Clone, Debug)]
pub struct AvoidEntry {
    pub reason: String,
    pub since: Instant,
}

impl AvoidEntry {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            since: Instant::now(),
        }
    }

    pub fn is_expired(&self, ttl: std::time::Duration) -> bool {
        self.since.elapsed() >= ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_hex_is_lowercase_16_chars() {
        let id: PeerId = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04];
        let hex = peer_id_to_hex(&id);
        assert_eq!(hex.len(), 16);
        assert_eq!(hex, "deadbeef01020304");
    }

    #[test]
    fn connection_attempt_retry_gating() {
        let attempt = ConnectionAttempt::new();
        assert!(!attempt.may_retry(std::time::Duration::from_secs(5), 3));
    }
}
