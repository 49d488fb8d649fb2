use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Every tunable the mesh engine reads (§6.4). Passed by value into
/// [`crate::mesh::MeshCore::new`]; a host loads it from TOML/JSON/env and
/// hands it over — the engine has no config-file opinion of its own.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeshConfig {
    pub max_ttl: u8,
    pub announce_interval_ms: u64,
    pub stale_peer_ms: u64,
    pub cleanup_interval_ms: u64,

    pub fragment_threshold: usize,
    pub max_fragment_size: usize,
    pub fragment_timeout_ms: u64,

    pub seen_capacity: usize,
    pub gcs_max_bytes: usize,
    pub gcs_target_fpr: f64,

    pub store_forward_max: usize,
    pub store_forward_ttl_ms: u64,

    pub connection_retry_ms: u64,
    pub max_connection_attempts: u8,
    pub avoid_ttl_ms: u64,

    pub handshake_timeout_ms: u64,
    pub announce_timeout_ms: u64,
    pub inactivity_timeout_ms: u64,

    pub message_max_clock_skew_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_ttl: 7,
            announce_interval_ms: 30_000,
            stale_peer_ms: 180_000,
            cleanup_interval_ms: 60_000,

            fragment_threshold: 512,
            max_fragment_size: 469,
            fragment_timeout_ms: 30_000,

            seen_capacity: 500,
            gcs_max_bytes: 400,
            gcs_target_fpr: 0.01,

            store_forward_max: 100,
            store_forward_ttl_ms: 12 * 60 * 60 * 1000,

            connection_retry_ms: 5_000,
            max_connection_attempts: 3,
            avoid_ttl_ms: 15 * 60 * 1000,

            handshake_timeout_ms: 10_000,
            announce_timeout_ms: 15_000,
            inactivity_timeout_ms: 60_000,

            message_max_clock_skew_ms: 300_000,
        }
    }
}

impl MeshConfig {
    pub fn stale_peer(&self) -> Duration {
        Duration::from_millis(self.stale_peer_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_millis(self.fragment_timeout_ms)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn store_forward_ttl(&self) -> Duration {
        Duration::from_millis(self.store_forward_ttl_ms)
    }

    pub fn avoid_ttl(&self) -> Duration {
        Duration::from_millis(self.avoid_ttl_ms)
    }

    pub fn message_max_clock_skew(&self) -> Duration {
        Duration::from_millis(self.message_max_clock_skew_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = MeshConfig::default();
        assert_eq!(cfg.max_ttl, 7);
        assert_eq!(cfg.seen_capacity, 500);
        assert_eq!(cfg.store_forward_max, 100);
        assert_eq!(cfg.gcs_target_fpr, 0.01);
    }

    #[test]
    fn json_roundtrip_preserves_values() {
        let cfg = MeshConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: MeshConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, cfg);
    }

    #[test]
    fn partial_json_fills_remaining_fields_with_defaults() {
        let restored: MeshConfig = serde_json::from_str(r#"{"max_ttl": 3}"#).unwrap();
        assert_eq!(restored.max_ttl, 3);
        assert_eq!(restored.seen_capacity, MeshConfig::default().seen_capacity);
    }
}
