//! The bounded ring of recently-seen public packet fingerprints (§3),
//! shared by `Security` (replay defense) and `GossipSync` (filter
//! construction / reconciliation).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

/// `blake3(sender_id || timestamp_be || [type] || blake3(payload))` — the
/// dedup key for one packet (§4.4). blake3 because the rest of this
/// workspace already standardizes on it for non-identity hashing and it's
/// fast enough to run per-packet inline.
pub fn packet_fingerprint(sender_id: &[u8; 8], timestamp: u64, packet_type: u8, payload: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(sender_id);
    hasher.update(&timestamp.to_be_bytes());
    hasher.update(&[packet_type]);
    hasher.update(blake3::hash(payload).as_bytes());
    *hasher.finalize().as_bytes()
}

/// Truncates a fingerprint to the 8-byte key the gossip filter indexes on.
pub fn truncate_to_filter_key(fingerprint: &[u8; 32]) -> u64 {
    u64::from_be_bytes(fingerprint[..8].try_into().unwrap())
}

struct Entry {
    fingerprint: [u8; 32],
    seen_at: Instant,
}

pub struct SeenSet {
    capacity: usize,
    entries: Mutex<VecDeque<Entry>>,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns `true` and inserts the fingerprint if it was not already
    /// present; returns `false` (no insert) if it was a duplicate.
    pub fn insert_if_new(&self, fingerprint: [u8; 32]) -> bool {
        let mut entries = self.entries.lock().expect("seen set mutex poisoned");
        if entries.iter().any(|e| e.fingerprint == fingerprint) {
            return false;
        }
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Entry {
            fingerprint,
            seen_at: Instant::now(),
        });
        true
    }

    pub fn contains(&self, fingerprint: &[u8; 32]) -> bool {
        self.entries
            .lock()
            .expect("seen set mutex poisoned")
            .iter()
            .any(|e| &e.fingerprint == fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("seen set mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every fingerprint currently held, oldest first.
    pub fn snapshot(&self) -> Vec<[u8; 32]> {
        self.entries
            .lock()
            .expect("seen set mutex poisoned")
            .iter()
            .map(|e| e.fingerprint)
            .collect()
    }

    #[cfg(test)]
    fn oldest_age(&self) -> Option<std::time::Duration> {
        self.entries
            .lock()
            .unwrap()
            .front()
            .map(|e| e.seen_at.elapsed())
    }
}
