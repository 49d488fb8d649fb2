//! Gossip-sync: reconciling recently-seen public packets between newly
//! direct-connected peers via a compact set filter (§4.8).
//!
//! `GossipSync` keeps its own bounded `(fingerprint, Packet)` ring — distinct
//! from `Security`'s dedup-only [`crate::seen_set::SeenSet`] — because
//! replaying a missing packet requires the actual bytes, not just its
//! fingerprint.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use bitchat_codec::constants::message_type;
use bitchat_codec::payloads::GossipFilterTlv;
use bitchat_codec::Packet;
use bytes::Bytes;
use tracing::{debug, instrument};

use super::filter::Xor8Filter;
use crate::seen_set::{packet_fingerprint, truncate_to_filter_key};
use crate::types::PeerId;

/// How long after a peer becomes direct the initial exchange is scheduled,
/// to let the handshake finish first (§4.8).
pub const INITIAL_EXCHANGE_DELAY: Duration = Duration::from_secs(1);

struct Entry {
    fingerprint: [u8; 32],
    packet: Packet,
}

pub struct GossipSync {
    capacity: usize,
    entries: Mutex<VecDeque<Entry>>,
}

impl GossipSync {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Adds a broadcast packet to the reconciliation set (§4.8). Every
    /// `MESSAGE`, `ANNOUNCE`, and `FRAGMENT` seen on a broadcast path feeds
    /// this, per §4.7.
    #[instrument(skip(self, packet))]
    pub fn on_public_packet_seen(&self, packet: Packet) {
        let fingerprint = packet_fingerprint(&packet.sender_id, packet.timestamp, packet.packet_type, &packet.payload);
        let mut entries = self.entries.lock().expect("gossip sync mutex poisoned");
        if entries.iter().any(|e| e.fingerprint == fingerprint) {
            return;
        }
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Entry { fingerprint, packet });
    }

    /// Builds the compact filter representing everything currently held.
    pub fn build_filter(&self) -> Xor8Filter {
        let entries = self.entries.lock().expect("gossip sync mutex poisoned");
        let keys: Vec<u64> = entries.iter().map(|e| truncate_to_filter_key(&e.fingerprint)).collect();
        Xor8Filter::build(&keys)
    }

    /// Builds the `REQUEST_SYNC` packet to send `peer_id` on a new direct
    /// connection, carrying our own filter so the remote can reply with
    /// whatever we're missing (§4.8's `on_new_peer_direct`). Callers
    /// schedule this after [`INITIAL_EXCHANGE_DELAY`] to let the handshake
    /// finish first.
    pub fn on_new_peer_direct(&self, local_id: PeerId, peer_id: PeerId, timestamp: u64) -> Packet {
        let filter = self.build_filter();
        let tlv = GossipFilterTlv {
            entry_count: self.len() as u32,
            filter_bytes: filter.to_bytes(),
        };
        Packet::new_unicast(message_type::REQUEST_SYNC, 1, timestamp, local_id, peer_id, Bytes::from(tlv.encode()))
    }

    /// Answers a `REQUEST_SYNC`: every locally-held packet the remote
    /// filter does not claim to contain (§4.8). The caller is responsible
    /// for pacing emission (mirrors `StoreForward::send_cached`).
    #[instrument(skip(self, remote_filter))]
    pub fn handle_request_sync(&self, remote_filter: &Xor8Filter) -> Vec<Packet> {
        let entries = self.entries.lock().expect("gossip sync mutex poisoned");
        let missing: Vec<Packet> = entries
            .iter()
            .filter(|e| !remote_filter.contains(truncate_to_filter_key(&e.fingerprint)))
            .map(|e| e.packet.clone())
            .collect();
        debug!(missing = missing.len(), "answering gossip sync request");
        missing
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("gossip sync mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
