//! Offline-favorite caching and drain (§4.6). One global bounded FIFO cache
//! rather than a per-recipient one — spec.md gives a single global bound
//! (`store_forward_max`), not a per-peer one.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bitchat_codec::constants::message_type;
use bitchat_codec::Packet;
use tracing::instrument;

use crate::types::PeerId;

struct CachedPacket {
    packet: Packet,
    recipient_id: PeerId,
    cached_at: Instant,
}

pub struct StoreForward {
    max_entries: usize,
    ttl: Duration,
    cache: Mutex<VecDeque<CachedPacket>>,
}

impl StoreForward {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            cache: Mutex::new(VecDeque::new()),
        }
    }

    /// Caches `packet` for `recipient_id` unless it's an `ANNOUNCE`/`LEAVE`,
    /// a broadcast, or the recipient isn't a favorite (§4.6). `is_favorite`
    /// is host policy, so the caller (MessageHandler/MeshCore) decides and
    /// passes the verdict in rather than this component calling back into
    /// the delegate itself.
    #[instrument(skip(self, packet))]
    pub fn cache(&self, packet: Packet, is_favorite: bool) {
        if !is_favorite || packet.is_broadcast() {
            return;
        }
        if matches!(packet.packet_type, message_type::ANNOUNCE | message_type::LEAVE) {
            return;
        }
        let Some(recipient_id) = packet.recipient_id else {
            return;
        };

        let mut cache = self.cache.lock().expect("store-forward mutex poisoned");
        if cache.len() >= self.max_entries {
            cache.pop_front();
        }
        cache.push_back(CachedPacket {
            packet,
            recipient_id,
            cached_at: Instant::now(),
        });
    }

    /// Atomically drains every packet addressed to `peer_id`, in ascending
    /// timestamp order (§4.6). The caller is responsible for the 100ms
    /// inter-packet spacing when actually sending these.
    pub fn send_cached(&self, peer_id: &PeerId) -> Vec<Packet> {
        let mut cache = self.cache.lock().expect("store-forward mutex poisoned");
        let (matching, rest): (VecDeque<CachedPacket>, VecDeque<CachedPacket>) =
            cache.drain(..).partition(|c| &c.recipient_id == peer_id);
        *cache = rest;
        drop(cache);

        let mut matching: Vec<CachedPacket> = matching.into_iter().collect();
        matching.sort_by_key(|c| c.packet.timestamp);
        matching.into_iter().map(|c| c.packet).collect()
    }

    /// Periodic cleanup (every 10 minutes per §4.6): drops entries older
    /// than the configured TTL.
    pub fn gc(&self) {
        let mut cache = self.cache.lock().expect("store-forward mutex poisoned");
        cache.retain(|c| c.cached_at.elapsed() <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("store-forward mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
