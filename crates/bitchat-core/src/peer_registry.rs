//! Active peer bookkeeping (§4.2). Backed by `dashmap` so that the "short
//! critical sections" requirement in §5 is structural: every operation
//! below takes and releases one shard lock, never holds it across an
//! await or a call into another component.

use std::time::Instant;

use bitchat_crypto::Fingerprint;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::types::{ChannelName, PeerId, PeerInfo};

pub trait PeerRemovedDelegate: Send + Sync {
    fn on_peer_removed(&self, peer_id: PeerId);
}

pub struct PeerRegistry {
    peers: DashMap<PeerId, PeerInfo>,
    peer_to_fingerprint: DashMap<PeerId, Fingerprint>,
    fingerprint_to_peer: DashMap<Fingerprint, PeerId>,
    channel_memberships: DashMap<PeerId, std::collections::HashSet<ChannelName>>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            peer_to_fingerprint: DashMap::new(),
            fingerprint_to_peer: DashMap::new(),
            channel_memberships: DashMap::new(),
        }
    }

    /// Replaces `peer_id`'s entry, preserving `direct` from any prior
    /// record. Returns `true` only when this is the first verified entry
    /// for the peer (§4.2).
    #[instrument(skip(self))]
    pub fn update_peer_info(
        &self,
        peer_id: PeerId,
        nickname: String,
        noise_pub: [u8; 32],
        signing_pub: [u8; 32],
        verified: bool,
    ) -> bool {
        let direct = self.peers.get(&peer_id).map(|p| p.direct).unwrap_or(false);
        let was_verified = self.peers.get(&peer_id).map(|p| p.verified).unwrap_or(false);

        self.peers.insert(
            peer_id,
            PeerInfo {
                id: peer_id,
                nickname,
                connected: true,
                direct,
                noise_pub,
                signing_pub,
                verified,
                last_seen: Instant::now(),
                rssi: self.peers.get(&peer_id).and_then(|p| p.rssi),
            },
        );

        if verified {
            self.store_fingerprint(peer_id, &signing_pub);
        }

        verified && !was_verified
    }

    pub fn update_last_seen(&self, peer_id: PeerId) {
        if let Some(mut info) = self.peers.get_mut(&peer_id) {
            info.last_seen = Instant::now();
        }
    }

    pub fn update_rssi(&self, peer_id: PeerId, rssi: i16) {
        if let Some(mut info) = self.peers.get_mut(&peer_id) {
            info.rssi = Some(rssi);
        }
    }

    pub fn set_direct(&self, peer_id: PeerId, direct: bool) {
        if let Some(mut info) = self.peers.get_mut(&peer_id) {
            info.direct = direct;
        }
    }

    /// Only stored once the caller has verified the handshake/announce.
    /// A new binding supersedes and removes whatever peer_id previously
    /// claimed this fingerprint, keeping the bijection in §4.2's invariant.
    pub fn store_fingerprint(&self, peer_id: PeerId, public_key: &[u8; 32]) -> Fingerprint {
        let fingerprint = Fingerprint::of_signing_key(public_key);

        if let Some(old_peer) = self.fingerprint_to_peer.get(&fingerprint).map(|v| *v) {
            if old_peer != peer_id {
                self.peer_to_fingerprint.remove(&old_peer);
            }
        }

        self.peer_to_fingerprint.insert(peer_id, fingerprint);
        self.fingerprint_to_peer.insert(fingerprint, peer_id);
        fingerprint
    }

    pub fn fingerprint_of(&self, peer_id: &PeerId) -> Option<Fingerprint> {
        self.peer_to_fingerprint.get(peer_id).map(|v| *v)
    }

    pub fn peer_for_fingerprint(&self, fingerprint: &Fingerprint) -> Option<PeerId> {
        self.fingerprint_to_peer.get(fingerprint).map(|v| *v)
    }

    #[instrument(skip(self, delegate))]
    pub fn remove_peer(&self, peer_id: PeerId, delegate: &dyn PeerRemovedDelegate) {
        self.peers.remove(&peer_id);
        if let Some((_, fingerprint)) = self.peer_to_fingerprint.remove(&peer_id) {
            self.fingerprint_to_peer.remove(&fingerprint);
        }
        self.channel_memberships.remove(&peer_id);
        debug!(?peer_id, "peer removed");
        delegate.on_peer_removed(peer_id);
    }

    /// Peers with `last_seen` within `stale_peer`, sorted ascending by
    /// peer id for deterministic gossip (§4.2).
    pub fn active_peer_ids(&self, stale_peer: std::time::Duration) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|entry| entry.last_seen.elapsed() <= stale_peer)
            .map(|entry| entry.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Runs the periodic GC pass (every 60s per §4.2): removes peers whose
    /// `last_seen` exceeds `stale_peer`.
    pub fn gc_stale_peers(&self, stale_peer: std::time::Duration, delegate: &dyn PeerRemovedDelegate) {
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|entry| entry.last_seen.elapsed() > stale_peer)
            .map(|entry| entry.id)
            .collect();
        for peer_id in stale {
            self.remove_peer(peer_id, delegate);
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<PeerInfo> {
        self.peers.get(peer_id).map(|entry| entry.clone())
    }

    pub fn join_channel(&self, peer_id: PeerId, channel: ChannelName) {
        self.channel_memberships.entry(peer_id).or_default().insert(channel);
    }

    pub fn leave_channel(&self, peer_id: &PeerId, channel: &str) {
        if let Some(mut memberships) = self.channel_memberships.get_mut(peer_id) {
            memberships.remove(channel);
        }
    }

    pub fn is_in_channel(&self, peer_id: &PeerId, channel: &str) -> bool {
        self.channel_memberships
            .get(peer_id)
            .map(|m| m.contains(channel))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDelegate(AtomicUsize);

    impl PeerRemovedDelegate for CountingDelegate {
        fn on_peer_removed(&self, _peer_id: PeerId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn first_verified_announce_returns_true() {
        let registry = PeerRegistry::new();
        let is_new = registry.update_peer_info([1; 8], "alice".into(), [2; 32], [3; 32], true);
        assert!(is_new);
        let is_new_again = registry.update_peer_info([1; 8], "alice".into(), [2; 32], [3; 32], true);
        assert!(!is_new_again);
    }

    #[test]
    fn update_preserves_direct_flag() {
        let registry = PeerRegistry::new();
        registry.update_peer_info([1; 8], "alice".into(), [2; 32], [3; 32], true);
        registry.set_direct([1; 8], true);
        registry.update_peer_info([1; 8], "alice2".into(), [2; 32], [3; 32], true);
        assert!(registry.get(&[1; 8]).unwrap().direct);
    }

    #[test]
    fn new_fingerprint_binding_supersedes_old_peer_id() {
        let registry = PeerRegistry::new();
        let key = [9u8; 32];
        registry.store_fingerprint([1; 8], &key);
        let fingerprint = registry.store_fingerprint([2; 8], &key);
        assert_eq!(registry.peer_for_fingerprint(&fingerprint), Some([2; 8]));
        assert_eq!(registry.fingerprint_of(&[1; 8]), None);
    }

    #[test]
    fn active_peer_ids_sorted_and_excludes_stale() {
        let registry = PeerRegistry::new();
        registry.update_peer_info([2; 8], "b".into(), [0; 32], [0; 32], true);
        registry.update_peer_info([1; 8], "a".into(), [0; 32], [0; 32], true);
        let active = registry.active_peer_ids(std::time::Duration::from_secs(180));
        assert_eq!(active, vec![[1; 8], [2; 8]]);
    }

    #[test]
    fn remove_peer_invokes_delegate_and_clears_fingerprint() {
        let registry = PeerRegistry::new();
        registry.update_peer_info([1; 8], "alice".into(), [2; 32], [3; 32], true);
        let delegate = CountingDelegate(AtomicUsize::new(0));
        registry.remove_peer([1; 8], &delegate);
        assert_eq!(delegate.0.load(Ordering::SeqCst), 1);
        assert!(registry.get(&[1; 8]).is_none());
        assert_eq!(registry.fingerprint_of(&[1; 8]), None);
    }

    #[test]
    fn channel_membership_lifecycle() {
        let registry = PeerRegistry::new();
        registry.join_channel([1; 8], "#general".into());
        assert!(registry.is_in_channel(&[1; 8], "#general"));
        registry.leave_channel(&[1; 8], "#general");
        assert!(!registry.is_in_channel(&[1; 8], "#general"));
    }
}
