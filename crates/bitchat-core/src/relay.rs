//! TTL-based adaptive relay with loop avoidance (§4.9).

use bitchat_codec::Packet;
use rand::Rng;

use crate::types::PeerId;

/// Decides whether a packet seen as `sender_id`/`recipient_id`/`ttl` should
/// be relayed, given how many peers are currently active. Pure — callers
/// own the RNG draw and the actual re-broadcast.
pub fn should_relay(packet: &Packet, local_id: &PeerId, active_peer_count: usize) -> bool {
    if packet.ttl == 0 {
        return false;
    }
    if &packet.sender_id == local_id {
        return false;
    }
    if let Some(recipient) = packet.recipient_id {
        if &recipient == local_id {
            return false;
        }
    }

    if packet.ttl >= 4 {
        return true;
    }
    if active_peer_count <= 3 {
        return true;
    }

    rand::thread_rng().gen_bool(RELAY_PROBABILITY)
}

/// Baseline adaptive-relay probability below the always-relay thresholds.
/// spec.md §9 leaves the formula open and names `0.5` as the fixed
/// baseline; deployments are free to schedule it against estimated peer
/// density instead.
pub const RELAY_PROBABILITY: f64 = 0.5;

/// Produces the packet to re-broadcast: a copy with `ttl - 1`. Callers must
/// have already confirmed [`should_relay`].
pub fn prepare_relay(packet: &Packet) -> Packet {
    packet.with_decremented_ttl()
}
