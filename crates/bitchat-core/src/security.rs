//! Admission, dedup, time-window, and signature checks, plus noise
//! handshake relay orchestration (§4.4). Signature verification and
//! fingerprinting themselves live in `bitchat-crypto`; this module only
//! orchestrates the call and tracks drop reasons.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitchat_codec::constants::message_type;
use bitchat_codec::Packet;
use bitchat_crypto::{Signature, VerifyingKey};
use tracing::{instrument, warn};

use crate::error::DropCounters;
use crate::noise_sessions::NoiseSessions;
use crate::peer_registry::PeerRegistry;
use crate::seen_set::{packet_fingerprint, SeenSet};
use crate::types::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Admission,
    Duplicate,
    StaleTimestamp,
    InvalidSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop(DropReason),
}

pub struct Security {
    seen_set: SeenSet,
    max_clock_skew: Duration,
}

impl Security {
    pub fn new(seen_capacity: usize, max_clock_skew: Duration) -> Self {
        Self {
            seen_set: SeenSet::new(seen_capacity),
            max_clock_skew,
        }
    }

    /// Duties 1–4 of §4.4. Duty 5 (noise handshake relay) is
    /// [`Security::handle_handshake`], run separately by the dispatcher
    /// once a `NOISE_HANDSHAKE_*` packet is admitted.
    #[instrument(skip(self, packet, registry, counters), fields(sender_id = ?packet.sender_id, packet_type = packet.packet_type))]
    pub fn validate(
        &self,
        packet: &Packet,
        local_id: &PeerId,
        registry: &PeerRegistry,
        counters: &DropCounters,
    ) -> Verdict {
        if &packet.sender_id == local_id || packet.payload.is_empty() {
            counters.record_malformed_input();
            return Verdict::Drop(DropReason::Admission);
        }

        let fingerprint =
            packet_fingerprint(&packet.sender_id, packet.timestamp, packet.packet_type, &packet.payload);
        if !self.seen_set.insert_if_new(fingerprint) {
            counters.record_replay_duplicate();
            return Verdict::Drop(DropReason::Duplicate);
        }

        let now_ms = now_millis();
        let skew = now_ms.abs_diff(packet.timestamp);
        if skew > self.max_clock_skew.as_millis() as u64 {
            counters.record_protocol_timeout();
            return Verdict::Drop(DropReason::StaleTimestamp);
        }

        let known_peer = registry.get(&packet.sender_id);
        match (&packet.signature, &known_peer) {
            (Some(sig_bytes), Some(peer)) if peer.verified => {
                let Ok(verifying_key) = VerifyingKey::from_bytes(&peer.signing_pub) else {
                    counters.record_invalid_signature();
                    return Verdict::Drop(DropReason::InvalidSignature);
                };
                let signature = Signature::from_bytes(sig_bytes);
                let signable = packet.to_binary_for_signing();
                if verifying_key.verify(&signable, &signature).is_err() {
                    counters.record_invalid_signature();
                    warn!(sender_id = ?packet.sender_id, "signature verification failed");
                    return Verdict::Drop(DropReason::InvalidSignature);
                }
            }
            (_, None) => {
                let allowed_unknown = matches!(
                    packet.packet_type,
                    message_type::ANNOUNCE
                        | message_type::NOISE_HANDSHAKE_INIT
                        | message_type::NOISE_HANDSHAKE_RESP
                        | message_type::NOISE_IDENTITY_ANNOUNCE
                );
                if !allowed_unknown {
                    counters.record_invalid_signature();
                    return Verdict::Drop(DropReason::InvalidSignature);
                }
            }
            _ => {}
        }

        Verdict::Accept
    }

    /// Duty 5: relays the payload into `NoiseSessions` and reports whether
    /// a reply should be sent and whether the session just became
    /// established (so the caller can fire `on_key_exchange_completed`).
    #[instrument(skip(self, payload, noise))]
    pub fn handle_handshake(&self, peer_id: PeerId, payload: &[u8], noise: &NoiseSessions) -> HandshakeOutcome {
        let was_established = noise.has_established(&peer_id);
        let reply = noise.process(peer_id, payload);
        let newly_established = !was_established && noise.has_established(&peer_id);
        HandshakeOutcome {
            reply,
            newly_established,
        }
    }

    pub fn seen_len(&self) -> usize {
        self.seen_set.len()
    }
}

pub struct HandshakeOutcome {
    pub reply: Option<Vec<u8>>,
    pub newly_established: bool,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
