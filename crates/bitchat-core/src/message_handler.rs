//! Per-type payload dispatch (§4.7). `MessageHandler` is the fan-out point
//! between a validated packet and the rest of the engine: `PeerRegistry`,
//! `NoiseSessions`, `FragmentManager`, `StoreForward`, `GossipSync`, and the
//! host `MeshDelegate`. It takes every collaborator by reference rather than
//! owning them, so `MeshCore` stays the single owner and this stays plain,
//! testable orchestration code.

use std::time::{SystemTime, UNIX_EPOCH};

use bitchat_codec::constants::message_type;
use bitchat_codec::{ChatMessageTlv, IdentityAnnouncement, Packet};
use bitchat_crypto::{Signature, VerifyingKey};
use bytes::Bytes;
use tracing::{instrument, warn};

use crate::delegate::{BitchatMessage, MeshDelegate};
use crate::error::DropCounters;
use crate::fragment::FragmentManager;
use crate::gossip::GossipSync;
use crate::noise_sessions::NoiseSessions;
use crate::peer_registry::PeerRegistry;
use crate::seen_set::truncate_to_filter_key;
use crate::security::{HandshakeOutcome, Security};
use crate::store_forward::StoreForward;
use crate::types::PeerId;

/// Every packet `MessageHandler` may need to emit as a direct result of
/// processing one inbound packet (acks, handshake replies, reassembled
/// follow-ups). Callers (the dispatcher) are responsible for actually
/// sending these through a `Transport`.
#[derive(Default)]
pub struct HandledOutcome {
    pub emit: Vec<Packet>,
    /// Set when the packet should also feed `GossipSync::on_public_packet_seen`
    /// (every broadcast `MESSAGE`/`ANNOUNCE`/fragment per §4.7).
    pub gossip_candidate: Option<Packet>,
    pub key_exchange_completed: Option<PeerId>,
}

pub struct MessageHandler;

impl MessageHandler {
    /// Dispatches one already-[`Security`]-validated, already-reassembled
    /// (if it was a fragment) packet by `packet_type` (§4.7's table).
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(packet_type = packet.packet_type, sender_id = ?packet.sender_id))]
    pub fn handle(
        packet: &Packet,
        local_id: &PeerId,
        registry: &PeerRegistry,
        fragments: &FragmentManager,
        noise: &NoiseSessions,
        security: &Security,
        store_forward: &StoreForward,
        gossip: &GossipSync,
        delegate: &dyn MeshDelegate,
        counters: &DropCounters,
    ) -> HandledOutcome {
        match packet.packet_type {
            message_type::ANNOUNCE | message_type::NOISE_IDENTITY_ANNOUNCE => {
                Self::handle_announce(packet, registry, delegate, counters)
            }
            message_type::MESSAGE => Self::handle_message(packet, registry, delegate),
            message_type::LEAVE => Self::handle_leave(packet, registry, delegate),
            message_type::NOISE_HANDSHAKE_INIT | message_type::NOISE_HANDSHAKE_RESP => {
                Self::handle_handshake(packet, local_id, noise, security)
            }
            message_type::NOISE_ENCRYPTED => Self::handle_encrypted(packet, local_id, noise, delegate, counters),
            ty if message_type::is_fragment(ty) => Self::handle_fragment(
                packet, local_id, fragments, registry, noise, security, store_forward, gossip, delegate, counters,
            ),
            message_type::REQUEST_SYNC => Self::handle_request_sync(packet, gossip),
            message_type::DELIVERY_ACK => Self::handle_delivery_ack(packet, delegate),
            message_type::READ_RECEIPT => Self::handle_read_receipt(packet, delegate),
            _ => {
                counters.record_malformed_input();
                HandledOutcome::default()
            }
        }
    }

    fn handle_announce(
        packet: &Packet,
        registry: &PeerRegistry,
        delegate: &dyn MeshDelegate,
        counters: &DropCounters,
    ) -> HandledOutcome {
        let Ok(announcement) = IdentityAnnouncement::decode(&packet.payload) else {
            counters.record_malformed_input();
            return HandledOutcome::default();
        };

        // Self-certifying: the first announce from a peer is trusted only
        // if the packet's own signature verifies against the public key it
        // just announced (§4.4/§4.7). A later, already-trusted announce was
        // already checked against the registry by `Security::validate`.
        let verified = match (&packet.signature, VerifyingKey::from_bytes(&announcement.signing_public_key)) {
            (Some(sig_bytes), Ok(verifying_key)) => {
                let signature = Signature::from_bytes(sig_bytes);
                verifying_key.verify(&packet.to_binary_for_signing(), &signature).is_ok()
            }
            _ => false,
        };

        if !verified {
            counters.record_invalid_signature();
            warn!(sender_id = ?packet.sender_id, "announce failed self-certification");
            return HandledOutcome::default();
        }

        let is_new = registry.update_peer_info(
            packet.sender_id,
            announcement.nickname,
            announcement.x25519_public_key,
            announcement.signing_public_key,
            true,
        );

        if is_new {
            delegate.on_peer_list_updated(registry.active_peer_ids(std::time::Duration::from_secs(u64::MAX)));
        }

        HandledOutcome {
            gossip_candidate: Some(packet.clone()),
            ..Default::default()
        }
    }

    fn handle_message(packet: &Packet, registry: &PeerRegistry, delegate: &dyn MeshDelegate) -> HandledOutcome {
        let text = match ChatMessageTlv::decode(&packet.payload) {
            Ok(chat) => match &chat.channel {
                Some(channel) => {
                    registry.join_channel(packet.sender_id, channel.clone());
                    match delegate.decrypt_channel_message(chat.text.as_bytes(), channel) {
                        Some(plaintext) => plaintext,
                        None => return HandledOutcome::default(),
                    }
                }
                None => chat.text,
            },
            Err(_) => match std::str::from_utf8(&packet.payload) {
                Ok(text) => text.to_string(),
                Err(_) => return HandledOutcome::default(),
            },
        };

        let nickname = registry
            .get(&packet.sender_id)
            .map(|info| info.nickname)
            .unwrap_or_else(|| crate::types::peer_id_to_hex(&packet.sender_id));

        delegate.on_message_received(BitchatMessage {
            id: truncate_to_filter_key(&crate::seen_set::packet_fingerprint(
                &packet.sender_id,
                packet.timestamp,
                packet.packet_type,
                &packet.payload,
            )),
            sender: packet.sender_id,
            sender_nickname: nickname,
            channel: None,
            text,
            timestamp: packet.timestamp,
            is_private: false,
        });

        HandledOutcome {
            gossip_candidate: Some(packet.clone()),
            ..Default::default()
        }
    }

    fn handle_leave(packet: &Packet, registry: &PeerRegistry, delegate: &dyn MeshDelegate) -> HandledOutcome {
        let channel = std::str::from_utf8(&packet.payload).ok();
        match channel {
            Some(channel) if !channel.is_empty() => {
                registry.leave_channel(&packet.sender_id, channel);
                delegate.on_channel_leave(channel, packet.sender_id);
            }
            _ => {
                registry.remove_peer(packet.sender_id, &NoopPeerRemoved);
                delegate.on_peer_list_updated(registry.active_peer_ids(std::time::Duration::from_secs(u64::MAX)));
            }
        }
        HandledOutcome::default()
    }

    fn handle_handshake(
        packet: &Packet,
        local_id: &PeerId,
        noise: &NoiseSessions,
        security: &Security,
    ) -> HandledOutcome {
        let HandshakeOutcome { reply, newly_established } = security.handle_handshake(packet.sender_id, &packet.payload, noise);

        let emit = reply
            .map(|bytes| {
                Packet::new_unicast(
                    message_type::NOISE_HANDSHAKE_RESP,
                    7,
                    now_millis(),
                    *local_id,
                    packet.sender_id,
                    Bytes::from(bytes),
                )
            })
            .into_iter()
            .collect();

        HandledOutcome {
            emit,
            key_exchange_completed: newly_established.then_some(packet.sender_id),
            ..Default::default()
        }
    }

    fn handle_encrypted(
        packet: &Packet,
        local_id: &PeerId,
        noise: &NoiseSessions,
        delegate: &dyn MeshDelegate,
        counters: &DropCounters,
    ) -> HandledOutcome {
        let Some(plaintext) = noise.decrypt(&packet.sender_id, &packet.payload) else {
            counters.record_crypto_failure();
            return HandledOutcome::default();
        };
        let Ok(inner) = bitchat_codec::payloads::NoisePayload::decode(&plaintext) else {
            counters.record_malformed_input();
            return HandledOutcome::default();
        };

        match inner {
            bitchat_codec::payloads::NoisePayload::PrivateMessage(msg) => {
                delegate.on_message_received(BitchatMessage {
                    id: msg.message_id,
                    sender: packet.sender_id,
                    sender_nickname: crate::types::peer_id_to_hex(&packet.sender_id),
                    channel: None,
                    text: msg.text,
                    timestamp: packet.timestamp,
                    is_private: true,
                });

                let ack_payload = bitchat_codec::payloads::NoisePayload::Delivered {
                    message_id: msg.message_id,
                }
                .encode();
                let emit = noise
                    .encrypt(&packet.sender_id, &ack_payload)
                    .map(|ciphertext| {
                        Packet::new_unicast(
                            message_type::NOISE_ENCRYPTED,
                            7,
                            now_millis(),
                            *local_id,
                            packet.sender_id,
                            Bytes::from(ciphertext),
                        )
                    })
                    .into_iter()
                    .collect();
                HandledOutcome { emit, ..Default::default() }
            }
            bitchat_codec::payloads::NoisePayload::Delivered { message_id } => {
                delegate.on_delivery_ack(message_id, packet.sender_id);
                HandledOutcome::default()
            }
            bitchat_codec::payloads::NoisePayload::ReadReceipt { message_id } => {
                delegate.on_read_receipt(message_id, packet.sender_id);
                HandledOutcome::default()
            }
            bitchat_codec::payloads::NoisePayload::FileTransfer(file) => {
                delegate.on_message_received(BitchatMessage {
                    id: truncate_to_filter_key(&crate::seen_set::packet_fingerprint(
                        &packet.sender_id,
                        packet.timestamp,
                        packet.packet_type,
                        &packet.payload,
                    )),
                    sender: packet.sender_id,
                    sender_nickname: crate::types::peer_id_to_hex(&packet.sender_id),
                    channel: None,
                    text: format!("[file: {}, {} bytes]", file.file_name, file.data.len()),
                    timestamp: packet.timestamp,
                    is_private: true,
                });
                HandledOutcome::default()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_fragment(
        packet: &Packet,
        local_id: &PeerId,
        fragments: &FragmentManager,
        registry: &PeerRegistry,
        noise: &NoiseSessions,
        security: &Security,
        store_forward: &StoreForward,
        gossip: &GossipSync,
        delegate: &dyn MeshDelegate,
        counters: &DropCounters,
    ) -> HandledOutcome {
        let Ok(frame) = bitchat_codec::fragment::FragmentFrame::decode(&packet.payload) else {
            counters.record_malformed_input();
            return HandledOutcome::default();
        };

        let Some((original_type, reassembled)) = fragments.handle_fragment(frame) else {
            return HandledOutcome {
                gossip_candidate: Some(packet.clone()),
                ..Default::default()
            };
        };

        let Ok(inner_packet) = bitchat_codec::wire::decode(&reassembled) else {
            counters.record_malformed_input();
            return HandledOutcome::default();
        };
        let _ = original_type;

        let mut outcome = Self::handle(
            &inner_packet,
            local_id,
            registry,
            fragments,
            noise,
            security,
            store_forward,
            gossip,
            delegate,
            counters,
        );
        if outcome.gossip_candidate.is_none() {
            outcome.gossip_candidate = Some(packet.clone());
        }
        outcome
    }

    fn handle_request_sync(packet: &Packet, gossip: &GossipSync) -> HandledOutcome {
        let Ok(filter_tlv) = bitchat_codec::payloads::GossipFilterTlv::decode(&packet.payload) else {
            return HandledOutcome::default();
        };
        let Some(remote_filter) = crate::gossip::Xor8Filter::from_bytes(&filter_tlv.filter_bytes) else {
            return HandledOutcome::default();
        };
        HandledOutcome {
            emit: gossip.handle_request_sync(&remote_filter),
            ..Default::default()
        }
    }

    fn handle_delivery_ack(packet: &Packet, delegate: &dyn MeshDelegate) -> HandledOutcome {
        if let Some(message_id) = packet.payload.get(0..8).and_then(|b| b.try_into().ok()).map(u64::from_be_bytes) {
            delegate.on_delivery_ack(message_id, packet.sender_id);
        }
        HandledOutcome::default()
    }

    fn handle_read_receipt(packet: &Packet, delegate: &dyn MeshDelegate) -> HandledOutcome {
        if let Some(message_id) = packet.payload.get(0..8).and_then(|b| b.try_into().ok()).map(u64::from_be_bytes) {
            delegate.on_read_receipt(message_id, packet.sender_id);
        }
        HandledOutcome::default()
    }
}

struct NoopPeerRemoved;
impl crate::peer_registry::PeerRemovedDelegate for NoopPeerRemoved {
    fn on_peer_removed(&self, _peer_id: PeerId) {}
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
