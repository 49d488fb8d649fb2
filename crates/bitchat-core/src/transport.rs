//! The link-layer seam (§6.1). `bitchat-core` is transport-agnostic: a host
//! wires in one or more [`Transport`] implementations (e.g. a low-energy
//! wireless link, a Wi-Fi bridge) and feeds inbound bytes back through an
//! [`InboundEvent`] channel rather than a callback trait, so a transport
//! never needs to hold a reference back to `MeshCore` (no cyclic ownership,
//! per §9's open question on that).

use bitchat_codec::Packet;
use tokio::sync::mpsc;

use crate::types::PeerId;

/// A packet queued for re-broadcast, carrying the address it was relayed
/// *from* so a transport can skip echoing it straight back to its source.
#[derive(Clone, Debug)]
pub struct RoutedPacket {
    pub packet: Packet,
    pub relay_address: Option<String>,
}

impl RoutedPacket {
    pub fn new(packet: Packet) -> Self {
        Self {
            packet,
            relay_address: None,
        }
    }

    pub fn relayed_from(packet: Packet, relay_address: String) -> Self {
        Self {
            packet,
            relay_address: Some(relay_address),
        }
    }
}

/// What a transport reports back to `MeshCore` through its inbound channel.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    PacketReceived { from_address: String, packet: Packet },
    PeerConnected { address: String },
    PeerDisconnected { address: String },
    RssiUpdate { address: String, rssi: i16 },
}

/// One link-layer carrier. A host may register several (e.g. BLE plus a
/// Wi-Fi bridge); `MeshCore` fans outbound traffic across all of them and
/// merges their `InboundEvent`s into one stream.
pub trait Transport: Send + Sync {
    fn id(&self) -> &str;

    fn broadcast(&self, packet: RoutedPacket);

    fn send_to_peer(&self, peer_id: PeerId, packet: Packet) -> bool;

    fn cancel_transfer(&self, transfer_id: &str) -> bool;

    fn device_address_for(&self, peer_id: &PeerId) -> Option<String>;

    fn address_peer_map(&self) -> std::collections::HashMap<String, PeerId>;
}

pub type InboundSender = mpsc::UnboundedSender<InboundEvent>;
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundEvent>;

pub fn inbound_channel() -> (InboundSender, InboundReceiver) {
    mpsc::unbounded_channel()
}
