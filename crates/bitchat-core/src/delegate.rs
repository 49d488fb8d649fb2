//! The host-facing callback surface (§6.3). `MeshCore` never blocks on
//! these — they're expected to hand off to UI/storage and return quickly.

use crate::types::{ChannelName, PeerId};

/// A message ready for display, already decrypted/verified by the engine.
#[derive(Clone, Debug)]
pub struct BitchatMessage {
    pub id: u64,
    pub sender: PeerId,
    pub sender_nickname: String,
    pub channel: Option<ChannelName>,
    pub text: String,
    pub timestamp: u64,
    pub is_private: bool,
}

pub trait MeshDelegate: Send + Sync {
    fn on_message_received(&self, message: BitchatMessage);

    fn on_peer_list_updated(&self, peers: Vec<PeerId>);

    fn on_channel_leave(&self, channel: &str, from: PeerId);

    fn on_delivery_ack(&self, message_id: u64, from: PeerId);

    fn on_read_receipt(&self, message_id: u64, from: PeerId);

    /// `None` when the host holds no key for `channel` (message is dropped).
    fn decrypt_channel_message(&self, ciphertext: &[u8], channel: &str) -> Option<String>;

    fn get_nickname(&self) -> Option<String>;

    fn is_favorite(&self, peer_id: &PeerId) -> bool;
}
