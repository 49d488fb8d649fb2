//! Wire-level constants shared by every payload type in this crate.

/// Current (and only) wire version this codec understands.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on `Packet::ttl`. Packets arriving with a higher TTL are
/// rejected at decode time.
pub const MAX_TTL: u8 = 7;

/// 8 bytes of `0xFF`, the explicit broadcast-recipient sentinel (§6.2).
pub const BROADCAST_RECIPIENT: [u8; 8] = [0xFF; 8];

/// Bytes of payload carried by a single fragment.
pub const MAX_FRAGMENT_SIZE: usize = 469;

/// Encoded packet size above which `FragmentManager` splits the packet.
pub const FRAGMENT_THRESHOLD: usize = 512;

/// Largest payload a single (unfragmented) packet may carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Stable message type codes (§6.2). Values are assigned here rather than
/// left as bare literals scattered through the codebase.
pub mod message_type {
    pub const ANNOUNCE: u8 = 0x01;
    pub const LEAVE: u8 = 0x02;
    pub const MESSAGE: u8 = 0x03;
    pub const FRAGMENT_START: u8 = 0x04;
    pub const FRAGMENT_CONTINUE: u8 = 0x05;
    pub const FRAGMENT_END: u8 = 0x06;
    pub const NOISE_HANDSHAKE_INIT: u8 = 0x07;
    pub const NOISE_HANDSHAKE_RESP: u8 = 0x08;
    pub const NOISE_ENCRYPTED: u8 = 0x09;
    pub const NOISE_IDENTITY_ANNOUNCE: u8 = 0x0a;
    pub const DELIVERY_ACK: u8 = 0x0b;
    pub const READ_RECEIPT: u8 = 0x0c;
    pub const FILE_TRANSFER: u8 = 0x0d;
    pub const REQUEST_SYNC: u8 = 0x0e;

    /// `true` for any of the three fragment type codes.
    pub fn is_fragment(ty: u8) -> bool {
        matches!(ty, FRAGMENT_START | FRAGMENT_CONTINUE | FRAGMENT_END)
    }
}

/// Inner discriminant carried by a decrypted `NOISE_ENCRYPTED` payload.
pub mod noise_payload_type {
    pub const PRIVATE_MESSAGE: u8 = 0x01;
    pub const DELIVERED: u8 = 0x02;
    pub const READ_RECEIPT: u8 = 0x03;
    pub const FILE_TRANSFER: u8 = 0x04;
}
