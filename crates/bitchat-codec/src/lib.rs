//! Wire framing and TLV payload encoding for the bitchat mesh protocol.
//!
//! This crate owns byte layout only: packet framing ([`wire`]), fragment
//! framing ([`fragment`]), and the TLV payload bodies ([`payloads`]) that
//! ride inside packets. It knows nothing about peers, transports, or
//! cryptography — those live in `bitchat-crypto` and `bitchat-core`.

pub mod constants;
pub mod error;
pub mod fragment;
pub mod payloads;
pub mod reader;
pub mod tlv;
pub mod wire;

pub use error::{CodecError, Result};
pub use payloads::{ChatMessageTlv, IdentityAnnouncement};
pub use wire::{Packet, SIGNATURE_LEN};
