//! The mesh engine: peer bookkeeping, fragmentation, per-peer Noise
//! sessions, store-and-forward, gossip reconciliation, relay, and the
//! per-type message dispatch that ties them together behind `MeshCore`.
//! Wire framing lives in `bitchat-codec`; the cryptographic primitives
//! live in `bitchat-crypto`. This crate owns no transport of its own —
//! hosts implement [`transport::Transport`] for whatever radio they have.

pub mod config;
pub mod delegate;
pub mod dispatcher;
pub mod error;
pub mod fragment;
pub mod gossip;
pub mod message_handler;
pub mod mesh;
pub mod noise_sessions;
pub mod peer_registry;
pub mod relay;
pub mod security;
pub mod seen_set;
pub mod store_forward;
pub mod transport;
pub mod types;

pub use config::MeshConfig;
pub use delegate::{BitchatMessage, MeshDelegate};
pub use error::{DropCounters, DropCountersSnapshot};
pub use mesh::{MeshCore, MeshServiceHolder};
pub use transport::{InboundEvent, RoutedPacket, Transport};
pub use types::{peer_id_to_hex, ChannelName, PeerId, PeerInfo};
