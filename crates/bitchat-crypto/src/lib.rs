//! Identity signing, peer fingerprinting, and Noise-style authenticated
//! sessions for the bitchat mesh engine. Wire layout lives in
//! `bitchat-codec`; this crate only produces and consumes raw key and
//! ciphertext bytes.

pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod session;

pub use error::{HandshakeError, HandshakeResult, SessionError, SessionResult};
pub use fingerprint::Fingerprint;
pub use identity::{LocalIdentity, Signature, SigningKey, VerifyingKey};
pub use session::{HandshakeMessage, NoiseSession, HANDSHAKE_STALL_TIMEOUT};
