use thiserror::Error;

/// Failures from the Noise-style handshake (§4.2). None of these carry the
/// underlying cryptographic material — only enough to log and count.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake message received out of sequence for the current state")]
    OutOfSequence,
    #[error("remote static key signature did not verify")]
    BadIdentitySignature,
    #[error("handshake did not complete within the stall timeout")]
    TimedOut,
    #[error("handshake payload was malformed")]
    MalformedMessage,
}

/// Failures from an established [`crate::session::NoiseSession`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is not established")]
    NotEstablished,
    #[error("AEAD authentication failed")]
    DecryptionFailed,
    #[error("counter {received} is not greater than the highest accepted counter {highest}")]
    ReplayedCounter { received: u64, highest: u64 },
    #[error("send counter exhausted the 64-bit nonce space")]
    CounterExhausted,
}

pub type HandshakeResult<T> = std::result::Result<T, HandshakeError>;
pub type SessionResult<T> = std::result::Result<T, SessionError>;
