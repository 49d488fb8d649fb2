use thiserror::Error;

/// Failure modes for [`crate::wire::decode`] and the TLV readers built on top
/// of it. Decoding never panics; every short or malformed input maps to one
/// of these.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("input truncated before a complete packet could be read")]
    TruncatedInput,
    #[error("length prefix exceeds the maximum allowed size")]
    LengthOverflow,
    #[error("unknown wire version {0}")]
    UnknownVersion(u8),
    #[error("ttl {0} exceeds the configured maximum")]
    TtlOverflow(u8),
}

pub type Result<T> = std::result::Result<T, CodecError>;
