//! Payload bodies carried inside a [`crate::wire::Packet`], keyed by
//! `packet_type` (plaintext announce/leave payloads) or by
//! `noise_payload_type` (payloads carried inside a decrypted
//! `NOISE_ENCRYPTED` packet).

use crate::constants::noise_payload_type;
use crate::error::{CodecError, Result};
use crate::reader::{Reader, Writer};
use crate::tlv::{for_each_field, read_u64_field, TlvWriter};

const TAG_NICKNAME: u8 = 0x01;
const TAG_SIGNING_KEY: u8 = 0x02;
const TAG_X25519_KEY: u8 = 0x03;

/// Plaintext `ANNOUNCE` / `NOISE_IDENTITY_ANNOUNCE` body: binds a peer's
/// long-term identity keys to a human-readable nickname (§6.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityAnnouncement {
    pub nickname: String,
    pub signing_public_key: [u8; 32],
    pub x25519_public_key: [u8; 32],
}

impl IdentityAnnouncement {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        w.field(TAG_NICKNAME, self.nickname.as_bytes());
        w.field(TAG_SIGNING_KEY, &self.signing_public_key);
        w.field(TAG_X25519_KEY, &self.x25519_public_key);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut nickname = None;
        let mut signing_public_key = None;
        let mut x25519_public_key = None;

        for_each_field(bytes, |tag, value| {
            match tag {
                TAG_NICKNAME => {
                    nickname = Some(
                        String::from_utf8(value.to_vec()).map_err(|_| CodecError::TruncatedInput)?,
                    );
                }
                TAG_SIGNING_KEY => {
                    signing_public_key =
                        Some(<[u8; 32]>::try_from(value).map_err(|_| CodecError::TruncatedInput)?);
                }
                TAG_X25519_KEY => {
                    x25519_public_key =
                        Some(<[u8; 32]>::try_from(value).map_err(|_| CodecError::TruncatedInput)?);
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(Self {
            nickname: nickname.ok_or(CodecError::TruncatedInput)?,
            signing_public_key: signing_public_key.ok_or(CodecError::TruncatedInput)?,
            x25519_public_key: x25519_public_key.ok_or(CodecError::TruncatedInput)?,
        })
    }
}

/// A decrypted `NOISE_ENCRYPTED` body: a one-byte discriminant followed by
/// the type-specific bytes, all of which fits inside the AEAD plaintext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoisePayload {
    PrivateMessage(PrivateMessageTlv),
    Delivered { message_id: u64 },
    ReadReceipt { message_id: u64 },
    FileTransfer(FileTransferTlv),
}

impl NoisePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            NoisePayload::PrivateMessage(msg) => {
                w.write_u8(noise_payload_type::PRIVATE_MESSAGE);
                w.write_bytes(&msg.encode());
            }
            NoisePayload::Delivered { message_id } => {
                w.write_u8(noise_payload_type::DELIVERED);
                w.write_u64(*message_id);
            }
            NoisePayload::ReadReceipt { message_id } => {
                w.write_u8(noise_payload_type::READ_RECEIPT);
                w.write_u64(*message_id);
            }
            NoisePayload::FileTransfer(file) => {
                w.write_u8(noise_payload_type::FILE_TRANSFER);
                w.write_bytes(&file.encode());
            }
        }
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let discriminant = r.read_u8().ok_or(CodecError::TruncatedInput)?;
        let rest = r.read_fixed(r.remaining()).ok_or(CodecError::TruncatedInput)?;
        match discriminant {
            noise_payload_type::PRIVATE_MESSAGE => {
                Ok(NoisePayload::PrivateMessage(PrivateMessageTlv::decode(rest)?))
            }
            noise_payload_type::DELIVERED => {
                let mut r = Reader::new(rest);
                let message_id = r.read_u64().ok_or(CodecError::TruncatedInput)?;
                Ok(NoisePayload::Delivered { message_id })
            }
            noise_payload_type::READ_RECEIPT => {
                let mut r = Reader::new(rest);
                let message_id = r.read_u64().ok_or(CodecError::TruncatedInput)?;
                Ok(NoisePayload::ReadReceipt { message_id })
            }
            noise_payload_type::FILE_TRANSFER => Ok(NoisePayload::FileTransfer(FileTransferTlv::decode(rest)?)),
            other => Err(CodecError::UnknownVersion(other)),
        }
    }
}

/// A private 1:1 text message, carried inside a [`NoisePayload`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateMessageTlv {
    pub message_id: u64,
    pub text: String,
}

impl PrivateMessageTlv {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u64(self.message_id);
        w.write_length_prefixed_u16(self.text.as_bytes());
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let message_id = r.read_u64().ok_or(CodecError::TruncatedInput)?;
        let text_bytes = r
            .read_length_prefixed_u16(u16::MAX as usize)
            .ok_or(CodecError::TruncatedInput)?;
        let text = String::from_utf8(text_bytes.to_vec()).map_err(|_| CodecError::TruncatedInput)?;
        Ok(Self { message_id, text })
    }
}

/// Minimal file-transfer framing: metadata plus a single opaque blob.
/// Resumable transfer, chunked negotiation, and media codecs are out of
/// scope; this exists so a whole small file can ride inside one mesh
/// message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTransferTlv {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl FileTransferTlv {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_length_prefixed_u8(self.file_name.as_bytes());
        w.write_length_prefixed_u8(self.mime_type.as_bytes());
        w.write_u32(self.data.len() as u32);
        w.write_bytes(&self.data);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let file_name = r
            .read_length_prefixed_u8(u8::MAX as usize)
            .ok_or(CodecError::TruncatedInput)?;
        let mime_type = r
            .read_length_prefixed_u8(u8::MAX as usize)
            .ok_or(CodecError::TruncatedInput)?;
        let data_len = r.read_u32().ok_or(CodecError::TruncatedInput)? as usize;
        let data = r.read_fixed(data_len).ok_or(CodecError::TruncatedInput)?;
        Ok(Self {
            file_name: String::from_utf8(file_name.to_vec()).map_err(|_| CodecError::TruncatedInput)?,
            mime_type: String::from_utf8(mime_type.to_vec()).map_err(|_| CodecError::TruncatedInput)?,
            data: data.to_vec(),
        })
    }
}

const TAG_CHAT_CHANNEL: u8 = 0x01;
const TAG_CHAT_TEXT: u8 = 0x02;

/// Plaintext `MESSAGE` body: a broadcast chat message, optionally tagged
/// with the channel it belongs to. Channel traffic is opaque ciphertext
/// from the engine's point of view — `text` is whatever the delegate
/// already decrypted it to, or the plaintext itself for public broadcasts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessageTlv {
    pub channel: Option<String>,
    pub text: String,
}

impl ChatMessageTlv {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = TlvWriter::new();
        if let Some(channel) = &self.channel {
            w.field(TAG_CHAT_CHANNEL, channel.as_bytes());
        }
        w.field(TAG_CHAT_TEXT, self.text.as_bytes());
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut channel = None;
        let mut text = None;

        for_each_field(bytes, |tag, value| {
            match tag {
                TAG_CHAT_CHANNEL => {
                    channel = Some(String::from_utf8(value.to_vec()).map_err(|_| CodecError::TruncatedInput)?);
                }
                TAG_CHAT_TEXT => {
                    text = Some(String::from_utf8(value.to_vec()).map_err(|_| CodecError::TruncatedInput)?);
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(Self {
            channel,
            text: text.ok_or(CodecError::TruncatedInput)?,
        })
    }
}

/// A compact set-reconciliation filter sent in a `REQUEST_SYNC` packet
/// (§6.6). The filter bytes themselves are opaque to the codec — they are
/// produced and consumed by `bitchat-core`'s gossip filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipFilterTlv {
    pub entry_count: u32,
    pub filter_bytes: Vec<u8>,
}

impl GossipFilterTlv {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(self.entry_count);
        w.write_length_prefixed_u16(&self.filter_bytes);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let entry_count = r.read_u32().ok_or(CodecError::TruncatedInput)?;
        let filter_bytes = r
            .read_length_prefixed_u16(u16::MAX as usize)
            .ok_or(CodecError::TruncatedInput)?;
        Ok(Self {
            entry_count,
            filter_bytes: filter_bytes.to_vec(),
        })
    }
}
