//! A Noise-style authenticated session between this node and one peer
//! (§4.2). The handshake is a single round trip: each side sends an
//! ephemeral X25519 public key bound to its long-term Ed25519 identity by a
//! signature, then both derive a pair of directional ChaCha20-Poly1305 keys
//! from the ephemeral ECDH shared secret.
//!
//! Grounded on the ephemeral-key-exchange-then-counter-nonce-AEAD shape used
//! by WireGuard/boringtun's noise handshake, simplified to one round trip
//! since bitchat sessions are per-peer-pair rather than per-connection.

use std::time::{Duration, Instant};

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand_core::{CryptoRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroize;

use crate::error::{HandshakeError, HandshakeResult, SessionError, SessionResult};
use crate::identity::{LocalIdentity, Signature, VerifyingKey};

/// A handshake that hasn't completed within this long is abandoned (§4.2).
pub const HANDSHAKE_STALL_TIMEOUT: Duration = Duration::from_secs(10);

const HKDF_INFO: &[u8] = b"bitchat noise v1 directional keys";

/// The wire-facing handshake message: an ephemeral public key bound to the
/// sender's long-term identity. Fixed-length (128 bytes), so it carries its
/// own `to_bytes`/`from_bytes` rather than pulling in `bitchat-codec` for a
/// single flat struct.
#[derive(Clone, Debug)]
pub struct HandshakeMessage {
    pub ephemeral_public: [u8; 32],
    pub identity_public: [u8; 32],
    pub signature: [u8; 64],
}

pub const HANDSHAKE_MESSAGE_LEN: usize = 32 + 32 + 64;

impl HandshakeMessage {
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_MESSAGE_LEN] {
        let mut out = [0u8; HANDSHAKE_MESSAGE_LEN];
        out[0..32].copy_from_slice(&self.ephemeral_public);
        out[32..64].copy_from_slice(&self.identity_public);
        out[64..128].copy_from_slice(&self.signature);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HANDSHAKE_MESSAGE_LEN {
            return None;
        }
        let mut ephemeral_public = [0u8; 32];
        let mut identity_public = [0u8; 32];
        let mut signature = [0u8; 64];
        ephemeral_public.copy_from_slice(&bytes[0..32]);
        identity_public.copy_from_slice(&bytes[32..64]);
        signature.copy_from_slice(&bytes[64..128]);
        Some(Self {
            ephemeral_public,
            identity_public,
            signature,
        })
    }
}

enum State {
    Uninitialized,
    Initiated {
        ephemeral_secret: EphemeralSecret,
        ephemeral_public: X25519PublicKey,
        started_at: Instant,
    },
    Established {
        send_key: ChaCha20Poly1305,
        recv_key: ChaCha20Poly1305,
        send_counter: u64,
        highest_received_counter: Option<u64>,
    },
    Failed,
}

/// Per-peer session state machine: `Uninitialized -> Initiated ->
/// Established`, or `Failed` from any state once the handshake can no
/// longer be trusted.
pub struct NoiseSession {
    state: State,
}

impl Default for NoiseSession {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseSession {
    pub fn new() -> Self {
        Self {
            state: State::Uninitialized,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, State::Established { .. })
    }

    fn signing_message(ephemeral_public: &[u8; 32]) -> Vec<u8> {
        let mut msg = Vec::with_capacity(32 + 6);
        msg.extend_from_slice(b"bcnse1");
        msg.extend_from_slice(ephemeral_public);
        msg
    }

    /// Starts a handshake as the initiator, generating a fresh ephemeral
    /// keypair and the message to send over the wire.
    pub fn initiate<R: CryptoRng + RngCore>(
        &mut self,
        rng: &mut R,
        identity: &LocalIdentity,
    ) -> HandshakeMessage {
        let ephemeral_secret = EphemeralSecret::random_from_rng(rng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
        let signature = identity.sign(&Self::signing_message(ephemeral_public.as_bytes()));

        self.state = State::Initiated {
            ephemeral_secret,
            ephemeral_public,
            started_at: Instant::now(),
        };

        HandshakeMessage {
            ephemeral_public: *ephemeral_public.as_bytes(),
            identity_public: identity.verifying_key().to_bytes(),
            signature: signature.to_bytes(),
        }
    }

    /// Handles the initiator's message as the responder: verifies the
    /// signature, derives the session keys, and returns the response to
    /// send back. Transitions straight to `Established`.
    pub fn respond<R: CryptoRng + RngCore>(
        &mut self,
        rng: &mut R,
        identity: &LocalIdentity,
        remote: &HandshakeMessage,
    ) -> HandshakeResult<HandshakeMessage> {
        let remote_identity = VerifyingKey::from_bytes(&remote.identity_public)
            .map_err(|_| HandshakeError::MalformedMessage)?;
        let remote_signature = Signature::from_bytes(&remote.signature);
        remote_identity
            .verify(&Self::signing_message(&remote.ephemeral_public), &remote_signature)
            .map_err(|_| HandshakeError::BadIdentitySignature)?;

        let ephemeral_secret = EphemeralSecret::random_from_rng(rng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);
        let signature = identity.sign(&Self::signing_message(ephemeral_public.as_bytes()));

        let remote_ephemeral = X25519PublicKey::from(remote.ephemeral_public);
        let shared_secret = ephemeral_secret.diffie_hellman(&remote_ephemeral);
        self.establish(shared_secret.as_bytes(), Role::Responder);

        Ok(HandshakeMessage {
            ephemeral_public: *ephemeral_public.as_bytes(),
            identity_public: identity.verifying_key().to_bytes(),
            signature: signature.to_bytes(),
        })
    }

    /// Handles the responder's message as the initiator, completing the
    /// handshake and transitioning to `Established`.
    pub fn complete(&mut self, identity: &LocalIdentity, remote: &HandshakeMessage) -> HandshakeResult<()> {
        let (ephemeral_secret, started_at) = match std::mem::replace(&mut self.state, State::Failed) {
            State::Initiated {
                ephemeral_secret,
                started_at,
                ..
            } => (ephemeral_secret, started_at),
            _ => return Err(HandshakeError::OutOfSequence),
        };
        if started_at.elapsed() > HANDSHAKE_STALL_TIMEOUT {
            return Err(HandshakeError::TimedOut);
        }

        let remote_identity = VerifyingKey::from_bytes(&remote.identity_public)
            .map_err(|_| HandshakeError::MalformedMessage)?;
        let remote_signature = Signature::from_bytes(&remote.signature);
        remote_identity
            .verify(&Self::signing_message(&remote.ephemeral_public), &remote_signature)
            .map_err(|_| HandshakeError::BadIdentitySignature)?;

        let remote_ephemeral = X25519PublicKey::from(remote.ephemeral_public);
        let shared_secret = ephemeral_secret.diffie_hellman(&remote_ephemeral);
        self.establish(shared_secret.as_bytes(), Role::Initiator);
        let _ = identity;
        Ok(())
    }

    fn establish(&mut self, shared_secret: &[u8; 32], role: Role) {
        let hk = Hkdf::<Sha256>::new(None, shared_secret);
        let mut okm = [0u8; 64];
        hk.expand(HKDF_INFO, &mut okm)
            .expect("64 bytes is within HKDF-SHA256's output limit");

        let (initiator_to_responder, responder_to_initiator) = okm.split_at(32);
        let (send_bytes, recv_bytes) = match role {
            Role::Initiator => (initiator_to_responder, responder_to_initiator),
            Role::Responder => (responder_to_initiator, initiator_to_responder),
        };

        let send_key = ChaCha20Poly1305::new(Key::from_slice(send_bytes));
        let recv_key = ChaCha20Poly1305::new(Key::from_slice(recv_bytes));
        okm.zeroize();

        self.state = State::Established {
            send_key,
            recv_key,
            send_counter: 0,
            highest_received_counter: None,
        };
    }

    fn nonce_for(counter: u64) -> Nonce {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&counter.to_le_bytes());
        *Nonce::from_slice(&bytes)
    }

    /// Encrypts `plaintext`, returning the monotonic counter it was sent
    /// under and the ciphertext (which includes the AEAD tag).
    pub fn encrypt(&mut self, plaintext: &[u8], associated_data: &[u8]) -> SessionResult<(u64, Vec<u8>)> {
        let (send_key, send_counter) = match &mut self.state {
            State::Established {
                send_key,
                send_counter,
                ..
            } => (send_key, send_counter),
            _ => return Err(SessionError::NotEstablished),
        };
        let counter = *send_counter;
        *send_counter = send_counter.checked_add(1).ok_or(SessionError::CounterExhausted)?;

        let ciphertext = send_key
            .encrypt(
                &Self::nonce_for(counter),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| SessionError::DecryptionFailed)?;
        Ok((counter, ciphertext))
    }

    /// Decrypts a message received under `counter`. Rejects any counter
    /// that is not strictly greater than the highest one accepted so far —
    /// a strict monotonic check rather than a sliding replay window, per
    /// the mesh's store-and-forward delivery model where out-of-order
    /// arrival across a restart is treated as a new session.
    pub fn decrypt(&mut self, counter: u64, ciphertext: &[u8], associated_data: &[u8]) -> SessionResult<Vec<u8>> {
        let (recv_key, highest) = match &mut self.state {
            State::Established {
                recv_key,
                highest_received_counter,
                ..
            } => (recv_key, highest_received_counter),
            _ => return Err(SessionError::NotEstablished),
        };

        if let Some(seen) = *highest {
            if counter.ct_eq(&seen).into() || counter < seen {
                return Err(SessionError::ReplayedCounter {
                    received: counter,
                    highest: seen,
                });
            }
        }

        let plaintext = recv_key
            .decrypt(
                &Self::nonce_for(counter),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| SessionError::DecryptionFailed)?;

        *highest = Some(counter);
        Ok(plaintext)
    }
}

#[derive(Clone, Copy)]
enum Role {
    Initiator,
    Responder,
}
