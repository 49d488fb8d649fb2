//! Per-peer handshake state machines (§4.5). This is the component-level
//! contract spec'd by `Security` — it owns a [`bitchat_crypto::NoiseSession`]
//! per peer plus the bookkeeping (stage, stall timer) the crypto engine
//! itself doesn't track.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bitchat_crypto::session::HANDSHAKE_STALL_TIMEOUT;
use bitchat_crypto::{HandshakeMessage, LocalIdentity, NoiseSession};
use dashmap::DashMap;
use tracing::{instrument, warn};

use crate::types::PeerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    HandshakeOut,
    HandshakeIn,
    Established,
    Failed,
}

struct PeerSession {
    session: NoiseSession,
    stage: SessionState,
    started_at: Option<Instant>,
}

impl PeerSession {
    fn new() -> Self {
        Self {
            session: NoiseSession::new(),
            stage: SessionState::Uninitialized,
            started_at: None,
        }
    }
}

/// Owns every peer's [`NoiseSession`] and the handshake stage it's in.
pub struct NoiseSessions {
    identity: Arc<LocalIdentity>,
    sessions: DashMap<PeerId, PeerSession>,
}

impl NoiseSessions {
    pub fn new(identity: Arc<LocalIdentity>) -> Self {
        Self {
            identity,
            sessions: DashMap::new(),
        }
    }

    /// Starts a handshake if `peer_id` is `Uninitialized` or `Failed`;
    /// otherwise does nothing (§4.5).
    #[instrument(skip(self))]
    pub fn initiate(&self, peer_id: PeerId) -> Option<Vec<u8>> {
        let mut entry = self.sessions.entry(peer_id).or_insert_with(PeerSession::new);
        if !matches!(entry.stage, SessionState::Uninitialized | SessionState::Failed) {
            return None;
        }
        let message = entry.session.initiate(&mut rand::thread_rng(), &self.identity);
        entry.stage = SessionState::HandshakeOut;
        entry.started_at = Some(Instant::now());
        Some(message.to_bytes().to_vec())
    }

    /// Advances the state machine with an incoming handshake message,
    /// returning a reply to send back when the protocol step requires one
    /// (§4.5).
    #[instrument(skip(self, bytes))]
    pub fn process(&self, peer_id: PeerId, bytes: &[u8]) -> Option<Vec<u8>> {
        let incoming = HandshakeMessage::from_bytes(bytes)?;
        let mut entry = self.sessions.entry(peer_id).or_insert_with(PeerSession::new);

        self.expire_if_stalled(&mut entry);

        match entry.stage {
            SessionState::Uninitialized | SessionState::Failed => {
                let reply = entry
                    .session
                    .respond(&mut rand::thread_rng(), &self.identity, &incoming)
                    .ok()?;
                entry.stage = SessionState::Established;
                entry.started_at = None;
                Some(reply.to_bytes().to_vec())
            }
            SessionState::HandshakeOut => {
                match entry.session.complete(&self.identity, &incoming) {
                    Ok(()) => {
                        entry.stage = SessionState::Established;
                        entry.started_at = None;
                        None
                    }
                    Err(err) => {
                        warn!(?peer_id, ?err, "handshake completion failed");
                        entry.stage = SessionState::Failed;
                        None
                    }
                }
            }
            SessionState::HandshakeIn | SessionState::Established => None,
        }
    }

    pub fn has_established(&self, peer_id: &PeerId) -> bool {
        self.sessions
            .get(peer_id)
            .map(|entry| entry.stage == SessionState::Established)
            .unwrap_or(false)
    }

    pub fn state(&self, peer_id: &PeerId) -> SessionState {
        self.sessions
            .get(peer_id)
            .map(|entry| entry.stage)
            .unwrap_or(SessionState::Uninitialized)
    }

    pub fn encrypt(&self, peer_id: &PeerId, plaintext: &[u8]) -> Option<Vec<u8>> {
        let mut entry = self.sessions.get_mut(peer_id)?;
        if entry.stage != SessionState::Established {
            return None;
        }
        let (counter, mut ciphertext) = entry.session.encrypt(plaintext, b"").ok()?;
        let mut framed = counter.to_be_bytes().to_vec();
        framed.append(&mut ciphertext);
        Some(framed)
    }

    pub fn decrypt(&self, peer_id: &PeerId, framed: &[u8]) -> Option<Vec<u8>> {
        if framed.len() < 8 {
            return None;
        }
        let mut entry = self.sessions.get_mut(peer_id)?;
        if entry.stage != SessionState::Established {
            return None;
        }
        let counter = u64::from_be_bytes(framed[..8].try_into().unwrap());
        entry.session.decrypt(counter, &framed[8..], b"").ok()
    }

    /// Explicit reset back to `Uninitialized`, per the `Failed ->
    /// Uninitialized` transition in §4.5's state diagram.
    pub fn reset(&self, peer_id: &PeerId) {
        self.sessions.remove(peer_id);
    }

    fn expire_if_stalled(&self, entry: &mut PeerSession) {
        if entry.stage == SessionState::HandshakeOut {
            if let Some(started_at) = entry.started_at {
                if started_at.elapsed() > HANDSHAKE_STALL_TIMEOUT {
                    entry.stage = SessionState::Uninitialized;
                    entry.started_at = None;
                    entry.session = NoiseSession::new();
                }
            }
        }
    }

    pub fn handshake_stall_timeout(&self) -> Duration {
        HANDSHAKE_STALL_TIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn identity(nick: &str) -> Arc<LocalIdentity> {
        Arc::new(LocalIdentity::generate(&mut OsRng, nick))
    }

    #[test]
    fn full_round_trip_through_component_contract() {
        let alice = NoiseSessions::new(identity("alice"));
        let bob = NoiseSessions::new(identity("bob"));

        let init = alice.initiate([1; 8]).unwrap();
        assert_eq!(alice.state(&[1; 8]), SessionState::HandshakeOut);

        let resp = bob.process([2; 8], &init).unwrap();
        assert!(bob.has_established(&[2; 8]));

        assert!(alice.process([1; 8], &resp).is_none());
        assert!(alice.has_established(&[1; 8]));

        let ciphertext = alice.encrypt(&[1; 8], b"hello").unwrap();
        let plaintext = bob.decrypt(&[2; 8], &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn encrypt_before_established_returns_none() {
        let alice = NoiseSessions::new(identity("alice"));
        assert!(alice.encrypt(&[1; 8], b"x").is_none());
    }

    #[test]
    fn reset_returns_to_uninitialized() {
        let alice = NoiseSessions::new(identity("alice"));
        alice.initiate([1; 8]);
        alice.reset(&[1; 8]);
        assert_eq!(alice.state(&[1; 8]), SessionState::Uninitialized);
    }
}
