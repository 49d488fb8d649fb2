use ed25519_dalek::{Signer as DalekSigner, Verifier as DalekVerifier};
use rand_core::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};
use zeroize::Zeroize;

pub const SIGNING_PUBLIC_KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH;

#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

pub type SignatureError = ed25519_dalek::SignatureError;

impl SigningKey {
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        Self(ed25519_dalek::SigningKey::generate(rng))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }
}

impl VerifyingKey {
    pub fn from_bytes(bytes: &[u8; SIGNING_PUBLIC_KEY_LENGTH]) -> Result<Self, SignatureError> {
        ed25519_dalek::VerifyingKey::from_bytes(bytes).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; SIGNING_PUBLIC_KEY_LENGTH] {
        self.0.to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        self.0.verify(message, &signature.0)
    }
}

impl Signature {
    pub fn from_bytes(bytes: &[u8; SIGNATURE_LENGTH]) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        self.0.to_bytes()
    }
}

/// A node's complete long-term identity: an Ed25519 signing keypair used to
/// authenticate handshakes, an X25519 keypair used for the ECDH that
/// establishes per-peer sessions, and the nickname it announces itself
/// under. `MeshCore::new` takes ownership of exactly one of these.
pub struct LocalIdentity {
    signing_key: SigningKey,
    x25519_secret: X25519StaticSecret,
    nickname: String,
}

impl LocalIdentity {
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R, nickname: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(rng);
        let mut secret_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_bytes);
        let x25519_secret = X25519StaticSecret::from(secret_bytes);
        secret_bytes.zeroize();
        Self {
            signing_key,
            x25519_secret,
            nickname: nickname.into(),
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn x25519_public(&self) -> X25519PublicKey {
        X25519PublicKey::from(&self.x25519_secret)
    }

    pub(crate) fn x25519_secret(&self) -> &X25519StaticSecret {
        &self.x25519_secret
    }

    /// Signs `message` with the Ed25519 identity key. Used to sign
    /// broadcast packets and the static key binding in the handshake.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}
