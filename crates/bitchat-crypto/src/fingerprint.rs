use sha2::{Digest, Sha256};

/// A peer's stable identity fingerprint: SHA-256 of its Ed25519 static
/// public key, hex-encoded for display and comparison (§4.3). Unlike the
/// 8-byte `peer_id` carried on the wire, the fingerprint survives a peer
/// reconnecting with a new ephemeral session and is what favorites and
/// blocks are keyed on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of_signing_key(public_key_bytes: &[u8; 32]) -> Self {
        let digest = Sha256::digest(public_key_bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fingerprint").field(&self.to_hex()).finish()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_same_fingerprint() {
        let key = [7u8; 32];
        assert_eq!(Fingerprint::of_signing_key(&key), Fingerprint::of_signing_key(&key));
    }

    #[test]
    fn different_keys_different_fingerprints() {
        assert_ne!(
            Fingerprint::of_signing_key(&[1u8; 32]),
            Fingerprint::of_signing_key(&[2u8; 32])
        );
    }

    #[test]
    fn hex_is_lowercase_and_64_chars() {
        let fp = Fingerprint::of_signing_key(&[0xAB; 32]);
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
