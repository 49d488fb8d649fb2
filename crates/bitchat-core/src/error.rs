use std::sync::atomic::{AtomicU64, Ordering};

/// Per-§7 drop reasons. Every internal drop increments exactly one of
/// these; the engine never escalates them across the public API (§7's
/// "core never throws" policy) — they exist purely for host observability.
#[derive(Default)]
pub struct DropCounters {
    malformed_input: AtomicU64,
    replay_duplicate: AtomicU64,
    invalid_signature: AtomicU64,
    crypto_failure: AtomicU64,
    transport_failure: AtomicU64,
    resource_exhaustion: AtomicU64,
    protocol_timeout: AtomicU64,
}

/// A point-in-time read of [`DropCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DropCountersSnapshot {
    pub malformed_input: u64,
    pub replay_duplicate: u64,
    pub invalid_signature: u64,
    pub crypto_failure: u64,
    pub transport_failure: u64,
    pub resource_exhaustion: u64,
    pub protocol_timeout: u64,
}

impl DropCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_malformed_input(&self) {
        self.malformed_input.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay_duplicate(&self) {
        self.replay_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_signature(&self) {
        self.invalid_signature.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crypto_failure(&self) {
        self.crypto_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.transport_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resource_exhaustion(&self) {
        self.resource_exhaustion.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_timeout(&self) {
        self.protocol_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DropCountersSnapshot {
        DropCountersSnapshot {
            malformed_input: self.malformed_input.load(Ordering::Relaxed),
            replay_duplicate: self.replay_duplicate.load(Ordering::Relaxed),
            invalid_signature: self.invalid_signature.load(Ordering::Relaxed),
            crypto_failure: self.crypto_failure.load(Ordering::Relaxed),
            transport_failure: self.transport_failure.load(Ordering::Relaxed),
            resource_exhaustion: self.resource_exhaustion.load(Ordering::Relaxed),
            protocol_timeout: self.protocol_timeout.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_drops() {
        let counters = DropCounters::new();
        counters.record_malformed_input();
        counters.record_malformed_input();
        counters.record_replay_duplicate();
        let snap = counters.snapshot();
        assert_eq!(snap.malformed_input, 2);
        assert_eq!(snap.replay_duplicate, 1);
        assert_eq!(snap.invalid_signature, 0);
    }
}
