//! Packet-level fragmentation and reassembly (§4.3), built on top of
//! `bitchat_codec::fragment`'s pure frame encode/decode.

use std::collections::HashMap;
use std::time::Instant;

use bitchat_codec::fragment::{self, FragmentFrame};
use dashmap::DashMap;
use rand::RngCore;
use tracing::{debug, instrument};

/// In-flight reassembly state for one `fragment_id` (§3).
struct FragmentSet {
    original_type: u8,
    total: u16,
    parts: HashMap<u16, Vec<u8>>,
    first_seen: Instant,
}

pub struct FragmentManager {
    sets: DashMap<[u8; 8], FragmentSet>,
}

impl Default for FragmentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentManager {
    pub fn new() -> Self {
        Self { sets: DashMap::new() }
    }

    /// Splits `encoded` (an already-encoded packet) into fragment frames if
    /// it exceeds `threshold`, keeping `original_type` so reassembly can
    /// rebuild a packet of the right type. Returns an empty vec when no
    /// fragmentation is needed — callers send `encoded` as-is in that case.
    pub fn create_fragments(
        &self,
        encoded: &[u8],
        original_type: u8,
        threshold: usize,
    ) -> Vec<FragmentFrame> {
        if encoded.len() <= threshold {
            return Vec::new();
        }
        let mut fragment_id = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut fragment_id);
        fragment::split(fragment_id, original_type, encoded)
    }

    /// Stores one fragment; when the set is complete, removes it and
    /// returns the reassembled `(original_type, bytes)`. Per §4.3, if the
    /// completing fragment arrives but an earlier index was never seen,
    /// that cannot happen here since completion is only checked once
    /// `parts.len() == total`.
    #[instrument(skip(self, frame), fields(fragment_id = ?frame.fragment_id, index = frame.index, total = frame.total))]
    pub fn handle_fragment(&self, frame: FragmentFrame) -> Option<(u8, Vec<u8>)> {
        let mut entry = self
            .sets
            .entry(frame.fragment_id)
            .or_insert_with(|| FragmentSet {
                original_type: frame.original_type,
                total: frame.total,
                parts: HashMap::new(),
                first_seen: Instant::now(),
            });

        entry.parts.insert(frame.index, frame.data);

        if entry.parts.len() == entry.total as usize {
            let total = entry.total;
            let original_type = entry.original_type;
            let mut ordered = Vec::with_capacity(entry.parts.iter().map(|(_, d)| d.len()).sum());
            for index in 0..total {
                match entry.parts.get(&index) {
                    Some(part) => ordered.extend_from_slice(part),
                    // Missing an index at "completion" is fatal for this
                    // set: drop it rather than emit a gapped payload.
                    None => {
                        drop(entry);
                        self.sets.remove(&frame.fragment_id);
                        return None;
                    }
                }
            }
            drop(entry);
            self.sets.remove(&frame.fragment_id);
            debug!(original_type, total, "fragment set reassembled");
            return Some((original_type, ordered));
        }

        None
    }

    /// Periodic GC (every 10s per §4.3): drops fragment sets older than
    /// `timeout`.
    pub fn gc(&self, timeout: std::time::Duration) {
        self.sets.retain(|_, set| set.first_seen.elapsed() <= timeout);
    }

    pub fn pending_count(&self) -> usize {
        self.sets.len()
    }
}
