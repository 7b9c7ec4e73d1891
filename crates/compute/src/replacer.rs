//! LRU-K(k=2) eviction policy (§4.3).
//!
//! Tracks, for every *evictable* frame, its last `k` access timestamps.
//! A frame's backward k-distance is the gap between now and its k-th most
//! recent access; frames with fewer than `k` accesses have infinite
//! backward k-distance and are evicted first (oldest-timestamp-first among
//! themselves). This mirrors the classic "new pages are the best eviction
//! candidates until they prove they're hot" LRU-K intuition.
use std::collections::HashMap;

pub type FrameId = usize;

const K: usize = 2;

struct NodeHistory {
    /// Most recent access first.
    accesses: Vec<u64>,
    evictable: bool,
}

/// Not thread-safe by itself — the buffer pool manager wraps it in a mutex
/// alongside its frame table.
pub struct LruKReplacer {
    nodes: HashMap<FrameId, NodeHistory>,
    clock: u64,
    evictable_count: usize,
}

impl LruKReplacer {
    pub fn new() -> LruKReplacer {
        LruKReplacer {
            nodes: HashMap::new(),
            clock: 0,
            evictable_count: 0,
        }
    }

    pub fn record_access(&mut self, frame_id: FrameId) {
        self.clock += 1;
        let timestamp = self.clock;
        let node = self.nodes.entry(frame_id).or_insert_with(|| NodeHistory {
            accesses: Vec::with_capacity(K),
            evictable: false,
        });
        node.accesses.insert(0, timestamp);
        node.accesses.truncate(K);
    }

    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let node = self
            .nodes
            .entry(frame_id)
            .or_insert_with(|| NodeHistory { accesses: Vec::new(), evictable: false });
        if node.evictable != evictable {
            if evictable {
                self.evictable_count += 1;
            } else {
                self.evictable_count -= 1;
            }
        }
        node.evictable = evictable;
    }

    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(node) = self.nodes.remove(&frame_id) {
            if node.evictable {
                self.evictable_count -= 1;
            }
        }
    }

    pub fn evictable_len(&self) -> usize {
        self.evictable_count
    }

    /// Pick the best eviction candidate: largest backward k-distance, with
    /// "infinite" (fewer than K accesses) frames preferred, tie-broken by
    /// earliest most-recent access (classic LRU among the +inf group).
    pub fn evict(&mut self) -> Option<FrameId> {
        let mut best: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, node) in self.nodes.iter() {
            if !node.evictable {
                continue;
            }
            let has_k = node.accesses.len() >= K;
            let distance_key = if has_k {
                node.accesses[K - 1]
            } else {
                node.accesses.last().copied().unwrap_or(0)
            };
            let candidate = (frame_id, !has_k, distance_key);
            best = Some(match best {
                None => candidate,
                Some(current) => pick_better(current, candidate),
            });
        }
        if let Some((frame_id, ..)) = best {
            self.remove(frame_id);
            Some(frame_id)
        } else {
            None
        }
    }
}

/// `current`/`candidate` are `(frame_id, is_infinite, timestamp)`. Infinite
/// beats finite; among two infinites or two finites, the smaller timestamp
/// (older access) wins, i.e. is the better eviction target.
fn pick_better(
    current: (FrameId, bool, u64),
    candidate: (FrameId, bool, u64),
) -> (FrameId, bool, u64) {
    match (current.1, candidate.1) {
        (true, false) => current,
        (false, true) => candidate,
        _ => {
            if candidate.2 < current.2 {
                candidate
            } else {
                current
            }
        }
    }
}

impl Default for LruKReplacer {
    fn default() -> Self {
        LruKReplacer::new()
    }
}
