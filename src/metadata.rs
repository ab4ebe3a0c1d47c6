//! Runtime totals (spec §3 invariant I6, §5): `occupied_slots`,
//! `distinct_pairs`, and `sum_of_counts`, sharded one-per-stripe so
//! mutations on disjoint stripes never contend on the same cache line.
//! [`Totals::sync_counters`] reduces the shards into an authoritative
//! snapshot; mutations only ever touch their own shard.

use std::sync::atomic::{AtomicU64, Ordering};

/// One shard's counters.
#[derive(Debug, Default)]
struct Shard {
    occupied_slots: AtomicU64,
    distinct_pairs: AtomicU64,
    sum_of_counts: AtomicU64,
}

/// Sharded runtime totals.
#[derive(Debug)]
pub struct Totals {
    shards: Vec<Shard>,
}

/// A reduced, authoritative view of the totals at the moment
/// [`Totals::sync_counters`] was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TotalsSnapshot {
    pub occupied_slots: u64,
    pub distinct_pairs: u64,
    pub sum_of_counts: u64,
}

impl Totals {
    /// Builds `num_shards` independent shards, all zeroed.
    pub fn new(num_shards: usize) -> Self {
        Totals {
            shards: (0..num_shards.max(1)).map(|_| Shard::default()).collect(),
        }
    }

    /// Rebuilds totals from a previously-reduced snapshot, e.g. after
    /// decoding a persisted header. All of the snapshot's mass lands in
    /// shard 0; the split is irrelevant once totals are resynced.
    pub fn from_snapshot(num_shards: usize, snapshot: TotalsSnapshot) -> Self {
        let totals = Self::new(num_shards);
        totals.shards[0].occupied_slots.store(snapshot.occupied_slots, Ordering::Relaxed);
        totals.shards[0].distinct_pairs.store(snapshot.distinct_pairs, Ordering::Relaxed);
        totals.shards[0].sum_of_counts.store(snapshot.sum_of_counts, Ordering::Relaxed);
        totals
    }

    fn shard(&self, index: usize) -> &Shard {
        &self.shards[index % self.shards.len()]
    }

    /// Adds `delta` occupied slots to `shard`'s local count.
    pub fn add_occupied(&self, shard: usize, delta: i64) {
        add_signed(&self.shard(shard).occupied_slots, delta);
    }

    /// Adds `delta` distinct pairs to `shard`'s local count.
    pub fn add_distinct_pairs(&self, shard: usize, delta: i64) {
        add_signed(&self.shard(shard).distinct_pairs, delta);
    }

    /// Adds `delta` (may be negative) to `shard`'s local sum-of-counts.
    pub fn add_sum_of_counts(&self, shard: usize, delta: i64) {
        add_signed(&self.shard(shard).sum_of_counts, delta);
    }

    /// Reduces all shards into a single authoritative snapshot.
    pub fn sync_counters(&self) -> TotalsSnapshot {
        let mut snapshot = TotalsSnapshot::default();
        for shard in &self.shards {
            snapshot.occupied_slots += shard.occupied_slots.load(Ordering::Relaxed);
            snapshot.distinct_pairs += shard.distinct_pairs.load(Ordering::Relaxed);
            snapshot.sum_of_counts += shard.sum_of_counts.load(Ordering::Relaxed);
        }
        snapshot
    }
}

fn add_signed(counter: &AtomicU64, delta: i64) {
    if delta >= 0 {
        counter.fetch_add(delta as u64, Ordering::Relaxed);
    } else {
        counter.fetch_sub((-delta) as u64, Ordering::Relaxed);
    }
}
