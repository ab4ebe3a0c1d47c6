//! `CountingQuotientFilter`: the public surface tying together the slot
//! store, counter codec, hashing, locking, and totals modules (spec §6).
//!
//! Orchestrates the lookup/insert/removal algorithms from spec §4.4: every
//! mutation resolves to a single counter-group write plus, when the group's
//! encoded length changes, a shift of everything between that group and
//! [`kernel::last_occupied_slot`] — simpler than tracking each cluster's
//! exact boundary, at the cost of occasionally shifting a few slots that
//! didn't strictly need to move. `offset` bytes are recomputed over the
//! whole tail after each mutation for the same reason.

use std::cmp::Ordering;
use std::fmt;

use crate::bitops;
use crate::block;
use crate::buffer::{self, BackingStore, Header};
use crate::config::{FilterConfig, HashMode};
use crate::counter;
use crate::error::{CqfError, Result};
use crate::hash;
use crate::iter::Iter;
use crate::kernel;
use crate::lock::{LockMode, StripeLocks};
use crate::merge::{self, MergeSink};
use crate::metadata::{Totals, TotalsSnapshot};
use crate::slot_store;

/// Per-call behavior flags (spec §5 lock modes, §4.5 `KEY_IS_HASH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    /// Stripe-lock acquisition behavior for this call.
    pub lock_mode: LockMode,
    /// When set, `key` is already the full fingerprint: hashing and
    /// key/value composition are bypassed entirely.
    pub key_is_hash: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            lock_mode: LockMode::WaitForLock,
            key_is_hash: false,
        }
    }
}

/// A counting quotient filter over a backing buffer `B`.
pub struct CountingQuotientFilter<B: BackingStore> {
    buf: B,
    config: FilterConfig,
    locks: StripeLocks,
    totals: Totals,
}

enum Locate {
    /// `q` is occupied and `rem` was found at `slot`, spanning `len` slots
    /// and currently holding `count`.
    Found { slot: u64, count: u64, len: u64 },
    /// `q` is occupied but `rem` is absent; it belongs at `insert_before`
    /// (the run stays sorted, per I3).
    NotFound { insert_before: u64 },
    /// `q` is not occupied at all.
    NoRun,
}

fn locate(buf: &[u8], q: u64, rem: u64, num_blocks: u64, r: u8) -> Locate {
    let start = match kernel::find_run_start(buf, q, num_blocks, r) {
        Some(s) => s,
        None => return Locate::NoRun,
    };
    let end = kernel::run_end_position(buf, q, num_blocks, r).expect("occupied run has an end");
    let mut slot = start;
    while slot <= end {
        let group_rem = slot_store::get_slot(buf, slot, r);
        let group: Vec<u64> = (slot..=end).map(|i| slot_store::get_slot(buf, i, r)).collect();
        let (count, len) = counter::decode(&group, group_rem, r);
        match group_rem.cmp(&rem) {
            Ordering::Equal => return Locate::Found { slot, count, len: len as u64 },
            Ordering::Greater => return Locate::NotFound { insert_before: slot },
            Ordering::Less => slot += len as u64,
        }
    }
    Locate::NotFound { insert_before: end + 1 }
}

/// Upper bound on query-by-key-only's linear scan over `value_bits` (spec
/// §6.2 `query`, which only takes a key and reports the first matching
/// value). Configurations wider than this must use `count_key_value`
/// directly with an explicit value.
const MAX_QUERY_VALUE_SPACE: u64 = 1 << 16;

impl<B: BackingStore> CountingQuotientFilter<B> {
    fn fingerprint(&self, key: u64, value: u64, key_is_hash: bool) -> u64 {
        hash::fingerprint(
            self.config.hash_mode(),
            self.config.seed(),
            key,
            value,
            self.config.key_bits(),
            self.config.value_bits(),
            key_is_hash,
        )
    }

    fn split(&self, h: u64) -> (u64, u64) {
        let r = self.config.r();
        (h >> r, h & bitops::lowbits_mask(r))
    }

    fn lock_range(&self, q: u64) -> (u64, u64) {
        let q_end = (q + 2 * crate::lock::STRIPE_SIZE).min(self.config.nslots() - 1);
        (q, q_end)
    }

    /// Builds a filter over an already-allocated buffer, writing a fresh
    /// header and zeroing every block (spec §6.1 `init`).
    pub fn init(mut buf: B, config: FilterConfig) -> Result<Self> {
        let required = buffer::required_buffer_len(&config);
        if buf.as_ref().len() < required {
            return Err(CqfError::BufferTooSmall { required });
        }
        {
            let raw = buf.as_mut();
            for byte in raw[..required].iter_mut() {
                *byte = 0;
            }
            Header::from_config(&config).encode(&mut raw[0..buffer::HEADER_LEN]);
        }
        let locks = StripeLocks::new(config.nslots());
        let totals = Totals::new(locks.len());
        Ok(CountingQuotientFilter { buf, config, locks, totals })
    }

    /// Builds a filter over a buffer that already holds a persisted header
    /// and block region written by a prior `init` (spec §6.1 `use_buffer`,
    /// §6.4).
    pub fn use_buffer(buf: B) -> Result<Self> {
        if buf.as_ref().len() < buffer::HEADER_LEN {
            return Err(CqfError::BufferTooSmall { required: buffer::HEADER_LEN });
        }
        let header = Header::decode(buf.as_ref())?;
        let config = header.to_config()?;
        let required = buffer::required_buffer_len(&config);
        if buf.as_ref().len() < required {
            return Err(CqfError::BufferTooSmall { required });
        }
        let locks = StripeLocks::new(config.nslots());
        let totals = Totals::from_snapshot(
            locks.len(),
            TotalsSnapshot {
                occupied_slots: header.occupied_slots,
                distinct_pairs: header.distinct_pairs,
                sum_of_counts: header.sum_of_counts,
            },
        );
        Ok(CountingQuotientFilter { buf, config, locks, totals })
    }

    /// Gives back the backing buffer, consuming the filter (spec §5
    /// "`destroy` returns it").
    pub fn destroy(self) -> B {
        self.buf
    }

    /// Drops the filter along with its buffer. A plain consuming drop; for
    /// a `Vec<u8>`-backed filter this is exactly `qf_free`'s "use a standard
    /// allocator" semantics, since `Vec`'s own `Drop` already frees the
    /// memory.
    pub fn free(self) {}

    /// The validated configuration this filter was built with.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Number of slots.
    pub fn num_slots(&self) -> u64 {
        self.config.nslots()
    }

    /// Number of key bits.
    pub fn num_key_bits(&self) -> u8 {
        self.config.key_bits()
    }

    /// Number of value bits.
    pub fn num_value_bits(&self) -> u8 {
        self.config.value_bits()
    }

    /// Number of remainder bits stored per slot.
    pub fn num_key_remainder_bits(&self) -> u8 {
        self.config.r()
    }

    /// Bits per slot; identical to [`Self::num_key_remainder_bits`] (every
    /// slot, whether holding a remainder or a counter digit, is `r` bits
    /// wide).
    pub fn bits_per_slot(&self) -> u8 {
        self.config.r()
    }

    /// The configured hash mode.
    pub fn hash_mode(&self) -> HashMode {
        self.config.hash_mode()
    }

    /// The configured hash seed.
    pub fn hash_seed(&self) -> u32 {
        self.config.seed()
    }

    /// `2^(key_bits + value_bits)`, the size of the fingerprint space.
    pub fn hash_range(&self) -> u128 {
        1u128 << (self.config.key_bits() as u32 + self.config.value_bits() as u32)
    }

    /// Whether auto-resize is enabled.
    pub fn is_auto_resize_enabled(&self) -> bool {
        self.config.auto_resize()
    }

    /// Total size of the backing buffer, in bytes.
    pub fn total_size_in_bytes(&self) -> usize {
        buffer::required_buffer_len(&self.config)
    }

    /// Reduces per-stripe shards into an authoritative snapshot, writes it
    /// into the persisted header, and returns it (spec §5 "must be reduced
    /// by a `sync_counters` operation before returning an authoritative
    /// value").
    pub fn sync_counters(&mut self) -> TotalsSnapshot {
        let snapshot = self.totals.sync_counters();
        let mut header = Header::from_config(&self.config);
        header.occupied_slots = snapshot.occupied_slots;
        header.distinct_pairs = snapshot.distinct_pairs;
        header.sum_of_counts = snapshot.sum_of_counts;
        header.encode(&mut self.buf.as_mut()[0..buffer::HEADER_LEN]);
        snapshot
    }

    /// Number of slots currently holding live fingerprint/counter data.
    pub fn num_occupied_slots(&self) -> u64 {
        self.totals.sync_counters().occupied_slots
    }

    /// Number of distinct `(key, value)` pairs stored.
    pub fn num_distinct_key_value_pairs(&self) -> u64 {
        self.totals.sync_counters().distinct_pairs
    }

    /// Sum of all counts across every stored pair.
    pub fn sum_of_counts(&self) -> u64 {
        self.totals.sync_counters().sum_of_counts
    }

    fn apply_group_change(
        config: &FilterConfig,
        buf: &mut B,
        q: u64,
        slot: u64,
        old_len: u64,
        run_end_before: Option<u64>,
        new_encoded: Option<&[u64]>,
    ) {
        let r = config.r();
        let num_blocks = config.num_blocks();
        let new_len = new_encoded.map_or(0, |v| v.len() as u64);
        let tail_start = slot + old_len;
        let is_tail_group = match run_end_before {
            Some(end) => old_len > 0 && slot + old_len - 1 == end,
            None => false,
        };
        let new_group_is_tail = match run_end_before {
            Some(end) => is_tail_group || (old_len == 0 && slot > end),
            None => true,
        };
        let run_start_before = if is_tail_group {
            kernel::find_run_start(buf.as_ref(), q, num_blocks, r)
        } else {
            None
        };

        let buf = buf.as_mut();
        let last_occ = kernel::last_occupied_slot(buf, num_blocks, r);
        if let Some(last_occ) = last_occ {
            match new_len.cmp(&old_len) {
                Ordering::Greater if tail_start <= last_occ => {
                    let grow = new_len - old_len;
                    slot_store::shift_slots_right(buf, tail_start, last_occ, grow, r);
                    slot_store::shift_runends_right(buf, tail_start, last_occ, grow, r);
                }
                Ordering::Less if tail_start <= last_occ => {
                    let shrink = old_len - new_len;
                    slot_store::shift_slots_left(buf, tail_start, last_occ, shrink, r);
                    slot_store::shift_runends_left(buf, tail_start, last_occ, shrink, r);
                }
                _ => {}
            }
        }

        if new_group_is_tail {
            if let Some(old_end) = run_end_before {
                slot_store::set_runend(buf, old_end, r, false);
            }
        }
        if let Some(encoded) = new_encoded {
            for (i, &v) in encoded.iter().enumerate() {
                slot_store::set_slot(buf, slot + i as u64, r, v);
            }
        }
        slot_store::set_occupied(buf, q, r, true);
        if new_group_is_tail {
            if new_len > 0 {
                slot_store::set_runend(buf, slot + new_len - 1, r, true);
            } else if is_tail_group && run_start_before != Some(slot) {
                slot_store::set_runend(buf, slot - 1, r, true);
            }
        }

        let from_block = q / block::SLOTS_PER_BLOCK as u64;
        kernel::recompute_offsets_in_range(buf, from_block, num_blocks.saturating_sub(1), num_blocks, r);
    }

    /// Core insert, addressed directly by fingerprint. Bypasses hashing
    /// entirely (`h` is the final `(q, rem)` composition) — used both by
    /// [`Self::insert`] and by resize/merge, which reinsert fingerprints
    /// they already computed.
    fn insert_fingerprint(&mut self, h: u64, delta: u64, flags: Flags) -> Result<u64> {
        let r = self.config.r();
        let num_blocks = self.config.num_blocks();
        let (q, rem) = self.split(h);
        if q >= self.config.nslots() {
            return Err(CqfError::Invalid("fingerprint quotient out of range".into()));
        }

        let (low, high) = self.lock_range(q);
        let _guard = self.locks.acquire(low, high, flags.lock_mode)?;
        let shard = self.locks.stripe_of(q);

        let buf_ref = self.buf.as_ref();
        let loc = locate(buf_ref, q, rem, num_blocks, r);
        let run_end_before = kernel::run_end_position(buf_ref, q, num_blocks, r);

        let (slot, old_len, old_count, is_new_pair) = match loc {
            Locate::Found { slot, count, len } => (slot, len, count, false),
            Locate::NotFound { insert_before } => (insert_before, 0, 0, true),
            Locate::NoRun => (kernel::run_insertion_start(buf_ref, q, num_blocks, r), 0, 0, true),
        };

        let new_count = old_count + delta;
        let new_encoded = counter::encode(rem, new_count, r);
        let new_len = new_encoded.len() as u64;

        let tail_start = slot + old_len;
        let last_occ_before = kernel::last_occupied_slot(buf_ref, num_blocks, r);
        let growth = new_len as i64 - old_len as i64;
        let predicted_last_slot = match last_occ_before {
            Some(last) if tail_start <= last => (last as i64 + growth) as u64,
            _ => slot + new_len.saturating_sub(1),
        };
        if predicted_last_slot >= self.config.nslots() {
            return Err(CqfError::NoSpace);
        }

        Self::apply_group_change(&self.config, &mut self.buf, q, slot, old_len, run_end_before, Some(&new_encoded));

        self.totals.add_sum_of_counts(shard, delta as i64);
        self.totals.add_occupied(shard, new_len as i64 - old_len as i64);
        if is_new_pair {
            self.totals.add_distinct_pairs(shard, 1);
        }

        let buf_ref = self.buf.as_ref();
        let final_run_end = kernel::run_end_position(buf_ref, q, num_blocks, r).expect("just inserted a run");
        Ok(final_run_end - q)
    }

    /// Increments the `(key, value)` counter by `count` (spec §6.2
    /// `insert`). Returns the distance between the run's end and its home
    /// quotient.
    pub fn insert(&mut self, key: u64, value: u64, count: u64, flags: Flags) -> Result<u64> {
        let h = self.fingerprint(key, value, flags.key_is_hash);
        self.insert_fingerprint(h, count, flags)
    }

    fn remove_fingerprint(&mut self, h: u64, delta: u64, flags: Flags) -> Result<u64> {
        let r = self.config.r();
        let num_blocks = self.config.num_blocks();
        let (q, rem) = self.split(h);

        let (low, high) = self.lock_range(q);
        let _guard = self.locks.acquire(low, high, flags.lock_mode)?;
        let shard = self.locks.stripe_of(q);

        let buf_ref = self.buf.as_ref();
        let (slot, count, len) = match locate(buf_ref, q, rem, num_blocks, r) {
            Locate::Found { slot, count, len } => (slot, count, len),
            _ => return Err(CqfError::DoesntExist),
        };
        let run_end_before = kernel::run_end_position(buf_ref, q, num_blocks, r);
        let removed = delta.min(count);
        let new_count = count - removed;

        let run_start_before = kernel::find_run_start(buf_ref, q, num_blocks, r);
        let removes_whole_run = new_count == 0
            && run_start_before == Some(slot)
            && run_end_before == Some(slot + len - 1);

        if new_count == 0 {
            Self::apply_group_change(&self.config, &mut self.buf, q, slot, len, run_end_before, None);
            if removes_whole_run {
                slot_store::set_occupied(self.buf.as_mut(), q, r, false);
            }
        } else {
            let new_encoded = counter::encode(rem, new_count, r);
            Self::apply_group_change(&self.config, &mut self.buf, q, slot, len, run_end_before, Some(&new_encoded));
        }

        let new_len = if new_count == 0 {
            0
        } else {
            counter::encoded_len(rem, new_count, r) as u64
        };
        self.totals.add_sum_of_counts(shard, -(removed as i64));
        self.totals.add_occupied(shard, new_len as i64 - len as i64);
        if new_count == 0 {
            self.totals.add_distinct_pairs(shard, -1);
        }

        Ok(removed)
    }

    /// Removes up to `count` occurrences of `(key, value)` (spec §6.2
    /// `remove`). Errors with [`CqfError::DoesntExist`] if the pair is
    /// absent.
    pub fn remove(&mut self, key: u64, value: u64, count: u64, flags: Flags) -> Result<u64> {
        let h = self.fingerprint(key, value, flags.key_is_hash);
        self.remove_fingerprint(h, count, flags)
    }

    /// Sets the absolute count of `(key, value)`; `count == 0` removes it
    /// entirely (spec §6.2 `set_count`).
    pub fn set_count(&mut self, key: u64, value: u64, count: u64, flags: Flags) -> Result<()> {
        let h = self.fingerprint(key, value, flags.key_is_hash);
        let current = self.count_fingerprint(h, flags)?;
        match count.cmp(&current) {
            Ordering::Equal => Ok(()),
            Ordering::Greater => {
                self.insert_fingerprint(h, count - current, flags)?;
                Ok(())
            }
            Ordering::Less if count == 0 => {
                if current > 0 {
                    self.remove_fingerprint(h, current, flags)?;
                }
                Ok(())
            }
            Ordering::Less => {
                self.remove_fingerprint(h, current - count, flags)?;
                Ok(())
            }
        }
    }

    /// Removes every occurrence of `(key, value)` (spec §6.2
    /// `delete_key_value`). Idempotent: calling it again on an absent pair
    /// is a no-op.
    pub fn delete_key_value(&mut self, key: u64, value: u64, flags: Flags) -> Result<()> {
        let h = self.fingerprint(key, value, flags.key_is_hash);
        let current = self.count_fingerprint(h, flags)?;
        if current > 0 {
            self.remove_fingerprint(h, current, flags)?;
        }
        Ok(())
    }

    fn count_fingerprint(&self, h: u64, flags: Flags) -> Result<u64> {
        let r = self.config.r();
        let num_blocks = self.config.num_blocks();
        let (q, rem) = self.split(h);
        let (low, high) = self.lock_range(q);
        let _guard = self.locks.acquire(low, high, flags.lock_mode)?;
        Ok(match locate(self.buf.as_ref(), q, rem, num_blocks, r) {
            Locate::Found { count, .. } => count,
            _ => 0,
        })
    }

    /// Returns the stored count for `(key, value)`, or `0` if absent (spec
    /// §6.2 `count_key_value`).
    pub fn count_key_value(&self, key: u64, value: u64, flags: Flags) -> Result<u64> {
        let h = self.fingerprint(key, value, flags.key_is_hash);
        self.count_fingerprint(h, flags)
    }

    /// Returns the count for the first value (in ascending order) stored
    /// under `key`, along with that value, or `None` if no value is present
    /// for `key` (spec §6.2 `query`). Scans the configured value space
    /// directly, so it is only supported when that space is small; wider
    /// configurations should use [`Self::count_key_value`] with an explicit
    /// value instead.
    pub fn query(&self, key: u64, flags: Flags) -> Result<Option<(u64, u64)>> {
        let value_space = 1u64 << self.config.value_bits();
        if value_space > MAX_QUERY_VALUE_SPACE {
            return Err(CqfError::Invalid(
                "query by key alone requires a small value_bits; use count_key_value".into(),
            ));
        }
        for value in 0..value_space {
            let count = self.count_key_value(key, value, flags)?;
            if count > 0 {
                return Ok(Some((value, count)));
            }
        }
        Ok(None)
    }

    /// Returns the absolute slot index `(key, value)`'s counter group
    /// starts at, or [`CqfError::DoesntExist`] if absent (spec §6.2
    /// `get_unique_index`). The index is only valid until the next
    /// mutation.
    pub fn get_unique_index(&self, key: u64, value: u64, flags: Flags) -> Result<u64> {
        let h = self.fingerprint(key, value, flags.key_is_hash);
        let r = self.config.r();
        let num_blocks = self.config.num_blocks();
        let (q, rem) = self.split(h);
        match locate(self.buf.as_ref(), q, rem, num_blocks, r) {
            Locate::Found { slot, .. } => Ok(slot),
            _ => Err(CqfError::DoesntExist),
        }
    }

    /// Forward iterator over every stored element, in hash order (spec
    /// §4.6).
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(
            self.buf.as_ref(),
            self.config.num_blocks(),
            self.config.r(),
            self.config.nslots(),
            self.config.hash_mode(),
            self.config.seed(),
            self.config.key_bits(),
            self.config.value_bits(),
        )
    }

    /// Iterator positioned at the first element at or after absolute slot
    /// `start_slot` (SPEC_FULL §10.6).
    pub fn iter_from_position(&self, start_slot: u64) -> Iter<'_> {
        Iter::from_position(
            self.buf.as_ref(),
            self.config.num_blocks(),
            self.config.r(),
            self.config.nslots(),
            self.config.hash_mode(),
            self.config.seed(),
            self.config.key_bits(),
            self.config.value_bits(),
            start_slot,
        )
    }

    /// Iterator positioned at the first element whose fingerprint is `>=`
    /// `(key, value)`'s (SPEC_FULL §10.6).
    pub fn iter_from_key_value(&self, key: u64, value: u64, key_is_hash: bool) -> Iter<'_> {
        Iter::from_key_value(
            self.buf.as_ref(),
            self.config.num_blocks(),
            self.config.r(),
            self.config.nslots(),
            self.config.hash_mode(),
            self.config.seed(),
            self.config.key_bits(),
            self.config.value_bits(),
            key,
            value,
            key_is_hash,
        )
    }

    /// `Σ count²` over every stored pair: a one-line specialization of
    /// `inner_product(self, self)` (SPEC_FULL §10.6, `cqf_magnitude`).
    pub fn magnitude(&self) -> u128 {
        merge::inner_product(self.iter(), self.iter())
    }

    /// Zeroes every block and resets the header counters, keeping the same
    /// configuration (spec §6.1 `reset`).
    pub fn reset(&mut self) -> Result<()> {
        let required = buffer::required_buffer_len(&self.config);
        let raw = self.buf.as_mut();
        for byte in raw[buffer::HEADER_LEN..required].iter_mut() {
            *byte = 0;
        }
        Header::from_config(&self.config).encode(&mut raw[0..buffer::HEADER_LEN]);
        self.totals = Totals::new(self.locks.len());
        Ok(())
    }

    /// A plain-text dump of the header fields (SPEC_FULL §10.6
    /// `cqf_dump_metadata`).
    pub fn dump_metadata(&self) -> String {
        format!(
            "nslots={} key_bits={} value_bits={} r={} hash_mode={:?} seed={} auto_resize={} occupied_slots={} distinct_pairs={} sum_of_counts={}",
            self.config.nslots(),
            self.config.key_bits(),
            self.config.value_bits(),
            self.config.r(),
            self.config.hash_mode(),
            self.config.seed(),
            self.config.auto_resize(),
            self.totals.sync_counters().occupied_slots,
            self.totals.sync_counters().distinct_pairs,
            self.totals.sync_counters().sum_of_counts,
        )
    }

    /// Copies this filter into a new, independently-owned `Vec<u8>`-backed
    /// filter (spec §6.1 `copy`).
    pub fn copy(&self) -> CountingQuotientFilter<Vec<u8>> {
        let buf = self.buf.as_ref().to_vec();
        let locks = StripeLocks::new(self.config.nslots());
        let totals = Totals::from_snapshot(locks.len(), self.totals.sync_counters());
        CountingQuotientFilter {
            buf,
            config: self.config,
            locks,
            totals,
        }
    }
}

impl<B: BackingStore> MergeSink for CountingQuotientFilter<B> {
    type Error = CqfError;

    fn append(&mut self, hash: u64, count: u64) -> Result<()> {
        self.insert_fingerprint(hash, count, Flags::default())?;
        Ok(())
    }
}

impl<B: BackingStore> fmt::Debug for CountingQuotientFilter<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CountingQuotientFilter {{ {} }}", self.dump_metadata())?;
        for block_index in 0..self.config.num_blocks() {
            let buf = self.buf.as_ref();
            writeln!(
                f,
                "  block {}: offset={} occupied={:064b} runend={:064b}",
                block_index,
                block::read_offset(buf, block_index, self.config.r()),
                block::read_occupied(buf, block_index, self.config.r()),
                block::read_runend(buf, block_index, self.config.r()),
            )?;
        }
        Ok(())
    }
}

impl CountingQuotientFilter<Vec<u8>> {
    /// Allocates a new `Vec<u8>`-backed filter sized for `config` (spec
    /// §6.1 `malloc`).
    pub fn malloc(config: FilterConfig) -> Result<Self> {
        let buf = vec![0u8; buffer::required_buffer_len(&config)];
        Self::init(buf, config)
    }

    /// Allocates a fresh filter of `new_nslots` slots (same key/value bits,
    /// hash mode, seed) and re-inserts every element from `self` in order,
    /// preserving counts (spec §4.4 "Resize"). Does not modify `self`.
    pub fn resize_malloc(&self, new_nslots: u64) -> Result<CountingQuotientFilter<Vec<u8>>> {
        let new_config = FilterConfig::new(
            new_nslots,
            self.config.key_bits(),
            self.config.value_bits(),
            self.config.hash_mode(),
        )?
        .with_seed(self.config.seed())
        .with_auto_resize(self.config.auto_resize());
        let mut grown = CountingQuotientFilter::malloc(new_config)?;
        for element in self.iter() {
            grown.insert_fingerprint(element.hash, element.count, Flags::default())?;
        }
        Ok(grown)
    }

    /// Grows this filter in place to `new_nslots` by swapping in a freshly
    /// built, repopulated buffer (spec §5 "Resize acquires a new buffer,
    /// writes into it, and releases the old one on success").
    pub fn resize(&mut self, new_nslots: u64) -> Result<()> {
        let grown = self.resize_malloc(new_nslots)?;
        *self = grown;
        Ok(())
    }

    /// Like [`Self::insert`], but when the filter is configured with
    /// `auto_resize` and the insert fails with [`CqfError::NoSpace`] (or
    /// load crosses the 0.95 threshold beforehand), doubles capacity and
    /// retries once. Auto-resize only applies to `Vec<u8>`-backed filters:
    /// an externally-provided buffer (`init`/`use_buffer`) has a fixed size
    /// by definition and cannot grow regardless of the flag.
    pub fn insert_auto(&mut self, key: u64, value: u64, count: u64, flags: Flags) -> Result<u64> {
        if self.config.auto_resize() {
            let snapshot = self.totals.sync_counters();
            if snapshot.occupied_slots as f64 >= 0.95 * self.config.nslots() as f64 {
                log::warn!(
                    "auto-resize triggered at {}/{} occupied slots",
                    snapshot.occupied_slots,
                    self.config.nslots()
                );
                self.resize(self.config.nslots() * 2)?;
            }
        }
        match self.insert(key, value, count, flags) {
            Err(CqfError::NoSpace) if self.config.auto_resize() => {
                log::warn!("insert hit NoSpace despite pre-check; auto-resizing and retrying");
                self.resize(self.config.nslots() * 2)?;
                self.insert(key, value, count, flags)
            }
            other => other,
        }
    }
}

/// Merges `a` and `b` (both already sharing hash mode and `r`) into a fresh
/// filter, writing via ordered appends (spec §4.7 `merge`).
pub fn merge(
    a: &CountingQuotientFilter<impl BackingStore>,
    b: &CountingQuotientFilter<impl BackingStore>,
    dst: &mut CountingQuotientFilter<impl BackingStore>,
) -> Result<()> {
    merge::merge(a.iter(), b.iter(), dst)
}

/// Walks `a` and `b` simultaneously, summing `count_a * count_b` wherever
/// fingerprints match (spec §4.7 `inner_product`).
pub fn inner_product(a: &CountingQuotientFilter<impl BackingStore>, b: &CountingQuotientFilter<impl BackingStore>) -> u128 {
    merge::inner_product(a.iter(), b.iter())
}

/// Merges `filters` pairwise into a single fresh filter (SPEC_FULL §10.6,
/// `cqf_multi_merge`). All filters must share `key_bits`/`value_bits`/hash
/// mode/`r`.
pub fn merge_all(filters: &[&CountingQuotientFilter<Vec<u8>>]) -> Result<CountingQuotientFilter<Vec<u8>>> {
    let first = match filters.first() {
        Some(f) => f,
        None => return Err(CqfError::Invalid("merge_all requires at least one filter".into())),
    };
    let mut acc = CountingQuotientFilter::malloc(*first.config())?;
    for filter in filters.iter() {
        let merged_so_far = acc.copy();
        acc.reset()?;
        merge(&merged_so_far, filter, &mut acc)?;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> FilterConfig {
        FilterConfig::new(64, 10, 0, HashMode::None).unwrap()
    }

    #[test]
    fn insert_then_query_roundtrips() {
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        filter.insert(5, 0, 3, Flags::default()).unwrap();
        assert_eq!(filter.count_key_value(5, 0, Flags::default()).unwrap(), 3);
    }

    #[test]
    fn insert_twice_accumulates_count() {
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        filter.insert(5, 0, 3, Flags::default()).unwrap();
        filter.insert(5, 0, 4, Flags::default()).unwrap();
        assert_eq!(filter.count_key_value(5, 0, Flags::default()).unwrap(), 7);
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        filter.insert(1, 0, 1, Flags::default()).unwrap();
        filter.insert(2, 0, 1, Flags::default()).unwrap();
        filter.insert(3, 0, 1, Flags::default()).unwrap();
        assert_eq!(filter.count_key_value(1, 0, Flags::default()).unwrap(), 1);
        assert_eq!(filter.count_key_value(2, 0, Flags::default()).unwrap(), 1);
        assert_eq!(filter.count_key_value(3, 0, Flags::default()).unwrap(), 1);
        assert_eq!(filter.num_distinct_key_value_pairs(), 3);
    }

    #[test]
    fn remove_decrements_then_removes() {
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        filter.insert(9, 0, 5, Flags::default()).unwrap();
        filter.remove(9, 0, 2, Flags::default()).unwrap();
        assert_eq!(filter.count_key_value(9, 0, Flags::default()).unwrap(), 3);
        filter.remove(9, 0, 3, Flags::default()).unwrap();
        assert_eq!(filter.count_key_value(9, 0, Flags::default()).unwrap(), 0);
    }

    #[test]
    fn shared_run_keeps_both_remainders_independently_queryable() {
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        // NONE mode, value_bits=0, r=4: key is the fingerprint directly.
        // Both keys have quotient 5 (home slot 5) but different remainders,
        // so they land in the same run as two counter groups.
        let key_a = (5 << 4) | 3; // q=5, rem=3
        let key_b = (5 << 4) | 7; // q=5, rem=7
        filter.insert(key_a, 0, 1, Flags::default()).unwrap();
        filter.insert(key_b, 0, 1, Flags::default()).unwrap();
        assert_eq!(filter.count_key_value(key_a, 0, Flags::default()).unwrap(), 1);
        assert_eq!(filter.count_key_value(key_b, 0, Flags::default()).unwrap(), 1);

        filter.remove(key_b, 0, 1, Flags::default()).unwrap();
        assert_eq!(filter.count_key_value(key_b, 0, Flags::default()).unwrap(), 0);
        assert_eq!(filter.count_key_value(key_a, 0, Flags::default()).unwrap(), 1);
    }

    #[test]
    fn remove_on_absent_pair_errors() {
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        assert_eq!(filter.remove(1, 0, 1, Flags::default()), Err(CqfError::DoesntExist));
    }

    #[test]
    fn delete_key_value_is_idempotent() {
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        filter.insert(7, 0, 9, Flags::default()).unwrap();
        filter.delete_key_value(7, 0, Flags::default()).unwrap();
        filter.delete_key_value(7, 0, Flags::default()).unwrap();
        assert_eq!(filter.count_key_value(7, 0, Flags::default()).unwrap(), 0);
    }

    #[test]
    fn set_count_to_zero_removes() {
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        filter.insert(4, 0, 6, Flags::default()).unwrap();
        filter.set_count(4, 0, 0, Flags::default()).unwrap();
        assert_eq!(filter.count_key_value(4, 0, Flags::default()).unwrap(), 0);
    }

    #[test]
    fn iterator_yields_all_inserted_pairs_in_order() {
        let mut filter = CountingQuotientFilter::malloc(
            FilterConfig::new(256, 16, 0, HashMode::Invertible).unwrap(),
        )
        .unwrap();
        for key in [50u64, 10, 200, 3, 77] {
            filter.insert(key, 0, 1, Flags::default()).unwrap();
        }
        let elements: Vec<_> = filter.iter().collect();
        assert_eq!(elements.len(), 5);
        for w in elements.windows(2) {
            assert!(w[0].hash <= w[1].hash);
        }
        let keys: Vec<u64> = elements.iter().map(|e| e.key_value.unwrap().0).collect();
        for key in [50u64, 10, 200, 3, 77] {
            assert!(keys.contains(&key));
        }
    }

    #[test]
    fn resize_malloc_preserves_counts() {
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        filter.insert(5, 0, 3, Flags::default()).unwrap();
        filter.insert(6, 0, 1, Flags::default()).unwrap();
        let grown = filter.resize_malloc(128).unwrap();
        assert_eq!(grown.count_key_value(5, 0, Flags::default()).unwrap(), 3);
        assert_eq!(grown.count_key_value(6, 0, Flags::default()).unwrap(), 1);
        assert_eq!(grown.num_slots(), 128);
    }

    #[test]
    fn use_buffer_reconstructs_config_after_init() {
        let config = small_config();
        let mut filter = CountingQuotientFilter::malloc(config).unwrap();
        filter.insert(5, 0, 3, Flags::default()).unwrap();
        filter.sync_counters();
        let buf = filter.destroy();
        let reopened = CountingQuotientFilter::use_buffer(buf).unwrap();
        assert_eq!(reopened.count_key_value(5, 0, Flags::default()).unwrap(), 3);
    }

    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn insert_then_query_returns_inserted_count(key_seed: u64, count_seed: u8) -> bool {
        let key = key_seed % (1 << 10);
        let count = 1 + (count_seed as u64 % 50);
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        filter.insert(key, 0, count, Flags::default()).unwrap();
        filter.count_key_value(key, 0, Flags::default()).unwrap() == count
    }

    #[quickcheck]
    fn delete_key_value_twice_matches_once(key_seed: u64, count_seed: u8) -> bool {
        let key = key_seed % (1 << 10);
        let count = 1 + (count_seed as u64 % 50);
        let mut filter = CountingQuotientFilter::malloc(small_config()).unwrap();
        filter.insert(key, 0, count, Flags::default()).unwrap();
        filter.delete_key_value(key, 0, Flags::default()).unwrap();
        let once = filter.count_key_value(key, 0, Flags::default()).unwrap();
        filter.delete_key_value(key, 0, Flags::default()).unwrap();
        let twice = filter.count_key_value(key, 0, Flags::default()).unwrap();
        once == 0 && twice == 0
    }
}
