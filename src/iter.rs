//! Forward iterator (spec §4.6) plus the seek variants supplementing it
//! (`iter_from_position`/`iter_from_key_value`, mirroring
//! `cqf_iterator_from_position`/`cqf_iterator_from_key_value` in the
//! upstream C interface).
//!
//! State is exactly what spec §4.6 names: the slot the next counter group
//! starts at, the quotient whose run that group belongs to, and that run's
//! end (cached so each step doesn't re-run rank/select). `next_occupied_from`
//! uses the same block-word-at-a-time skip as [`crate::kernel`] so walking
//! between runs costs one word check per empty block, not one bit per slot.

use crate::bitops;
use crate::block;
use crate::config::HashMode;
use crate::counter;
use crate::hash;
use crate::kernel;
use crate::slot_store;

/// One decoded element: a fingerprint, its count, and (when the hash mode
/// allows it) the original `(key, value)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    /// Absolute slot index the element's counter group starts at.
    pub start_slot: u64,
    /// The full fingerprint `(quotient << r) | remainder`.
    pub hash: u64,
    /// Number of occurrences.
    pub count: u64,
    /// `Some((key, value))` when the configured hash mode can recover it.
    pub key_value: Option<(u64, u64)>,
}

fn next_occupied_from(buf: &[u8], start_q: u64, num_blocks: u64, r: u8) -> Option<u64> {
    let mut block_idx = start_q / block::SLOTS_PER_BLOCK as u64;
    let mut within = (start_q % block::SLOTS_PER_BLOCK as u64) as u8;
    while block_idx < num_blocks {
        let mask = block::read_occupied(buf, block_idx, r) & !bitops::lowbits_mask(within);
        if mask != 0 {
            let pos = bitops::select64(mask, 0);
            return Some(block_idx * block::SLOTS_PER_BLOCK as u64 + pos as u64);
        }
        block_idx += 1;
        within = 0;
    }
    None
}

/// Forward-only iterator over a filter's elements in hash order.
///
/// Borrows the filter's buffer for its lifetime; invalidated by any
/// concurrent structural mutation (spec §3 "Lifecycles").
pub struct Iter<'a> {
    buf: &'a [u8],
    num_blocks: u64,
    r: u8,
    nslots: u64,
    hash_mode: HashMode,
    seed: u32,
    key_bits: u8,
    value_bits: u8,
    current_quotient: u64,
    current_slot: Option<u64>,
    current_run_end: u64,
}

impl<'a> Iter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        buf: &'a [u8],
        num_blocks: u64,
        r: u8,
        nslots: u64,
        hash_mode: HashMode,
        seed: u32,
        key_bits: u8,
        value_bits: u8,
    ) -> Self {
        let mut it = Iter {
            buf,
            num_blocks,
            r,
            nslots,
            hash_mode,
            seed,
            key_bits,
            value_bits,
            current_quotient: 0,
            current_slot: None,
            current_run_end: 0,
        };
        it.enter_run_at_or_after(0);
        it
    }

    /// Builds an iterator positioned at the first element whose group
    /// starts at or after `start_slot` (spec §10.6 `iter_from_position`).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_position(
        buf: &'a [u8],
        num_blocks: u64,
        r: u8,
        nslots: u64,
        hash_mode: HashMode,
        seed: u32,
        key_bits: u8,
        value_bits: u8,
        start_slot: u64,
    ) -> Self {
        let mut it = Iter::new(buf, num_blocks, r, nslots, hash_mode, seed, key_bits, value_bits);
        while it.current_slot.map_or(false, |slot| slot < start_slot) {
            it.next();
        }
        it
    }

    /// Builds an iterator positioned at the first element whose fingerprint
    /// is `>= (key, value)`'s under the configured hash mode (spec §10.6
    /// `iter_from_key_value`).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_key_value(
        buf: &'a [u8],
        num_blocks: u64,
        r: u8,
        nslots: u64,
        hash_mode: HashMode,
        seed: u32,
        key_bits: u8,
        value_bits: u8,
        key: u64,
        value: u64,
        key_is_hash: bool,
    ) -> Self {
        let h = hash::fingerprint(hash_mode, seed, key, value, key_bits, value_bits, key_is_hash);
        let q = h >> r;
        let rem = h & bitops::lowbits_mask(r);
        let mut it = Iter::new(buf, num_blocks, r, nslots, hash_mode, seed, key_bits, value_bits);
        while let Some((cq, crem)) = it.peek_quotient_remainder() {
            if cq < q || (cq == q && crem < rem) {
                it.next();
            } else {
                break;
            }
        }
        it
    }

    fn peek_quotient_remainder(&self) -> Option<(u64, u64)> {
        let slot = self.current_slot?;
        Some((self.current_quotient, slot_store::get_slot(self.buf, slot, self.r)))
    }

    fn enter_run_at_or_after(&mut self, start_q: u64) {
        match next_occupied_from(self.buf, start_q, self.num_blocks, self.r) {
            Some(q) => {
                self.current_quotient = q;
                self.current_slot = kernel::find_run_start(self.buf, q, self.num_blocks, self.r);
                self.current_run_end = kernel::run_end_position(self.buf, q, self.num_blocks, self.r)
                    .expect("occupied quotient must have a run end");
            }
            None => self.current_slot = None,
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        let slot = self.current_slot?;
        let rem = slot_store::get_slot(self.buf, slot, self.r);
        let group: Vec<u64> = (slot..=self.current_run_end)
            .map(|i| slot_store::get_slot(self.buf, i, self.r))
            .collect();
        let (count, len) = counter::decode(&group, rem, self.r);
        let next_slot = slot + len as u64;

        let quotient = self.current_quotient;
        if next_slot > self.current_run_end {
            self.enter_run_at_or_after(quotient + 1);
        } else {
            self.current_slot = Some(next_slot);
        }

        let hash_value = (quotient << self.r) | rem;
        let key_value = hash::recover(self.hash_mode, self.seed, hash_value, self.key_bits, self.value_bits);
        Some(Element {
            start_slot: slot,
            hash: hash_value,
            count,
            key_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::total_buffer_len;

    fn build(r: u8, occupied: &[(u64, u64, u64, u64)], num_blocks: u64) -> Vec<u8> {
        // (quotient, remainder, count, slot) tuples, written directly.
        let mut buf = vec![0u8; total_buffer_len(num_blocks, r)];
        for &(q, rem, count, slot) in occupied {
            slot_store::set_occupied(&mut buf, q, r, true);
            let encoded = counter::encode(rem, count, r);
            for (i, &v) in encoded.iter().enumerate() {
                slot_store::set_slot(&mut buf, slot + i as u64, r, v);
            }
            slot_store::set_runend(&mut buf, slot + encoded.len() as u64 - 1, r, true);
        }
        buf
    }

    #[test]
    fn iterates_single_run_in_order() {
        let r = 6;
        let buf = build(r, &[(5, 3, 1, 5)], 1);
        let mut it = Iter::new(&buf, 1, r, 64, HashMode::None, 0, 6, 0);
        let el = it.next().unwrap();
        assert_eq!(el.hash, (5u64 << r) | 3);
        assert_eq!(el.count, 1);
        assert!(it.next().is_none());
    }

    #[test]
    fn iterates_multiple_runs_in_quotient_order() {
        let r = 6;
        let mut buf = vec![0u8; total_buffer_len(1, r)];
        slot_store::set_occupied(&mut buf, 2, r, true);
        slot_store::set_slot(&mut buf, 2, r, 7);
        slot_store::set_runend(&mut buf, 2, r, true);

        slot_store::set_occupied(&mut buf, 9, r, true);
        slot_store::set_slot(&mut buf, 3, r, 1);
        slot_store::set_runend(&mut buf, 3, r, true);

        let elements: Vec<_> = Iter::new(&buf, 1, r, 64, HashMode::None, 0, 6, 0).collect();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].hash, (2u64 << r) | 7);
        assert_eq!(elements[1].hash, (9u64 << r) | 1);
    }

    #[test]
    fn from_position_skips_earlier_groups() {
        let r = 6;
        let buf = build(r, &[(1, 2, 1, 1), (4, 3, 1, 4)], 1);
        let it = Iter::from_position(&buf, 1, r, 64, HashMode::None, 0, 6, 0, 3);
        let elements: Vec<_> = it.collect();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].hash, (4u64 << r) | 3);
    }

    #[test]
    fn from_key_value_seeks_to_matching_fingerprint() {
        let r = 6;
        let buf = build(r, &[(1, 2, 1, 1), (4, 3, 1, 4)], 1);
        let it = Iter::from_key_value(&buf, 1, r, 64, HashMode::None, 0, 6, 0, 4, 0, false);
        let elements: Vec<_> = it.collect();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].key_value, Some((4, 3)));
    }
}
