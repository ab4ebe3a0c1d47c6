//! The byte-exact persistent buffer layout (spec §6.4) and the
//! "opaque byte buffer provider" seam (spec §1, §9) that lets a caller plug
//! in their own backing storage (e.g. a memory-mapped file) instead of a
//! plain `Vec<u8>`.
//!
//! Layout:
//!
//! ```text
//! [HEADER: 56][BLOCK 0][BLOCK 1]...[BLOCK num_blocks-1]
//! ```
//!
//! See [`crate::block`] for the per-block layout. The header is fixed-width
//! and little-endian throughout, so the same bytes read back identically on
//! any target.

use byteorder::{ByteOrder, LittleEndian};

use crate::block;
use crate::config::{FilterConfig, HashMode};
use crate::error::{CqfError, Result};

/// Total byte length of the header.
pub const HEADER_LEN: usize = 56;

/// A type that can back a filter's storage: owns a byte buffer that can be
/// read and written in place. A plain `Vec<u8>` is the default; a
/// caller-provided memory-mapped region is the canonical alternative (the
/// mmap backend itself is out of scope for this crate, per spec §1 — this
/// trait is the seam such a backend would implement).
pub trait BackingStore: AsRef<[u8]> + AsMut<[u8]> {}

impl<T> BackingStore for T where T: AsRef<[u8]> + AsMut<[u8]> {}

/// Decoded view of the fixed-width header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub nslots: u64,
    pub key_bits: u8,
    pub value_bits: u8,
    pub r: u8,
    pub hash_mode: HashMode,
    pub seed: u32,
    pub num_blocks: u64,
    pub occupied_slots: u64,
    pub distinct_pairs: u64,
    pub sum_of_counts: u64,
    pub auto_resize: bool,
}

fn hash_mode_to_u8(mode: HashMode) -> u8 {
    match mode {
        HashMode::Default => 0,
        HashMode::Invertible => 1,
        HashMode::None => 2,
    }
}

fn hash_mode_from_u8(byte: u8) -> Result<HashMode> {
    match byte {
        0 => Ok(HashMode::Default),
        1 => Ok(HashMode::Invertible),
        2 => Ok(HashMode::None),
        other => Err(CqfError::Invalid(format!("unknown hash mode byte {}", other))),
    }
}

impl Header {
    pub(crate) fn from_config(config: &FilterConfig) -> Self {
        Header {
            nslots: config.nslots(),
            key_bits: config.key_bits(),
            value_bits: config.value_bits(),
            r: config.r(),
            hash_mode: config.hash_mode(),
            seed: config.seed(),
            num_blocks: config.num_blocks(),
            occupied_slots: 0,
            distinct_pairs: 0,
            sum_of_counts: 0,
            auto_resize: config.auto_resize(),
        }
    }

    pub(crate) fn to_config(self) -> Result<FilterConfig> {
        FilterConfig::new(self.nslots, self.key_bits, self.value_bits, self.hash_mode)
            .map(|c| c.with_seed(self.seed).with_auto_resize(self.auto_resize))
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.nslots);
        buf[8] = self.key_bits;
        buf[9] = self.value_bits;
        buf[10] = self.r;
        buf[11] = hash_mode_to_u8(self.hash_mode);
        LittleEndian::write_u32(&mut buf[12..16], self.seed);
        LittleEndian::write_u64(&mut buf[16..24], self.num_blocks);
        LittleEndian::write_u64(&mut buf[24..32], self.occupied_slots);
        LittleEndian::write_u64(&mut buf[32..40], self.distinct_pairs);
        LittleEndian::write_u64(&mut buf[40..48], self.sum_of_counts);
        buf[48] = self.auto_resize as u8;
        for byte in &mut buf[49..HEADER_LEN] {
            *byte = 0;
        }
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(CqfError::BufferTooSmall {
                required: HEADER_LEN,
            });
        }
        Ok(Header {
            nslots: LittleEndian::read_u64(&buf[0..8]),
            key_bits: buf[8],
            value_bits: buf[9],
            r: buf[10],
            hash_mode: hash_mode_from_u8(buf[11])?,
            seed: LittleEndian::read_u32(&buf[12..16]),
            num_blocks: LittleEndian::read_u64(&buf[16..24]),
            occupied_slots: LittleEndian::read_u64(&buf[24..32]),
            distinct_pairs: LittleEndian::read_u64(&buf[32..40]),
            sum_of_counts: LittleEndian::read_u64(&buf[40..48]),
            auto_resize: buf[48] != 0,
        })
    }
}

/// Total number of bytes a buffer must have to back `config`.
pub fn required_buffer_len(config: &FilterConfig) -> usize {
    block::total_buffer_len(config.num_blocks(), config.r())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let config = FilterConfig::new(64, 10, 0, HashMode::Invertible)
            .unwrap()
            .with_seed(42)
            .with_auto_resize(true);
        let mut header = Header::from_config(&config);
        header.occupied_slots = 3;
        header.distinct_pairs = 3;
        header.sum_of_counts = 5;

        let mut buf = vec![0u8; HEADER_LEN];
        header.encode(&mut buf);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        let round_tripped_config = decoded.to_config().unwrap();
        assert_eq!(round_tripped_config.seed(), 42);
        assert!(round_tripped_config.auto_resize());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let buf = vec![0u8; 10];
        assert!(matches!(
            Header::decode(&buf),
            Err(CqfError::BufferTooSmall { .. })
        ));
    }
}
