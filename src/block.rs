//! Block layout: groups of 64 slots, each carrying an `occupied` mask, a
//! `runend` mask, and an `offset` hint, laid out byte-exactly inside the
//! flat backing buffer (see [`crate::buffer`] for the surrounding header).
//!
//! On-disk/in-memory shape of one block, for `r`-bit slots (mirrors the
//! byte-layout doc-comment style used for packed on-disk records elsewhere
//! in this codebase's lineage):
//!
//! ```text
//! [OFFSET: 1][OCCUPIED: 8][RUNEND: 8][SLOTS: 8*r]
//! OFFSET   - distance in slots from this block's base to the runend of the
//!            last run whose home quotient precedes this block, or the
//!            sentinel OFFSET_UNKNOWN if that distance doesn't fit a byte.
//! OCCUPIED - little-endian bitmask, bit i set iff some element has home
//!            quotient block_base + i.
//! RUNEND   - little-endian bitmask, bit i set iff slot block_base + i is
//!            the last slot of some run.
//! SLOTS    - 64 slots of r bits each, bit-packed low-to-high.
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::buffer::HEADER_LEN;

/// Number of slots per block.
pub const SLOTS_PER_BLOCK: usize = 64;

/// Byte size of the `offset` + `occupied` + `runend` prefix of a block.
pub const BLOCK_METADATA_BYTES: usize = 1 + 8 + 8;

/// Sentinel `offset` value meaning "overflowed a byte; recompute by
/// scanning preceding blocks".
pub const OFFSET_UNKNOWN: u8 = 255;

/// Byte length of one block's slot array, for `r`-bit slots.
///
/// `SLOTS_PER_BLOCK * r` bits is always a whole number of bytes because
/// `SLOTS_PER_BLOCK` is a multiple of 8.
#[inline]
pub fn slots_bytes(r: u8) -> usize {
    SLOTS_PER_BLOCK * r as usize / 8
}

/// Total byte stride between consecutive blocks, for `r`-bit slots.
#[inline]
pub fn block_stride_bytes(r: u8) -> usize {
    BLOCK_METADATA_BYTES + slots_bytes(r)
}

/// Byte offset of block `block_index`'s metadata prefix within the buffer.
#[inline]
pub fn block_byte_offset(block_index: u64, r: u8) -> usize {
    HEADER_LEN + block_index as usize * block_stride_bytes(r)
}

/// Byte offset of block `block_index`'s slot array within the buffer.
#[inline]
pub fn block_slots_byte_offset(block_index: u64, r: u8) -> usize {
    block_byte_offset(block_index, r) + BLOCK_METADATA_BYTES
}

/// Reads the `offset` byte of block `block_index`.
#[inline]
pub fn read_offset(buf: &[u8], block_index: u64, r: u8) -> u8 {
    buf[block_byte_offset(block_index, r)]
}

/// Writes the `offset` byte of block `block_index`.
#[inline]
pub fn write_offset(buf: &mut [u8], block_index: u64, r: u8, value: u8) {
    buf[block_byte_offset(block_index, r)] = value;
}

/// Reads the `occupied` mask of block `block_index`.
#[inline]
pub fn read_occupied(buf: &[u8], block_index: u64, r: u8) -> u64 {
    let pos = block_byte_offset(block_index, r) + 1;
    LittleEndian::read_u64(&buf[pos..pos + 8])
}

/// Writes the `occupied` mask of block `block_index`.
#[inline]
pub fn write_occupied(buf: &mut [u8], block_index: u64, r: u8, value: u64) {
    let pos = block_byte_offset(block_index, r) + 1;
    LittleEndian::write_u64(&mut buf[pos..pos + 8], value);
}

/// Reads the `runend` mask of block `block_index`.
#[inline]
pub fn read_runend(buf: &[u8], block_index: u64, r: u8) -> u64 {
    let pos = block_byte_offset(block_index, r) + 9;
    LittleEndian::read_u64(&buf[pos..pos + 8])
}

/// Writes the `runend` mask of block `block_index`.
#[inline]
pub fn write_runend(buf: &mut [u8], block_index: u64, r: u8, value: u64) {
    let pos = block_byte_offset(block_index, r) + 9;
    LittleEndian::write_u64(&mut buf[pos..pos + 8], value);
}

/// Total buffer size, in bytes, required to hold `num_blocks` blocks of
/// `r`-bit slots following the header.
#[inline]
pub fn total_buffer_len(num_blocks: u64, r: u8) -> usize {
    HEADER_LEN + num_blocks as usize * block_stride_bytes(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_is_whole_bytes() {
        for r in 1..=56u8 {
            assert_eq!(slots_bytes(r) * 8, SLOTS_PER_BLOCK * r as usize);
        }
    }

    #[test]
    fn offset_occupied_runend_roundtrip() {
        let r = 6;
        let mut buf = vec![0u8; total_buffer_len(4, r)];
        write_offset(&mut buf, 2, r, 17);
        write_occupied(&mut buf, 2, r, 0xDEAD_BEEF);
        write_runend(&mut buf, 2, r, 0xCAFE_F00D);
        assert_eq!(read_offset(&buf, 2, r), 17);
        assert_eq!(read_occupied(&buf, 2, r), 0xDEAD_BEEF);
        assert_eq!(read_runend(&buf, 2, r), 0xCAFE_F00D);
        // Adjacent blocks are untouched.
        assert_eq!(read_occupied(&buf, 1, r), 0);
        assert_eq!(read_occupied(&buf, 3, r), 0);
    }
}
