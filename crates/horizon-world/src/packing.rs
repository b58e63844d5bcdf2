//! Fixed-width bit packing into 64-bit words.
//!
//! Entries are packed LSB-first. An entry whose bit range crosses a word
//! boundary is split: its low bits fill the remaining high bits of the
//! current word and its high bits start the next word.

use thiserror::Error;

/// Bits per heightmap entry.
pub const HEIGHTMAP_BITS: u32 = 9;

/// Entries in a 16x16 surface heightmap.
pub const HEIGHTMAP_ENTRIES: usize = 256;

/// Bit packing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackingError {
    /// Bits per entry outside 1..=32
    #[error("bits per entry must be in 1..=32, got {0}")]
    InvalidBits(u32),
    /// Value does not fit in the entry width
    #[error("value {value} at index {index} does not fit in {bits} bits")]
    ValueOutOfRange {
        /// Entry index
        index: usize,
        /// Offending value
        value: u32,
        /// Entry width
        bits: u32,
    },
    /// Not enough words for the requested entry count
    #[error("packed data truncated: need {expected} words, got {actual}")]
    Truncated {
        /// Words required
        expected: usize,
        /// Words supplied
        actual: usize,
    },
}

/// Result type for packing operations.
pub type PackingResult<T> = Result<T, PackingError>;

/// Number of 64-bit words needed for `entries` values of `bits` each.
#[must_use]
pub const fn packed_len(entries: usize, bits: u32) -> usize {
    (entries * bits as usize).div_ceil(64)
}

/// Smallest width able to hold `max_value`.
#[must_use]
pub const fn bits_needed(max_value: u32) -> u32 {
    if max_value == 0 {
        1
    } else {
        32 - max_value.leading_zeros()
    }
}

const fn check_bits(bits: u32) -> PackingResult<u64> {
    if bits == 0 || bits > 32 {
        return Err(PackingError::InvalidBits(bits));
    }
    Ok((1u64 << bits) - 1)
}

/// Packs `values` at `bits` per entry.
pub fn pack(values: &[u32], bits: u32) -> PackingResult<Vec<u64>> {
    let mask = check_bits(bits)?;
    let width = bits as usize;
    let mut out = vec![0u64; packed_len(values.len(), bits)];

    for (index, &value) in values.iter().enumerate() {
        let value = u64::from(value);
        if value > mask {
            return Err(PackingError::ValueOutOfRange {
                index,
                value: value as u32,
                bits,
            });
        }
        let bit = index * width;
        let word = bit / 64;
        let offset = bit % 64;
        out[word] |= value << offset;
        if offset + width > 64 {
            out[word + 1] |= value >> (64 - offset);
        }
    }

    Ok(out)
}

/// Unpacks `entries` values of `bits` each from `data`.
pub fn unpack(data: &[u64], bits: u32, entries: usize) -> PackingResult<Vec<u32>> {
    let mask = check_bits(bits)?;
    let expected = packed_len(entries, bits);
    if data.len() < expected {
        return Err(PackingError::Truncated {
            expected,
            actual: data.len(),
        });
    }

    let width = bits as usize;
    let values = (0..entries)
        .map(|index| {
            let bit = index * width;
            let word = bit / 64;
            let offset = bit % 64;
            let mut value = data[word] >> offset;
            if offset + width > 64 {
                value |= data[word + 1] << (64 - offset);
            }
            (value & mask) as u32
        })
        .collect();

    Ok(values)
}

/// Packs a 256-entry heightmap at 9 bits per entry.
pub fn pack_heightmap(heights: &[u32]) -> PackingResult<Vec<u64>> {
    pack(heights, HEIGHTMAP_BITS)
}

/// Unpacks a 256-entry, 9-bit heightmap.
pub fn unpack_heightmap(data: &[u64]) -> PackingResult<Vec<u32>> {
    unpack(data, HEIGHTMAP_BITS, HEIGHTMAP_ENTRIES)
}
