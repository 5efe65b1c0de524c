//! Mapping of sector extents onto fixed-size logical blocks.

use std::ops::RangeInclusive;

use crate::config::BlockSize;

/// Return every logical block index touched by the extent
/// `[address, address + length]`, both in sectors.
///
/// Truncating division is used on both ends, so a zero-length extent still
/// maps to the single block containing `address`, and an extent ending
/// exactly on a block boundary also includes the block starting there.
///
/// # Examples
///
/// ```
/// use trconv::blocks::map_blocks;
/// use trconv::config::BlockSize;
///
/// let bs = BlockSize::from_sectors(1024).unwrap();
/// let blocks: Vec<u64> = map_blocks(1000, 3000, bs).collect();
/// assert_eq!(blocks, vec![0, 1, 2, 3]);
/// ```
#[inline]
pub fn map_blocks(address: u64, length: u64, block_size: BlockSize) -> RangeInclusive<u64> {
    let bs = block_size.sectors();
    let start = address / bs;
    let end = address.saturating_add(length) / bs;
    start..=end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bs(sectors: u64) -> BlockSize {
        BlockSize::from_sectors(sectors).unwrap()
    }

    #[test]
    fn test_example_extent() {
        let blocks: Vec<u64> = map_blocks(1000, 3000, bs(1024)).collect();
        assert_eq!(blocks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_zero_length_maps_to_containing_block() {
        let blocks: Vec<u64> = map_blocks(2047, 0, bs(1024)).collect();
        assert_eq!(blocks, vec![1]);
    }

    #[test]
    fn test_block_size_one_is_identity() {
        let blocks: Vec<u64> = map_blocks(10, 2, bs(1)).collect();
        assert_eq!(blocks, vec![10, 11, 12]);
    }

    #[test]
    fn test_boundary_end_includes_next_block() {
        // 4096 + 512 lands exactly on the start of block 576.
        let blocks: Vec<u64> = map_blocks(4096, 512, bs(8)).collect();
        assert_eq!(blocks.len(), 65);
        assert_eq!(blocks.first(), Some(&512));
        assert_eq!(blocks.last(), Some(&576));
    }

    #[test]
    fn test_count_matches_formula() {
        for &(addr, len, size) in &[
            (0u64, 0u64, 1u64),
            (7, 9, 4),
            (1_000_000, 4096, 2048),
            (123_456_789, 1, 8),
            (511, 1, 512),
        ] {
            let blocks: Vec<u64> = map_blocks(addr, len, bs(size)).collect();
            let expected = (addr + len) / size - addr / size + 1;
            assert_eq!(blocks.len() as u64, expected, "{addr} {len} {size}");
            assert_eq!(blocks[0], addr / size);
            assert!(blocks.windows(2).all(|w| w[1] == w[0] + 1));
        }
    }
}
