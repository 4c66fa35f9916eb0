//! ProDOS volume bitmap: one bit per block, most significant bit first,
//! 1 = free, 0 = used.

use log::trace;

use crate::cache::BlockCache;
use crate::error::DiskResult;
use crate::BLOCK_SIZE;

/// Blocks covered by one bitmap block.
pub const BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;

/// Number of blocks needed to store the bitmap of a `blocks`-block volume.
pub fn bitmap_blocks(blocks: u32) -> u32 {
    blocks.div_ceil(BITS_PER_BLOCK)
}

fn mask(block: u32) -> u8 {
    0x80 >> (block % 8)
}

/// In-memory free-block map with a first-fit allocator.
#[derive(Debug, Clone)]
pub struct Bitmap {
    bits: Vec<u8>,
    blocks: u32,
    free: u32,
    /// Byte where the next allocation scan starts.
    cursor: usize,
}

impl Bitmap {
    /// A bitmap with every one of `blocks` blocks free.
    pub fn new(blocks: u32) -> Self {
        let mut bits = vec![0u8; bitmap_blocks(blocks) as usize * BLOCK_SIZE];
        let whole = (blocks / 8) as usize;
        bits[..whole].fill(0xFF);
        if blocks % 8 != 0 {
            bits[whole] = !(0xFFu8 >> (blocks % 8));
        }
        Self {
            bits,
            blocks,
            free: blocks,
            cursor: 0,
        }
    }

    /// Read the bitmap of a `blocks`-block volume stored from block `start`.
    pub fn load<C: BlockCache + ?Sized>(cache: &mut C, start: u32, blocks: u32) -> DiskResult<Self> {
        let count = bitmap_blocks(blocks);
        let mut bits = vec![0u8; count as usize * BLOCK_SIZE];
        for (i, chunk) in bits.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            let mut buf = [0u8; BLOCK_SIZE];
            cache.read_block(start.saturating_add(i as u32), &mut buf)?;
            chunk.copy_from_slice(&buf);
        }

        let mut bitmap = Self {
            bits,
            blocks,
            free: 0,
            cursor: 0,
        };
        bitmap.force_padding_used();
        bitmap.free = bitmap.bits.iter().map(|b| b.count_ones()).sum();
        bitmap.cursor = bitmap.bits.iter().position(|b| *b != 0).unwrap_or(0);
        Ok(bitmap)
    }

    /// Store the bitmap from block `start`.
    pub fn write<C: BlockCache + ?Sized>(&self, cache: &mut C, start: u32) -> DiskResult<()> {
        for (i, chunk) in self.bits.chunks_exact(BLOCK_SIZE).enumerate() {
            let mut buf = [0u8; BLOCK_SIZE];
            buf.copy_from_slice(chunk);
            cache.write_block(start.saturating_add(i as u32), &buf)?;
        }
        Ok(())
    }

    fn force_padding_used(&mut self) {
        let whole = (self.blocks / 8) as usize;
        if self.blocks % 8 != 0 {
            self.bits[whole] &= !(0xFFu8 >> (self.blocks % 8));
        }
        let tail = whole + usize::from(self.blocks % 8 != 0);
        self.bits[tail..].fill(0);
    }

    /// Number of blocks the bitmap describes.
    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    pub fn free_blocks(&self) -> u32 {
        self.free
    }

    pub fn is_free(&self, block: u32) -> bool {
        block < self.blocks && self.bits[(block / 8) as usize] & mask(block) != 0
    }

    /// Allocate the first free block at or after the scan cursor, wrapping
    /// around to the start. `None` when the volume is full.
    pub fn alloc_block(&mut self) -> Option<u32> {
        let len = self.bits.len();
        let byte = (self.cursor..len)
            .chain(0..self.cursor)
            .find(|&i| self.bits[i] != 0)?;
        let bit = self.bits[byte].leading_zeros();
        let block = byte as u32 * 8 + bit;
        self.bits[byte] &= !(0x80 >> bit);
        self.cursor = byte;
        self.free -= 1;
        trace!("allocated block {block}");
        Some(block)
    }

    /// Allocate a specific block. `false` if it is out of range or in use.
    pub fn alloc_block_at(&mut self, block: u32) -> bool {
        if !self.is_free(block) {
            return false;
        }
        self.bits[(block / 8) as usize] &= !mask(block);
        self.free -= 1;
        trace!("allocated block {block}");
        true
    }

    /// Return a block to the free pool. Out-of-range and already free blocks
    /// are ignored.
    pub fn free_block(&mut self, block: u32) {
        if block >= self.blocks || self.is_free(block) {
            return;
        }
        self.bits[(block / 8) as usize] |= mask(block);
        self.free += 1;
        trace!("freed block {block}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PooledCache;
    use crate::config::DeviceOptions;
    use crate::device::BlockDevice;
    use crate::image::ImageFormat;
    use std::collections::HashSet;

    #[test]
    fn test_bitmap_blocks() {
        assert_eq!(bitmap_blocks(1), 1);
        assert_eq!(bitmap_blocks(280), 1);
        assert_eq!(bitmap_blocks(4096), 1);
        assert_eq!(bitmap_blocks(4097), 2);
        assert_eq!(bitmap_blocks(65535), 16);
    }

    #[test]
    fn test_fresh_bitmap_exhausts() {
        let mut bitmap = Bitmap::new(280);
        assert_eq!(bitmap.free_blocks(), 280);
        let mut seen = HashSet::new();
        for _ in 0..280 {
            let block = bitmap.alloc_block().unwrap();
            assert!(block < 280);
            assert!(seen.insert(block));
        }
        assert_eq!(bitmap.free_blocks(), 0);
        assert_eq!(bitmap.alloc_block(), None);
    }

    #[test]
    fn test_padding_never_allocated() {
        let mut bitmap = Bitmap::new(13);
        assert_eq!(bitmap.free_blocks(), 13);
        let mut allocated: Vec<u32> = std::iter::from_fn(|| bitmap.alloc_block()).collect();
        allocated.sort_unstable();
        assert_eq!(allocated, (0..13).collect::<Vec<_>>());
        assert!(!bitmap.alloc_block_at(13));
        assert!(!bitmap.is_free(15));
    }

    #[test]
    fn test_alloc_at_and_free() {
        let mut bitmap = Bitmap::new(64);
        assert!(bitmap.alloc_block_at(10));
        assert!(!bitmap.alloc_block_at(10));
        assert!(!bitmap.alloc_block_at(64));
        assert_eq!(bitmap.free_blocks(), 63);

        bitmap.free_block(10);
        bitmap.free_block(10);
        bitmap.free_block(1000);
        assert_eq!(bitmap.free_blocks(), 64);
        assert!(bitmap.is_free(10));
    }

    #[test]
    fn test_scan_wraps_around() {
        let mut bitmap = Bitmap::new(24);
        for _ in 0..20 {
            bitmap.alloc_block().unwrap();
        }
        // Cursor now sits in byte 2; a block freed behind it is found by
        // wrapping after the tail is used up.
        bitmap.free_block(3);
        assert_eq!(bitmap.alloc_block(), Some(20));
        for _ in 0..3 {
            bitmap.alloc_block().unwrap();
        }
        assert_eq!(bitmap.alloc_block(), Some(3));
        assert_eq!(bitmap.alloc_block(), None);
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let dev = BlockDevice::create(
            dir.path().join("disk.po"),
            ImageFormat::ProDosOrder,
            280,
            &DeviceOptions::default(),
        )
        .unwrap();
        let mut cache = PooledCache::new(dev, 16);

        let mut bitmap = Bitmap::new(280);
        for block in 0..7 {
            assert!(bitmap.alloc_block_at(block));
        }
        bitmap.write(&mut cache, 6).unwrap();

        let mut buf = [0u8; BLOCK_SIZE];
        cache.read_block(6, &mut buf).unwrap();
        assert_eq!(buf[0], 0x01);
        assert_eq!(buf[1], 0xFF);
        assert_eq!(buf[35], 0x00);

        let mut loaded = Bitmap::load(&mut cache, 6, 280).unwrap();
        assert_eq!(loaded.free_blocks(), 273);
        assert!(!loaded.is_free(6));
        assert_eq!(loaded.alloc_block(), Some(7));
    }

    #[test]
    fn test_load_forces_padding() {
        let dir = tempfile::tempdir().unwrap();
        let dev = BlockDevice::create(
            dir.path().join("disk.po"),
            ImageFormat::ProDosOrder,
            16,
            &DeviceOptions::default(),
        )
        .unwrap();
        let mut cache = PooledCache::new(dev, 16);
        cache.write_block(2, &[0xFF; BLOCK_SIZE]).unwrap();

        let mut bitmap = Bitmap::load(&mut cache, 2, 13).unwrap();
        assert_eq!(bitmap.free_blocks(), 13);
        let mut count = 0;
        while let Some(block) = bitmap.alloc_block() {
            assert!(block < 13);
            count += 1;
        }
        assert_eq!(count, 13);
    }
}
