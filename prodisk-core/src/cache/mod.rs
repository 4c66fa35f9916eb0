//! Block caches over a [`BlockDevice`].
//!
//! Two strategies share the [`BlockCache`] contract:
//! - [`PooledCache`]: reference-counted LRU pool of owned buffers
//! - [`MappedCache`]: hands out slices of the device's memory map
//!
//! Every `acquire` must be paired with exactly one `release`. Neither cache
//! does any locking.

mod mapped;
mod pooled;

pub use mapped::MappedCache;
pub use pooled::PooledCache;

use crate::device::BlockDevice;
use crate::error::DiskResult;
use crate::BLOCK_SIZE;

/// Token for a block checked out of a cache.
///
/// A handle stays valid until it is passed to [`BlockCache::release`];
/// using it afterwards fails with `StaleHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    block: u32,
    slot: usize,
}

impl BlockHandle {
    pub(crate) fn new(block: u32, slot: usize) -> Self {
        Self { block, slot }
    }

    pub fn block(&self) -> u32 {
        self.block
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }
}

pub trait BlockCache {
    /// Number of blocks on the underlying device.
    fn blocks(&self) -> u32;

    fn read_only(&self) -> bool;

    /// Check out a block. Acquiring a block twice without a release yields
    /// the same buffer.
    fn acquire(&mut self, block: u32) -> DiskResult<BlockHandle>;

    fn data(&self, handle: BlockHandle) -> DiskResult<&[u8; BLOCK_SIZE]>;

    /// Writable view of a checked-out block. Changes reach the device once
    /// the block is released or marked dirty and then synced.
    fn data_mut(&mut self, handle: BlockHandle) -> DiskResult<&mut [u8; BLOCK_SIZE]>;

    /// Return a block. `dirty` records a modification; `commit_now` writes
    /// the block through to the device immediately.
    fn release(&mut self, handle: BlockHandle, dirty: bool, commit_now: bool) -> DiskResult<()>;

    /// Flag a resident block as modified.
    fn mark_dirty(&mut self, block: u32) -> DiskResult<()>;

    /// Write back every dirty block, then flush the device.
    fn sync(&mut self) -> DiskResult<()>;

    fn device(&self) -> &BlockDevice;

    /// Copy one block out through the cache.
    fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> DiskResult<()> {
        let handle = self.acquire(block)?;
        let copied = self.data(handle).map(|data| buf.copy_from_slice(data));
        let released = self.release(handle, false, false);
        copied.and(released)
    }

    /// Replace one block through the cache (write-back).
    fn write_block(&mut self, block: u32, buf: &[u8; BLOCK_SIZE]) -> DiskResult<()> {
        let handle = self.acquire(block)?;
        let copied = self.data_mut(handle).map(|data| data.copy_from_slice(buf));
        let released = self.release(handle, copied.is_ok(), false);
        copied.and(released)
    }

    fn zero_block(&mut self, block: u32) -> DiskResult<()> {
        self.write_block(block, &[0u8; BLOCK_SIZE])
    }
}
