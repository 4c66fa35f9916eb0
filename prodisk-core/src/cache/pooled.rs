//! Reference-counted LRU block pool.
//!
//! Entries live in one growable arena and are linked by index:
//! - a fixed array of hash buckets, each heading a chain through `chain`
//! - a doubly linked free list through `prev`/`next`, holding every entry
//!   with a zero refcount, least recently released first
//!
//! A released entry keeps its block binding until it is recycled, so a
//! later `acquire` of the same block is a hit.

use std::borrow::{Borrow, BorrowMut};

use log::{debug, trace, warn};

use super::{BlockCache, BlockHandle};
use crate::config::MIN_POOL_SIZE;
use crate::device::BlockDevice;
use crate::error::{DiskError, DiskResult};
use crate::image::check_block;
use crate::BLOCK_SIZE;

const BUCKETS: usize = 23;
const NIL: usize = usize::MAX;

struct Entry {
    block: Option<u32>,
    data: Box<[u8; BLOCK_SIZE]>,
    dirty: bool,
    refs: u32,
    prev: usize,
    next: usize,
    chain: usize,
}

impl Entry {
    fn unbound() -> Self {
        Self {
            block: None,
            data: Box::new([0u8; BLOCK_SIZE]),
            dirty: false,
            refs: 0,
            prev: NIL,
            next: NIL,
            chain: NIL,
        }
    }
}

fn bucket(block: u32) -> usize {
    block as usize % BUCKETS
}

/// Pooled write-back cache.
///
/// `D` is either an owned [`BlockDevice`] or `&mut BlockDevice`.
pub struct PooledCache<D: BorrowMut<BlockDevice> = BlockDevice> {
    device: D,
    entries: Vec<Entry>,
    buckets: [usize; BUCKETS],
    free_head: usize,
    free_tail: usize,
}

impl<D: BorrowMut<BlockDevice>> PooledCache<D> {
    /// Build a cache with `pool_size` buffers (at least 16).
    pub fn new(device: D, pool_size: usize) -> Self {
        let mut cache = Self {
            device,
            entries: Vec::new(),
            buckets: [NIL; BUCKETS],
            free_head: NIL,
            free_tail: NIL,
        };
        for _ in 0..pool_size.max(MIN_POOL_SIZE) {
            let slot = cache.entries.len();
            cache.entries.push(Entry::unbound());
            cache.push_free(slot);
        }
        cache
    }

    /// Current number of buffers in the pool.
    pub fn entries(&self) -> usize {
        self.entries.len()
    }

    /// Whether `block` currently has a buffer, checked out or not.
    pub fn resident(&self, block: u32) -> bool {
        self.find(block).is_some()
    }

    fn device_mut(&mut self) -> &mut BlockDevice {
        self.device.borrow_mut()
    }

    fn find(&self, block: u32) -> Option<usize> {
        let mut slot = self.buckets[bucket(block)];
        while slot != NIL {
            if self.entries[slot].block == Some(block) {
                return Some(slot);
            }
            slot = self.entries[slot].chain;
        }
        None
    }

    fn hash_insert(&mut self, slot: usize, block: u32) {
        let b = bucket(block);
        self.entries[slot].block = Some(block);
        self.entries[slot].chain = self.buckets[b];
        self.buckets[b] = slot;
    }

    fn hash_remove(&mut self, slot: usize) {
        let Some(block) = self.entries[slot].block.take() else {
            return;
        };
        let b = bucket(block);
        let next = self.entries[slot].chain;
        self.entries[slot].chain = NIL;
        if self.buckets[b] == slot {
            self.buckets[b] = next;
            return;
        }
        let mut cur = self.buckets[b];
        while cur != NIL {
            if self.entries[cur].chain == slot {
                self.entries[cur].chain = next;
                return;
            }
            cur = self.entries[cur].chain;
        }
    }

    fn push_free(&mut self, slot: usize) {
        self.entries[slot].prev = self.free_tail;
        self.entries[slot].next = NIL;
        if self.free_tail == NIL {
            self.free_head = slot;
        } else {
            self.entries[self.free_tail].next = slot;
        }
        self.free_tail = slot;
    }

    fn unlink_free(&mut self, slot: usize) {
        let (prev, next) = (self.entries[slot].prev, self.entries[slot].next);
        if prev == NIL {
            self.free_head = next;
        } else {
            self.entries[prev].next = next;
        }
        if next == NIL {
            self.free_tail = prev;
        } else {
            self.entries[next].prev = prev;
        }
        self.entries[slot].prev = NIL;
        self.entries[slot].next = NIL;
    }

    fn write_back(&mut self, slot: usize) -> DiskResult<()> {
        let entry = &mut self.entries[slot];
        if let (true, Some(block)) = (entry.dirty, entry.block) {
            let device: &mut BlockDevice = self.device.borrow_mut();
            device.write(block, &entry.data)?;
            entry.dirty = false;
        }
        Ok(())
    }

    /// Find a buffer for a new binding: recycle the least recently released
    /// entry or grow the pool.
    fn take_slot(&mut self) -> DiskResult<usize> {
        let slot = self.free_head;
        if slot == NIL {
            let slot = self.entries.len();
            self.entries.push(Entry::unbound());
            debug!("block cache grew to {} entries", self.entries.len());
            return Ok(slot);
        }
        self.write_back(slot)?;
        if let Some(old) = self.entries[slot].block {
            trace!("recycling cache slot {slot} (block {old})");
        }
        self.unlink_free(slot);
        self.hash_remove(slot);
        Ok(slot)
    }

    fn checked_out(&self, handle: BlockHandle) -> DiskResult<usize> {
        let slot = handle.slot();
        match self.entries.get(slot) {
            Some(entry) if entry.block == Some(handle.block()) && entry.refs > 0 => Ok(slot),
            _ => Err(DiskError::StaleHandle(handle.block())),
        }
    }
}

impl<D: BorrowMut<BlockDevice>> BlockCache for PooledCache<D> {
    fn blocks(&self) -> u32 {
        self.device().blocks()
    }

    fn read_only(&self) -> bool {
        self.device().read_only()
    }

    fn acquire(&mut self, block: u32) -> DiskResult<BlockHandle> {
        if let Some(slot) = self.find(block) {
            trace!("cache hit: block {block}");
            if self.entries[slot].refs == 0 {
                self.unlink_free(slot);
            }
            self.entries[slot].refs += 1;
            return Ok(BlockHandle::new(block, slot));
        }

        trace!("cache miss: block {block}");
        check_block(block, self.blocks())?;
        // Read before touching the pool so a failure leaves it unchanged.
        let mut data = [0u8; BLOCK_SIZE];
        self.device_mut().read(block, &mut data)?;

        let slot = self.take_slot()?;
        let entry = &mut self.entries[slot];
        *entry.data = data;
        entry.dirty = false;
        entry.refs = 1;
        self.hash_insert(slot, block);
        Ok(BlockHandle::new(block, slot))
    }

    fn data(&self, handle: BlockHandle) -> DiskResult<&[u8; BLOCK_SIZE]> {
        let slot = self.checked_out(handle)?;
        Ok(&*self.entries[slot].data)
    }

    fn data_mut(&mut self, handle: BlockHandle) -> DiskResult<&mut [u8; BLOCK_SIZE]> {
        let slot = self.checked_out(handle)?;
        if self.read_only() {
            return Err(DiskError::ReadOnly);
        }
        Ok(&mut *self.entries[slot].data)
    }

    fn release(&mut self, handle: BlockHandle, dirty: bool, commit_now: bool) -> DiskResult<()> {
        let slot = self.checked_out(handle)?;
        let result = if dirty && self.read_only() {
            Err(DiskError::ReadOnly)
        } else {
            self.entries[slot].dirty |= dirty;
            if commit_now {
                self.write_back(slot)
            } else {
                Ok(())
            }
        };
        // The pin is dropped even when the release fails.
        let entry = &mut self.entries[slot];
        entry.refs -= 1;
        if entry.refs == 0 {
            self.push_free(slot);
        }
        result
    }

    fn mark_dirty(&mut self, block: u32) -> DiskResult<()> {
        let slot = self.find(block).ok_or(DiskError::StaleHandle(block))?;
        if self.read_only() {
            return Err(DiskError::ReadOnly);
        }
        self.entries[slot].dirty = true;
        Ok(())
    }

    fn sync(&mut self) -> DiskResult<()> {
        for slot in 0..self.entries.len() {
            self.write_back(slot)?;
        }
        self.device_mut().flush()
    }

    fn device(&self) -> &BlockDevice {
        Borrow::borrow(&self.device)
    }
}

impl<D: BorrowMut<BlockDevice>> Drop for PooledCache<D> {
    fn drop(&mut self) {
        let pinned = self.entries.iter().filter(|e| e.refs > 0).count();
        if pinned > 0 {
            warn!("block cache dropped with {pinned} blocks still acquired");
        }
        if let Err(err) = self.sync() {
            warn!("failed to flush block cache: {err}");
        }
    }
}
