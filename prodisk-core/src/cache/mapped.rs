//! Pass-through cache over a memory-mapped device.

use std::borrow::{Borrow, BorrowMut};
use std::collections::BTreeSet;

use log::warn;

use super::{BlockCache, BlockHandle};
use crate::device::BlockDevice;
use crate::error::{DiskError, DiskResult};
use crate::image::check_block;
use crate::BLOCK_SIZE;

/// Cache whose buffers are the device's own mapped pages.
///
/// Acquiring pins nothing; releasing only records which blocks need an
/// msync. Requires a mapped device with a contiguous block layout
/// (ProDOS-order data, optionally behind a header).
pub struct MappedCache<D: BorrowMut<BlockDevice> = BlockDevice> {
    device: D,
    dirty: BTreeSet<u32>,
}

impl<D: BorrowMut<BlockDevice>> MappedCache<D> {
    pub fn new(device: D) -> DiskResult<Self> {
        let dev: &BlockDevice = Borrow::borrow(&device);
        if !dev.supports_mapping() {
            return Err(DiskError::Unsupported(format!(
                "{} image cannot be accessed through a direct mapping",
                dev.format().name()
            )));
        }
        Ok(Self {
            device,
            dirty: BTreeSet::new(),
        })
    }

    fn device_mut(&mut self) -> &mut BlockDevice {
        self.device.borrow_mut()
    }

    /// msync the pages under one block, whether or not it was released dirty.
    pub fn sync_block(&mut self, block: u32) -> DiskResult<()> {
        self.device_mut().sync_block(block)?;
        self.dirty.remove(&block);
        Ok(())
    }

    /// Blocks released dirty since the last sync.
    pub fn dirty_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.dirty.iter().copied()
    }
}

impl<D: BorrowMut<BlockDevice>> BlockCache for MappedCache<D> {
    fn blocks(&self) -> u32 {
        self.device().blocks()
    }

    fn read_only(&self) -> bool {
        self.device().read_only()
    }

    fn acquire(&mut self, block: u32) -> DiskResult<BlockHandle> {
        check_block(block, self.blocks())?;
        Ok(BlockHandle::new(block, block as usize))
    }

    fn data(&self, handle: BlockHandle) -> DiskResult<&[u8; BLOCK_SIZE]> {
        self.device().mapped_block(handle.block())
    }

    fn data_mut(&mut self, handle: BlockHandle) -> DiskResult<&mut [u8; BLOCK_SIZE]> {
        self.device_mut().mapped_block_mut(handle.block())
    }

    fn release(&mut self, handle: BlockHandle, dirty: bool, commit_now: bool) -> DiskResult<()> {
        let block = handle.block();
        check_block(block, self.blocks())?;
        if dirty {
            if self.read_only() {
                return Err(DiskError::ReadOnly);
            }
            self.dirty.insert(block);
        }
        if commit_now && self.dirty.contains(&block) {
            self.sync_block(block)?;
        }
        Ok(())
    }

    fn mark_dirty(&mut self, block: u32) -> DiskResult<()> {
        check_block(block, self.blocks())?;
        if self.read_only() {
            return Err(DiskError::ReadOnly);
        }
        self.dirty.insert(block);
        Ok(())
    }

    fn sync(&mut self) -> DiskResult<()> {
        while let Some(block) = self.dirty.first().copied() {
            self.sync_block(block)?;
        }
        self.device_mut().flush()
    }

    fn device(&self) -> &BlockDevice {
        Borrow::borrow(&self.device)
    }
}

impl<D: BorrowMut<BlockDevice>> Drop for MappedCache<D> {
    fn drop(&mut self) {
        if let Err(err) = self.sync() {
            warn!("failed to sync mapped cache: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backing, DeviceOptions};
    use crate::image::ImageFormat;

    #[test]
    fn test_requires_contiguous_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let options = DeviceOptions::default();
        let dos = BlockDevice::create(dir.path().join("a.do"), ImageFormat::DosOrder, 16, &options)
            .unwrap();
        assert!(matches!(MappedCache::new(dos), Err(DiskError::Unsupported(_))));

        let fd = BlockDevice::create(
            dir.path().join("a.po"),
            ImageFormat::ProDosOrder,
            16,
            &options.with_backing(Backing::Descriptor),
        )
        .unwrap();
        assert!(MappedCache::new(fd).is_err());
    }

    #[test]
    fn test_writes_go_straight_to_the_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.2mg");
        let mut dev =
            BlockDevice::create(&path, ImageFormat::TwoImg, 16, &DeviceOptions::default()).unwrap();
        {
            let mut cache = MappedCache::new(&mut dev).unwrap();
            let handle = cache.acquire(3).unwrap();
            cache.data_mut(handle).unwrap().fill(0xC3);
            // No pinning: a second handle sees the same bytes.
            let again = cache.acquire(3).unwrap();
            assert_eq!(cache.data(again).unwrap()[511], 0xC3);
            cache.release(handle, true, false).unwrap();
            cache.release(again, false, false).unwrap();
            assert_eq!(cache.dirty_blocks().collect::<Vec<_>>(), vec![3]);

            cache.sync().unwrap();
            assert_eq!(cache.dirty_blocks().count(), 0);
        }
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read(3, &mut buf).unwrap();
        assert_eq!(buf, [0xC3; BLOCK_SIZE]);
    }

    #[test]
    fn test_commit_now_syncs_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.po");
        let dev = BlockDevice::create(&path, ImageFormat::ProDosOrder, 16, &DeviceOptions::default())
            .unwrap();
        let mut cache = MappedCache::new(dev).unwrap();
        cache.write_block(15, &[0x3C; BLOCK_SIZE]).unwrap();
        let handle = cache.acquire(15).unwrap();
        cache.release(handle, false, true).unwrap();
        assert_eq!(cache.dirty_blocks().count(), 0);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[15 * BLOCK_SIZE..], &[0x3C; BLOCK_SIZE][..]);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.po");
        BlockDevice::create(&path, ImageFormat::ProDosOrder, 16, &DeviceOptions::default())
            .unwrap()
            .close()
            .unwrap();
        let dev = BlockDevice::open(&path, &DeviceOptions::default().read_only(true)).unwrap();
        let mut cache = MappedCache::new(dev).unwrap();
        let handle = cache.acquire(0).unwrap();
        assert!(cache.data(handle).is_ok());
        assert!(matches!(cache.data_mut(handle), Err(DiskError::ReadOnly)));
        assert!(matches!(
            cache.release(handle, true, false),
            Err(DiskError::ReadOnly)
        ));
        assert!(cache.acquire(16).is_err());
    }
}
