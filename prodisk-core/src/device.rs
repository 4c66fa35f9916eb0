//! Uniform block access over any supported container.

use std::path::Path;

use log::{debug, warn};

use crate::config::DeviceOptions;
use crate::error::{DiskError, DiskResult};
use crate::image::{self, check_block, Container, ImageFormat, Storage};
use crate::BLOCK_SIZE;

/// An open disk image presented as an array of 512-byte blocks.
///
/// The device owns the file (mapped or descriptor). Header state that
/// depends on the data, such as the DiskCopy 4.2 checksum, is brought up to
/// date by [`flush`](Self::flush), [`close`](Self::close), or on drop.
pub struct BlockDevice {
    storage: Storage,
    container: Box<dyn Container>,
    read_only: bool,
    modified: bool,
}

impl BlockDevice {
    /// Open an existing image.
    pub fn open(path: impl AsRef<Path>, options: &DeviceOptions) -> DiskResult<Self> {
        let path = path.as_ref();
        let storage = Storage::open(path, options.backing, options.read_only)?;
        let container = image::open_container(&storage, path, options)?;
        let read_only = storage.read_only() || container.locked();
        debug!(
            "opened {} ({}, {} blocks{})",
            path.display(),
            container.format().name(),
            container.blocks(),
            if read_only { ", read-only" } else { "" }
        );
        Ok(Self {
            storage,
            container,
            read_only,
            modified: false,
        })
    }

    /// Create a new, zero-filled image of `blocks` blocks, replacing any
    /// existing file.
    pub fn create(
        path: impl AsRef<Path>,
        format: ImageFormat,
        blocks: u32,
        options: &DeviceOptions,
    ) -> DiskResult<Self> {
        let path = path.as_ref();
        let len = format.image_len(blocks)?;
        let mut storage = Storage::create(path, len, options.backing)?;
        let container = image::create_container(&mut storage, format, blocks, options)?;
        debug!("created {} ({}, {blocks} blocks)", path.display(), format.name());
        Ok(Self {
            storage,
            container,
            read_only: false,
            modified: true,
        })
    }

    pub fn blocks(&self) -> u32 {
        self.container.blocks()
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn format(&self) -> ImageFormat {
        self.container.format()
    }

    /// Read one block.
    pub fn read(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> DiskResult<()> {
        check_block(block, self.blocks())?;
        self.container.read_block(&self.storage, block, buf)
    }

    /// Write one block.
    pub fn write(&mut self, block: u32, buf: &[u8; BLOCK_SIZE]) -> DiskResult<()> {
        check_block(block, self.blocks())?;
        if self.read_only {
            return Err(DiskError::ReadOnly);
        }
        self.container.write_block(&mut self.storage, block, buf)?;
        self.modified = true;
        Ok(())
    }

    /// Fill one block with zeros.
    pub fn zero_block(&mut self, block: u32) -> DiskResult<()> {
        self.write(block, &[0u8; BLOCK_SIZE])
    }

    /// Push written data to the file: msync the map or fsync the descriptor.
    pub fn sync(&mut self) -> DiskResult<()> {
        self.storage.sync()
    }

    /// Update header state, then sync.
    pub fn flush(&mut self) -> DiskResult<()> {
        if !self.modified {
            return Ok(());
        }
        self.container.finish(&mut self.storage)?;
        self.storage.sync()?;
        self.modified = false;
        Ok(())
    }

    /// Flush and release the image.
    pub fn close(mut self) -> DiskResult<()> {
        self.flush()
    }

    /// Whether blocks can be handed out as direct slices of the map.
    pub fn supports_mapping(&self) -> bool {
        self.storage.is_mapped() && self.container.block_offset(0).is_some()
    }

    fn mapped_offset(&self, block: u32) -> DiskResult<u64> {
        check_block(block, self.blocks())?;
        self.container.block_offset(block).ok_or_else(|| {
            DiskError::Unsupported(format!(
                "{} images have no contiguous block layout",
                self.format().name()
            ))
        })
    }

    /// Borrow a block straight out of the memory map.
    pub(crate) fn mapped_block(&self, block: u32) -> DiskResult<&[u8; BLOCK_SIZE]> {
        let offset = self.mapped_offset(block)?;
        let slice = self
            .storage
            .slice(offset, BLOCK_SIZE)?
            .ok_or_else(|| DiskError::Unsupported("image is not memory-mapped".into()))?;
        slice
            .try_into()
            .map_err(|_| DiskError::Unsupported("short mapped block".into()))
    }

    /// Mutably borrow a block straight out of the memory map.
    pub(crate) fn mapped_block_mut(&mut self, block: u32) -> DiskResult<&mut [u8; BLOCK_SIZE]> {
        if self.read_only {
            return Err(DiskError::ReadOnly);
        }
        let offset = self.mapped_offset(block)?;
        self.container.note_modified();
        self.modified = true;
        let slice = self
            .storage
            .slice_mut(offset, BLOCK_SIZE)?
            .ok_or_else(|| DiskError::Unsupported("image is not memory-mapped".into()))?;
        slice
            .try_into()
            .map_err(|_| DiskError::Unsupported("short mapped block".into()))
    }

    /// msync the pages under one block.
    pub(crate) fn sync_block(&mut self, block: u32) -> DiskResult<()> {
        let offset = self.mapped_offset(block)?;
        self.storage.sync_range(offset, BLOCK_SIZE)
    }
}

impl Drop for BlockDevice {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("failed to flush {} image: {err}", self.format().name());
        }
    }
}
