//! Blocks stored back to back, optionally after a header.

use super::{check_block, Container, ImageFormat, Storage};
use crate::error::{DiskError, DiskResult};
use crate::BLOCK_SIZE;

/// ProDOS-order layout: block `n` lives at `base + n * 512`.
#[derive(Debug, Clone)]
pub struct ProDosOrder {
    base: u64,
    blocks: u32,
}

impl ProDosOrder {
    pub fn new(base: u64, blocks: u32) -> Self {
        Self { base, blocks }
    }

    /// Open a headerless image; its size must be a whole number of blocks.
    pub fn open(storage: &Storage) -> DiskResult<Self> {
        let len = storage.len();
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(DiskError::format(
                ImageFormat::ProDosOrder.name(),
                format!("size {len} is not a multiple of {BLOCK_SIZE}"),
            ));
        }
        let blocks = u32::try_from(len / BLOCK_SIZE as u64).map_err(|_| {
            DiskError::format(ImageFormat::ProDosOrder.name(), "too many blocks")
        })?;
        Ok(Self::new(0, blocks))
    }

    pub fn data_len(blocks: u32) -> u64 {
        blocks as u64 * BLOCK_SIZE as u64
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    fn offset(&self, block: u32) -> u64 {
        self.base + block as u64 * BLOCK_SIZE as u64
    }
}

impl Container for ProDosOrder {
    fn format(&self) -> ImageFormat {
        ImageFormat::ProDosOrder
    }

    fn blocks(&self) -> u32 {
        self.blocks
    }

    fn read_block(
        &mut self,
        storage: &Storage,
        block: u32,
        buf: &mut [u8; BLOCK_SIZE],
    ) -> DiskResult<()> {
        check_block(block, self.blocks)?;
        storage.read_at(self.offset(block), buf)
    }

    fn write_block(
        &mut self,
        storage: &mut Storage,
        block: u32,
        buf: &[u8; BLOCK_SIZE],
    ) -> DiskResult<()> {
        check_block(block, self.blocks)?;
        storage.write_at(self.offset(block), buf)
    }

    fn block_offset(&self, block: u32) -> Option<u64> {
        (block < self.blocks).then(|| self.offset(block))
    }
}
