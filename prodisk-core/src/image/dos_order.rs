//! DOS 3.3 sector order.
//!
//! A 5.25" track holds 16 sectors of 256 bytes. DOS-order images store the
//! sectors of each track in DOS logical order, so a ProDOS block is two
//! sectors found through an interleave table.

use super::{check_block, Container, ImageFormat, Storage};
use crate::codec::SECTOR_SIZE;
use crate::error::{DiskError, DiskResult};
use crate::BLOCK_SIZE;

/// Blocks per 16-sector track.
pub const BLOCKS_PER_TRACK: u32 = 8;

const TRACK_BYTES: u64 = 16 * SECTOR_SIZE as u64;

/// ProDOS sector within a track to DOS 3.3 logical sector.
const DOS_SECTOR: [u8; 16] = [0, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 15];

/// DOS 3.3 order layout starting at `base`.
#[derive(Debug, Clone)]
pub struct DosOrder {
    base: u64,
    blocks: u32,
}

impl DosOrder {
    pub fn new(base: u64, blocks: u32) -> Self {
        Self { base, blocks }
    }

    pub fn open(storage: &Storage) -> DiskResult<Self> {
        let len = storage.len();
        if len == 0 || len % TRACK_BYTES != 0 {
            return Err(DiskError::format(
                ImageFormat::DosOrder.name(),
                format!("size {len} is not a whole number of tracks"),
            ));
        }
        let blocks = u32::try_from(len / BLOCK_SIZE as u64)
            .map_err(|_| DiskError::format(ImageFormat::DosOrder.name(), "too many blocks"))?;
        Ok(Self::new(0, blocks))
    }

    pub fn data_len(blocks: u32) -> DiskResult<u64> {
        if blocks % BLOCKS_PER_TRACK != 0 {
            return Err(DiskError::format(
                ImageFormat::DosOrder.name(),
                format!("{blocks} blocks is not a whole number of tracks"),
            ));
        }
        Ok(blocks as u64 * BLOCK_SIZE as u64)
    }

    /// Byte offsets of the two sectors making up `block`.
    fn sector_offsets(&self, block: u32) -> [u64; 2] {
        let track = (block / BLOCKS_PER_TRACK) as u64;
        let half = (block % BLOCKS_PER_TRACK) as usize * 2;
        let track_base = self.base + track * TRACK_BYTES;
        [
            track_base + DOS_SECTOR[half] as u64 * SECTOR_SIZE as u64,
            track_base + DOS_SECTOR[half + 1] as u64 * SECTOR_SIZE as u64,
        ]
    }
}

impl Container for DosOrder {
    fn format(&self) -> ImageFormat {
        ImageFormat::DosOrder
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
        for (half, offset) in buf
            .chunks_exact_mut(SECTOR_SIZE)
            .zip(self.sector_offsets(block))
        {
            storage.read_at(offset, half)?;
        }
        Ok(())
    }

    fn write_block(
        &mut self,
        storage: &mut Storage,
        block: u32,
        buf: &[u8; BLOCK_SIZE],
    ) -> DiskResult<()> {
        check_block(block, self.blocks)?;
        for (half, offset) in buf.chunks_exact(SECTOR_SIZE).zip(self.sector_offsets(block)) {
            storage.write_at(offset, half)?;
        }
        Ok(())
    }
}
