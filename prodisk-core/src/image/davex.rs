//! Davex volume images: a 512-byte header followed by ProDOS-order blocks.

use super::{read_u16_le, Container, ImageFormat, ProDosOrder, Storage};
use crate::error::{DiskError, DiskResult};
use crate::BLOCK_SIZE;

pub const DAVEX_HEADER_LEN: usize = 512;

/// Fixed identity string at the start of every Davex image.
pub const DAVEX_IDENTITY: [u8; 16] = *b"\x60VSTORE [Davex]\x00";

const VERSION_AT: usize = 16;
const BLOCKS_AT: usize = 33;

pub struct Davex {
    inner: ProDosOrder,
}

impl Davex {
    pub fn open(storage: &Storage) -> DiskResult<Self> {
        let name = ImageFormat::Davex.name();
        if storage.len() < DAVEX_HEADER_LEN as u64 {
            return Err(DiskError::format(name, "file is shorter than the header"));
        }
        let mut head = [0u8; DAVEX_HEADER_LEN];
        storage.read_at(0, &mut head)?;
        if head[..DAVEX_IDENTITY.len()] != DAVEX_IDENTITY {
            return Err(DiskError::format(name, "missing Davex identity"));
        }
        let blocks = read_u16_le(&head, BLOCKS_AT) as u32;
        let needed = DAVEX_HEADER_LEN as u64 + ProDosOrder::data_len(blocks);
        if blocks == 0 || needed > storage.len() {
            return Err(DiskError::format(
                name,
                format!("{blocks} blocks need {needed} bytes, file has {}", storage.len()),
            ));
        }
        Ok(Self {
            inner: ProDosOrder::new(DAVEX_HEADER_LEN as u64, blocks),
        })
    }

    pub fn create(storage: &mut Storage, blocks: u32) -> DiskResult<Self> {
        let count = u16::try_from(blocks)
            .map_err(|_| DiskError::format(ImageFormat::Davex.name(), "at most 65535 blocks"))?;
        let mut head = [0u8; DAVEX_HEADER_LEN];
        head[..DAVEX_IDENTITY.len()].copy_from_slice(&DAVEX_IDENTITY);
        head[VERSION_AT] = 0;
        head[BLOCKS_AT..BLOCKS_AT + 2].copy_from_slice(&count.to_le_bytes());
        storage.write_at(0, &head)?;
        Ok(Self {
            inner: ProDosOrder::new(DAVEX_HEADER_LEN as u64, blocks),
        })
    }
}

impl Container for Davex {
    fn format(&self) -> ImageFormat {
        ImageFormat::Davex
    }

    fn blocks(&self) -> u32 {
        self.inner.blocks()
    }

    fn read_block(
        &mut self,
        storage: &Storage,
        block: u32,
        buf: &mut [u8; BLOCK_SIZE],
    ) -> DiskResult<()> {
        self.inner.read_block(storage, block, buf)
    }

    fn write_block(
        &mut self,
        storage: &mut Storage,
        block: u32,
        buf: &[u8; BLOCK_SIZE],
    ) -> DiskResult<()> {
        self.inner.write_block(storage, block, buf)
    }

    fn block_offset(&self, block: u32) -> Option<u64> {
        self.inner.block_offset(block)
    }
}
