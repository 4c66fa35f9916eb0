//! Macintosh DiskCopy 4.2 images.
//!
//! Layout (84-byte header, big-endian):
//! - 0x00: name length, 0x01..0x40: name (at most 63 bytes)
//! - 0x40: data size, 0x44: tag size
//! - 0x48: data checksum, 0x4C: tag checksum
//! - 0x50: disk format, 0x51: format byte
//! - 0x52: private word, always 0x0100
//! - 0x54: block data, then tag data

use log::warn;

use super::{read_u32_be, Container, ImageFormat, ProDosOrder, Storage};
use crate::error::{DiskError, DiskResult};
use crate::BLOCK_SIZE;

pub const DISK_COPY_HEADER_LEN: usize = 84;

const PRIVATE_WORD: u16 = 0x0100;
const MAX_NAME_LEN: usize = 63;
const DEFAULT_NAME: &str = "Untitled";

const DATA_CHECKSUM_AT: u64 = 0x48;

/// DiskCopy checksum: add each big-endian 16-bit word, then rotate the
/// 32-bit sum right by one bit.
pub fn checksum(data: &[u8]) -> u32 {
    data.chunks(2).fold(0u32, |sum, pair| {
        let word = u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]);
        sum.wrapping_add(word as u32).rotate_right(1)
    })
}

fn invalid(reason: impl Into<String>) -> DiskError {
    DiskError::format(ImageFormat::DiskCopy42.name(), reason)
}

/// Quick header sniff used by format detection.
pub(crate) fn looks_like(head: &[u8; DISK_COPY_HEADER_LEN], file_len: u64) -> bool {
    let data_size = read_u32_be(head, 0x40) as u64;
    let tag_size = read_u32_be(head, 0x44) as u64;
    head[0] as usize <= MAX_NAME_LEN
        && u16::from_be_bytes([head[0x52], head[0x53]]) == PRIVATE_WORD
        && DISK_COPY_HEADER_LEN as u64 + data_size + tag_size == file_len
}

fn disk_format_code(blocks: u32) -> u8 {
    match blocks {
        800 => 0,
        1600 => 1,
        1440 => 2,
        2880 => 3,
        _ => 0xFF,
    }
}

/// DiskCopy 4.2 container; block data is in ProDOS order after the header.
pub struct DiskCopy42 {
    inner: ProDosOrder,
    name: String,
    data_size: u32,
    data_checksum: u32,
    modified: bool,
}

impl DiskCopy42 {
    pub fn open(storage: &Storage) -> DiskResult<Self> {
        if storage.len() < DISK_COPY_HEADER_LEN as u64 {
            return Err(invalid("file is shorter than the header"));
        }
        let mut head = [0u8; DISK_COPY_HEADER_LEN];
        storage.read_at(0, &mut head)?;

        let name_len = head[0] as usize;
        if name_len > MAX_NAME_LEN {
            return Err(invalid(format!("name length {name_len} exceeds {MAX_NAME_LEN}")));
        }
        let private = u16::from_be_bytes([head[0x52], head[0x53]]);
        if private != PRIVATE_WORD {
            return Err(invalid(format!("private word {private:#06x}")));
        }
        let data_size = read_u32_be(&head, 0x40);
        let tag_size = read_u32_be(&head, 0x44);
        if data_size == 0 || data_size as usize % BLOCK_SIZE != 0 {
            return Err(invalid(format!("data size {data_size} is not whole blocks")));
        }
        let needed = DISK_COPY_HEADER_LEN as u64 + data_size as u64 + tag_size as u64;
        if needed > storage.len() {
            return Err(invalid(format!(
                "header describes {needed} bytes, file has {}",
                storage.len()
            )));
        }

        let data_checksum = read_u32_be(&head, 0x48);
        let mut data = vec![0u8; data_size as usize];
        storage.read_at(DISK_COPY_HEADER_LEN as u64, &mut data)?;
        let actual = checksum(&data);
        if actual != data_checksum {
            warn!(
                "DiskCopy 4.2 data checksum mismatch: header {data_checksum:#010x}, computed {actual:#010x}"
            );
        }

        let name = String::from_utf8_lossy(&head[1..1 + name_len]).into_owned();
        Ok(Self {
            inner: ProDosOrder::new(
                DISK_COPY_HEADER_LEN as u64,
                data_size / BLOCK_SIZE as u32,
            ),
            name,
            data_size,
            data_checksum,
            modified: false,
        })
    }

    /// Write a header for an all-zero image of `blocks` blocks.
    pub fn create(storage: &mut Storage, blocks: u32) -> DiskResult<Self> {
        let data_size = blocks
            .checked_mul(BLOCK_SIZE as u32)
            .ok_or_else(|| invalid("too many blocks"))?;
        let mut head = [0u8; DISK_COPY_HEADER_LEN];
        head[0] = DEFAULT_NAME.len() as u8;
        head[1..1 + DEFAULT_NAME.len()].copy_from_slice(DEFAULT_NAME.as_bytes());
        head[0x40..0x44].copy_from_slice(&data_size.to_be_bytes());
        // Tag size, data checksum and tag checksum are all zero for empty data.
        head[0x50] = disk_format_code(blocks);
        head[0x51] = if blocks == 800 { 0x12 } else { 0x22 };
        head[0x52..0x54].copy_from_slice(&PRIVATE_WORD.to_be_bytes());
        storage.write_at(0, &head)?;

        Ok(Self {
            inner: ProDosOrder::new(DISK_COPY_HEADER_LEN as u64, blocks),
            name: DEFAULT_NAME.to_string(),
            data_size,
            data_checksum: 0,
            modified: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Data checksum as currently stored in the header.
    pub fn data_checksum(&self) -> u32 {
        self.data_checksum
    }
}

impl Container for DiskCopy42 {
    fn format(&self) -> ImageFormat {
        ImageFormat::DiskCopy42
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
        self.inner.write_block(storage, block, buf)?;
        self.modified = true;
        Ok(())
    }

    fn block_offset(&self, block: u32) -> Option<u64> {
        self.inner.block_offset(block)
    }

    fn note_modified(&mut self) {
        self.modified = true;
    }

    fn finish(&mut self, storage: &mut Storage) -> DiskResult<()> {
        if !self.modified {
            return Ok(());
        }
        let mut data = vec![0u8; self.data_size as usize];
        storage.read_at(DISK_COPY_HEADER_LEN as u64, &mut data)?;
        let sum = checksum(&data);
        storage.write_at(DATA_CHECKSUM_AT, &sum.to_be_bytes())?;
        self.data_checksum = sum;
        self.modified = false;
        Ok(())
    }
}
