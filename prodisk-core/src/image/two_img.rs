//! 2IMG / Universal Disk Image.
//!
//! Layout (64-byte header, little-endian):
//! - 0x00: magic `"2IMG"`
//! - 0x04: creator code
//! - 0x08: header size (u16)
//! - 0x0A: version (u16)
//! - 0x0C: image format (u32): 0 = DOS order, 1 = ProDOS order, 2 = nibble
//! - 0x10: flags (u32); bit 31 = locked, bit 8 = volume number in low byte
//! - 0x14: ProDOS block count
//! - 0x18: data offset, 0x1C: data length
//! - 0x20: comment offset/length, 0x28: creator data offset/length
//! - 0x30..0x40: reserved

use super::{
    read_u16_le, read_u32_le, Container, DosOrder, ImageFormat, Nibble, ProDosOrder, Storage,
    TRACK_LEN,
};
use crate::config::DeviceOptions;
use crate::error::{DiskError, DiskResult};
use crate::BLOCK_SIZE;

pub const TWO_IMG_HEADER_LEN: usize = 64;

pub(crate) const MAGIC: &[u8; 4] = b"2IMG";

const CREATOR: &[u8; 4] = b"PDSK";

const LOCKED: u32 = 1 << 31;

/// Data layout inside a 2IMG file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoImgFormat {
    Dos = 0,
    ProDos = 1,
    Nibble = 2,
}

impl TryFrom<u32> for TwoImgFormat {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dos),
            1 => Ok(Self::ProDos),
            2 => Ok(Self::Nibble),
            _ => Err(value),
        }
    }
}

/// Parsed 2IMG header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoImgHeader {
    pub creator: [u8; 4],
    pub header_size: u16,
    pub version: u16,
    pub format: TwoImgFormat,
    pub flags: u32,
    pub blocks: u32,
    pub data_offset: u32,
    pub data_len: u32,
    pub comment_offset: u32,
    pub comment_len: u32,
    pub creator_data_offset: u32,
    pub creator_data_len: u32,
}

fn invalid(reason: impl Into<String>) -> DiskError {
    DiskError::format(ImageFormat::TwoImg.name(), reason)
}

impl TwoImgHeader {
    /// Header for a new ProDOS-order image.
    pub fn new(blocks: u32) -> DiskResult<Self> {
        let data_len = blocks
            .checked_mul(BLOCK_SIZE as u32)
            .ok_or_else(|| invalid(format!("{blocks} blocks overflow the 32-bit data length")))?;
        Ok(Self {
            creator: *CREATOR,
            header_size: TWO_IMG_HEADER_LEN as u16,
            version: 1,
            format: TwoImgFormat::ProDos,
            flags: 0,
            blocks,
            data_offset: TWO_IMG_HEADER_LEN as u32,
            data_len,
            comment_offset: 0,
            comment_len: 0,
            creator_data_offset: 0,
            creator_data_len: 0,
        })
    }

    pub fn parse(bytes: &[u8; TWO_IMG_HEADER_LEN]) -> DiskResult<Self> {
        if &bytes[..4] != MAGIC {
            return Err(invalid("missing 2IMG signature"));
        }
        let header_size = read_u16_le(bytes, 0x08);
        if (header_size as usize) < TWO_IMG_HEADER_LEN {
            return Err(invalid(format!("header size {header_size} is too small")));
        }
        let format = TwoImgFormat::try_from(read_u32_le(bytes, 0x0C))
            .map_err(|v| invalid(format!("unknown image format {v}")))?;
        Ok(Self {
            creator: [bytes[4], bytes[5], bytes[6], bytes[7]],
            header_size,
            version: read_u16_le(bytes, 0x0A),
            format,
            flags: read_u32_le(bytes, 0x10),
            blocks: read_u32_le(bytes, 0x14),
            data_offset: read_u32_le(bytes, 0x18),
            data_len: read_u32_le(bytes, 0x1C),
            comment_offset: read_u32_le(bytes, 0x20),
            comment_len: read_u32_le(bytes, 0x24),
            creator_data_offset: read_u32_le(bytes, 0x28),
            creator_data_len: read_u32_le(bytes, 0x2C),
        })
    }

    pub fn to_bytes(&self) -> [u8; TWO_IMG_HEADER_LEN] {
        let mut out = [0u8; TWO_IMG_HEADER_LEN];
        out[..4].copy_from_slice(MAGIC);
        out[4..8].copy_from_slice(&self.creator);
        out[0x08..0x0A].copy_from_slice(&self.header_size.to_le_bytes());
        out[0x0A..0x0C].copy_from_slice(&self.version.to_le_bytes());
        let words = [
            self.format as u32,
            self.flags,
            self.blocks,
            self.data_offset,
            self.data_len,
            self.comment_offset,
            self.comment_len,
            self.creator_data_offset,
            self.creator_data_len,
        ];
        for (i, word) in words.iter().enumerate() {
            let at = 0x0C + i * 4;
            out[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn locked(&self) -> bool {
        self.flags & LOCKED != 0
    }
}

/// 2IMG container delegating to the layout named in its header.
pub struct TwoImg {
    header: TwoImgHeader,
    inner: Box<dyn Container>,
}

impl TwoImg {
    pub fn open(storage: &Storage, options: &DeviceOptions) -> DiskResult<Self> {
        if storage.len() < TWO_IMG_HEADER_LEN as u64 {
            return Err(invalid("file is shorter than the header"));
        }
        let mut bytes = [0u8; TWO_IMG_HEADER_LEN];
        storage.read_at(0, &mut bytes)?;
        let header = TwoImgHeader::parse(&bytes)?;

        let base = header.data_offset as u64;
        let mut data_len = header.data_len as u64;
        if data_len == 0 && header.format == TwoImgFormat::ProDos {
            // Some writers leave the length empty for ProDOS-order data.
            data_len = header.blocks as u64 * BLOCK_SIZE as u64;
        }
        if base < header.header_size as u64 || base + data_len > storage.len() {
            return Err(invalid(format!(
                "data region {base}+{data_len} does not fit a {}-byte file",
                storage.len()
            )));
        }

        let inner: Box<dyn Container> = match header.format {
            TwoImgFormat::ProDos => {
                let blocks = if header.blocks == 0 {
                    (data_len / BLOCK_SIZE as u64) as u32
                } else {
                    header.blocks
                };
                if blocks == 0 || blocks as u64 * BLOCK_SIZE as u64 > data_len {
                    return Err(invalid(format!(
                        "{blocks} blocks do not fit {data_len} data bytes"
                    )));
                }
                Box::new(ProDosOrder::new(base, blocks))
            }
            TwoImgFormat::Dos => {
                let blocks = DosOrder::data_len((data_len / BLOCK_SIZE as u64) as u32)
                    .ok()
                    .filter(|len| *len == data_len && *len > 0)
                    .map(|len| (len / BLOCK_SIZE as u64) as u32)
                    .ok_or_else(|| invalid("DOS-order data is not a whole number of tracks"))?;
                Box::new(DosOrder::new(base, blocks))
            }
            TwoImgFormat::Nibble => {
                let tracks = Nibble::tracks_in(data_len)?;
                debug_assert_eq!(tracks as u64 * TRACK_LEN as u64, data_len);
                Box::new(Nibble::new(base, tracks, &options.nibble))
            }
        };
        log::debug!(
            "2IMG: {:?} data, {} blocks at offset {base}{}",
            header.format,
            inner.blocks(),
            if header.locked() { ", locked" } else { "" }
        );
        Ok(Self { header, inner })
    }

    pub fn create(storage: &mut Storage, blocks: u32) -> DiskResult<Self> {
        let header = TwoImgHeader::new(blocks)?;
        storage.write_at(0, &header.to_bytes())?;
        let inner = Box::new(ProDosOrder::new(header.data_offset as u64, blocks));
        Ok(Self { header, inner })
    }

    pub fn header(&self) -> &TwoImgHeader {
        &self.header
    }
}

impl Container for TwoImg {
    fn format(&self) -> ImageFormat {
        ImageFormat::TwoImg
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

    fn locked(&self) -> bool {
        self.header.locked()
    }
}
