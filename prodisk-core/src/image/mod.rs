//! Disk image containers.
//!
//! Every supported container maps logical 512-byte blocks onto the bytes of
//! an image file:
//! - `ProDosOrder`: blocks stored back to back
//! - `DosOrder`: 256-byte sectors in DOS 3.3 order, two per block
//! - `Nibble`: raw 6-2 encoded tracks, located by scanning for sync marks
//! - `TwoImg`, `DiskCopy42`, `Davex`: a header in front of one of the above

mod davex;
mod disk_copy;
mod dos_order;
mod nibble;
mod prodos_order;
mod storage;
mod two_img;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::DeviceOptions;
use crate::error::{DiskError, DiskResult};
use crate::BLOCK_SIZE;

pub use davex::{Davex, DAVEX_HEADER_LEN, DAVEX_IDENTITY};
pub use disk_copy::{checksum as disk_copy_checksum, DiskCopy42, DISK_COPY_HEADER_LEN};
pub use dos_order::DosOrder;
pub use nibble::{Nibble, SECTORS_PER_TRACK, TRACK_LEN};
pub use prodos_order::ProDosOrder;
pub use storage::{Storage, PAGE_SIZE};
pub use two_img::{TwoImg, TwoImgFormat, TwoImgHeader, TWO_IMG_HEADER_LEN};

/// Supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageFormat {
    /// Headerless, blocks in ProDOS order (`.po`, `.hdv`).
    ProDosOrder,
    /// Headerless, sectors in DOS 3.3 order (`.do`, `.dsk`).
    DosOrder,
    /// Headerless raw nibble tracks (`.nib`).
    Nibble,
    /// 2IMG / Universal Disk Image (`.2mg`).
    TwoImg,
    /// Macintosh DiskCopy 4.2 (`.dc42`).
    DiskCopy42,
    /// Davex volume image.
    Davex,
}

impl ImageFormat {
    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::ProDosOrder => "ProDOS-order",
            ImageFormat::DosOrder => "DOS-order",
            ImageFormat::Nibble => "nibble",
            ImageFormat::TwoImg => "2IMG",
            ImageFormat::DiskCopy42 => "DiskCopy 4.2",
            ImageFormat::Davex => "Davex",
        }
    }

    /// Guess a headerless format from a file name.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "nib" => ImageFormat::Nibble,
            "do" | "dsk" => ImageFormat::DosOrder,
            "2mg" | "2img" => ImageFormat::TwoImg,
            "dc42" | "dc" => ImageFormat::DiskCopy42,
            _ => ImageFormat::ProDosOrder,
        }
    }

    /// File length of a new image holding `blocks` blocks.
    pub fn image_len(self, blocks: u32) -> DiskResult<u64> {
        if blocks == 0 {
            return Err(DiskError::format(self.name(), "block count must be non-zero"));
        }
        match self {
            ImageFormat::ProDosOrder => Ok(ProDosOrder::data_len(blocks)),
            ImageFormat::DosOrder => DosOrder::data_len(blocks),
            ImageFormat::Nibble => Nibble::data_len(blocks),
            ImageFormat::TwoImg => {
                let header = TwoImgHeader::new(blocks)?;
                Ok(header.data_offset as u64 + header.data_len as u64)
            }
            ImageFormat::DiskCopy42 => {
                Ok(DISK_COPY_HEADER_LEN as u64 + ProDosOrder::data_len(blocks))
            }
            ImageFormat::Davex => {
                if blocks > u16::MAX as u32 {
                    return Err(DiskError::format(self.name(), "at most 65535 blocks"));
                }
                Ok(DAVEX_HEADER_LEN as u64 + ProDosOrder::data_len(blocks))
            }
        }
    }
}

/// Per-format block layout adaptor.
///
/// Block numbers handed to `read_block`/`write_block` have already been
/// range checked by the device.
pub trait Container {
    fn format(&self) -> ImageFormat;

    /// Number of logical blocks.
    fn blocks(&self) -> u32;

    fn read_block(&mut self, storage: &Storage, block: u32, buf: &mut [u8; BLOCK_SIZE])
        -> DiskResult<()>;

    fn write_block(&mut self, storage: &mut Storage, block: u32, buf: &[u8; BLOCK_SIZE])
        -> DiskResult<()>;

    /// Byte offset of a block stored contiguously, if the layout has one.
    fn block_offset(&self, _block: u32) -> Option<u64> {
        None
    }

    /// Whether the header forbids writes.
    fn locked(&self) -> bool {
        false
    }

    /// Record a write that bypassed `write_block` (direct map access).
    fn note_modified(&mut self) {}

    /// Bring header state up to date before the file is closed.
    fn finish(&mut self, _storage: &mut Storage) -> DiskResult<()> {
        Ok(())
    }
}

pub(crate) fn check_block(block: u32, blocks: u32) -> DiskResult<()> {
    if block >= blocks {
        return Err(DiskError::BlockOutOfRange { block, blocks });
    }
    Ok(())
}

pub(crate) fn read_u16_le(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn read_u32_le(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn read_u32_be(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Work out the format of an existing image from its header, then its name.
pub fn detect_format(storage: &Storage, path: &Path) -> DiskResult<ImageFormat> {
    let mut head = [0u8; DISK_COPY_HEADER_LEN];
    let probe = (storage.len() as usize).min(head.len());
    storage.read_at(0, &mut head[..probe])?;

    let format = if probe >= 4 && &head[..4] == two_img::MAGIC {
        ImageFormat::TwoImg
    } else if probe >= DAVEX_IDENTITY.len() && head[..DAVEX_IDENTITY.len()] == DAVEX_IDENTITY[..]
    {
        ImageFormat::Davex
    } else if probe == DISK_COPY_HEADER_LEN && disk_copy::looks_like(&head, storage.len()) {
        ImageFormat::DiskCopy42
    } else {
        match ImageFormat::from_path(path) {
            // Header formats without their header fall back to raw blocks.
            ImageFormat::TwoImg | ImageFormat::DiskCopy42 | ImageFormat::Davex => {
                ImageFormat::ProDosOrder
            }
            other => other,
        }
    };
    log::debug!("{}: detected {} image", path.display(), format.name());
    Ok(format)
}

/// Build the adaptor for an existing image.
pub fn open_container(
    storage: &Storage,
    path: &Path,
    options: &DeviceOptions,
) -> DiskResult<Box<dyn Container>> {
    let format = match options.format {
        Some(format) => format,
        None => detect_format(storage, path)?,
    };
    let container: Box<dyn Container> = match format {
        ImageFormat::ProDosOrder => Box::new(ProDosOrder::open(storage)?),
        ImageFormat::DosOrder => Box::new(DosOrder::open(storage)?),
        ImageFormat::Nibble => Box::new(Nibble::open(storage, &options.nibble)?),
        ImageFormat::TwoImg => Box::new(TwoImg::open(storage, options)?),
        ImageFormat::DiskCopy42 => Box::new(DiskCopy42::open(storage)?),
        ImageFormat::Davex => Box::new(Davex::open(storage)?),
    };
    Ok(container)
}

/// Write headers and track structure for a fresh image sized by
/// [`ImageFormat::image_len`].
pub fn create_container(
    storage: &mut Storage,
    format: ImageFormat,
    blocks: u32,
    options: &DeviceOptions,
) -> DiskResult<Box<dyn Container>> {
    let container: Box<dyn Container> = match format {
        ImageFormat::ProDosOrder => Box::new(ProDosOrder::new(0, blocks)),
        ImageFormat::DosOrder => Box::new(DosOrder::new(0, blocks)),
        ImageFormat::Nibble => Box::new(Nibble::create(storage, blocks, &options.nibble)?),
        ImageFormat::TwoImg => Box::new(TwoImg::create(storage, blocks)?),
        ImageFormat::DiskCopy42 => Box::new(DiskCopy42::create(storage, blocks)?),
        ImageFormat::Davex => Box::new(Davex::create(storage, blocks)?),
    };
    Ok(container)
}
