//! Backing store for an image file: a memory map or a plain descriptor.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::config::Backing;
use crate::error::{DiskError, DiskResult};

/// Page granularity used when flushing parts of a map.
pub const PAGE_SIZE: u64 = 4096;

enum Inner {
    Mapped(MmapMut),
    MappedReadOnly(Mmap),
    Descriptor,
}

/// Byte-addressed access to an open image file.
pub struct Storage {
    file: File,
    inner: Inner,
    len: u64,
    read_only: bool,
}

impl Storage {
    /// Open an existing file. Falls back to read-only access when the file
    /// cannot be opened for writing.
    pub fn open(path: &Path, backing: Backing, read_only: bool) -> DiskResult<Self> {
        let (file, read_only) = if read_only {
            (File::open(path)?, true)
        } else {
            match OpenOptions::new().read(true).write(true).open(path) {
                Ok(file) => (file, false),
                Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                    log::debug!("{} is not writable, opening read-only", path.display());
                    (File::open(path)?, true)
                }
                Err(err) => return Err(err.into()),
            }
        };
        Self::from_file(file, backing, read_only)
    }

    /// Create (or truncate) a file of exactly `len` zero bytes.
    pub fn create(path: &Path, len: u64, backing: Backing) -> DiskResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len)?;
        Self::from_file(file, backing, false)
    }

    fn from_file(file: File, backing: Backing, read_only: bool) -> DiskResult<Self> {
        let len = file.metadata()?.len();
        // Zero-length files cannot be mapped.
        let inner = match backing {
            Backing::Mapped if len > 0 && read_only => {
                // SAFETY: the file stays open for the life of the map and the
                // engine is the only writer it expects.
                Inner::MappedReadOnly(unsafe { Mmap::map(&file)? })
            }
            Backing::Mapped if len > 0 => {
                // SAFETY: as above.
                Inner::Mapped(unsafe { MmapMut::map_mut(&file)? })
            }
            _ => Inner::Descriptor,
        };
        Ok(Self {
            file,
            inner,
            len,
            read_only,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_mapped(&self) -> bool {
        !matches!(self.inner, Inner::Descriptor)
    }

    fn check_range(&self, offset: u64, len: usize) -> DiskResult<usize> {
        let end = offset
            .checked_add(len as u64)
            .filter(|end| *end <= self.len)
            .ok_or_else(|| {
                DiskError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "range {offset}+{len} outside image of {} bytes",
                        self.len
                    ),
                ))
            })?;
        Ok(end as usize)
    }

    /// Read exactly `buf.len()` bytes at `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> DiskResult<()> {
        let end = self.check_range(offset, buf.len())?;
        match &self.inner {
            Inner::Mapped(map) => buf.copy_from_slice(&map[offset as usize..end]),
            Inner::MappedReadOnly(map) => buf.copy_from_slice(&map[offset as usize..end]),
            Inner::Descriptor => self.file.read_exact_at(buf, offset)?,
        }
        Ok(())
    }

    /// Write all of `buf` at `offset`.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> DiskResult<()> {
        if self.read_only {
            return Err(DiskError::ReadOnly);
        }
        let end = self.check_range(offset, buf.len())?;
        match &mut self.inner {
            Inner::Mapped(map) => map[offset as usize..end].copy_from_slice(buf),
            Inner::MappedReadOnly(_) => return Err(DiskError::ReadOnly),
            Inner::Descriptor => self.file.write_all_at(buf, offset)?,
        }
        Ok(())
    }

    /// Borrow a mapped byte range. `None` for descriptor-backed storage.
    pub fn slice(&self, offset: u64, len: usize) -> DiskResult<Option<&[u8]>> {
        let end = self.check_range(offset, len)?;
        Ok(match &self.inner {
            Inner::Mapped(map) => Some(&map[offset as usize..end]),
            Inner::MappedReadOnly(map) => Some(&map[offset as usize..end]),
            Inner::Descriptor => None,
        })
    }

    /// Mutably borrow a mapped byte range. `None` for descriptor-backed storage.
    pub fn slice_mut(&mut self, offset: u64, len: usize) -> DiskResult<Option<&mut [u8]>> {
        if self.read_only {
            return Err(DiskError::ReadOnly);
        }
        let end = self.check_range(offset, len)?;
        Ok(match &mut self.inner {
            Inner::Mapped(map) => Some(&mut map[offset as usize..end]),
            Inner::MappedReadOnly(_) => return Err(DiskError::ReadOnly),
            Inner::Descriptor => None,
        })
    }

    /// Flush everything: msync the whole map, or fsync the descriptor.
    pub fn sync(&mut self) -> DiskResult<()> {
        if self.read_only {
            return Ok(());
        }
        match &self.inner {
            Inner::Mapped(map) => map.flush()?,
            Inner::MappedReadOnly(_) => {}
            Inner::Descriptor => self.file.sync_data()?,
        }
        Ok(())
    }

    /// Flush the pages covering `offset..offset + len`.
    ///
    /// The range is widened to page boundaries, so a block that straddles
    /// two pages flushes both.
    pub fn sync_range(&mut self, offset: u64, len: usize) -> DiskResult<()> {
        if self.read_only {
            return Ok(());
        }
        let end = self.check_range(offset, len)? as u64;
        match &self.inner {
            Inner::Mapped(map) => {
                let start = offset - offset % PAGE_SIZE;
                let stop = end.div_ceil(PAGE_SIZE).saturating_mul(PAGE_SIZE).min(self.len);
                map.flush_range(start as usize, (stop - start) as usize)?;
            }
            Inner::MappedReadOnly(_) => {}
            Inner::Descriptor => self.file.sync_data()?,
        }
        Ok(())
    }
}
