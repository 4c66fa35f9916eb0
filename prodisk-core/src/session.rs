//! Session: the set of volumes a caller has open.
//!
//! Each open image gets a slot holding its cache (which owns the device).
//! Slots are addressed by [`VolumeId`]; a closed slot is reused by the next
//! open. No locking: a session belongs to one thread.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::cache::{BlockCache, MappedCache, PooledCache};
use crate::config::{Backing, DeviceOptions};
use crate::device::BlockDevice;
use crate::error::{DiskError, DiskResult};
use crate::image::ImageFormat;

/// Handle for an open volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId(usize);

impl VolumeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Volume {
    path: PathBuf,
    cache: Box<dyn BlockCache>,
}

/// Explicit arena of open volumes.
#[derive(Default)]
pub struct Session {
    volumes: Vec<Option<Volume>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an existing image and give it a cache.
    ///
    /// Mapped images with a contiguous block layout get a [`MappedCache`];
    /// everything else gets a [`PooledCache`] sized by `options.cache`.
    pub fn open(&mut self, path: impl AsRef<Path>, options: &DeviceOptions) -> DiskResult<VolumeId> {
        let path = path.as_ref();
        let device = BlockDevice::open(path, options)?;
        self.insert(path, device, options)
    }

    /// Create a new image and open it.
    pub fn create(
        &mut self,
        path: impl AsRef<Path>,
        format: ImageFormat,
        blocks: u32,
        options: &DeviceOptions,
    ) -> DiskResult<VolumeId> {
        let path = path.as_ref();
        let device = BlockDevice::create(path, format, blocks, options)?;
        self.insert(path, device, options)
    }

    fn insert(
        &mut self,
        path: &Path,
        device: BlockDevice,
        options: &DeviceOptions,
    ) -> DiskResult<VolumeId> {
        let cache: Box<dyn BlockCache> =
            if options.backing == Backing::Mapped && device.supports_mapping() {
                Box::new(MappedCache::new(device)?)
            } else {
                Box::new(PooledCache::new(device, options.pool_size()))
            };
        let volume = Volume {
            path: path.to_path_buf(),
            cache,
        };
        let index = match self.volumes.iter().position(Option::is_none) {
            Some(index) => {
                self.volumes[index] = Some(volume);
                index
            }
            None => {
                self.volumes.push(Some(volume));
                self.volumes.len() - 1
            }
        };
        let id = VolumeId(index);
        debug!("volume {id}: {}", path.display());
        Ok(id)
    }

    fn volume(&self, id: VolumeId) -> DiskResult<&Volume> {
        self.volumes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(DiskError::NoSuchVolume(id.0))
    }

    /// Block cache of an open volume.
    pub fn cache(&mut self, id: VolumeId) -> DiskResult<&mut dyn BlockCache> {
        match self.volumes.get_mut(id.0).and_then(Option::as_mut) {
            Some(volume) => {
                let cache: &mut dyn BlockCache = volume.cache.as_mut();
                Ok(cache)
            }
            None => Err(DiskError::NoSuchVolume(id.0)),
        }
    }

    /// Image path of an open volume.
    pub fn path(&self, id: VolumeId) -> DiskResult<&Path> {
        Ok(&self.volume(id)?.path)
    }

    /// Flush the cache, then the device, and release the volume.
    pub fn close(&mut self, id: VolumeId) -> DiskResult<()> {
        let mut volume = self
            .volumes
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(DiskError::NoSuchVolume(id.0))?;
        debug!("closing volume {id}: {}", volume.path.display());
        volume.cache.sync()
    }

    /// Close every volume, returning the first failure.
    pub fn close_all(&mut self) -> DiskResult<()> {
        let mut result = Ok(());
        for id in self.volumes() {
            if let Err(err) = self.close(id) {
                warn!("failed to close volume {id}: {err}");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        self.volumes.clear();
        result
    }

    /// Ids of all open volumes, in slot order.
    pub fn volumes(&self) -> Vec<VolumeId> {
        self.volumes
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_some())
            .map(|(i, _)| VolumeId(i))
            .collect()
    }
}
