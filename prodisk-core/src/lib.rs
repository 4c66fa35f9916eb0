//! prodisk-core: block storage engine for Apple II ProDOS disk images.
//!
//! Layers, bottom up:
//! - [`image`]: container adaptors that map 512-byte blocks onto image files
//! - [`codec`]: 6-and-2 GCR encoding used by nibble images
//! - [`device`]: [`BlockDevice`], uniform block access over any container
//! - [`cache`]: [`PooledCache`] (LRU pool) and [`MappedCache`] (direct map)
//! - [`bitmap`]: the ProDOS volume free-block bitmap
//! - [`index_tree`]: seedling, sapling and tree file index traversal
//! - [`session`]: a set of open volumes addressed by id

pub mod bitmap;
pub mod cache;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod image;
pub mod index_tree;
pub mod session;

/// Size of a ProDOS logical block in bytes.
pub const BLOCK_SIZE: usize = 512;

pub use bitmap::Bitmap;
pub use cache::{BlockCache, BlockHandle, MappedCache, PooledCache};
pub use config::{Backing, CacheOptions, DeviceOptions, NibbleOptions, SyncPolicy};
pub use device::BlockDevice;
pub use error::{DiskError, DiskResult, ErrorKind};
pub use image::ImageFormat;
pub use index_tree::{Fork, ForkDescriptor, StorageType};
pub use session::{Session, VolumeId};
