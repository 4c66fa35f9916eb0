//! Device configuration.
//!
//! Options are plain structs with sensible defaults and can be loaded from
//! JSON, e.g.:
//!
//! ```
//! use prodisk_core::{Backing, DeviceOptions, SyncPolicy};
//!
//! let opts = DeviceOptions::from_json(
//!     r#"{ "readOnly": true, "backing": "descriptor", "nibble": { "syncPolicy": "strict" } }"#,
//! ).unwrap();
//! assert!(opts.read_only);
//! assert_eq!(opts.backing, Backing::Descriptor);
//! assert_eq!(opts.nibble.sync_policy, SyncPolicy::Strict);
//! assert_eq!(opts.cache.pool_size, 16);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DiskResult;
use crate::image::ImageFormat;

/// Smallest pool the pooled cache will run with.
pub const MIN_POOL_SIZE: usize = 16;

/// Default volume number written into nibble address fields.
pub const DEFAULT_VOLUME: u8 = 254;

/// How the image file is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Backing {
    /// Memory-map the whole file.
    #[default]
    Mapped,
    /// Positional reads and writes on the file descriptor.
    Descriptor,
}

/// What to do with damaged nibble track structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPolicy {
    /// Missing, duplicate or mis-tracked sectors fail the image.
    Strict,
    /// Log a warning and keep going with whatever sectors were found.
    #[default]
    BestEffort,
}

/// Pooled cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheOptions {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            pool_size: MIN_POOL_SIZE,
        }
    }
}

fn default_pool_size() -> usize {
    MIN_POOL_SIZE
}

/// Nibble image settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NibbleOptions {
    #[serde(default)]
    pub sync_policy: SyncPolicy,
    /// Volume number used when laying out new tracks.
    #[serde(default = "default_volume")]
    pub volume: u8,
}

impl Default for NibbleOptions {
    fn default() -> Self {
        Self {
            sync_policy: SyncPolicy::default(),
            volume: DEFAULT_VOLUME,
        }
    }
}

fn default_volume() -> u8 {
    DEFAULT_VOLUME
}

/// Options for opening or creating a [`BlockDevice`](crate::BlockDevice).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceOptions {
    #[serde(default)]
    pub read_only: bool,
    /// Container format; `None` detects it from the header and file name.
    #[serde(default)]
    pub format: Option<ImageFormat>,
    #[serde(default)]
    pub backing: Backing,
    #[serde(default)]
    pub cache: CacheOptions,
    #[serde(default)]
    pub nibble: NibbleOptions,
}

impl DeviceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document.
    pub fn from_json(text: &str) -> DiskResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load options from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> DiskResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_backing(mut self, backing: Backing) -> Self {
        self.backing = backing;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Pool size with the minimum applied.
    pub fn pool_size(&self) -> usize {
        self.cache.pool_size.max(MIN_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = DeviceOptions::new();
        assert!(!opts.read_only);
        assert_eq!(opts.format, None);
        assert_eq!(opts.backing, Backing::Mapped);
        assert_eq!(opts.nibble.sync_policy, SyncPolicy::BestEffort);
        assert_eq!(opts.nibble.volume, 254);
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let opts = DeviceOptions::from_json("{}").unwrap();
        assert_eq!(opts.pool_size(), MIN_POOL_SIZE);
        assert_eq!(opts.nibble.volume, DEFAULT_VOLUME);
    }

    #[test]
    fn test_pool_size_clamped() {
        let opts = DeviceOptions::from_json(r#"{ "cache": { "poolSize": 4 } }"#).unwrap();
        assert_eq!(opts.cache.pool_size, 4);
        assert_eq!(opts.pool_size(), MIN_POOL_SIZE);

        let opts = DeviceOptions::from_json(r#"{ "cache": { "poolSize": 64 } }"#).unwrap();
        assert_eq!(opts.pool_size(), 64);
    }

    #[test]
    fn test_format_from_json() {
        let opts = DeviceOptions::from_json(r#"{ "format": "diskCopy42" }"#).unwrap();
        assert_eq!(opts.format, Some(ImageFormat::DiskCopy42));
    }

    #[test]
    fn test_bad_json() {
        let err = DeviceOptions::from_json(r#"{ "backing": "tape" }"#).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Logical);
    }
}
