//! Error types for the block storage engine.

use thiserror::Error;

/// Broad classification of a [`DiskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Signature or structural validation failed while opening or creating an image.
    FatalFormat,
    /// The underlying read, write, seek or map operation failed.
    Io,
    /// A request named something that does not exist or cannot be done.
    Logical,
}

/// Errors that can occur while accessing a disk image.
#[derive(Error, Debug)]
pub enum DiskError {
    #[error("Invalid {format} image: {reason}")]
    Format { format: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Block {block} out of range (device has {blocks} blocks)")]
    BlockOutOfRange { block: u32, blocks: u32 },

    #[error("Track {track}, sector {sector} out of range")]
    SectorOutOfRange { track: u32, sector: u32 },

    #[error("Sector not found: track {track}, sector {sector}")]
    SectorNotFound { track: u32, sector: u32 },

    #[error("Address field checksum mismatch (volume {volume}, track {track}, sector {sector})")]
    AddressChecksum { volume: u8, track: u8, sector: u8 },

    #[error("Invalid disk nibble: {0:#04x}")]
    InvalidNibble(u8),

    #[error("Read-only device")]
    ReadOnly,

    #[error("Invalid storage type: {0:#x}")]
    InvalidStorageType(u8),

    #[error("Invalid fork: {0}")]
    InvalidFork(String),

    #[error("File too large: {0} bytes")]
    FileTooLarge(usize),

    #[error("Disk full")]
    DiskFull,

    #[error("Stale handle for block {0}")]
    StaleHandle(u32),

    #[error("No open volume with id {0}")]
    NoSuchVolume(usize),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl DiskError {
    pub(crate) fn format(format: &'static str, reason: impl Into<String>) -> Self {
        DiskError::Format {
            format,
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiskError::Format { .. } => ErrorKind::FatalFormat,
            DiskError::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Logical,
        }
    }
}

/// Result type for disk operations.
pub type DiskResult<T> = Result<T, DiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DiskError::format("2IMG", "bad magic").kind(),
            ErrorKind::FatalFormat
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(DiskError::from(io).kind(), ErrorKind::Io);
        assert_eq!(DiskError::DiskFull.kind(), ErrorKind::Logical);
        assert_eq!(
            DiskError::BlockOutOfRange { block: 9, blocks: 8 }.kind(),
            ErrorKind::Logical
        );
    }

    #[test]
    fn test_error_messages() {
        let err = DiskError::format("DiskCopy 4.2", "bad private word");
        assert_eq!(err.to_string(), "Invalid DiskCopy 4.2 image: bad private word");
        assert_eq!(DiskError::ReadOnly.to_string(), "Read-only device");
    }
}
