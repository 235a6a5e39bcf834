use thiserror::Error;

/// Result type alias for disk image operations
pub type Result<T> = std::result::Result<T, DiskError>;

/// Errors that can occur when working with Apple II disk images
#[derive(Debug, Error)]
pub enum DiskError {
    /// I/O error occurred while reading or writing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image file size does not match any known geometry
    #[error("Unsupported image size: {0} bytes")]
    InvalidImageSize(usize),

    /// Invalid track number specified
    #[error("Invalid track {track} (max: {max})")]
    InvalidTrack {
        /// Track number
        track: u8,
        /// Maximum allowed track number
        max: u8,
    },

    /// Invalid sector number specified
    #[error("Invalid sector {sector} on track {track}")]
    InvalidSector {
        /// Track number
        track: u8,
        /// Sector number
        sector: u8,
    },

    /// Invalid block number specified
    #[error("Invalid block {block} (max: {max})")]
    InvalidBlock {
        /// Block number
        block: u16,
        /// Maximum allowed block number
        max: u16,
    },

    /// Nibble (GCR) decode or encode failure
    #[error("Nibble error: {0}")]
    NibbleError(String),

    /// Sector write with the wrong amount of data
    #[error("Invalid data size: expected {expected} bytes, got {actual}")]
    InvalidDataSize {
        /// Required byte count
        expected: usize,
        /// Supplied byte count
        actual: usize,
    },

    /// No registered dialect recognizes the image
    #[error("Unrecognized dialect: no filesystem claims this image")]
    UnrecognizedDialect,

    /// Not enough free units to satisfy an allocation
    #[error("Volume full: {needed} units needed, {free} free")]
    VolumeFull {
        /// Units the operation requires
        needed: usize,
        /// Units currently free
        free: usize,
    },

    /// Directory has no free entry slots and cannot grow
    #[error("Directory full")]
    DirectoryFull,

    /// On-disk structure is inconsistent (cyclic chain, tag mismatch, ...)
    #[error("Corrupt structure: {0}")]
    CorruptStructure(String),

    /// File not found in filesystem
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A file with this name already exists
    #[error("File already exists: {0}")]
    DuplicateFile(String),

    /// Invalid filename for the dialect
    #[error("Invalid filename: {0}")]
    InvalidFileName(String),

    /// Operation refused because the file is locked
    #[error("File is locked: {0}")]
    FileLocked(String),

    /// Operation the dialect does not support
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl DiskError {
    /// Create a corrupt structure error with context
    pub fn corrupt<S: Into<String>>(message: S) -> Self {
        DiskError::CorruptStructure(message.into())
    }

    /// Create a nibble decode/encode error with context
    pub fn nibble<S: Into<String>>(message: S) -> Self {
        DiskError::NibbleError(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiskError::InvalidTrack { track: 50, max: 34 };
        assert_eq!(err.to_string(), "Invalid track 50 (max: 34)");
    }

    #[test]
    fn test_volume_full_display() {
        let err = DiskError::VolumeFull { needed: 10, free: 3 };
        assert_eq!(err.to_string(), "Volume full: 10 units needed, 3 free");
    }

    #[test]
    fn test_corrupt_helper() {
        let err = DiskError::corrupt("catalog chain loops");
        assert_eq!(err.to_string(), "Corrupt structure: catalog chain loops");
    }
}
