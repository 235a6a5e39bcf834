/// Image buffer and logical addressing

/// Group-coded recording (6&2) codec for nibble images
pub mod nibble;
/// Logical-to-physical address translation
pub mod order;

pub use order::{AddressingMode, ImageOrder};

use crate::error::{DiskError, Result};
use std::path::{Path, PathBuf};

/// An in-memory disk image: one exclusively-owned byte buffer.
///
/// Every layer of the library mutates this single arena through an
/// [`ImageOrder`], mirroring real disk semantics. The buffer is written
/// back verbatim by [`Image::save`].
#[derive(Debug, Clone)]
pub struct Image {
    data: Vec<u8>,
    changed: bool,
    path: Option<PathBuf>,
}

impl Image {
    /// Wrap an existing byte buffer as an image
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            changed: false,
            path: None,
        }
    }

    /// Create a blank, zero-filled image of the given size
    pub fn blank(size: usize) -> Self {
        let mut image = Self::from_bytes(vec![0u8; size]);
        image.changed = true;
        image
    }

    /// Read an image file from disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(&path)?;
        Ok(Self {
            data,
            changed: false,
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Save the image back to the path it was opened from
    pub fn save(&mut self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| DiskError::Io(std::io::Error::other("image has no source path")))?;
        self.save_as(path)
    }

    /// Save the image to a file, remembering the path for later saves
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        std::fs::write(&path, &self.data)?;
        self.path = Some(path.as_ref().to_path_buf());
        self.changed = false;
        Ok(())
    }

    /// Total physical size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lowercased file extension of the source path, if any
    pub fn extension(&self) -> Option<String> {
        self.path
            .as_ref()
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Check if the image has been modified since load/save
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Borrow a byte range, bounds-checked against the physical size
    pub(crate) fn read(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data
            .get(offset..offset + len)
            .ok_or(DiskError::InvalidImageSize(self.data.len()))
    }

    /// Overwrite a byte range, bounds-checked against the physical size
    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len();
        if end > self.data.len() {
            return Err(DiskError::InvalidImageSize(self.data.len()));
        }
        self.data[offset..end].copy_from_slice(bytes);
        self.changed = true;
        Ok(())
    }

    /// Raw access to the whole buffer
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image, yielding the raw buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
