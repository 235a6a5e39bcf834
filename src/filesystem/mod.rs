/// Filesystem dialects and the shared volume contract

/// DOS 3.3 dialect (VTOC + catalog + track/sector lists)
pub mod dos33;
/// ProDOS dialect (bitmap + tiered seedling/sapling/tree storage)
pub mod prodos;

pub use dos33::Dos33Volume;
pub use prodos::ProdosVolume;

use crate::error::{DiskError, Result};
use crate::image::{Image, ImageOrder};
use std::path::Path;

/// Directory listing entry, the read side of the file-handle contract
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Filename as stored (already unpacked from the dialect's encoding)
    pub name: String,
    /// Dialect-specific file type code
    pub file_type: u8,
    /// Short human-readable type name ("BIN", "A", ...)
    pub type_name: String,
    /// Locked (write/delete protected) flag
    pub locked: bool,
    /// File size in bytes
    pub size: usize,
    /// Storage units (sectors or blocks) charged to the file
    pub units: usize,
    /// Creation timestamp, where the dialect records one
    pub created: Option<String>,
    /// Modification timestamp, where the dialect records one
    pub modified: Option<String>,
    /// True for subdirectory entries
    pub directory: bool,
}

/// One mounted filesystem dialect over an image.
///
/// All operations are synchronous and mutate the in-memory image buffer
/// directly; nothing touches persistent storage until [`Volume::save`].
pub trait Volume {
    /// Dialect name ("ProDOS", "DOS 3.3")
    fn dialect(&self) -> &'static str;

    /// Volume name or label
    fn volume_name(&self) -> String;

    /// Total storage units the volume bookkeeping declares
    fn total_units(&self) -> usize;

    /// Currently free storage units
    fn free_units(&self) -> Result<usize>;

    /// Bytes per storage unit (256 for sectors, 512 for blocks)
    fn unit_size(&self) -> usize;

    /// List directory entries
    fn list_files(&self) -> Result<Vec<FileInfo>>;

    /// Read a file's contents
    fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    /// Write a file's contents, creating it if necessary
    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Create an empty file with the given dialect type code
    fn create_file(&mut self, name: &str, file_type: u8) -> Result<()>;

    /// Create a subdirectory, on dialects that have them
    fn create_directory(&mut self, name: &str) -> Result<()>;

    /// Delete a file, freeing its storage units
    fn delete_file(&mut self, name: &str) -> Result<()>;

    /// Rename a file
    fn rename_file(&mut self, name: &str, new_name: &str) -> Result<()>;

    /// Set or clear the lock flag
    fn set_locked(&mut self, name: &str, locked: bool) -> Result<()>;

    /// Change the file type code
    fn set_file_type(&mut self, name: &str, file_type: u8) -> Result<()>;

    /// Flush the image buffer to a file
    fn save(&mut self, path: &Path) -> Result<()>;

    /// Borrow the underlying image
    fn image(&self) -> &Image;

    /// Consume the volume, yielding the underlying image
    fn into_image(self: Box<Self>) -> Image;
}

/// One registered dialect: recognizes images and opens or formats volumes
pub trait DialectHandler {
    /// Dialect name, matched by [`DialectRegistry::format`]
    fn name(&self) -> &'static str;

    /// Check whether this dialect's structures are present under `order`
    fn probe(&self, image: &Image, order: ImageOrder) -> bool;

    /// Mount a recognized image
    fn open(&self, image: Image, order: ImageOrder) -> Result<Box<dyn Volume>>;

    /// Format a blank image and mount the fresh volume
    fn format(&self, image: Image, order: ImageOrder, volume_name: &str)
        -> Result<Box<dyn Volume>>;
}

/// Explicit, test-constructible set of dialect handlers.
///
/// Volume opening tries every plausible physical ordering against every
/// registered handler instead of consulting any global registry.
pub struct DialectRegistry {
    handlers: Vec<Box<dyn DialectHandler>>,
}

impl DialectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Create a registry with the built-in dialects registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(prodos::ProdosHandler));
        registry.register(Box::new(dos33::Dos33Handler));
        registry
    }

    /// Register an additional dialect handler
    pub fn register(&mut self, handler: Box<dyn DialectHandler>) {
        self.handlers.push(handler);
    }

    /// Open a volume by sniffing the image against every handler
    pub fn open(&self, image: Image) -> Result<Box<dyn Volume>> {
        for order in ImageOrder::candidates(&image) {
            for handler in &self.handlers {
                if handler.probe(&image, order) {
                    return handler.open(image, order);
                }
            }
        }
        Err(DiskError::UnrecognizedDialect)
    }

    /// Format a blank image with the named dialect
    pub fn format(
        &self,
        dialect: &str,
        image: Image,
        volume_name: &str,
    ) -> Result<Box<dyn Volume>> {
        let order = ImageOrder::candidates(&image)
            .into_iter()
            .next()
            .ok_or(DiskError::InvalidImageSize(image.len()))?;
        let handler = self
            .handlers
            .iter()
            .find(|h| h.name().eq_ignore_ascii_case(dialect))
            .ok_or(DiskError::UnrecognizedDialect)?;
        handler.format(image, order, volume_name)
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Open a volume using the default dialect registry
pub fn open_volume(image: Image) -> Result<Box<dyn Volume>> {
    DialectRegistry::with_defaults().open(image)
}

/// Format a blank image using the default dialect registry
pub fn format_volume(dialect: &str, image: Image, volume_name: &str) -> Result<Box<dyn Volume>> {
    DialectRegistry::with_defaults().format(dialect, image, volume_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::SIZE_140K;

    #[test]
    fn test_open_blank_image_unrecognized() {
        let image = Image::blank(SIZE_140K);
        let result = DialectRegistry::with_defaults().open(image);
        assert!(matches!(result, Err(DiskError::UnrecognizedDialect)));
    }

    #[test]
    fn test_empty_registry_recognizes_nothing() {
        let image = Image::blank(SIZE_140K);
        let registry = DialectRegistry::new();
        assert!(matches!(
            registry.open(image),
            Err(DiskError::UnrecognizedDialect)
        ));
    }

    #[test]
    fn test_format_unknown_dialect() {
        let image = Image::blank(SIZE_140K);
        let result = format_volume("CP/M", image, "TEST");
        assert!(matches!(result, Err(DiskError::UnrecognizedDialect)));
    }
}
