/// ProDOS volume bitmap: one bit per block, bit set meaning free
///
/// The bitmap lives in consecutive blocks starting at the header's
/// bitmap pointer, MSB-first: bit 7 of byte 0 is block 0.

use crate::error::{DiskError, Result};
use crate::format::constants::BLOCK_SIZE;
use crate::image::{Image, ImageOrder};

/// Blocks tracked per bitmap block (512 bytes x 8 bits)
pub const BLOCKS_PER_BITMAP_BLOCK: usize = BLOCK_SIZE * 8;

/// In-memory copy of the volume bitmap, written back after mutations
#[derive(Debug, Clone)]
pub struct VolumeBitmap {
    data: Vec<u8>,
    bitmap_pointer: u16,
    total_blocks: u16,
    /// Blocks actually backed by the image buffer; the declared logical
    /// size may claim more than physically exists
    physical_blocks: u16,
}

impl VolumeBitmap {
    /// Number of blocks the bitmap itself occupies
    pub fn bitmap_blocks(total_blocks: u16) -> u16 {
        total_blocks.div_ceil(BLOCKS_PER_BITMAP_BLOCK as u16).max(1)
    }

    /// Load the bitmap from the image
    pub fn load(
        image: &Image,
        order: &ImageOrder,
        bitmap_pointer: u16,
        total_blocks: u16,
    ) -> Result<Self> {
        let mut data = Vec::with_capacity(Self::bitmap_blocks(total_blocks) as usize * BLOCK_SIZE);
        for i in 0..Self::bitmap_blocks(total_blocks) {
            data.extend_from_slice(&order.read_block(image, bitmap_pointer + i)?);
        }
        Ok(Self {
            data,
            bitmap_pointer,
            total_blocks,
            physical_blocks: order.block_count(),
        })
    }

    /// Create a fresh bitmap with every block free
    pub fn formatted(order: &ImageOrder, bitmap_pointer: u16, total_blocks: u16) -> Self {
        let mut bitmap = Self {
            data: vec![0u8; Self::bitmap_blocks(total_blocks) as usize * BLOCK_SIZE],
            bitmap_pointer,
            total_blocks,
            physical_blocks: order.block_count(),
        };
        for block in 0..total_blocks {
            bitmap.mark_free(block);
        }
        bitmap
    }

    /// Write the bitmap back to its blocks
    pub fn store(&self, image: &mut Image, order: &ImageOrder) -> Result<()> {
        for (i, chunk) in self.data.chunks(BLOCK_SIZE).enumerate() {
            order.write_block(image, self.bitmap_pointer + i as u16, chunk)?;
        }
        Ok(())
    }

    /// Check whether a block is free
    pub fn is_free(&self, block: u16) -> bool {
        let byte = block as usize / 8;
        let bit = 7 - block % 8;
        byte < self.data.len() && (self.data[byte] >> bit) & 1 == 1
    }

    /// Mark a block in use
    pub fn mark_used(&mut self, block: u16) {
        let byte = block as usize / 8;
        let bit = 7 - block % 8;
        if byte < self.data.len() {
            self.data[byte] &= !(1 << bit);
        }
    }

    /// Mark a block free
    pub fn mark_free(&mut self, block: u16) {
        let byte = block as usize / 8;
        let bit = 7 - block % 8;
        if byte < self.data.len() {
            self.data[byte] |= 1 << bit;
        }
    }

    /// Find the lowest free block, scanning ascending from block 1.
    ///
    /// Block 0 holds boot code and is never handed out. Blocks past the
    /// image's physical end are skipped even when `total_blocks` claims
    /// they exist.
    pub fn find_free_block(&self) -> Result<u16> {
        let limit = self.total_blocks.min(self.physical_blocks);
        (1..limit)
            .find(|&b| self.is_free(b))
            .ok_or(DiskError::VolumeFull { needed: 1, free: 0 })
    }

    /// Find and claim one free block
    pub fn allocate(&mut self) -> Result<u16> {
        let block = self.find_free_block()?;
        self.mark_used(block);
        Ok(block)
    }

    /// Count free blocks within the declared volume size
    pub fn free_count(&self) -> usize {
        let limit = self.total_blocks.min(self.physical_blocks);
        (0..limit).filter(|&b| self.is_free(b)).count()
    }

    /// Declared total block count
    pub fn total_blocks(&self) -> u16 {
        self.total_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::SIZE_140K;
    use crate::format::ImageFormat;

    fn bitmap_280() -> VolumeBitmap {
        let order = ImageOrder::for_format(ImageFormat::ProdosOrder, SIZE_140K).unwrap();
        VolumeBitmap::formatted(&order, 6, 280)
    }

    #[test]
    fn test_bitmap_blocks() {
        assert_eq!(VolumeBitmap::bitmap_blocks(280), 1);
        assert_eq!(VolumeBitmap::bitmap_blocks(4096), 1);
        assert_eq!(VolumeBitmap::bitmap_blocks(4097), 2);
        assert_eq!(VolumeBitmap::bitmap_blocks(65535), 16);
    }

    #[test]
    fn test_mark_and_query() {
        let mut bitmap = bitmap_280();
        assert!(bitmap.is_free(10));
        bitmap.mark_used(10);
        assert!(!bitmap.is_free(10));
        bitmap.mark_free(10);
        assert!(bitmap.is_free(10));
    }

    #[test]
    fn test_allocate_skips_block_zero() {
        let mut bitmap = bitmap_280();
        assert_eq!(bitmap.allocate().unwrap(), 1);
        assert_eq!(bitmap.allocate().unwrap(), 2);
    }

    #[test]
    fn test_exhaustion_reported() {
        let mut bitmap = bitmap_280();
        for b in 0..280 {
            bitmap.mark_used(b);
        }
        assert!(matches!(
            bitmap.allocate(),
            Err(DiskError::VolumeFull { .. })
        ));
    }

    #[test]
    fn test_oversized_declaration_clamped_to_physical() {
        // Volume claims 400 blocks but the image only backs 280: blocks
        // past the physical end must never be allocated.
        let order = ImageOrder::for_format(ImageFormat::ProdosOrder, SIZE_140K).unwrap();
        let mut bitmap = VolumeBitmap::formatted(&order, 6, 400);
        for b in 0..280 {
            bitmap.mark_used(b);
        }
        assert!(matches!(
            bitmap.find_free_block(),
            Err(DiskError::VolumeFull { .. })
        ));
        assert_eq!(bitmap.free_count(), 0);
    }

    #[test]
    fn test_store_and_load_round_trip() {
        let mut image = Image::blank(SIZE_140K);
        let order = ImageOrder::for_format(ImageFormat::ProdosOrder, SIZE_140K).unwrap();
        let mut bitmap = bitmap_280();
        for b in 0..7 {
            bitmap.mark_used(b);
        }
        bitmap.store(&mut image, &order).unwrap();

        let reloaded = VolumeBitmap::load(&image, &order, 6, 280).unwrap();
        assert_eq!(reloaded.free_count(), 273);
        assert!(!reloaded.is_free(6));
        assert!(reloaded.is_free(7));
    }
}
