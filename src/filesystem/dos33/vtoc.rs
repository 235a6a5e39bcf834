/// The DOS 3.3 Volume Table Of Contents
///
/// The VTOC lives at track 17 sector 0 and carries the catalog pointer,
/// disk geometry and a four-byte free-sector bitmap per track. Bitmap
/// byte 0 covers sectors 15-8 (bit 7 = sector 15), byte 1 covers 7-0;
/// a set bit means free.

use crate::error::{DiskError, Result};
use crate::format::constants::{SECTOR_SIZE, SECTORS_PER_TRACK};
use crate::image::{Image, ImageOrder};

/// Track holding the VTOC and the catalog
pub const VTOC_TRACK: u8 = 17;
/// Sector of the VTOC within its track
pub const VTOC_SECTOR: u8 = 0;
/// Track/sector pairs per track/sector list sector
pub const MAX_TS_PAIRS: usize = 122;
/// Volume number stamped at format time unless overridden
pub const DEFAULT_VOLUME_NUMBER: u8 = 254;

const OFF_CATALOG_TRACK: usize = 0x01;
const OFF_CATALOG_SECTOR: usize = 0x02;
const OFF_DOS_VERSION: usize = 0x03;
const OFF_VOLUME_NUMBER: usize = 0x06;
const OFF_MAX_TS_PAIRS: usize = 0x27;
const OFF_LAST_TRACK: usize = 0x30;
const OFF_DIRECTION: usize = 0x31;
const OFF_TRACKS_PER_DISK: usize = 0x34;
const OFF_SECTORS_PER_TRACK: usize = 0x35;
const OFF_BYTES_PER_SECTOR: usize = 0x36;
const OFF_BITMAP: usize = 0x38;

/// In-memory copy of the VTOC sector, written back after mutations
#[derive(Debug, Clone)]
pub struct Vtoc {
    data: Vec<u8>,
}

impl Vtoc {
    /// Load the VTOC from its fixed location
    pub fn load(image: &Image, order: &ImageOrder) -> Result<Self> {
        Ok(Self {
            data: order.read_sector(image, VTOC_TRACK, VTOC_SECTOR)?,
        })
    }

    /// Build a freshly formatted VTOC for a disk of `tracks` tracks.
    ///
    /// Tracks 0-2 (boot and DOS image) and the catalog track start out
    /// allocated; everything else is free.
    pub fn formatted(tracks: u8, volume_number: u8) -> Self {
        let mut data = vec![0u8; SECTOR_SIZE];
        data[OFF_CATALOG_TRACK] = VTOC_TRACK;
        data[OFF_CATALOG_SECTOR] = 15;
        data[OFF_DOS_VERSION] = 3;
        data[OFF_VOLUME_NUMBER] = volume_number;
        data[OFF_MAX_TS_PAIRS] = MAX_TS_PAIRS as u8;
        data[OFF_LAST_TRACK] = VTOC_TRACK + 1;
        data[OFF_DIRECTION] = 1;
        data[OFF_TRACKS_PER_DISK] = tracks;
        data[OFF_SECTORS_PER_TRACK] = SECTORS_PER_TRACK as u8;
        data[OFF_BYTES_PER_SECTOR..OFF_BYTES_PER_SECTOR + 2]
            .copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());

        let mut vtoc = Self { data };
        for track in 3..tracks {
            if track == VTOC_TRACK {
                continue;
            }
            for sector in 0..SECTORS_PER_TRACK as u8 {
                vtoc.mark_free(track, sector);
            }
        }
        vtoc
    }

    /// Write the VTOC back to its sector
    pub fn store(&self, image: &mut Image, order: &ImageOrder) -> Result<()> {
        order.write_sector(image, VTOC_TRACK, VTOC_SECTOR, &self.data)
    }

    /// First catalog sector address
    pub fn catalog_start(&self) -> (u8, u8) {
        (self.data[OFF_CATALOG_TRACK], self.data[OFF_CATALOG_SECTOR])
    }

    /// Volume number recorded at format time
    pub fn volume_number(&self) -> u8 {
        self.data[OFF_VOLUME_NUMBER]
    }

    /// Track count the VTOC declares
    pub fn tracks(&self) -> u8 {
        self.data[OFF_TRACKS_PER_DISK]
    }

    fn bit(track: u8, sector: u8) -> (usize, u8) {
        // Byte 0 holds sectors 15-8, byte 1 holds 7-0, MSB first.
        let byte = OFF_BITMAP + track as usize * 4 + if sector >= 8 { 0 } else { 1 };
        (byte, 1 << (sector % 8))
    }

    /// Check whether a sector is free
    pub fn is_free(&self, track: u8, sector: u8) -> bool {
        let (byte, mask) = Self::bit(track, sector);
        byte < self.data.len() && self.data[byte] & mask != 0
    }

    /// Mark a sector in use
    pub fn mark_used(&mut self, track: u8, sector: u8) {
        let (byte, mask) = Self::bit(track, sector);
        if byte < self.data.len() {
            self.data[byte] &= !mask;
        }
    }

    /// Mark a sector free
    pub fn mark_free(&mut self, track: u8, sector: u8) {
        let (byte, mask) = Self::bit(track, sector);
        if byte < self.data.len() {
            self.data[byte] |= mask;
        }
    }

    /// Find a free sector, searching tracks outward from the catalog
    /// track (inward half first) and sectors top-down within a track.
    pub fn find_free_sector(&self) -> Result<(u8, u8)> {
        let tracks = self.tracks();
        let inward = (0..VTOC_TRACK).rev();
        let outward = VTOC_TRACK + 1..tracks;
        for track in inward.chain(outward) {
            for sector in (0..SECTORS_PER_TRACK as u8).rev() {
                if self.is_free(track, sector) {
                    return Ok((track, sector));
                }
            }
        }
        Err(DiskError::VolumeFull { needed: 1, free: 0 })
    }

    /// Find and claim one free sector
    pub fn allocate(&mut self) -> Result<(u8, u8)> {
        let (track, sector) = self.find_free_sector()?;
        self.mark_used(track, sector);
        Ok((track, sector))
    }

    /// Count free sectors across the whole disk
    pub fn free_count(&self) -> usize {
        let mut count = 0;
        for track in 0..self.tracks() {
            for sector in 0..SECTORS_PER_TRACK as u8 {
                if self.is_free(track, sector) {
                    count += 1;
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_reserves_system_tracks() {
        let vtoc = Vtoc::formatted(35, DEFAULT_VOLUME_NUMBER);
        // 35 tracks minus boot/DOS (3) minus catalog (1) = 31 free tracks.
        assert_eq!(vtoc.free_count(), 31 * 16);
        assert!(!vtoc.is_free(0, 0));
        assert!(!vtoc.is_free(2, 15));
        assert!(!vtoc.is_free(17, 5));
        assert!(vtoc.is_free(3, 0));
        assert!(vtoc.is_free(34, 15));
    }

    #[test]
    fn test_mark_and_query() {
        let mut vtoc = Vtoc::formatted(35, DEFAULT_VOLUME_NUMBER);
        assert!(vtoc.is_free(20, 7));
        vtoc.mark_used(20, 7);
        assert!(!vtoc.is_free(20, 7));
        vtoc.mark_free(20, 7);
        assert!(vtoc.is_free(20, 7));
    }

    #[test]
    fn test_bitmap_halves_do_not_alias() {
        let mut vtoc = Vtoc::formatted(35, DEFAULT_VOLUME_NUMBER);
        vtoc.mark_used(5, 15);
        assert!(vtoc.is_free(5, 7));
        vtoc.mark_used(5, 0);
        assert!(vtoc.is_free(5, 8));
    }

    #[test]
    fn test_allocation_starts_beside_catalog() {
        let mut vtoc = Vtoc::formatted(35, DEFAULT_VOLUME_NUMBER);
        assert_eq!(vtoc.allocate().unwrap(), (16, 15));
        assert_eq!(vtoc.allocate().unwrap(), (16, 14));
    }

    #[test]
    fn test_exhaustion_reported() {
        let mut vtoc = Vtoc::formatted(35, DEFAULT_VOLUME_NUMBER);
        while vtoc.allocate().is_ok() {}
        assert!(matches!(
            vtoc.allocate(),
            Err(DiskError::VolumeFull { .. })
        ));
        assert_eq!(vtoc.free_count(), 0);
    }

    #[test]
    fn test_store_load_round_trip() {
        use crate::format::constants::SIZE_140K;
        use crate::format::ImageFormat;

        let mut image = Image::blank(SIZE_140K);
        let order = ImageOrder::for_format(ImageFormat::DosOrder, SIZE_140K).unwrap();
        let mut vtoc = Vtoc::formatted(35, 42);
        vtoc.mark_used(10, 3);
        vtoc.store(&mut image, &order).unwrap();

        let reloaded = Vtoc::load(&image, &order).unwrap();
        assert_eq!(reloaded.volume_number(), 42);
        assert_eq!(reloaded.catalog_start(), (17, 15));
        assert!(!reloaded.is_free(10, 3));
        assert_eq!(reloaded.free_count(), vtoc.free_count());
    }
}
