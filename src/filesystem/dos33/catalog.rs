/// The DOS 3.3 catalog: a chain of sectors of 35-byte file entries
///
/// Catalog sectors link through bytes 1-2 and hold seven entries each
/// starting at offset 0x0B. Names are 30 bytes of high-ASCII padded
/// with spaces. A deleted entry keeps its bytes but has 0xFF in the
/// track byte, with the original track stashed in the last name byte.

use crate::error::{DiskError, Result};
use crate::filesystem::dos33::vtoc::Vtoc;
use crate::image::{Image, ImageOrder};
use std::collections::HashSet;

/// Entries per catalog sector
pub const ENTRIES_PER_SECTOR: usize = 7;
/// Bytes per catalog entry
pub const ENTRY_LENGTH: usize = 35;
/// Offset of the first entry within a catalog sector
pub const FIRST_ENTRY_OFFSET: usize = 0x0B;
/// Stored filename length
pub const NAME_LENGTH: usize = 30;
/// Track byte marking a deleted entry
pub const DELETED_TRACK: u8 = 0xFF;
/// Offset within an entry where a deleted file's track is stashed
pub const DELETED_TRACK_STASH: usize = 0x20;

/// File type bit for Applesoft BASIC
pub const TYPE_APPLESOFT: u8 = 0x02;
/// File type bit for Integer BASIC
pub const TYPE_INTEGER: u8 = 0x01;
/// File type bit for binary files
pub const TYPE_BINARY: u8 = 0x04;
/// File type for sequential text files
pub const TYPE_TEXT: u8 = 0x00;
/// Lock bit within the type byte
pub const LOCK_BIT: u8 = 0x80;

/// Single-letter name for a DOS file type byte (lock bit ignored)
pub fn type_letter(file_type: u8) -> &'static str {
    match file_type & 0x7F {
        TYPE_TEXT => "T",
        TYPE_INTEGER => "I",
        TYPE_APPLESOFT => "A",
        TYPE_BINARY => "B",
        0x08 => "S",
        0x10 => "R",
        0x20 => "A",
        0x40 => "B",
        _ => "?",
    }
}

/// Where a catalog entry lives on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySlot {
    /// Catalog track
    pub track: u8,
    /// Catalog sector
    pub sector: u8,
    /// Byte offset of the entry within the sector
    pub offset: usize,
}

/// A parsed catalog entry
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// First track/sector list location: track
    pub ts_track: u8,
    /// First track/sector list location: sector
    pub ts_sector: u8,
    /// Type byte, lock bit included
    pub file_type: u8,
    /// Filename with padding and the high bit stripped
    pub name: String,
    /// Sectors charged to the file, list sectors included
    pub sector_count: u16,
}

impl CatalogEntry {
    /// Parse an entry; `None` for a never-used or deleted slot
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ENTRY_LENGTH || bytes[0] == 0 || bytes[0] == DELETED_TRACK {
            return None;
        }
        let name: String = bytes[3..3 + NAME_LENGTH]
            .iter()
            .map(|&b| (b & 0x7F) as char)
            .collect();
        Some(Self {
            ts_track: bytes[0],
            ts_sector: bytes[1],
            file_type: bytes[2],
            name: name.trim_end().to_string(),
            sector_count: u16::from_le_bytes([bytes[33], bytes[34]]),
        })
    }

    /// Serialize all 35 bytes
    pub fn write_to(&self, out: &mut [u8]) {
        out[0] = self.ts_track;
        out[1] = self.ts_sector;
        out[2] = self.file_type;
        for (i, slot) in out[3..3 + NAME_LENGTH].iter_mut().enumerate() {
            let c = self.name.as_bytes().get(i).copied().unwrap_or(b' ');
            *slot = c | 0x80;
        }
        out[33..35].copy_from_slice(&self.sector_count.to_le_bytes());
    }

    /// Check the lock bit
    pub fn is_locked(&self) -> bool {
        self.file_type & LOCK_BIT != 0
    }
}

/// Catalog sector addresses in chain order, guarding against cycles
pub fn catalog_sectors(image: &Image, order: &ImageOrder, vtoc: &Vtoc) -> Result<Vec<(u8, u8)>> {
    let mut sectors = Vec::new();
    let mut seen = HashSet::new();
    let mut current = vtoc.catalog_start();
    while current != (0, 0) {
        if !seen.insert(current) {
            return Err(DiskError::corrupt(format!(
                "catalog chain loops at track {} sector {}",
                current.0, current.1
            )));
        }
        sectors.push(current);
        let data = order.read_sector(image, current.0, current.1)?;
        current = (data[1], data[2]);
    }
    Ok(sectors)
}

/// Visit every active catalog entry
pub fn walk_entries(
    image: &Image,
    order: &ImageOrder,
    vtoc: &Vtoc,
) -> Result<Vec<(EntrySlot, CatalogEntry)>> {
    let mut entries = Vec::new();
    for (track, sector) in catalog_sectors(image, order, vtoc)? {
        let data = order.read_sector(image, track, sector)?;
        for i in 0..ENTRIES_PER_SECTOR {
            let offset = FIRST_ENTRY_OFFSET + i * ENTRY_LENGTH;
            if let Some(entry) = CatalogEntry::parse(&data[offset..offset + ENTRY_LENGTH]) {
                entries.push((EntrySlot { track, sector, offset }, entry));
            }
        }
    }
    Ok(entries)
}

/// Find an active entry by name
pub fn find_entry(
    image: &Image,
    order: &ImageOrder,
    vtoc: &Vtoc,
    name: &str,
) -> Result<Option<(EntrySlot, CatalogEntry)>> {
    Ok(walk_entries(image, order, vtoc)?
        .into_iter()
        .find(|(_, e)| e.name.eq_ignore_ascii_case(name)))
}

/// Find the first reusable slot: never-used or deleted
pub fn find_free_slot(image: &Image, order: &ImageOrder, vtoc: &Vtoc) -> Result<EntrySlot> {
    for (track, sector) in catalog_sectors(image, order, vtoc)? {
        let data = order.read_sector(image, track, sector)?;
        for i in 0..ENTRIES_PER_SECTOR {
            let offset = FIRST_ENTRY_OFFSET + i * ENTRY_LENGTH;
            if data[offset] == 0 || data[offset] == DELETED_TRACK {
                return Ok(EntrySlot { track, sector, offset });
            }
        }
    }
    Err(DiskError::DirectoryFull)
}

/// Write an entry into its slot
pub fn write_entry(
    image: &mut Image,
    order: &ImageOrder,
    slot: EntrySlot,
    entry: &CatalogEntry,
) -> Result<()> {
    let mut data = order.read_sector(image, slot.track, slot.sector)?;
    entry.write_to(&mut data[slot.offset..slot.offset + ENTRY_LENGTH]);
    order.write_sector(image, slot.track, slot.sector, &data)
}

/// Flag an entry deleted, stashing the track byte the way DOS does.
///
/// The rest of the slot keeps its old bytes until the slot is reused.
pub fn delete_entry(image: &mut Image, order: &ImageOrder, slot: EntrySlot) -> Result<()> {
    let mut data = order.read_sector(image, slot.track, slot.sector)?;
    data[slot.offset + DELETED_TRACK_STASH] = data[slot.offset];
    data[slot.offset] = DELETED_TRACK;
    order.write_sector(image, slot.track, slot.sector, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> CatalogEntry {
        CatalogEntry {
            ts_track: 18,
            ts_sector: 15,
            file_type: TYPE_BINARY,
            name: "HELLO WORLD".into(),
            sector_count: 3,
        }
    }

    #[test]
    fn test_entry_round_trip() {
        let entry = sample_entry();
        let mut bytes = [0u8; ENTRY_LENGTH];
        entry.write_to(&mut bytes);

        let parsed = CatalogEntry::parse(&bytes).unwrap();
        assert_eq!(parsed.name, "HELLO WORLD");
        assert_eq!(parsed.ts_track, 18);
        assert_eq!(parsed.ts_sector, 15);
        assert_eq!(parsed.sector_count, 3);
    }

    #[test]
    fn test_name_stored_high_ascii_space_padded() {
        let entry = sample_entry();
        let mut bytes = [0u8; ENTRY_LENGTH];
        entry.write_to(&mut bytes);
        assert_eq!(bytes[3], b'H' | 0x80);
        // Padding past the name is high-ASCII spaces.
        assert_eq!(bytes[3 + 11], b' ' | 0x80);
        assert_eq!(bytes[3 + NAME_LENGTH - 1], b' ' | 0x80);
    }

    #[test]
    fn test_unused_and_deleted_slots_skipped() {
        assert!(CatalogEntry::parse(&[0u8; ENTRY_LENGTH]).is_none());
        let mut bytes = [0u8; ENTRY_LENGTH];
        sample_entry().write_to(&mut bytes);
        bytes[0] = DELETED_TRACK;
        assert!(CatalogEntry::parse(&bytes).is_none());
    }

    #[test]
    fn test_lock_bit() {
        let mut entry = sample_entry();
        assert!(!entry.is_locked());
        entry.file_type |= LOCK_BIT;
        assert!(entry.is_locked());
        assert_eq!(type_letter(entry.file_type), "B");
    }

    #[test]
    fn test_type_letters() {
        assert_eq!(type_letter(TYPE_TEXT), "T");
        assert_eq!(type_letter(TYPE_INTEGER), "I");
        assert_eq!(type_letter(TYPE_APPLESOFT), "A");
        assert_eq!(type_letter(TYPE_BINARY), "B");
        assert_eq!(type_letter(0x08), "S");
    }
}
