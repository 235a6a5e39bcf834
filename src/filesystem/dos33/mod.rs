/// DOS 3.3 dialect: track/sector volume with a VTOC and catalog
///
/// Binary files carry a four-byte load-address/length header and BASIC
/// files a two-byte length header; both are stripped on read and
/// resynthesized on write so callers only ever see file payloads.

/// Catalog sectors and entries
pub mod catalog;
/// Track/sector list chains
pub mod storage;
/// The volume table of contents
pub mod vtoc;

use crate::error::{DiskError, Result};
use crate::filesystem::dos33::catalog::{
    delete_entry, find_entry, find_free_slot, type_letter, write_entry, CatalogEntry, EntrySlot,
    LOCK_BIT, NAME_LENGTH, TYPE_APPLESOFT, TYPE_BINARY, TYPE_INTEGER, TYPE_TEXT,
};
use crate::filesystem::dos33::vtoc::{Vtoc, DEFAULT_VOLUME_NUMBER, VTOC_TRACK};
use crate::filesystem::{DialectHandler, FileInfo, Volume};
use crate::format::constants::{SECTOR_SIZE, SECTORS_PER_TRACK};
use crate::image::{Image, ImageOrder};
use std::path::Path;

/// Default load address stamped into new binary files
const DEFAULT_LOAD_ADDRESS: u16 = 0x0800;

/// Strip the type-specific header from a file's raw sectors
fn strip_header(file_type: u8, raw: &[u8]) -> Vec<u8> {
    match file_type & 0x7F {
        TYPE_BINARY => {
            if raw.len() < 4 {
                return Vec::new();
            }
            let len = u16::from_le_bytes([raw[2], raw[3]]) as usize;
            raw[4..].get(..len).unwrap_or(&raw[4..]).to_vec()
        }
        TYPE_APPLESOFT | TYPE_INTEGER => {
            if raw.len() < 2 {
                return Vec::new();
            }
            let len = u16::from_le_bytes([raw[0], raw[1]]) as usize;
            raw[2..].get(..len).unwrap_or(&raw[2..]).to_vec()
        }
        TYPE_TEXT => {
            let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            raw[..end].to_vec()
        }
        _ => raw.to_vec(),
    }
}

/// Prepend the type-specific header to a payload
fn add_header(file_type: u8, load_address: u16, payload: &[u8]) -> Vec<u8> {
    match file_type & 0x7F {
        TYPE_BINARY => {
            let mut raw = Vec::with_capacity(payload.len() + 4);
            raw.extend_from_slice(&load_address.to_le_bytes());
            raw.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            raw.extend_from_slice(payload);
            raw
        }
        TYPE_APPLESOFT | TYPE_INTEGER => {
            let mut raw = Vec::with_capacity(payload.len() + 2);
            raw.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            raw.extend_from_slice(payload);
            raw
        }
        _ => payload.to_vec(),
    }
}

/// Validate a DOS filename, returning its stored (uppercase) form.
///
/// Names are 1-30 printable ASCII characters starting with a letter;
/// commas are the DOS command separator and never valid.
fn validate_name(name: &str) -> Result<String> {
    let upper = name.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= NAME_LENGTH
        && bytes[0].is_ascii_alphabetic()
        && bytes.iter().all(|b| (0x20..0x7F).contains(b) && *b != b',');
    if valid {
        Ok(upper)
    } else {
        Err(DiskError::InvalidFileName(name.into()))
    }
}

/// A mounted DOS 3.3 volume
pub struct Dos33Volume {
    image: Image,
    order: ImageOrder,
}

impl Dos33Volume {
    /// Mount an image already carrying DOS 3.3 structures
    pub fn open(image: Image, order: ImageOrder) -> Result<Self> {
        let vtoc = Vtoc::load(&image, &order)?;
        let (track, sector) = vtoc.catalog_start();
        if track == 0 || track >= order.track_count() || sector as usize >= SECTORS_PER_TRACK {
            return Err(DiskError::corrupt("VTOC catalog pointer out of range"));
        }
        Ok(Self { image, order })
    }

    /// Format a blank image and mount the fresh volume.
    ///
    /// DOS volumes have a number rather than a name; trailing digits of
    /// `volume_name` set it, otherwise 254 is used.
    pub fn format(mut image: Image, order: ImageOrder, volume_name: &str) -> Result<Self> {
        let digits: String = volume_name
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let volume_number = digits.parse().unwrap_or(DEFAULT_VOLUME_NUMBER);

        Vtoc::formatted(order.track_count(), volume_number).store(&mut image, &order)?;

        // Catalog chain: sectors 15 down to 1, each linking to the next.
        for sector in (1..=15u8).rev() {
            let mut data = vec![0u8; SECTOR_SIZE];
            if sector > 1 {
                data[1] = VTOC_TRACK;
                data[2] = sector - 1;
            }
            order.write_sector(&mut image, VTOC_TRACK, sector, &data)?;
        }

        Self::open(image, order)
    }

    fn vtoc(&self) -> Result<Vtoc> {
        Vtoc::load(&self.image, &self.order)
    }

    fn locate(&self, name: &str) -> Result<(EntrySlot, CatalogEntry)> {
        let vtoc = self.vtoc()?;
        find_entry(&self.image, &self.order, &vtoc, name)?
            .ok_or_else(|| DiskError::FileNotFound(name.into()))
    }

    /// Read a file's raw sectors, headers included
    pub fn read_raw(&self, name: &str) -> Result<Vec<u8>> {
        let (_, entry) = self.locate(name)?;
        storage::read_chain(&self.image, &self.order, entry.ts_track, entry.ts_sector)
    }

    /// Load address recorded in a binary file's header
    pub fn load_address(&self, name: &str) -> Result<Option<u16>> {
        let (_, entry) = self.locate(name)?;
        if entry.file_type & 0x7F != TYPE_BINARY {
            return Ok(None);
        }
        let raw = storage::read_chain(&self.image, &self.order, entry.ts_track, entry.ts_sector)?;
        Ok((raw.len() >= 2).then(|| u16::from_le_bytes([raw[0], raw[1]])))
    }

    /// Check whether a type's on-disk form starts with a 16-bit length
    fn has_length_header(file_type: u8) -> bool {
        matches!(
            file_type & 0x7F,
            TYPE_BINARY | TYPE_APPLESOFT | TYPE_INTEGER
        )
    }

    fn write_internal(&mut self, name: &str, data: &[u8], file_type: u8) -> Result<()> {
        let stored = validate_name(name)?;
        let mut vtoc = self.vtoc()?;
        let existing = find_entry(&self.image, &self.order, &vtoc, &stored)?;

        let (slot, file_type, load_address, old) = match existing {
            Some((slot, entry)) => {
                if entry.is_locked() {
                    return Err(DiskError::FileLocked(entry.name));
                }
                // Rewrites keep the type and any recorded load address.
                let address = if entry.file_type & 0x7F == TYPE_BINARY {
                    let raw = storage::read_chain(
                        &self.image,
                        &self.order,
                        entry.ts_track,
                        entry.ts_sector,
                    )?;
                    if raw.len() >= 2 {
                        u16::from_le_bytes([raw[0], raw[1]])
                    } else {
                        DEFAULT_LOAD_ADDRESS
                    }
                } else {
                    DEFAULT_LOAD_ADDRESS
                };
                (
                    slot,
                    entry.file_type,
                    address,
                    Some((entry.ts_track, entry.ts_sector)),
                )
            }
            None => {
                let slot = find_free_slot(&self.image, &self.order, &vtoc)?;
                (slot, file_type, DEFAULT_LOAD_ADDRESS, None)
            }
        };

        // The length header is a 16-bit field: a larger payload would
        // write in full but read back truncated.
        if Self::has_length_header(file_type) && data.len() > u16::MAX as usize {
            return Err(DiskError::NotSupported(format!(
                "{} byte payload exceeds the 64 KB length header",
                data.len()
            )));
        }

        let raw = add_header(file_type, load_address, data);
        let (ts_track, ts_sector, sector_count) =
            storage::write_chain(&mut self.image, &self.order, &mut vtoc, &raw, old)?;

        let entry = CatalogEntry {
            ts_track,
            ts_sector,
            file_type,
            name: stored,
            sector_count,
        };
        write_entry(&mut self.image, &self.order, slot, &entry)?;
        vtoc.store(&mut self.image, &self.order)
    }
}

impl Volume for Dos33Volume {
    fn dialect(&self) -> &'static str {
        "DOS 3.3"
    }

    fn volume_name(&self) -> String {
        let number = self
            .vtoc()
            .map(|v| v.volume_number())
            .unwrap_or(DEFAULT_VOLUME_NUMBER);
        format!("DOS 3.3 Volume #{number}")
    }

    fn total_units(&self) -> usize {
        self.order.track_count() as usize * SECTORS_PER_TRACK
    }

    fn free_units(&self) -> Result<usize> {
        Ok(self.vtoc()?.free_count())
    }

    fn unit_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn list_files(&self) -> Result<Vec<FileInfo>> {
        let vtoc = self.vtoc()?;
        Ok(catalog::walk_entries(&self.image, &self.order, &vtoc)?
            .into_iter()
            .map(|(_, e)| FileInfo {
                name: e.name.clone(),
                file_type: e.file_type & 0x7F,
                type_name: type_letter(e.file_type).to_string(),
                locked: e.is_locked(),
                // The catalog records sectors, not bytes.
                size: e.sector_count as usize * SECTOR_SIZE,
                units: e.sector_count as usize,
                created: None,
                modified: None,
                directory: false,
            })
            .collect())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let (_, entry) = self.locate(name)?;
        let raw = storage::read_chain(&self.image, &self.order, entry.ts_track, entry.ts_sector)?;
        Ok(strip_header(entry.file_type, &raw))
    }

    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.write_internal(name, data, TYPE_BINARY)
    }

    fn create_file(&mut self, name: &str, file_type: u8) -> Result<()> {
        let stored = validate_name(name)?;
        let vtoc = self.vtoc()?;
        if find_entry(&self.image, &self.order, &vtoc, &stored)?.is_some() {
            return Err(DiskError::DuplicateFile(stored));
        }
        self.write_internal(&stored, &[], file_type)
    }

    fn create_directory(&mut self, _name: &str) -> Result<()> {
        Err(DiskError::NotSupported(
            "DOS 3.3 has no subdirectories".into(),
        ))
    }

    fn delete_file(&mut self, name: &str) -> Result<()> {
        let (slot, entry) = self.locate(name)?;
        if entry.is_locked() {
            return Err(DiskError::FileLocked(entry.name));
        }
        let mut vtoc = self.vtoc()?;
        storage::free_chain(
            &self.image,
            &self.order,
            &mut vtoc,
            entry.ts_track,
            entry.ts_sector,
        )?;
        delete_entry(&mut self.image, &self.order, slot)?;
        vtoc.store(&mut self.image, &self.order)
    }

    fn rename_file(&mut self, name: &str, new_name: &str) -> Result<()> {
        let (slot, mut entry) = self.locate(name)?;
        if entry.is_locked() {
            return Err(DiskError::FileLocked(entry.name));
        }
        let stored = validate_name(new_name)?;
        let vtoc = self.vtoc()?;
        if let Some((other, _)) = find_entry(&self.image, &self.order, &vtoc, &stored)? {
            if other != slot {
                return Err(DiskError::DuplicateFile(stored));
            }
        }
        entry.name = stored;
        write_entry(&mut self.image, &self.order, slot, &entry)
    }

    fn set_locked(&mut self, name: &str, locked: bool) -> Result<()> {
        let (slot, mut entry) = self.locate(name)?;
        if locked {
            entry.file_type |= LOCK_BIT;
        } else {
            entry.file_type &= !LOCK_BIT;
        }
        write_entry(&mut self.image, &self.order, slot, &entry)
    }

    fn set_file_type(&mut self, name: &str, file_type: u8) -> Result<()> {
        let (slot, mut entry) = self.locate(name)?;
        entry.file_type = (file_type & 0x7F) | (entry.file_type & LOCK_BIT);
        write_entry(&mut self.image, &self.order, slot, &entry)
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        self.image.save_as(path)
    }

    fn image(&self) -> &Image {
        &self.image
    }

    fn into_image(self: Box<Self>) -> Image {
        self.image
    }
}

/// Registry handler for the DOS 3.3 dialect
pub struct Dos33Handler;

impl DialectHandler for Dos33Handler {
    fn name(&self) -> &'static str {
        "DOS 3.3"
    }

    fn probe(&self, image: &Image, order: ImageOrder) -> bool {
        let Ok(vtoc) = Vtoc::load(image, &order) else {
            return false;
        };
        let (track, sector) = vtoc.catalog_start();
        vtoc.tracks() == order.track_count()
            && track != 0
            && track < order.track_count()
            && (sector as usize) < SECTORS_PER_TRACK
    }

    fn open(&self, image: Image, order: ImageOrder) -> Result<Box<dyn Volume>> {
        Ok(Box::new(Dos33Volume::open(image, order)?))
    }

    fn format(
        &self,
        image: Image,
        order: ImageOrder,
        volume_name: &str,
    ) -> Result<Box<dyn Volume>> {
        Ok(Box::new(Dos33Volume::format(image, order, volume_name)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::SIZE_140K;
    use crate::format::ImageFormat;

    fn fresh_volume() -> Dos33Volume {
        let order = ImageOrder::for_format(ImageFormat::DosOrder, SIZE_140K).unwrap();
        Dos33Volume::format(Image::blank(SIZE_140K), order, "DISK 254").unwrap()
    }

    #[test]
    fn test_format_reserves_system_tracks() {
        let volume = fresh_volume();
        assert_eq!(volume.total_units(), 560);
        // Tracks 0-2 and the catalog track are spoken for.
        assert_eq!(volume.free_units().unwrap(), 31 * 16);
        assert_eq!(volume.volume_name(), "DOS 3.3 Volume #254");
    }

    #[test]
    fn test_binary_round_trip_with_header() {
        let mut volume = fresh_volume();
        let data = vec![0xA9u8, 0x00, 0x60];
        volume.write_file("PROG", &data).unwrap();
        assert_eq!(volume.read_file("PROG").unwrap(), data);

        // The raw sectors carry the load-address/length header.
        let raw = volume.read_raw("PROG").unwrap();
        assert_eq!(&raw[..4], &[0x00, 0x08, 0x03, 0x00]);
        assert_eq!(volume.load_address("PROG").unwrap(), Some(0x0800));
    }

    #[test]
    fn test_load_address_preserved_on_rewrite() {
        let mut volume = fresh_volume();
        volume.write_file("PROG", &[0x60]).unwrap();
        // Patch the header to a custom address, then rewrite the payload.
        {
            let (_, entry) = volume.locate("PROG").unwrap();
            let mut vtoc = volume.vtoc().unwrap();
            let raw = add_header(TYPE_BINARY, 0x2000, &[0x60]);
            let old = Some((entry.ts_track, entry.ts_sector));
            let (t, s, count) =
                storage::write_chain(&mut volume.image, &volume.order, &mut vtoc, &raw, old)
                    .unwrap();
            let mut entry = entry;
            entry.ts_track = t;
            entry.ts_sector = s;
            entry.sector_count = count;
            let (slot, _) = volume.locate("PROG").unwrap();
            write_entry(&mut volume.image, &volume.order, slot, &entry).unwrap();
            vtoc.store(&mut volume.image, &volume.order).unwrap();
        }
        volume.write_file("PROG", &[0xEA, 0x60]).unwrap();
        assert_eq!(volume.load_address("PROG").unwrap(), Some(0x2000));
    }

    #[test]
    fn test_applesoft_length_header() {
        let mut volume = fresh_volume();
        volume.create_file("HELLO", TYPE_APPLESOFT).unwrap();
        assert_eq!(volume.read_file("HELLO").unwrap(), Vec::<u8>::new());

        let program = vec![0x10u8, 0x08, 0x0A, 0x00, 0xBA, 0x00];
        volume.write_file("HELLO", &program).unwrap();
        assert_eq!(volume.read_file("HELLO").unwrap(), program);
        let raw = volume.read_raw("HELLO").unwrap();
        assert_eq!(&raw[..2], &(program.len() as u16).to_le_bytes());
    }

    #[test]
    fn test_text_file_trims_padding() {
        let mut volume = fresh_volume();
        volume.create_file("NOTES", TYPE_TEXT).unwrap();
        let text: Vec<u8> = b"HELLO\rWORLD\r".iter().map(|b| b | 0x80).collect();
        volume.write_file("NOTES", &text).unwrap();
        assert_eq!(volume.read_file("NOTES").unwrap(), text);
    }

    #[test]
    fn test_catalog_listing() {
        let mut volume = fresh_volume();
        volume.write_file("FIRST", &[1, 2, 3]).unwrap();
        volume.create_file("SECOND", TYPE_APPLESOFT).unwrap();

        let listing = volume.list_files().unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "FIRST");
        assert_eq!(listing[0].type_name, "B");
        assert_eq!(listing[1].type_name, "A");
        assert_eq!(listing[0].units, 2);
    }

    #[test]
    fn test_delete_frees_sectors_and_stashes_track() {
        let mut volume = fresh_volume();
        let before = volume.free_units().unwrap();
        volume.write_file("DOOMED", &vec![0u8; 1000]).unwrap();
        volume.delete_file("DOOMED").unwrap();
        assert_eq!(volume.free_units().unwrap(), before);
        assert!(matches!(
            volume.read_file("DOOMED"),
            Err(DiskError::FileNotFound(_))
        ));

        // The slot keeps its bytes with 0xFF in the track byte and the
        // original track stashed in the last name byte.
        let vtoc = volume.vtoc().unwrap();
        let (track, sector) = vtoc.catalog_start();
        let data = volume.order.read_sector(&volume.image, track, sector).unwrap();
        assert_eq!(data[catalog::FIRST_ENTRY_OFFSET], catalog::DELETED_TRACK);
        assert_ne!(data[catalog::FIRST_ENTRY_OFFSET + catalog::DELETED_TRACK_STASH], 0);
    }

    #[test]
    fn test_deleted_slot_reused() {
        let mut volume = fresh_volume();
        volume.write_file("OLD", &[1]).unwrap();
        volume.delete_file("OLD").unwrap();
        volume.write_file("NEW", &[2]).unwrap();

        let listing = volume.list_files().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "NEW");
    }

    #[test]
    fn test_lock_protects_file() {
        let mut volume = fresh_volume();
        volume.write_file("SAFE", &[1, 2, 3]).unwrap();
        volume.set_locked("SAFE", true).unwrap();
        assert!(volume.list_files().unwrap()[0].locked);
        assert!(matches!(
            volume.delete_file("SAFE"),
            Err(DiskError::FileLocked(_))
        ));
        assert!(matches!(
            volume.write_file("SAFE", &[4]),
            Err(DiskError::FileLocked(_))
        ));
        volume.set_locked("SAFE", false).unwrap();
        volume.delete_file("SAFE").unwrap();
    }

    #[test]
    fn test_rename_and_duplicates() {
        let mut volume = fresh_volume();
        volume.write_file("ONE", &[1]).unwrap();
        volume.write_file("TWO", &[2]).unwrap();
        assert!(matches!(
            volume.rename_file("ONE", "TWO"),
            Err(DiskError::DuplicateFile(_))
        ));
        volume.rename_file("ONE", "THREE").unwrap();
        assert_eq!(volume.read_file("THREE").unwrap(), vec![1]);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut volume = fresh_volume();
        assert!(matches!(
            volume.write_file("", &[]),
            Err(DiskError::InvalidFileName(_))
        ));
        assert!(matches!(
            volume.write_file("BAD,NAME", &[]),
            Err(DiskError::InvalidFileName(_))
        ));
        assert!(matches!(
            volume.write_file("1STARTS.WITH.DIGIT", &[]),
            Err(DiskError::InvalidFileName(_))
        ));
    }

    #[test]
    fn test_payload_past_length_header_limit_rejected() {
        // 70,000 bytes fits the disk but not the 16-bit length header; a
        // binary write must refuse rather than read back modulo 64 KB.
        let mut volume = fresh_volume();
        let free = volume.free_units().unwrap();
        let payload = vec![0x81u8; 70_000];
        assert!(matches!(
            volume.write_file("HUGE", &payload),
            Err(DiskError::NotSupported(_))
        ));
        assert_eq!(volume.free_units().unwrap(), free);
        assert!(volume.list_files().unwrap().is_empty());

        // Text files carry no length header and take the same payload.
        volume.create_file("HUGE.TEXT", TYPE_TEXT).unwrap();
        volume.write_file("HUGE.TEXT", &payload).unwrap();
        assert_eq!(volume.read_file("HUGE.TEXT").unwrap(), payload);
    }

    #[test]
    fn test_volume_full_leaves_free_count_unchanged() {
        let mut volume = fresh_volume();
        let free = volume.free_units().unwrap();
        let too_big = vec![0u8; 150 * 1024];
        assert!(matches!(
            volume.write_file("BIG", &too_big),
            Err(DiskError::VolumeFull { .. })
        ));
        assert_eq!(volume.free_units().unwrap(), free);
        assert!(volume.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_probe_accepts_formatted_rejects_blank() {
        let volume = fresh_volume();
        let order = ImageOrder::for_format(ImageFormat::DosOrder, SIZE_140K).unwrap();
        assert!(Dos33Handler.probe(volume.image(), order));
        assert!(!Dos33Handler.probe(&Image::blank(SIZE_140K), order));
    }

    #[test]
    fn test_no_subdirectories() {
        let mut volume = fresh_volume();
        assert!(matches!(
            volume.create_directory("SUB"),
            Err(DiskError::NotSupported(_))
        ));
    }
}
