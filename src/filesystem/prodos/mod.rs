/// ProDOS dialect: block-addressed volume with a bitmap and tiered files
///
/// The volume directory starts at block 2; a bit-per-block bitmap tracks
/// allocation; files are seedling, sapling or tree chains picked by size.
/// Paths are '/'-separated and resolved from the volume root.

/// Volume bitmap handling
pub mod bitmap;
/// Packed date and time words
pub mod date;
/// Directory chains and entries
pub mod directory;
/// Tiered seedling/sapling/tree storage
pub mod storage;

pub use date::ProdosDateTime;
pub use storage::Fork;

use crate::error::{DiskError, Result};
use crate::filesystem::prodos::bitmap::VolumeBitmap;
use crate::filesystem::prodos::directory::{
    adjust_file_count, chain_blocks, clear_entry, find_entry, find_free_slot, header_name,
    walk_entries, write_entry, DirEntry, EntryLocation, ACCESS_LOCKED,
    ACCESS_UNLOCKED, ENTRIES_PER_BLOCK, ENTRY_LENGTH, FILE_TYPE_DIR, HDR_ACCESS,
    HDR_BITMAP_POINTER, HDR_CREATED, HDR_ENTRIES_PER_BLOCK, HDR_ENTRY_LENGTH, HDR_FILE_COUNT,
    HDR_NAME, HDR_PARENT_ENTRY, HDR_PARENT_ENTRY_LENGTH, HDR_PARENT_POINTER, HDR_RESERVED,
    HDR_STORAGE, HDR_TOTAL_BLOCKS, STORAGE_FORKED, STORAGE_SEEDLING, STORAGE_SUBDIR,
    STORAGE_SUBDIR_HEADER, STORAGE_VOLUME_HEADER, VOLUME_KEY_BLOCK,
};
use crate::filesystem::{DialectHandler, FileInfo, Volume};
use crate::format::constants::BLOCK_SIZE;
use crate::image::{Image, ImageOrder};
use std::path::Path;

/// Subdirectory header signature byte stored in the reserved field
const SUBDIR_SIGNATURE: u8 = 0x75;

/// Default file type for files created without an explicit type
const DEFAULT_FILE_TYPE: u8 = 0x06;

/// Number of blocks the volume directory chain occupies after format
const VOLUME_DIR_BLOCKS: u16 = 4;

/// Human-readable names for the common ProDOS file type codes
fn file_type_name(file_type: u8) -> String {
    match file_type {
        0x00 => "NON".into(),
        0x01 => "BAD".into(),
        0x04 => "TXT".into(),
        0x06 => "BIN".into(),
        0x0F => "DIR".into(),
        0x19 => "ADB".into(),
        0x1A => "AWP".into(),
        0x1B => "ASP".into(),
        0xB3 => "S16".into(),
        0xE0 => "SHK".into(),
        0xFA => "INT".into(),
        0xFC => "BAS".into(),
        0xFD => "VAR".into(),
        0xFE => "REL".into(),
        0xFF => "SYS".into(),
        other => format!("${other:02X}"),
    }
}

/// Validate a ProDOS filename, returning its stored (uppercase) form.
///
/// Names are 1-15 characters, start with a letter, and continue with
/// letters, digits or periods.
fn validate_name(name: &str) -> Result<String> {
    let upper = name.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= 15
        && bytes[0].is_ascii_alphabetic()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'.');
    if valid {
        Ok(upper)
    } else {
        Err(DiskError::InvalidFileName(name.into()))
    }
}

/// A mounted ProDOS volume
pub struct ProdosVolume {
    image: Image,
    order: ImageOrder,
    bitmap_pointer: u16,
    total_blocks: u16,
}

impl ProdosVolume {
    /// Mount an image already carrying ProDOS structures
    pub fn open(image: Image, order: ImageOrder) -> Result<Self> {
        let key = order.read_block(&image, VOLUME_KEY_BLOCK)?;
        if key[HDR_STORAGE] >> 4 != STORAGE_VOLUME_HEADER {
            return Err(DiskError::corrupt("volume directory header missing"));
        }
        let bitmap_pointer = u16::from_le_bytes([key[HDR_BITMAP_POINTER], key[HDR_BITMAP_POINTER + 1]]);
        let total_blocks = u16::from_le_bytes([key[HDR_TOTAL_BLOCKS], key[HDR_TOTAL_BLOCKS + 1]]);
        if total_blocks == 0 || bitmap_pointer == 0 {
            return Err(DiskError::corrupt("volume header declares no storage"));
        }
        Ok(Self {
            image,
            order,
            bitmap_pointer,
            total_blocks,
        })
    }

    /// Format a blank image and mount the fresh volume
    pub fn format(mut image: Image, order: ImageOrder, volume_name: &str) -> Result<Self> {
        let name = validate_name(volume_name)?;
        let total_blocks = order.block_count();
        let bitmap_pointer = VOLUME_KEY_BLOCK + VOLUME_DIR_BLOCKS;

        // Volume directory chain: blocks 2-5 linked by prev/next pointers.
        for i in 0..VOLUME_DIR_BLOCKS {
            let block = VOLUME_KEY_BLOCK + i;
            let mut data = vec![0u8; BLOCK_SIZE];
            if i > 0 {
                data[0..2].copy_from_slice(&(block - 1).to_le_bytes());
            }
            if i + 1 < VOLUME_DIR_BLOCKS {
                data[2..4].copy_from_slice(&(block + 1).to_le_bytes());
            }
            order.write_block(&mut image, block, &data)?;
        }

        let mut key = order.read_block(&image, VOLUME_KEY_BLOCK)?;
        key[HDR_STORAGE] = (STORAGE_VOLUME_HEADER << 4) | name.len() as u8;
        key[HDR_NAME..HDR_NAME + name.len()].copy_from_slice(name.as_bytes());
        let (date, time) = ProdosDateTime::now().to_words();
        key[HDR_CREATED..HDR_CREATED + 2].copy_from_slice(&date.to_le_bytes());
        key[HDR_CREATED + 2..HDR_CREATED + 4].copy_from_slice(&time.to_le_bytes());
        key[HDR_ACCESS] = ACCESS_UNLOCKED;
        key[HDR_ENTRY_LENGTH] = ENTRY_LENGTH as u8;
        key[HDR_ENTRIES_PER_BLOCK] = ENTRIES_PER_BLOCK as u8;
        key[HDR_BITMAP_POINTER..HDR_BITMAP_POINTER + 2]
            .copy_from_slice(&bitmap_pointer.to_le_bytes());
        key[HDR_TOTAL_BLOCKS..HDR_TOTAL_BLOCKS + 2].copy_from_slice(&total_blocks.to_le_bytes());
        order.write_block(&mut image, VOLUME_KEY_BLOCK, &key)?;

        // Boot blocks, directory and the bitmap itself start out reserved.
        let mut bitmap = VolumeBitmap::formatted(&order, bitmap_pointer, total_blocks);
        let reserved = bitmap_pointer + VolumeBitmap::bitmap_blocks(total_blocks);
        for block in 0..reserved {
            bitmap.mark_used(block);
        }
        bitmap.store(&mut image, &order)?;

        Self::open(image, order)
    }

    fn bitmap(&self) -> Result<VolumeBitmap> {
        VolumeBitmap::load(&self.image, &self.order, self.bitmap_pointer, self.total_blocks)
    }

    /// Resolve a path's containing directory: key block, the entry owning
    /// that directory in its parent (None for the root), and the leaf name.
    fn resolve_parent(&self, path: &str) -> Result<(u16, Option<EntryLocation>, String)> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let leaf = segments
            .pop()
            .ok_or_else(|| DiskError::InvalidFileName(path.into()))?;

        let mut key_block = VOLUME_KEY_BLOCK;
        let mut owner = None;
        for segment in segments {
            let (loc, entry) = find_entry(&self.image, &self.order, key_block, segment)?
                .ok_or_else(|| DiskError::FileNotFound(segment.into()))?;
            if !entry.is_directory() {
                return Err(DiskError::NotSupported(format!(
                    "{segment} is not a directory"
                )));
            }
            key_block = entry.key_pointer;
            owner = Some(loc);
        }
        Ok((key_block, owner, leaf.to_string()))
    }

    fn locate(&self, path: &str) -> Result<(u16, EntryLocation, DirEntry)> {
        let (dir, _, leaf) = self.resolve_parent(path)?;
        let (loc, entry) = find_entry(&self.image, &self.order, dir, &leaf)?
            .ok_or_else(|| DiskError::FileNotFound(path.into()))?;
        Ok((dir, loc, entry))
    }

    fn entry_info(&self, entry: &DirEntry) -> FileInfo {
        FileInfo {
            name: entry.name.clone(),
            file_type: entry.file_type,
            type_name: file_type_name(entry.file_type),
            locked: entry.is_locked(),
            size: entry.eof as usize,
            units: entry.blocks_used as usize,
            created: ProdosDateTime::from_words(entry.created_date, entry.created_time)
                .map(|d| d.to_string()),
            modified: ProdosDateTime::from_words(entry.modified_date, entry.modified_time)
                .map(|d| d.to_string()),
            directory: entry.is_directory(),
        }
    }

    /// List the entries of one directory ("" or "/" for the root)
    pub fn list_directory(&self, path: &str) -> Result<Vec<FileInfo>> {
        let key_block = if path.split('/').all(|s| s.is_empty()) {
            VOLUME_KEY_BLOCK
        } else {
            let (_, _, entry) = self.locate(path)?;
            if !entry.is_directory() {
                return Err(DiskError::NotSupported(format!("{path} is not a directory")));
            }
            entry.key_pointer
        };
        Ok(walk_entries(&self.image, &self.order, key_block)?
            .into_iter()
            .map(|(_, e)| self.entry_info(&e))
            .collect())
    }

    /// Read one fork of a forked file
    pub fn read_fork(&self, path: &str, fork: Fork) -> Result<Vec<u8>> {
        let (_, _, entry) = self.locate(path)?;
        if entry.storage_type != STORAGE_FORKED {
            return Err(DiskError::NotSupported(format!("{path} has no forks")));
        }
        let info = storage::read_fork_info(&self.image, &self.order, entry.key_pointer, fork)?;
        storage::read_chain(
            &self.image,
            &self.order,
            info.storage_type,
            info.key_pointer,
            info.eof as usize,
        )
    }
}

impl Volume for ProdosVolume {
    fn dialect(&self) -> &'static str {
        "ProDOS"
    }

    fn volume_name(&self) -> String {
        header_name(&self.image, &self.order, VOLUME_KEY_BLOCK).unwrap_or_default()
    }

    fn total_units(&self) -> usize {
        self.total_blocks as usize
    }

    fn free_units(&self) -> Result<usize> {
        Ok(self.bitmap()?.free_count())
    }

    fn unit_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn list_files(&self) -> Result<Vec<FileInfo>> {
        self.list_directory("")
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let (_, _, entry) = self.locate(name)?;
        match entry.storage_type {
            STORAGE_SUBDIR => Err(DiskError::NotSupported(format!("{name} is a directory"))),
            STORAGE_FORKED => self.read_fork(name, Fork::Data),
            st => storage::read_chain(
                &self.image,
                &self.order,
                st,
                entry.key_pointer,
                entry.eof as usize,
            ),
        }
    }

    fn write_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let (dir, owner, leaf) = self.resolve_parent(name)?;
        let existing = find_entry(&self.image, &self.order, dir, &leaf)?;

        if let Some((_, entry)) = &existing {
            if entry.is_locked() {
                return Err(DiskError::FileLocked(entry.name.clone()));
            }
            if entry.is_directory() {
                return Err(DiskError::NotSupported(format!("{leaf} is a directory")));
            }
        }

        let mut bitmap = self.bitmap()?;
        let (date, time) = ProdosDateTime::now().to_words();

        match existing {
            Some((loc, entry)) if entry.storage_type == STORAGE_FORKED => {
                // Rewriting a forked file replaces its data fork only.
                let old = storage::read_fork_info(
                    &self.image,
                    &self.order,
                    entry.key_pointer,
                    Fork::Data,
                )?;
                let chain = storage::write_chain(
                    &mut self.image,
                    &self.order,
                    &mut bitmap,
                    data,
                    Some((old.storage_type, old.key_pointer)),
                )?;
                storage::write_fork_info(
                    &mut self.image,
                    &self.order,
                    entry.key_pointer,
                    Fork::Data,
                    &storage::ForkInfo {
                        storage_type: chain.storage_type,
                        key_pointer: chain.key_pointer,
                        blocks_used: chain.blocks_used,
                        eof: data.len() as u32,
                    },
                )?;
                let resource = storage::read_fork_info(
                    &self.image,
                    &self.order,
                    entry.key_pointer,
                    Fork::Resource,
                )?;
                let mut entry = entry;
                entry.blocks_used = 1 + chain.blocks_used + resource.blocks_used;
                entry.modified_date = date;
                entry.modified_time = time;
                write_entry(&mut self.image, &self.order, loc, &entry)?;
            }
            Some((loc, entry)) => {
                let chain = storage::write_chain(
                    &mut self.image,
                    &self.order,
                    &mut bitmap,
                    data,
                    Some((entry.storage_type, entry.key_pointer)),
                )?;
                let mut entry = entry;
                entry.storage_type = chain.storage_type;
                entry.key_pointer = chain.key_pointer;
                entry.blocks_used = chain.blocks_used;
                entry.eof = data.len() as u32;
                entry.modified_date = date;
                entry.modified_time = time;
                write_entry(&mut self.image, &self.order, loc, &entry)?;
            }
            None => {
                let name = validate_name(&leaf)?;
                let chain =
                    storage::write_chain(&mut self.image, &self.order, &mut bitmap, data, None)?;
                let loc =
                    find_free_slot(&mut self.image, &self.order, &mut bitmap, dir, owner)?;
                let entry = DirEntry {
                    storage_type: chain.storage_type,
                    name,
                    file_type: DEFAULT_FILE_TYPE,
                    key_pointer: chain.key_pointer,
                    blocks_used: chain.blocks_used,
                    eof: data.len() as u32,
                    created_date: date,
                    created_time: time,
                    access: ACCESS_UNLOCKED,
                    aux_type: 0,
                    modified_date: date,
                    modified_time: time,
                    header_pointer: dir,
                };
                write_entry(&mut self.image, &self.order, loc, &entry)?;
                adjust_file_count(&mut self.image, &self.order, dir, 1)?;
            }
        }

        bitmap.store(&mut self.image, &self.order)
    }

    fn create_file(&mut self, name: &str, file_type: u8) -> Result<()> {
        let (dir, owner, leaf) = self.resolve_parent(name)?;
        let stored = validate_name(&leaf)?;
        if find_entry(&self.image, &self.order, dir, &stored)?.is_some() {
            return Err(DiskError::DuplicateFile(stored));
        }

        let mut bitmap = self.bitmap()?;
        // Even an empty file owns one data block.
        let key_pointer = bitmap.allocate()?;
        self.order
            .write_block(&mut self.image, key_pointer, &vec![0u8; BLOCK_SIZE])?;

        let loc = find_free_slot(&mut self.image, &self.order, &mut bitmap, dir, owner)?;
        let (date, time) = ProdosDateTime::now().to_words();
        let entry = DirEntry {
            storage_type: STORAGE_SEEDLING,
            name: stored,
            file_type,
            key_pointer,
            blocks_used: 1,
            eof: 0,
            created_date: date,
            created_time: time,
            access: ACCESS_UNLOCKED,
            aux_type: 0,
            modified_date: date,
            modified_time: time,
            header_pointer: dir,
        };
        write_entry(&mut self.image, &self.order, loc, &entry)?;
        adjust_file_count(&mut self.image, &self.order, dir, 1)?;
        bitmap.store(&mut self.image, &self.order)
    }

    fn create_directory(&mut self, name: &str) -> Result<()> {
        let (dir, owner, leaf) = self.resolve_parent(name)?;
        let stored = validate_name(&leaf)?;
        if find_entry(&self.image, &self.order, dir, &stored)?.is_some() {
            return Err(DiskError::DuplicateFile(stored));
        }

        let mut bitmap = self.bitmap()?;
        let key_pointer = bitmap.allocate()?;
        let loc = find_free_slot(&mut self.image, &self.order, &mut bitmap, dir, owner)?;
        let (date, time) = ProdosDateTime::now().to_words();

        // Subdirectory header block.
        let mut data = vec![0u8; BLOCK_SIZE];
        data[HDR_STORAGE] = (STORAGE_SUBDIR_HEADER << 4) | stored.len() as u8;
        data[HDR_NAME..HDR_NAME + stored.len()].copy_from_slice(stored.as_bytes());
        data[HDR_RESERVED] = SUBDIR_SIGNATURE;
        data[HDR_CREATED..HDR_CREATED + 2].copy_from_slice(&date.to_le_bytes());
        data[HDR_CREATED + 2..HDR_CREATED + 4].copy_from_slice(&time.to_le_bytes());
        data[HDR_ACCESS] = ACCESS_UNLOCKED;
        data[HDR_ENTRY_LENGTH] = ENTRY_LENGTH as u8;
        data[HDR_ENTRIES_PER_BLOCK] = ENTRIES_PER_BLOCK as u8;
        data[HDR_FILE_COUNT..HDR_FILE_COUNT + 2].copy_from_slice(&0u16.to_le_bytes());
        data[HDR_PARENT_POINTER..HDR_PARENT_POINTER + 2].copy_from_slice(&loc.block.to_le_bytes());
        data[HDR_PARENT_ENTRY] = loc.entry_number();
        data[HDR_PARENT_ENTRY_LENGTH] = ENTRY_LENGTH as u8;
        self.order.write_block(&mut self.image, key_pointer, &data)?;

        let entry = DirEntry {
            storage_type: STORAGE_SUBDIR,
            name: stored,
            file_type: FILE_TYPE_DIR,
            key_pointer,
            blocks_used: 1,
            eof: BLOCK_SIZE as u32,
            created_date: date,
            created_time: time,
            access: ACCESS_UNLOCKED,
            aux_type: 0,
            modified_date: date,
            modified_time: time,
            header_pointer: dir,
        };
        write_entry(&mut self.image, &self.order, loc, &entry)?;
        adjust_file_count(&mut self.image, &self.order, dir, 1)?;
        bitmap.store(&mut self.image, &self.order)
    }

    fn delete_file(&mut self, name: &str) -> Result<()> {
        let (dir, loc, entry) = self.locate(name)?;
        if entry.is_locked() {
            return Err(DiskError::FileLocked(entry.name));
        }

        let mut bitmap = self.bitmap()?;
        if entry.is_directory() {
            if directory::file_count(&self.image, &self.order, entry.key_pointer)? != 0 {
                return Err(DiskError::NotSupported(format!(
                    "directory {} is not empty",
                    entry.name
                )));
            }
            for block in chain_blocks(&self.image, &self.order, entry.key_pointer)? {
                bitmap.mark_free(block);
            }
        } else {
            storage::free_chain(
                &self.image,
                &self.order,
                &mut bitmap,
                entry.storage_type,
                entry.key_pointer,
            )?;
        }

        clear_entry(&mut self.image, &self.order, loc)?;
        adjust_file_count(&mut self.image, &self.order, dir, -1)?;
        bitmap.store(&mut self.image, &self.order)
    }

    fn rename_file(&mut self, name: &str, new_name: &str) -> Result<()> {
        let (dir, loc, mut entry) = self.locate(name)?;
        if entry.is_locked() {
            return Err(DiskError::FileLocked(entry.name));
        }
        let stored = validate_name(new_name.rsplit('/').next().unwrap_or(new_name))?;
        if let Some((other, _)) = find_entry(&self.image, &self.order, dir, &stored)? {
            if other != loc {
                return Err(DiskError::DuplicateFile(stored));
            }
        }
        entry.name = stored.clone();
        write_entry(&mut self.image, &self.order, loc, &entry)?;

        // A renamed subdirectory also carries its name in its header block.
        if entry.is_directory() {
            let mut data = self.order.read_block(&self.image, entry.key_pointer)?;
            data[HDR_STORAGE] = (STORAGE_SUBDIR_HEADER << 4) | stored.len() as u8;
            data[HDR_NAME..HDR_NAME + 15].fill(0);
            data[HDR_NAME..HDR_NAME + stored.len()].copy_from_slice(stored.as_bytes());
            self.order
                .write_block(&mut self.image, entry.key_pointer, &data)?;
        }
        Ok(())
    }

    fn set_locked(&mut self, name: &str, locked: bool) -> Result<()> {
        let (_, loc, mut entry) = self.locate(name)?;
        entry.access = if locked { ACCESS_LOCKED } else { ACCESS_UNLOCKED };
        write_entry(&mut self.image, &self.order, loc, &entry)
    }

    fn set_file_type(&mut self, name: &str, file_type: u8) -> Result<()> {
        let (_, loc, mut entry) = self.locate(name)?;
        if entry.is_directory() {
            return Err(DiskError::NotSupported(format!("{name} is a directory")));
        }
        entry.file_type = file_type;
        write_entry(&mut self.image, &self.order, loc, &entry)
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

/// Registry handler for the ProDOS dialect
pub struct ProdosHandler;

impl DialectHandler for ProdosHandler {
    fn name(&self) -> &'static str {
        "ProDOS"
    }

    fn probe(&self, image: &Image, order: ImageOrder) -> bool {
        let Ok(key) = order.read_block(image, VOLUME_KEY_BLOCK) else {
            return false;
        };
        let name_len = key[HDR_STORAGE] & 0xF;
        let total = u16::from_le_bytes([key[HDR_TOTAL_BLOCKS], key[HDR_TOTAL_BLOCKS + 1]]);
        key[HDR_STORAGE] >> 4 == STORAGE_VOLUME_HEADER
            && (1..=15).contains(&name_len)
            && key[HDR_ENTRY_LENGTH] == ENTRY_LENGTH as u8
            && key[HDR_ENTRIES_PER_BLOCK] == ENTRIES_PER_BLOCK as u8
            && total > 0
    }

    fn open(&self, image: Image, order: ImageOrder) -> Result<Box<dyn Volume>> {
        Ok(Box::new(ProdosVolume::open(image, order)?))
    }

    fn format(
        &self,
        image: Image,
        order: ImageOrder,
        volume_name: &str,
    ) -> Result<Box<dyn Volume>> {
        Ok(Box::new(ProdosVolume::format(image, order, volume_name)?))
    }
}
