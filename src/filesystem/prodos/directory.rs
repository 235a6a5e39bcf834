/// ProDOS directory chains and the 39-byte entry record
///
/// Directories are chains of 512-byte blocks linked by prev/next
/// pointers, 13 entries per block starting at offset 4. The volume
/// directory key block is always block 2; subdirectories hang off a
/// storage-type 0xD entry pointing at their own 0xE header block.

use crate::error::{DiskError, Result};
use crate::filesystem::prodos::bitmap::VolumeBitmap;
use crate::format::constants::BLOCK_SIZE;
use crate::image::{Image, ImageOrder};
use std::collections::HashSet;

/// Block number of the volume directory key block
pub const VOLUME_KEY_BLOCK: u16 = 2;

/// Bytes per directory entry
pub const ENTRY_LENGTH: usize = 39;

/// Entries per directory block (the first slot of a key block is the header)
pub const ENTRIES_PER_BLOCK: usize = 13;

/// Storage type: deleted/empty slot
pub const STORAGE_DELETED: u8 = 0x0;
/// Storage type: one data block
pub const STORAGE_SEEDLING: u8 = 0x1;
/// Storage type: one index block of up to 256 data blocks
pub const STORAGE_SAPLING: u8 = 0x2;
/// Storage type: master index of index blocks
pub const STORAGE_TREE: u8 = 0x3;
/// Storage type: forked file with an extended key block
pub const STORAGE_FORKED: u8 = 0x5;
/// Storage type: subdirectory entry
pub const STORAGE_SUBDIR: u8 = 0xD;
/// Storage type: subdirectory header
pub const STORAGE_SUBDIR_HEADER: u8 = 0xE;
/// Storage type: volume directory header
pub const STORAGE_VOLUME_HEADER: u8 = 0xF;

/// Access byte for an unlocked file (destroy, rename, write, read)
pub const ACCESS_UNLOCKED: u8 = 0xC3;
/// Access byte for a locked file (read only)
pub const ACCESS_LOCKED: u8 = 0x01;

/// ProDOS file type code for subdirectories
pub const FILE_TYPE_DIR: u8 = 0x0F;

// Header field offsets, absolute within a key block.
pub(crate) const HDR_STORAGE: usize = 0x04;
pub(crate) const HDR_NAME: usize = 0x05;
pub(crate) const HDR_RESERVED: usize = 0x14;
pub(crate) const HDR_CREATED: usize = 0x1C;
pub(crate) const HDR_ACCESS: usize = 0x22;
pub(crate) const HDR_ENTRY_LENGTH: usize = 0x23;
pub(crate) const HDR_ENTRIES_PER_BLOCK: usize = 0x24;
pub(crate) const HDR_FILE_COUNT: usize = 0x25;
pub(crate) const HDR_BITMAP_POINTER: usize = 0x27;
pub(crate) const HDR_TOTAL_BLOCKS: usize = 0x29;
// Subdirectory headers reuse the last three fields for parent linkage.
pub(crate) const HDR_PARENT_POINTER: usize = 0x27;
pub(crate) const HDR_PARENT_ENTRY: usize = 0x29;
pub(crate) const HDR_PARENT_ENTRY_LENGTH: usize = 0x2A;

/// Where a directory entry lives in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    /// Directory block holding the entry
    pub block: u16,
    /// Byte offset of the entry within the block
    pub offset: usize,
}

impl EntryLocation {
    /// One-based entry number within the block, counting the header slot
    pub fn entry_number(&self) -> u8 {
        ((self.offset - 4) / ENTRY_LENGTH) as u8 + 1
    }
}

/// A parsed 39-byte directory record
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Representation tag (seedling/sapling/tree/forked/subdir)
    pub storage_type: u8,
    /// Filename, 1-15 characters
    pub name: String,
    /// ProDOS file type code
    pub file_type: u8,
    /// Root pointer of the data chain
    pub key_pointer: u16,
    /// Blocks charged to the file, index blocks included
    pub blocks_used: u16,
    /// Byte length (EOF), 3 bytes on disk
    pub eof: u32,
    /// Packed creation date word
    pub created_date: u16,
    /// Packed creation time word
    pub created_time: u16,
    /// Access permission bits
    pub access: u8,
    /// Auxiliary type (load address for BIN, record length for TXT)
    pub aux_type: u16,
    /// Packed modification date word
    pub modified_date: u16,
    /// Packed modification time word
    pub modified_time: u16,
    /// Back-pointer to the owning directory's key block
    pub header_pointer: u16,
}

impl DirEntry {
    /// Parse an entry; `None` for an empty/deleted slot
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ENTRY_LENGTH {
            return None;
        }
        let storage_type = bytes[0] >> 4;
        if storage_type == STORAGE_DELETED {
            return None;
        }
        let name_len = (bytes[0] & 0xF) as usize;
        if name_len == 0 || name_len > 15 {
            return None;
        }
        let name = bytes[1..1 + name_len]
            .iter()
            .map(|&b| b as char)
            .collect();

        Some(Self {
            storage_type,
            name,
            file_type: bytes[16],
            key_pointer: u16::from_le_bytes([bytes[17], bytes[18]]),
            blocks_used: u16::from_le_bytes([bytes[19], bytes[20]]),
            eof: u32::from_le_bytes([bytes[21], bytes[22], bytes[23], 0]),
            created_date: u16::from_le_bytes([bytes[24], bytes[25]]),
            created_time: u16::from_le_bytes([bytes[26], bytes[27]]),
            access: bytes[30],
            aux_type: u16::from_le_bytes([bytes[31], bytes[32]]),
            modified_date: u16::from_le_bytes([bytes[33], bytes[34]]),
            modified_time: u16::from_le_bytes([bytes[35], bytes[36]]),
            header_pointer: u16::from_le_bytes([bytes[37], bytes[38]]),
        })
    }

    /// Serialize all 39 bytes, fully reinitializing any stale slot content
    pub fn write_to(&self, out: &mut [u8]) {
        out[..ENTRY_LENGTH].fill(0);
        out[0] = (self.storage_type << 4) | self.name.len() as u8;
        for (i, b) in self.name.bytes().enumerate() {
            out[1 + i] = b;
        }
        out[16] = self.file_type;
        out[17..19].copy_from_slice(&self.key_pointer.to_le_bytes());
        out[19..21].copy_from_slice(&self.blocks_used.to_le_bytes());
        out[21..24].copy_from_slice(&self.eof.to_le_bytes()[..3]);
        out[24..26].copy_from_slice(&self.created_date.to_le_bytes());
        out[26..28].copy_from_slice(&self.created_time.to_le_bytes());
        out[30] = self.access;
        out[31..33].copy_from_slice(&self.aux_type.to_le_bytes());
        out[33..35].copy_from_slice(&self.modified_date.to_le_bytes());
        out[35..37].copy_from_slice(&self.modified_time.to_le_bytes());
        out[37..39].copy_from_slice(&self.header_pointer.to_le_bytes());
    }

    /// Check the write-protect bit
    pub fn is_locked(&self) -> bool {
        self.access & 0x02 == 0
    }

    /// Check for a subdirectory entry
    pub fn is_directory(&self) -> bool {
        self.storage_type == STORAGE_SUBDIR
    }
}

/// Blocks of a directory chain in order, guarding against cycles
pub fn chain_blocks(image: &Image, order: &ImageOrder, key_block: u16) -> Result<Vec<u16>> {
    let mut blocks = Vec::new();
    let mut seen = HashSet::new();
    let mut current = key_block;
    while current != 0 {
        if !seen.insert(current) {
            return Err(DiskError::corrupt(format!(
                "directory chain loops at block {current}"
            )));
        }
        blocks.push(current);
        let data = order.read_block(image, current)?;
        current = u16::from_le_bytes([data[2], data[3]]);
    }
    Ok(blocks)
}

/// Visit every entry slot of a directory, header slot excluded
pub fn walk_entries(
    image: &Image,
    order: &ImageOrder,
    key_block: u16,
) -> Result<Vec<(EntryLocation, DirEntry)>> {
    let mut entries = Vec::new();
    for (n, block) in chain_blocks(image, order, key_block)?.into_iter().enumerate() {
        let data = order.read_block(image, block)?;
        let first = if n == 0 { 1 } else { 0 };
        for i in first..ENTRIES_PER_BLOCK {
            let offset = 4 + i * ENTRY_LENGTH;
            if let Some(entry) = DirEntry::parse(&data[offset..offset + ENTRY_LENGTH]) {
                entries.push((EntryLocation { block, offset }, entry));
            }
        }
    }
    Ok(entries)
}

/// Find an entry by name (case-insensitive, as ProDOS compares)
pub fn find_entry(
    image: &Image,
    order: &ImageOrder,
    key_block: u16,
    name: &str,
) -> Result<Option<(EntryLocation, DirEntry)>> {
    Ok(walk_entries(image, order, key_block)?
        .into_iter()
        .find(|(_, e)| e.name.eq_ignore_ascii_case(name)))
}

/// Read one entry at a known location
pub fn read_entry(image: &Image, order: &ImageOrder, loc: EntryLocation) -> Result<DirEntry> {
    let data = order.read_block(image, loc.block)?;
    DirEntry::parse(&data[loc.offset..loc.offset + ENTRY_LENGTH])
        .ok_or_else(|| DiskError::corrupt(format!("empty entry slot in block {}", loc.block)))
}

/// Write one entry at a known location
pub fn write_entry(
    image: &mut Image,
    order: &ImageOrder,
    loc: EntryLocation,
    entry: &DirEntry,
) -> Result<()> {
    let mut data = order.read_block(image, loc.block)?;
    entry.write_to(&mut data[loc.offset..loc.offset + ENTRY_LENGTH]);
    order.write_block(image, loc.block, &data)
}

/// Clear an entry's storage nibble, flagging the slot deleted.
///
/// The remaining slot bytes are left as they are; the next create fully
/// reinitializes the slot.
pub fn clear_entry(image: &mut Image, order: &ImageOrder, loc: EntryLocation) -> Result<()> {
    let mut data = order.read_block(image, loc.block)?;
    data[loc.offset] = 0;
    order.write_block(image, loc.block, &data)
}

/// Find a free entry slot, extending the directory chain when every
/// slot is taken.
///
/// A grown directory gets a fresh block linked with prev/next pointers;
/// when `owner` names the subdirectory's entry in its parent, that
/// entry's block count and EOF grow with it — directories grow exactly
/// like files.
pub fn find_free_slot(
    image: &mut Image,
    order: &ImageOrder,
    bitmap: &mut VolumeBitmap,
    key_block: u16,
    owner: Option<EntryLocation>,
) -> Result<EntryLocation> {
    let blocks = chain_blocks(image, order, key_block)?;
    for (n, &block) in blocks.iter().enumerate() {
        let data = order.read_block(image, block)?;
        let first = if n == 0 { 1 } else { 0 };
        for i in first..ENTRIES_PER_BLOCK {
            let offset = 4 + i * ENTRY_LENGTH;
            if data[offset] >> 4 == STORAGE_DELETED {
                return Ok(EntryLocation { block, offset });
            }
        }
    }

    // Chain is full: allocate and link one more block.
    let Some(&last) = blocks.last() else {
        return Err(DiskError::corrupt("directory chain is empty"));
    };
    let new_block = bitmap.allocate()?;

    let mut data = vec![0u8; BLOCK_SIZE];
    data[0..2].copy_from_slice(&last.to_le_bytes());
    order.write_block(image, new_block, &data)?;

    let mut last_data = order.read_block(image, last)?;
    last_data[2..4].copy_from_slice(&new_block.to_le_bytes());
    order.write_block(image, last, &last_data)?;

    if let Some(owner_loc) = owner {
        let mut entry = read_entry(image, order, owner_loc)?;
        entry.blocks_used += 1;
        entry.eof += BLOCK_SIZE as u32;
        write_entry(image, order, owner_loc, &entry)?;
    }

    Ok(EntryLocation {
        block: new_block,
        offset: 4,
    })
}

/// Active entry count stored in a directory header
pub fn file_count(image: &Image, order: &ImageOrder, key_block: u16) -> Result<u16> {
    let data = order.read_block(image, key_block)?;
    Ok(u16::from_le_bytes([
        data[HDR_FILE_COUNT],
        data[HDR_FILE_COUNT + 1],
    ]))
}

/// Adjust a directory header's active entry count
pub fn adjust_file_count(
    image: &mut Image,
    order: &ImageOrder,
    key_block: u16,
    delta: i32,
) -> Result<()> {
    let mut data = order.read_block(image, key_block)?;
    let count = u16::from_le_bytes([data[HDR_FILE_COUNT], data[HDR_FILE_COUNT + 1]]);
    let count = (count as i32 + delta).max(0) as u16;
    data[HDR_FILE_COUNT..HDR_FILE_COUNT + 2].copy_from_slice(&count.to_le_bytes());
    order.write_block(image, key_block, &data)
}

/// Name stored in a directory header
pub fn header_name(image: &Image, order: &ImageOrder, key_block: u16) -> Result<String> {
    let data = order.read_block(image, key_block)?;
    let len = (data[HDR_STORAGE] & 0xF) as usize;
    Ok(data[HDR_NAME..HDR_NAME + len.min(15)]
        .iter()
        .map(|&b| b as char)
        .collect())
}
