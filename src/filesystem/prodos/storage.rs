/// Tiered file storage: seedling, sapling and tree chains
///
/// A file's representation is picked purely by size: one data block
/// (seedling), one index block of up to 256 pointers (sapling), or a
/// master index of index blocks (tree). Growth and shrink re-plan the
/// whole chain; the feasibility check runs before the old chain is
/// touched so a failed grow never loses data.

use crate::error::{DiskError, Result};
use crate::filesystem::prodos::bitmap::VolumeBitmap;
use crate::filesystem::prodos::directory::{
    STORAGE_FORKED, STORAGE_SAPLING, STORAGE_SEEDLING, STORAGE_TREE,
};
use crate::format::constants::BLOCK_SIZE;
use crate::image::{Image, ImageOrder};

/// Pointers per index block
pub const INDEX_ENTRIES: usize = 256;

/// Largest byte length the 3-byte EOF field can record
pub const MAX_EOF: usize = 0xFF_FFFF;

/// Which fork of a forked file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    /// The primary (data) fork
    Data,
    /// The secondary (resource) fork
    Resource,
}

/// Resulting shape of a freshly written chain
#[derive(Debug, Clone, Copy)]
pub struct ChainInfo {
    /// Representation tag matching the chain shape
    pub storage_type: u8,
    /// Root pointer (data block, index block or master index)
    pub key_pointer: u16,
    /// Blocks allocated, index blocks included
    pub blocks_used: u16,
}

/// One fork's mini-entry inside an extended key block
#[derive(Debug, Clone, Copy)]
pub struct ForkInfo {
    /// Representation tag of the fork's own chain
    pub storage_type: u8,
    /// Root pointer of the fork's chain
    pub key_pointer: u16,
    /// Blocks charged to the fork
    pub blocks_used: u16,
    /// Fork byte length
    pub eof: u32,
}

/// Read the 256 pointers of an index block; pointer 0 reads as sparse
fn read_index(image: &Image, order: &ImageOrder, block: u16) -> Result<Vec<u16>> {
    if block == 0 {
        return Ok(vec![0; INDEX_ENTRIES]);
    }
    let data = order.read_block(image, block)?;
    Ok((0..INDEX_ENTRIES)
        .map(|i| data[i] as u16 | ((data[INDEX_ENTRIES + i] as u16) << 8))
        .collect())
}

/// Write an index block: low bytes at 0-255, high bytes at 256-511
fn write_index(image: &mut Image, order: &ImageOrder, block: u16, pointers: &[u16]) -> Result<()> {
    let mut data = vec![0u8; BLOCK_SIZE];
    for (i, &p) in pointers.iter().enumerate() {
        data[i] = p as u8;
        data[INDEX_ENTRIES + i] = (p >> 8) as u8;
    }
    order.write_block(image, block, &data)
}

/// Append up to `remaining` bytes of one data block, sparse-aware
fn append_block(
    image: &Image,
    order: &ImageOrder,
    block: u16,
    out: &mut Vec<u8>,
    remaining: usize,
) -> Result<()> {
    let take = remaining.min(BLOCK_SIZE);
    if block == 0 {
        out.resize(out.len() + take, 0);
    } else {
        let data = order.read_block(image, block)?;
        out.extend_from_slice(&data[..take]);
    }
    Ok(())
}

/// Reconstruct a file's bytes from its chain, truncated to `eof`.
///
/// The representation tag must match the chain shape a file of `eof`
/// bytes can have; a contradiction is surfaced as corruption rather
/// than silently tolerated.
pub fn read_chain(
    image: &Image,
    order: &ImageOrder,
    storage_type: u8,
    key_pointer: u16,
    eof: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(eof);
    match storage_type {
        STORAGE_SEEDLING => {
            if eof > BLOCK_SIZE {
                return Err(DiskError::corrupt(format!(
                    "seedling tag with EOF {eof} exceeds one block"
                )));
            }
            append_block(image, order, key_pointer, &mut out, eof)?;
        }
        STORAGE_SAPLING => {
            if eof > INDEX_ENTRIES * BLOCK_SIZE {
                return Err(DiskError::corrupt(format!(
                    "sapling tag with EOF {eof} exceeds one index block"
                )));
            }
            for &block in read_index(image, order, key_pointer)?.iter() {
                if out.len() >= eof {
                    break;
                }
                let remaining = eof - out.len();
                append_block(image, order, block, &mut out, remaining)?;
            }
        }
        STORAGE_TREE => {
            for &index in read_index(image, order, key_pointer)?.iter() {
                if out.len() >= eof {
                    break;
                }
                for &block in read_index(image, order, index)?.iter() {
                    if out.len() >= eof {
                        break;
                    }
                    let remaining = eof - out.len();
                    append_block(image, order, block, &mut out, remaining)?;
                }
            }
        }
        other => {
            return Err(DiskError::corrupt(format!(
                "storage type 0x{other:X} has no data chain"
            )));
        }
    }
    // A too-short chain cannot cover the declared EOF.
    if out.len() < eof {
        return Err(DiskError::corrupt(format!(
            "chain holds {} bytes but EOF claims {eof}",
            out.len()
        )));
    }
    Ok(out)
}

/// Every block a chain occupies: key, index and data blocks
pub fn chain_block_set(
    image: &Image,
    order: &ImageOrder,
    storage_type: u8,
    key_pointer: u16,
) -> Result<Vec<u16>> {
    let mut blocks = Vec::new();
    if key_pointer == 0 {
        return Ok(blocks);
    }
    match storage_type {
        STORAGE_SEEDLING => blocks.push(key_pointer),
        STORAGE_SAPLING => {
            blocks.push(key_pointer);
            blocks.extend(
                read_index(image, order, key_pointer)?
                    .into_iter()
                    .filter(|&b| b != 0),
            );
        }
        STORAGE_TREE => {
            blocks.push(key_pointer);
            for index in read_index(image, order, key_pointer)? {
                if index == 0 {
                    continue;
                }
                blocks.push(index);
                blocks.extend(
                    read_index(image, order, index)?
                        .into_iter()
                        .filter(|&b| b != 0),
                );
            }
        }
        STORAGE_FORKED => {
            blocks.push(key_pointer);
            for fork in [Fork::Data, Fork::Resource] {
                let info = read_fork_info(image, order, key_pointer, fork)?;
                if info.key_pointer != 0 {
                    blocks.extend(chain_block_set(
                        image,
                        order,
                        info.storage_type,
                        info.key_pointer,
                    )?);
                }
            }
        }
        other => {
            return Err(DiskError::corrupt(format!(
                "storage type 0x{other:X} has no data chain"
            )));
        }
    }
    Ok(blocks)
}

/// Return a chain's blocks to the free pool
pub fn free_chain(
    image: &Image,
    order: &ImageOrder,
    bitmap: &mut VolumeBitmap,
    storage_type: u8,
    key_pointer: u16,
) -> Result<()> {
    for block in chain_block_set(image, order, storage_type, key_pointer)? {
        bitmap.mark_free(block);
    }
    Ok(())
}

/// Representation and index-block cost for a byte length
fn plan(len: usize) -> Result<(u8, usize, usize)> {
    let data_blocks = len.div_ceil(BLOCK_SIZE).max(1);
    if data_blocks == 1 {
        Ok((STORAGE_SEEDLING, data_blocks, 0))
    } else if data_blocks <= INDEX_ENTRIES {
        Ok((STORAGE_SAPLING, data_blocks, 1))
    } else if len <= MAX_EOF {
        // Master index plus one index block per 256 data blocks.
        Ok((STORAGE_TREE, data_blocks, 1 + data_blocks.div_ceil(INDEX_ENTRIES)))
    } else {
        Err(DiskError::NotSupported(format!(
            "file of {len} bytes exceeds the 16 MB EOF limit"
        )))
    }
}

/// Replace a file's chain with a fresh one holding `data`.
///
/// The feasibility check counts the blocks the old chain already owns,
/// so rewriting a file in place never needs extra headroom; on
/// `VolumeFull` nothing has been freed or allocated.
pub fn write_chain(
    image: &mut Image,
    order: &ImageOrder,
    bitmap: &mut VolumeBitmap,
    data: &[u8],
    old: Option<(u8, u16)>,
) -> Result<ChainInfo> {
    let (storage_type, data_blocks, index_blocks) = plan(data.len())?;
    let needed = data_blocks + index_blocks;

    let owned = match old {
        Some((st, key)) => chain_block_set(image, order, st, key)?.len(),
        None => 0,
    };
    let free = bitmap.free_count();
    if needed > free + owned {
        return Err(DiskError::VolumeFull {
            needed,
            free: free + owned,
        });
    }

    if let Some((st, key)) = old {
        free_chain(image, order, bitmap, st, key)?;
    }

    // Chunk the data, zero-padding the final partial block.
    let write_data_block = |image: &mut Image, bitmap: &mut VolumeBitmap, chunk: &[u8]| {
        let block = bitmap.allocate()?;
        let mut buf = vec![0u8; BLOCK_SIZE];
        buf[..chunk.len()].copy_from_slice(chunk);
        order.write_block(image, block, &buf)?;
        Ok::<u16, DiskError>(block)
    };

    let chunks: Vec<&[u8]> = if data.is_empty() {
        vec![&[]]
    } else {
        data.chunks(BLOCK_SIZE).collect()
    };

    let key_pointer = match storage_type {
        STORAGE_SEEDLING => write_data_block(image, bitmap, chunks[0])?,
        STORAGE_SAPLING => {
            let index = bitmap.allocate()?;
            let mut pointers = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                pointers.push(write_data_block(image, bitmap, chunk)?);
            }
            write_index(image, order, index, &pointers)?;
            index
        }
        _ => {
            let master = bitmap.allocate()?;
            let mut index_pointers = Vec::new();
            for group in chunks.chunks(INDEX_ENTRIES) {
                let index = bitmap.allocate()?;
                let mut pointers = Vec::with_capacity(group.len());
                for chunk in group {
                    pointers.push(write_data_block(image, bitmap, chunk)?);
                }
                write_index(image, order, index, &pointers)?;
                index_pointers.push(index);
            }
            write_index(image, order, master, &index_pointers)?;
            master
        }
    };

    Ok(ChainInfo {
        storage_type,
        key_pointer,
        blocks_used: needed as u16,
    })
}

/// Offset of a fork's mini-entry inside the extended key block
fn fork_offset(fork: Fork) -> usize {
    match fork {
        Fork::Data => 0x000,
        Fork::Resource => 0x100,
    }
}

/// Read one fork's mini-entry from an extended key block
pub fn read_fork_info(
    image: &Image,
    order: &ImageOrder,
    extended_key: u16,
    fork: Fork,
) -> Result<ForkInfo> {
    let data = order.read_block(image, extended_key)?;
    let o = fork_offset(fork);
    Ok(ForkInfo {
        storage_type: data[o] & 0xF,
        key_pointer: u16::from_le_bytes([data[o + 1], data[o + 2]]),
        blocks_used: u16::from_le_bytes([data[o + 3], data[o + 4]]),
        eof: u32::from_le_bytes([data[o + 5], data[o + 6], data[o + 7], 0]),
    })
}

/// Write one fork's mini-entry into an extended key block
pub fn write_fork_info(
    image: &mut Image,
    order: &ImageOrder,
    extended_key: u16,
    fork: Fork,
    info: &ForkInfo,
) -> Result<()> {
    let mut data = order.read_block(image, extended_key)?;
    let o = fork_offset(fork);
    data[o] = info.storage_type;
    data[o + 1..o + 3].copy_from_slice(&info.key_pointer.to_le_bytes());
    data[o + 3..o + 5].copy_from_slice(&info.blocks_used.to_le_bytes());
    data[o + 5..o + 8].copy_from_slice(&info.eof.to_le_bytes()[..3]);
    order.write_block(image, extended_key, &data)
}
