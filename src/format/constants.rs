/// Apple II disk geometry constants and skew tables

/// Bytes per track/sector-addressed sector
pub const SECTOR_SIZE: usize = 256;

/// Bytes per block-addressed block
pub const BLOCK_SIZE: usize = 512;

/// Sectors per track on a 16-sector disk
pub const SECTORS_PER_TRACK: usize = 16;

/// Tracks on a standard 5.25" disk
pub const TRACKS_PER_DISK: usize = 35;

/// Bytes per track in sector order (16 x 256)
pub const TRACK_SIZE: usize = SECTORS_PER_TRACK * SECTOR_SIZE;

/// Size of a standard 140K 5.25" image (35 tracks)
pub const SIZE_140K: usize = TRACKS_PER_DISK * TRACK_SIZE;

/// Size of a 40-track 5.25" image
pub const SIZE_160K: usize = 40 * TRACK_SIZE;

/// Size of an 800K 3.5" block image (1600 blocks)
pub const SIZE_800K: usize = 1600 * BLOCK_SIZE;

/// Largest supported block image (32 MB ProDOS volume, 65535 blocks)
pub const SIZE_32MB: usize = 65535 * BLOCK_SIZE;

/// Bytes per nibbilized track in a .nib image
pub const NIBBLE_TRACK_SIZE: usize = 6656;

/// Size of a 35-track nibble image
pub const SIZE_NIBBLE: usize = TRACKS_PER_DISK * NIBBLE_TRACK_SIZE;

/// Blocks per track when block-addressing a 16-sector disk
pub const BLOCKS_PER_TRACK: usize = 8;

/// Sector skew between DOS-logical and ProDOS-logical orderings.
///
/// A DOS-logical sector `s` of a track lives at 256-byte slot
/// `SECTOR_SKEW[s]` of that track in a ProDOS-ordered image, and vice
/// versa: the table is its own inverse.
pub const SECTOR_SKEW: [u8; 16] = [
    0x0, 0xE, 0xD, 0xC, 0xB, 0xA, 0x9, 0x8, 0x7, 0x6, 0x5, 0x4, 0x3, 0x2, 0x1, 0xF,
];

/// DOS 3.3 software skew: logical sector to the physical sector number
/// recorded in the address field on disk.
pub const DOS_PHYSICAL_SKEW: [u8; 16] = [
    0x0, 0xD, 0xB, 0x9, 0x7, 0x5, 0x3, 0x1, 0xE, 0xC, 0xA, 0x8, 0x6, 0x4, 0x2, 0xF,
];

/// The two DOS-logical sectors backing one 512-byte block.
///
/// Block `b` occupies track `b / 8`; its low half is DOS-logical sector
/// `SECTOR_SKEW[(b % 8) * 2]` and its high half `SECTOR_SKEW[(b % 8) * 2 + 1]`.
pub fn block_sectors(block: u16) -> (u8, [u8; 2]) {
    let track = (block as usize / BLOCKS_PER_TRACK) as u8;
    let pair = (block as usize % BLOCKS_PER_TRACK) * 2;
    (track, [SECTOR_SKEW[pair], SECTOR_SKEW[pair + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_skew_is_involution() {
        for s in 0..16 {
            assert_eq!(SECTOR_SKEW[SECTOR_SKEW[s] as usize] as usize, s);
        }
    }

    #[test]
    fn test_skew_tables_are_permutations() {
        for table in [&SECTOR_SKEW, &DOS_PHYSICAL_SKEW] {
            let mut seen = [false; 16];
            for &s in table.iter() {
                assert!(!seen[s as usize]);
                seen[s as usize] = true;
            }
        }
    }

    #[test]
    fn test_block_sectors() {
        // Block 0 is DOS sectors 0 and 14 of track 0.
        assert_eq!(block_sectors(0), (0, [0x0, 0xE]));
        // Block 7 wraps to sectors 1 and 15.
        assert_eq!(block_sectors(7), (0, [0x1, 0xF]));
        // Block 8 starts track 1.
        assert_eq!(block_sectors(8), (1, [0x0, 0xE]));
    }

    #[test]
    fn test_block_sectors_cover_track() {
        // The eight blocks of a track must cover all sixteen sectors.
        let mut seen = [false; 16];
        for b in 0..8u16 {
            let (track, sectors) = block_sectors(b);
            assert_eq!(track, 0);
            for s in sectors {
                assert!(!seen[s as usize], "sector {s} aliased");
                seen[s as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_canonical_sizes() {
        assert_eq!(SIZE_140K, 143_360);
        assert_eq!(SIZE_NIBBLE, 232_960);
        assert_eq!(SIZE_800K, 819_200);
    }
}
