/// DOS 3.3 track/sector lists
///
/// A file's data sectors are named by a chain of track/sector list
/// sectors: bytes 1-2 link to the next list sector, bytes 5-6 record
/// the pair offset of the first entry, and up to 122 track/sector
/// pairs follow from offset 0x0C. A (0,0) pair ends the file.

use crate::error::{DiskError, Result};
use crate::filesystem::dos33::vtoc::{Vtoc, MAX_TS_PAIRS};
use crate::format::constants::SECTOR_SIZE;
use crate::image::{Image, ImageOrder};
use std::collections::HashSet;

const OFF_NEXT_TRACK: usize = 0x01;
const OFF_NEXT_SECTOR: usize = 0x02;
const OFF_PAIR_OFFSET: usize = 0x05;
const OFF_FIRST_PAIR: usize = 0x0C;

/// Every sector a file chain occupies: list sectors and data sectors
#[derive(Debug, Clone, Default)]
pub struct ChainSectors {
    /// The track/sector list sectors, in chain order
    pub list: Vec<(u8, u8)>,
    /// The data sectors, in file order, (0,0) end marker excluded
    pub data: Vec<(u8, u8)>,
}

impl ChainSectors {
    /// Total sectors the chain charges to the file
    pub fn count(&self) -> usize {
        self.list.len() + self.data.len()
    }
}

/// Walk a file's list chain, guarding against cycles.
///
/// Data pairs stop at the first (0,0); list sectors keep following the
/// next pointers so a delete frees every sector the file owns.
pub fn chain_sectors(
    image: &Image,
    order: &ImageOrder,
    ts_track: u8,
    ts_sector: u8,
) -> Result<ChainSectors> {
    let mut chain = ChainSectors::default();
    let mut seen = HashSet::new();
    let mut current = (ts_track, ts_sector);
    let mut ended = false;
    while current != (0, 0) {
        if !seen.insert(current) {
            return Err(DiskError::corrupt(format!(
                "track/sector list loops at track {} sector {}",
                current.0, current.1
            )));
        }
        chain.list.push(current);
        let data = order.read_sector(image, current.0, current.1)?;
        for i in 0..MAX_TS_PAIRS {
            let offset = OFF_FIRST_PAIR + i * 2;
            let pair = (data[offset], data[offset + 1]);
            if pair == (0, 0) {
                ended = true;
                break;
            }
            if !ended {
                chain.data.push(pair);
            }
        }
        current = (data[OFF_NEXT_TRACK], data[OFF_NEXT_SECTOR]);
    }
    Ok(chain)
}

/// Read a file's raw bytes: its data sectors concatenated in order
pub fn read_chain(image: &Image, order: &ImageOrder, ts_track: u8, ts_sector: u8) -> Result<Vec<u8>> {
    let chain = chain_sectors(image, order, ts_track, ts_sector)?;
    let mut out = Vec::with_capacity(chain.data.len() * SECTOR_SIZE);
    for (track, sector) in chain.data {
        out.extend_from_slice(&order.read_sector(image, track, sector)?);
    }
    Ok(out)
}

/// Return every sector of a chain to the free pool
pub fn free_chain(
    image: &Image,
    order: &ImageOrder,
    vtoc: &mut Vtoc,
    ts_track: u8,
    ts_sector: u8,
) -> Result<()> {
    let chain = chain_sectors(image, order, ts_track, ts_sector)?;
    for (track, sector) in chain.list.into_iter().chain(chain.data) {
        vtoc.mark_free(track, sector);
    }
    Ok(())
}

/// Replace a file's chain with a fresh one holding `data`.
///
/// Returns the first list sector address and the total sector count.
/// The feasibility check counts the sectors the old chain already owns,
/// so a failed grow leaves the image and the VTOC untouched.
pub fn write_chain(
    image: &mut Image,
    order: &ImageOrder,
    vtoc: &mut Vtoc,
    data: &[u8],
    old: Option<(u8, u8)>,
) -> Result<(u8, u8, u16)> {
    let data_sectors = data.len().div_ceil(SECTOR_SIZE);
    let list_sectors = data_sectors.div_ceil(MAX_TS_PAIRS).max(1);
    let needed = data_sectors + list_sectors;

    let owned = match old {
        Some((t, s)) => chain_sectors(image, order, t, s)?.count(),
        None => 0,
    };
    let free = vtoc.free_count();
    if needed > free + owned {
        return Err(DiskError::VolumeFull {
            needed,
            free: free + owned,
        });
    }

    if let Some((t, s)) = old {
        free_chain(image, order, vtoc, t, s)?;
    }

    let list: Vec<(u8, u8)> = (0..list_sectors)
        .map(|_| vtoc.allocate())
        .collect::<Result<_>>()?;

    let mut pairs = Vec::with_capacity(data_sectors);
    for chunk in data.chunks(SECTOR_SIZE) {
        let (track, sector) = vtoc.allocate()?;
        let mut buf = vec![0u8; SECTOR_SIZE];
        buf[..chunk.len()].copy_from_slice(chunk);
        order.write_sector(image, track, sector, &buf)?;
        pairs.push((track, sector));
    }

    for (n, &(track, sector)) in list.iter().enumerate() {
        let mut buf = vec![0u8; SECTOR_SIZE];
        if let Some(&(nt, ns)) = list.get(n + 1) {
            buf[OFF_NEXT_TRACK] = nt;
            buf[OFF_NEXT_SECTOR] = ns;
        }
        buf[OFF_PAIR_OFFSET..OFF_PAIR_OFFSET + 2]
            .copy_from_slice(&((n * MAX_TS_PAIRS) as u16).to_le_bytes());
        for (i, &(dt, ds)) in pairs
            .iter()
            .skip(n * MAX_TS_PAIRS)
            .take(MAX_TS_PAIRS)
            .enumerate()
        {
            let offset = OFF_FIRST_PAIR + i * 2;
            buf[offset] = dt;
            buf[offset + 1] = ds;
        }
        order.write_sector(image, track, sector, &buf)?;
    }

    Ok((list[0].0, list[0].1, needed as u16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::SIZE_140K;
    use crate::format::ImageFormat;

    fn setup() -> (Image, ImageOrder, Vtoc) {
        let image = Image::blank(SIZE_140K);
        let order = ImageOrder::for_format(ImageFormat::DosOrder, SIZE_140K).unwrap();
        let vtoc = Vtoc::formatted(35, 254);
        (image, order, vtoc)
    }

    #[test]
    fn test_small_file_round_trip() {
        let (mut image, order, mut vtoc) = setup();
        let data = b"CALL -151".to_vec();
        let (t, s, count) = write_chain(&mut image, &order, &mut vtoc, &data, None).unwrap();
        // One list sector plus one data sector.
        assert_eq!(count, 2);

        let back = read_chain(&image, &order, t, s).unwrap();
        assert_eq!(&back[..data.len()], data.as_slice());
        // The rest of the sector reads back as padding zeros.
        assert_eq!(back.len(), SECTOR_SIZE);
        assert!(back[data.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_large_file_chains_list_sectors() {
        let (mut image, order, mut vtoc) = setup();
        // 130 data sectors needs a second track/sector list.
        let data: Vec<u8> = (0..130 * SECTOR_SIZE).map(|i| (i % 253) as u8).collect();
        let (t, s, count) = write_chain(&mut image, &order, &mut vtoc, &data, None).unwrap();
        assert_eq!(count, 130 + 2);

        let chain = chain_sectors(&image, &order, t, s).unwrap();
        assert_eq!(chain.list.len(), 2);
        assert_eq!(chain.data.len(), 130);
        assert_eq!(read_chain(&image, &order, t, s).unwrap(), data);
    }

    #[test]
    fn test_rewrite_reuses_owned_sectors() {
        let (mut image, order, mut vtoc) = setup();
        let first = vec![0xAAu8; 3 * SECTOR_SIZE];
        let (t, s, _) = write_chain(&mut image, &order, &mut vtoc, &first, None).unwrap();
        let free_before = vtoc.free_count();

        let second = vec![0xBBu8; 3 * SECTOR_SIZE];
        let (t2, s2, _) =
            write_chain(&mut image, &order, &mut vtoc, &second, Some((t, s))).unwrap();
        assert_eq!(vtoc.free_count(), free_before);
        assert_eq!(read_chain(&image, &order, t2, s2).unwrap(), second);
    }

    #[test]
    fn test_failed_growth_is_a_no_op() {
        let (mut image, order, mut vtoc) = setup();
        let small = vec![0x11u8; SECTOR_SIZE];
        let (t, s, _) = write_chain(&mut image, &order, &mut vtoc, &small, None).unwrap();
        let free_before = vtoc.free_count();

        let huge = vec![0u8; 600 * SECTOR_SIZE];
        let result = write_chain(&mut image, &order, &mut vtoc, &huge, Some((t, s)));
        assert!(matches!(result, Err(DiskError::VolumeFull { .. })));
        assert_eq!(vtoc.free_count(), free_before);
        assert_eq!(read_chain(&image, &order, t, s).unwrap(), small);
    }

    #[test]
    fn test_free_chain_returns_every_sector() {
        let (mut image, order, mut vtoc) = setup();
        let free_before = vtoc.free_count();
        let data = vec![0x5Au8; 10 * SECTOR_SIZE];
        let (t, s, count) = write_chain(&mut image, &order, &mut vtoc, &data, None).unwrap();
        assert_eq!(vtoc.free_count(), free_before - count as usize);

        free_chain(&image, &order, &mut vtoc, t, s).unwrap();
        assert_eq!(vtoc.free_count(), free_before);
    }

    #[test]
    fn test_cyclic_list_detected() {
        let (mut image, order, _) = setup();
        // A list sector pointing at itself.
        let mut buf = vec![0u8; SECTOR_SIZE];
        buf[OFF_NEXT_TRACK] = 20;
        buf[OFF_NEXT_SECTOR] = 5;
        order.write_sector(&mut image, 20, 5, &buf).unwrap();
        assert!(matches!(
            chain_sectors(&image, &order, 20, 5),
            Err(DiskError::CorruptStructure(_))
        ));
    }
}
