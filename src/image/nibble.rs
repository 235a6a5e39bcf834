/// 6&2 group-coded recording codec for raw nibble images
///
/// A nibble image preserves each track as the drive sees it: self-sync
/// bytes, address fields (4&4-encoded volume/track/sector/checksum) and
/// data fields (342 six-bit nibbles plus a trailing checksum nibble).
/// Decode verifies prologue markers and checksums; any mismatch is fatal
/// to the operation.

use crate::error::{DiskError, Result};
use crate::format::constants::{DOS_PHYSICAL_SKEW, NIBBLE_TRACK_SIZE, SECTOR_SIZE};
use crate::image::Image;

/// Address field prologue marker
pub const ADDRESS_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0x96];

/// Data field prologue marker
pub const DATA_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0xAD];

/// Field epilogue marker
pub const EPILOGUE: [u8; 3] = [0xDE, 0xAA, 0xEB];

/// Volume number written into address fields of freshly formatted disks
pub const DEFAULT_VOLUME_NUMBER: u8 = 254;

/// Nibbles in one encoded data field, excluding the checksum nibble
const DATA_NIBBLES: usize = 342;

/// Six-bit value to valid disk byte translation
const WRITE_TABLE: [u8; 64] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6, 0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2,
    0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE,
    0xCF, 0xD3, 0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE, 0xDF, 0xE5, 0xE6, 0xE7, 0xE9,
    0xEA, 0xEB, 0xEC, 0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF9, 0xFA, 0xFB,
    0xFC, 0xFD, 0xFE, 0xFF,
];

/// Decode one disk byte back to its six-bit value
fn decode_disk_byte(byte: u8) -> Result<u8> {
    WRITE_TABLE
        .iter()
        .position(|&b| b == byte)
        .map(|i| i as u8)
        .ok_or_else(|| DiskError::nibble(format!("invalid disk byte 0x{byte:02X}")))
}

/// Encode one byte as a 4&4 odd/even nibble pair
fn encode_44(value: u8) -> [u8; 2] {
    [(value >> 1) | 0xAA, value | 0xAA]
}

/// Decode a 4&4 odd/even nibble pair
fn decode_44(odd: u8, even: u8) -> u8 {
    ((odd << 1) | 1) & even
}

/// Swap the two low bits of a 2-bit group
fn swap2(bits: u8) -> u8 {
    ((bits & 0x1) << 1) | ((bits & 0x2) >> 1)
}

/// Encode one 256-byte sector as 342 data nibbles plus a checksum nibble.
///
/// The low two bits of each byte are packed (bit-swapped) into an 86-byte
/// auxiliary buffer which is emitted first, high end down, followed by the
/// six high bits of every byte in order. Consecutive values are XOR-chained
/// and the final running value becomes the checksum nibble.
pub fn encode_sector(data: &[u8]) -> Result<[u8; DATA_NIBBLES + 1]> {
    if data.len() != SECTOR_SIZE {
        return Err(DiskError::InvalidDataSize {
            expected: SECTOR_SIZE,
            actual: data.len(),
        });
    }

    let mut aux = [0u8; 86];
    let mut top = [0u8; SECTOR_SIZE];
    for (i, &byte) in data.iter().enumerate() {
        top[i] = byte >> 2;
        aux[i % 86] |= swap2(byte & 0x3) << (2 * (i / 86));
    }

    let mut out = [0u8; DATA_NIBBLES + 1];
    let mut prev = 0u8;
    let mut n = 0;
    for &value in aux.iter().rev().chain(top.iter()) {
        out[n] = WRITE_TABLE[(value ^ prev) as usize];
        prev = value;
        n += 1;
    }
    out[DATA_NIBBLES] = WRITE_TABLE[prev as usize];
    Ok(out)
}

/// Decode 343 nibbles (342 data + checksum) back into 256 sector bytes
pub fn decode_sector(nibbles: &[u8]) -> Result<Vec<u8>> {
    if nibbles.len() != DATA_NIBBLES + 1 {
        return Err(DiskError::nibble("short data field"));
    }

    let mut values = [0u8; DATA_NIBBLES];
    let mut prev = 0u8;
    for (i, &nib) in nibbles[..DATA_NIBBLES].iter().enumerate() {
        prev ^= decode_disk_byte(nib)?;
        values[i] = prev;
    }
    if decode_disk_byte(nibbles[DATA_NIBBLES])? != prev {
        return Err(DiskError::nibble("data field checksum mismatch"));
    }

    // Values 0..86 are the auxiliary buffer high end down, then 256 top-bit
    // groups in order.
    let mut data = vec![0u8; SECTOR_SIZE];
    for (i, byte) in data.iter_mut().enumerate() {
        let aux = values[85 - (i % 86)];
        let low = swap2((aux >> (2 * (i / 86))) & 0x3);
        *byte = (values[86 + i] << 2) | low;
    }
    Ok(data)
}

/// Circular view over one nibbilized track
struct TrackView<'a> {
    image: &'a Image,
    base: usize,
}

impl<'a> TrackView<'a> {
    fn new(image: &'a Image, track: u8) -> Result<Self> {
        let base = track as usize * NIBBLE_TRACK_SIZE;
        image.read(base, NIBBLE_TRACK_SIZE)?;
        Ok(Self { image, base })
    }

    fn get(&self, index: usize) -> u8 {
        let bytes = self.image.bytes();
        bytes[self.base + index % NIBBLE_TRACK_SIZE]
    }

    fn matches(&self, index: usize, marker: &[u8; 3]) -> bool {
        (0..3).all(|k| self.get(index + k) == marker[k])
    }
}

/// Locate the start of the data nibbles for a physical sector.
///
/// Returns the track-relative index of the first of the 343 data nibbles.
fn find_data_field(view: &TrackView<'_>, track: u8, physical: u8) -> Result<usize> {
    for start in 0..NIBBLE_TRACK_SIZE {
        if !view.matches(start, &ADDRESS_PROLOGUE) {
            continue;
        }
        let volume = decode_44(view.get(start + 3), view.get(start + 4));
        let addr_track = decode_44(view.get(start + 5), view.get(start + 6));
        let addr_sector = decode_44(view.get(start + 7), view.get(start + 8));
        let checksum = decode_44(view.get(start + 9), view.get(start + 10));
        if checksum != volume ^ addr_track ^ addr_sector {
            return Err(DiskError::nibble("address field checksum mismatch"));
        }
        if addr_track != track {
            return Err(DiskError::nibble(format!(
                "address field claims track {addr_track}, expected {track}"
            )));
        }
        if addr_sector != physical {
            continue;
        }
        // Data prologue follows within the inter-field gap.
        for offset in start + 11..start + 64 {
            if view.matches(offset, &DATA_PROLOGUE) {
                return Ok((offset + 3) % NIBBLE_TRACK_SIZE);
            }
        }
        return Err(DiskError::nibble(format!(
            "sector {physical} on track {track} has no data field"
        )));
    }
    Err(DiskError::nibble(format!(
        "sector {physical} not found on track {track}"
    )))
}

/// Read one DOS-logical sector from a nibbilized track
pub(crate) fn read_sector(image: &Image, track: u8, sector: u8) -> Result<Vec<u8>> {
    let physical = DOS_PHYSICAL_SKEW[sector as usize];
    let view = TrackView::new(image, track)?;
    let start = find_data_field(&view, track, physical)?;
    let nibbles: Vec<u8> = (0..DATA_NIBBLES + 1).map(|k| view.get(start + k)).collect();
    decode_sector(&nibbles)
}

/// Re-encode and overwrite one DOS-logical sector in place
pub(crate) fn write_sector(image: &mut Image, track: u8, sector: u8, data: &[u8]) -> Result<()> {
    let physical = DOS_PHYSICAL_SKEW[sector as usize];
    let start = {
        let view = TrackView::new(image, track)?;
        find_data_field(&view, track, physical)?
    };
    let encoded = encode_sector(data)?;
    let base = track as usize * NIBBLE_TRACK_SIZE;
    for (k, &nib) in encoded.iter().enumerate() {
        image.write(base + (start + k) % NIBBLE_TRACK_SIZE, &[nib])?;
    }
    Ok(())
}

/// Lay down empty, fully formatted tracks across the whole image.
///
/// Each track gets sixteen sectors of zeroed data with standard address
/// and data fields, separated by 0xFF self-sync gaps.
pub fn format_disk(image: &mut Image, volume_number: u8) -> Result<()> {
    if image.len() % NIBBLE_TRACK_SIZE != 0 {
        return Err(DiskError::InvalidImageSize(image.len()));
    }
    let tracks = (image.len() / NIBBLE_TRACK_SIZE) as u8;
    let empty = encode_sector(&[0u8; SECTOR_SIZE])?;

    for track in 0..tracks {
        let mut buf = vec![0xFFu8; NIBBLE_TRACK_SIZE];
        let mut pos = 0usize;
        for physical in 0..16u8 {
            pos += 20; // gap before the address field

            buf[pos..pos + 3].copy_from_slice(&ADDRESS_PROLOGUE);
            pos += 3;
            for value in [
                volume_number,
                track,
                physical,
                volume_number ^ track ^ physical,
            ] {
                let pair = encode_44(value);
                buf[pos..pos + 2].copy_from_slice(&pair);
                pos += 2;
            }
            buf[pos..pos + 3].copy_from_slice(&EPILOGUE);
            pos += 3;

            pos += 10; // gap between address and data fields

            buf[pos..pos + 3].copy_from_slice(&DATA_PROLOGUE);
            pos += 3;
            buf[pos..pos + empty.len()].copy_from_slice(&empty);
            pos += empty.len();
            buf[pos..pos + 3].copy_from_slice(&EPILOGUE);
            pos += 3;
        }
        image.write(track as usize * NIBBLE_TRACK_SIZE, &buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::SIZE_NIBBLE;

    #[test]
    fn test_44_round_trip() {
        for value in 0..=255u8 {
            let [odd, even] = encode_44(value);
            assert_eq!(decode_44(odd, even), value);
        }
    }

    #[test]
    fn test_write_table_all_valid_disk_bytes() {
        // Every translated byte must have the high bit set and no more than
        // one consecutive zero bit, per the GCR rules.
        for &b in WRITE_TABLE.iter() {
            assert!(b & 0x80 != 0, "0x{b:02X} missing high bit");
        }
        // And the table must be strictly increasing (no duplicates).
        for pair in WRITE_TABLE.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_encode_decode_sector() {
        let data: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i * 13 % 256) as u8).collect();
        let encoded = encode_sector(&data).unwrap();
        let decoded = decode_sector(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_rejects_corrupt_checksum() {
        let encoded = encode_sector(&[0x42u8; SECTOR_SIZE]).unwrap();
        let mut bad = encoded;
        // Swap the checksum nibble for a different valid disk byte.
        bad[DATA_NIBBLES] = if bad[DATA_NIBBLES] == 0x96 { 0x97 } else { 0x96 };
        assert!(matches!(
            decode_sector(&bad),
            Err(DiskError::NibbleError(_))
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_disk_byte() {
        let mut encoded = encode_sector(&[0u8; SECTOR_SIZE]).unwrap();
        encoded[10] = 0x00; // never a valid disk byte
        assert!(decode_sector(&encoded).is_err());
    }

    #[test]
    fn test_format_and_sector_round_trip() {
        let mut image = Image::blank(SIZE_NIBBLE);
        format_disk(&mut image, DEFAULT_VOLUME_NUMBER).unwrap();

        let data: Vec<u8> = (0..SECTOR_SIZE).map(|i| (255 - i % 256) as u8).collect();
        write_sector(&mut image, 17, 5, &data).unwrap();
        assert_eq!(read_sector(&image, 17, 5).unwrap(), data);

        // Neighbouring sectors stay zeroed.
        assert!(read_sector(&image, 17, 6)
            .unwrap()
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn test_read_unformatted_track_fails() {
        let image = Image::blank(SIZE_NIBBLE);
        assert!(matches!(
            read_sector(&image, 0, 0),
            Err(DiskError::NibbleError(_))
        ));
    }
}
