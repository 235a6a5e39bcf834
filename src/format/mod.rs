/// Image geometry constants and format detection

/// Geometry constants and skew tables
pub mod constants;

pub use constants::*;

/// Physical layout of an image file, judged from its size and extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// DOS-ordered sector image (.do, .dsk)
    DosOrder,
    /// ProDOS-ordered block image (.po, .hdv, 2mg payloads)
    ProdosOrder,
    /// Raw nibble image preserving GCR encoding (.nib)
    Nibble,
}

impl ImageFormat {
    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            ImageFormat::DosOrder => "DOS order",
            ImageFormat::ProdosOrder => "ProDOS order",
            ImageFormat::Nibble => "Nibble",
        }
    }
}

/// Candidate physical formats for an image of `size` bytes.
///
/// 140K and 160K images are ambiguous between DOS and ProDOS ordering; the
/// `extension` hint (lowercased, without dot) settles which is tried first.
/// Other block-multiple sizes can only be linear block images.
pub fn candidate_formats(size: usize, extension: Option<&str>) -> Vec<ImageFormat> {
    if size == SIZE_NIBBLE {
        return vec![ImageFormat::Nibble];
    }
    if size == SIZE_140K || size == SIZE_160K {
        return match extension {
            Some("po") | Some("hdv") => vec![ImageFormat::ProdosOrder, ImageFormat::DosOrder],
            _ => vec![ImageFormat::DosOrder, ImageFormat::ProdosOrder],
        };
    }
    if size >= BLOCK_SIZE && size <= SIZE_32MB && size % BLOCK_SIZE == 0 {
        return vec![ImageFormat::ProdosOrder];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_140k_default_dos_first() {
        let c = candidate_formats(SIZE_140K, Some("dsk"));
        assert_eq!(c, vec![ImageFormat::DosOrder, ImageFormat::ProdosOrder]);
    }

    #[test]
    fn test_candidates_140k_po_prodos_first() {
        let c = candidate_formats(SIZE_140K, Some("po"));
        assert_eq!(c, vec![ImageFormat::ProdosOrder, ImageFormat::DosOrder]);
    }

    #[test]
    fn test_candidates_nibble() {
        assert_eq!(candidate_formats(SIZE_NIBBLE, None), vec![ImageFormat::Nibble]);
    }

    #[test]
    fn test_candidates_800k() {
        assert_eq!(
            candidate_formats(SIZE_800K, Some("po")),
            vec![ImageFormat::ProdosOrder]
        );
    }

    #[test]
    fn test_candidates_odd_size() {
        assert!(candidate_formats(12345, None).is_empty());
    }
}
