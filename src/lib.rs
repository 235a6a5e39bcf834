/*!
# a2dsk

A library for reading and writing Apple II disk images.

Three physical orderings are supported — DOS-ordered sectors (.dsk/.do),
ProDOS-ordered blocks (.po/.hdv) and raw 6&2 GCR nibbles (.nib) — and two
filesystem dialects on top of them: ProDOS and DOS 3.3. The ordering and
the dialect are independent axes: a ProDOS volume can live on a
DOS-ordered image and vice versa, with all addressing translated through
[`ImageOrder`].

## Example

```no_run
use a2dsk::{open_volume, Image};

# fn main() -> a2dsk::Result<()> {
let image = Image::open("games.dsk")?;
let volume = open_volume(image)?;
for file in volume.list_files()? {
    println!("{:>3} {} {}", file.type_name, file.size, file.name);
}
# Ok(())
# }
```

Formatting a blank volume:

```
use a2dsk::{format_volume, Image, SIZE_140K};

# fn main() -> a2dsk::Result<()> {
let mut volume = format_volume("ProDOS", Image::blank(SIZE_140K), "NEW.DISK")?;
volume.write_file("README", b"hello from 1983")?;
# Ok(())
# }
```
*/

#![warn(missing_docs)]

/// Error type shared by every layer
pub mod error;
/// Filesystem dialects: ProDOS and DOS 3.3
pub mod filesystem;
/// Physical format detection and geometry constants
pub mod format;
/// Image buffers and address translation
pub mod image;

pub use error::{DiskError, Result};
pub use filesystem::{
    format_volume, open_volume, DialectHandler, DialectRegistry, Dos33Volume, FileInfo,
    ProdosVolume, Volume,
};
pub use format::constants::{
    BLOCK_SIZE, SECTOR_SIZE, SECTORS_PER_TRACK, SIZE_140K, SIZE_800K, TRACKS_PER_DISK,
};
pub use format::ImageFormat;
pub use image::{AddressingMode, Image, ImageOrder};
