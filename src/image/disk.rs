//! Building disk images from listings.

use thiserror::Error;
use crate::image::listing::{Listing, ListingError};
use crate::storage::{BlockStorage, StorageError, BLOCK_SIZE};
use crate::word::Word;

/// Write a listing into one block of a disk. Returns the instruction count.
pub fn write_listing<S: BlockStorage + ?Sized>(
    storage: &mut S,
    block: usize,
    listing: &Listing,
) -> Result<usize, ImageError> {
    let words = listing.to_block()?;
    storage.write_block(block, &words)?;
    log::debug!("wrote {} instructions to block {}", listing.len(), block);
    Ok(listing.len())
}

/// Read one block of a disk.
pub fn read_block_words<S: BlockStorage + ?Sized>(
    storage: &mut S,
    block: usize,
) -> Result<Vec<Word>, ImageError> {
    let mut words = vec![Word::empty(); BLOCK_SIZE];
    storage.read_block(block, &mut words)?;
    Ok(words)
}

/// Errors that can occur while building an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDisk;

    #[test]
    fn test_write_then_read_listing() {
        let mut disk = MemoryDisk::new();
        let listing = Listing::parse("MOV R0, 1\nHALT").unwrap();
        assert_eq!(write_listing(&mut disk, 4, &listing).unwrap(), 2);

        let words = read_block_words(&mut disk, 4).unwrap();
        assert_eq!(words[0].as_string(), "MOV R0");
        assert_eq!(words[1].as_integer(), 1);
        assert_eq!(words[2].as_string(), "HALT");
    }

    #[test]
    fn test_block_out_of_range() {
        let mut disk = MemoryDisk::new();
        let listing = Listing::parse("HALT").unwrap();
        assert_eq!(
            write_listing(&mut disk, 9999, &listing).unwrap_err(),
            ImageError::Storage(StorageError::BlockOutOfRange(9999))
        );
    }
}
