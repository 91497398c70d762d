//! Disk image files.
//!
//! An image is a flat file of `NUM_BLOCKS * BLOCK_SIZE` words. Each word is
//! stored as `WORD_SIZE` bytes of text padded with NUL bytes; integers are
//! stored as their decimal text.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use super::{check_block, BlockStorage, StorageError, BLOCK_SIZE, NUM_BLOCKS};
use crate::word::{Word, WORD_SIZE};

const BLOCK_BYTES: usize = BLOCK_SIZE * WORD_SIZE;
const IMAGE_BYTES: u64 = (NUM_BLOCKS * BLOCK_BYTES) as u64;

/// A disk backed by an image file.
#[derive(Debug)]
pub struct FileDisk {
    file: File,
    path: PathBuf,
}

impl FileDisk {
    /// Open an existing disk image.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(io_error)?;

        let size = file.metadata().map_err(io_error)?.len();
        if size != IMAGE_BYTES {
            return Err(StorageError::BadImage { size, expected: IMAGE_BYTES });
        }

        Ok(Self { file, path: path.as_ref().to_path_buf() })
    }

    /// Create a blank disk image, replacing any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(io_error)?;
        file.set_len(IMAGE_BYTES).map_err(io_error)?;

        Ok(Self { file, path: path.as_ref().to_path_buf() })
    }

    /// Path the image was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seek_block(&mut self, block: usize) -> Result<(), StorageError> {
        let offset = (block * BLOCK_BYTES) as u64;
        self.file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        Ok(())
    }
}

impl BlockStorage for FileDisk {
    fn read_block(&mut self, block: usize, page: &mut [Word]) -> Result<(), StorageError> {
        check_block(block, page.len())?;
        self.seek_block(block)?;

        let mut bytes = vec![0u8; BLOCK_BYTES];
        self.file.read_exact(&mut bytes).map_err(io_error)?;

        for (index, (word, raw)) in page.iter_mut().zip(bytes.chunks(WORD_SIZE)).enumerate() {
            *word = decode_word(raw).ok_or(StorageError::BadWord { block, index })?;
        }
        Ok(())
    }

    fn write_block(&mut self, block: usize, page: &[Word]) -> Result<(), StorageError> {
        check_block(block, page.len())?;
        self.seek_block(block)?;

        let mut bytes = Vec::with_capacity(BLOCK_BYTES);
        for word in page {
            bytes.extend_from_slice(&encode_word(word));
        }
        self.file.write_all(&bytes).map_err(io_error)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.file.sync_all().map_err(io_error)
    }
}

/// Decode one stored word. Bytes that are not UTF-8 text yield `None`.
fn decode_word(raw: &[u8]) -> Option<Word> {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = std::str::from_utf8(&raw[..len]).ok()?;
    Word::from_text(text).ok()
}

fn encode_word(word: &Word) -> [u8; WORD_SIZE] {
    let mut raw = [0u8; WORD_SIZE];
    let text = word.as_string();
    let len = text.len().min(WORD_SIZE);
    raw[..len].copy_from_slice(&text.as_bytes()[..len]);
    raw
}

fn io_error(e: std::io::Error) -> StorageError {
    StorageError::IoError(e.to_string())
}
