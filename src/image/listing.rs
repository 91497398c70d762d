//! Instruction listings.
//!
//! A listing is plain text with one instruction per line:
//! ```text
//! // Print a greeting and stop
//! MOV P0, "hello"
//! OUT
//! HALT
//! ```
//! Blank lines and `//` comments are ignored. Every instruction is decoded
//! for validation and packed into a two-word slot.

use std::path::Path;
use thiserror::Error;
use crate::cpu::decode::{self, DecodeError, INSTRUCTION_SIZE};
use crate::storage::BLOCK_SIZE;
use crate::word::Word;

/// Most instructions one block can hold.
pub const MAX_SLOTS: usize = BLOCK_SIZE / INSTRUCTION_SIZE;

/// A parsed listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Packed instruction slots.
    pub slots: Vec<[Word; INSTRUCTION_SIZE]>,
    /// Original source lines (for debugging).
    pub source_lines: Vec<String>,
}

impl Listing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse listing text.
    pub fn parse(source: &str) -> Result<Self, ListingError> {
        let mut listing = Listing::new();

        for (index, line) in source.lines().enumerate() {
            let text = strip_comment(line).trim();
            if text.is_empty() {
                continue;
            }

            let slot = decode::encode(text)
                .map_err(|error| ListingError::Decode { line: index + 1, error })?;
            listing.slots.push(slot);
            listing.source_lines.push(text.to_string());
        }

        Ok(listing)
    }

    /// The slots flattened into memory order.
    pub fn words(&self) -> Vec<Word> {
        self.slots.iter().flat_map(|slot| slot.iter().cloned()).collect()
    }

    /// The listing padded to exactly one block.
    pub fn to_block(&self) -> Result<Vec<Word>, ListingError> {
        if self.slots.len() > MAX_SLOTS {
            return Err(ListingError::TooLarge { slots: self.slots.len() });
        }
        let mut words = self.words();
        words.resize(BLOCK_SIZE, Word::empty());
        Ok(words)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Read and parse a listing file.
pub fn load_listing<P: AsRef<Path>>(path: P) -> Result<Listing, ListingError> {
    let source = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ListingError::IoError(e.to_string()))?;
    Listing::parse(&source)
}

/// Cut a `//` comment, ignoring slashes inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_string = !in_string,
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Errors that can occur while reading a listing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("line {line}: {error}")]
    Decode {
        line: usize,
        #[source]
        error: DecodeError,
    },

    #[error("{slots} instructions do not fit in one block")]
    TooLarge { slots: usize },
}
