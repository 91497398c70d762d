//! Program images for XSM.
//!
//! This module provides:
//! - A listing loader (instruction text → packed slots)
//! - A disassembler (page words → readable text)
//! - Helpers for writing listings into disk blocks

pub mod listing;
pub mod disasm;
pub mod disk;

pub use listing::{load_listing, Listing, ListingError};
pub use disasm::{disassemble, disassemble_slot};
pub use disk::{read_block_words, write_listing, ImageError};
