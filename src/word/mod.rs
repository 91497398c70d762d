//! The XSM storage cell.
//!
//! This module provides:
//! - [`Word`] - The machine's addressable unit (an integer or a short string)
//! - [`WordKind`] - The syntactic classification of a word's text
//! - [`cipher`] - The scrambling transform behind `ENCRYPT`

mod cell;
pub mod cipher;

pub use cell::{Word, WordError, WordKind, WORD_SIZE};
