//! Disassembler for XSM pages.
//!
//! Renders the instruction slots of a page back into readable text.

use crate::cpu::decode::{decode_slot, slot_text, INSTRUCTION_SIZE};
use crate::word::Word;

/// Disassemble a single slot to text.
pub fn disassemble_slot(first: &Word, second: &Word) -> String {
    match decode_slot(first, second) {
        Ok(instr) => instr.to_string(),
        Err(_) => format!("??? ; {}", slot_text(first, second)),
    }
}

/// Disassemble the slots of a page, skipping empty ones.
///
/// `base` is the address of the first word, used for the address column.
pub fn disassemble(words: &[Word], base: usize) -> String {
    let mut output = String::new();
    output.push_str("// XSM Disassembly\n");
    output.push_str("// ---------------\n\n");

    for (index, slot) in words.chunks(INSTRUCTION_SIZE).enumerate() {
        let (first, second) = match slot {
            [first, second] => (first, second),
            _ => continue,
        };
        if first.is_empty() && second.is_empty() {
            continue;
        }
        let addr = base + index * INSTRUCTION_SIZE;
        output.push_str(&format!("{:05}: {}\n", addr, disassemble_slot(first, second)));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Listing;

    #[test]
    fn test_disassemble_listing() {
        let listing = Listing::parse("mov r0,5\nHALT").unwrap();
        let text = disassemble(&listing.words(), 1024);
        assert!(text.contains("01024: MOV R0, 5\n"));
        assert!(text.contains("01026: HALT\n"));
    }

    #[test]
    fn test_disassemble_garbage() {
        let first = Word::from_text("hello").unwrap();
        assert_eq!(disassemble_slot(&first, &Word::from(3)), "??? ; hello, 3");
    }
}
