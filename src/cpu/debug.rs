//! Debugger hook.
//!
//! When debugging is active the engine calls [`DebugHook::pause`] before each
//! instruction with a read-only [`MachineView`]. The hook decides whether to
//! execute one instruction, leave debug mode, or stop the machine.

use crate::cpu::decode::{self, INSTRUCTION_SIZE};
use crate::cpu::execute::{MachineState, Mode};
use crate::cpu::memory::{Memory, PageEntry, PageTable, NUM_PAGES};
use crate::cpu::registers::{RegId, Registers};
use crate::word::Word;

/// What the engine does after a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Execute one instruction and pause again.
    Step,
    /// Leave debug mode until the next `BRKP`.
    Continue,
    /// Stop the machine.
    Halt,
}

/// Something that can take control while the machine is paused.
pub trait DebugHook {
    fn pause(&mut self, view: &MachineView<'_>) -> Resume;
}

/// A hook that never holds the machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDebugger;

impl DebugHook for NoDebugger {
    fn pause(&mut self, _view: &MachineView<'_>) -> Resume {
        Resume::Continue
    }
}

/// Read-only access to a paused machine.
#[derive(Debug, Clone, Copy)]
pub struct MachineView<'a> {
    pub(crate) regs: &'a Registers,
    pub(crate) mem: &'a Memory,
    pub(crate) mode: Mode,
    pub(crate) state: MachineState,
    pub(crate) cycles: u64,
}

impl<'a> MachineView<'a> {
    pub fn registers(&self) -> &'a Registers {
        self.regs
    }

    pub fn register(&self, name: &str) -> Option<&'a Word> {
        self.regs.get(name).ok()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Physical address of the next instruction.
    pub fn ip(&self) -> i64 {
        self.regs.int(RegId::IP)
    }

    pub fn word(&self, addr: i64) -> Option<&'a Word> {
        self.mem.get_word(addr).ok()
    }

    pub fn page(&self, page: usize) -> Option<&'a [Word]> {
        self.mem.get_page(page).ok()
    }

    /// The page table described by `PTBR` and `PTLR`.
    pub fn page_table(&self) -> PageTable {
        PageTable {
            base: self.regs.int(RegId::PTBR),
            length: self.regs.int(RegId::PTLR),
        }
    }

    /// Entries of the active page table that can be read.
    pub fn page_entries(&self) -> Vec<(i64, PageEntry)> {
        let table = self.page_table();
        (0..table.length.clamp(0, NUM_PAGES as i64))
            .filter_map(|page| self.mem.page_entry(table, page).ok().map(|entry| (page, entry)))
            .collect()
    }

    /// Text of the instruction slot at `IP`.
    pub fn next_instruction(&self) -> String {
        let ip = self.ip();
        match (self.word(ip), self.word(ip + INSTRUCTION_SIZE as i64 - 1)) {
            (Some(first), Some(second)) => match decode::decode_slot(first, second) {
                Ok(instr) => instr.to_string(),
                Err(_) => decode::slot_text(first, second),
            },
            _ => format!("<address {} out of range>", ip),
        }
    }
}
