//! Line-oriented debugger.
//!
//! Prints the next instruction and reads commands until one of them resumes
//! the machine:
//!
//! | Command | Short | Effect |
//! |---|---|---|
//! | `step` | `s` | execute one instruction |
//! | `continue` | `c` | run until the next `BRKP` |
//! | `reg [name]` | `r` | show all registers, or one |
//! | `mem <page>` | `m` | show the used words of a page |
//! | `pagetable` | `pt` | show the active page table |
//! | `location` | `l` | show `IP` and the mode |
//! | `exit` | `e` | halt the machine |
//! | `help` | `h` | list commands |

use std::io::{self, BufRead, Write};
use crate::cpu::debug::{DebugHook, MachineView, Resume};
use crate::cpu::memory::PAGE_SIZE;

const HELP: &str = "\
step|s            execute one instruction
continue|c        leave the debugger until the next BRKP
reg|r [name]      show registers
mem|m <page>      show a memory page
pagetable|pt      show the page table
location|l        show IP and mode
exit|e            halt the machine
help|h            show this help";

/// Where debugger commands come from.
pub trait CommandSource {
    /// Read one command line. Returns 0 at end of input.
    fn read_command(&mut self, line: &mut String) -> io::Result<usize>;
}

impl<R: BufRead> CommandSource for R {
    fn read_command(&mut self, line: &mut String) -> io::Result<usize> {
        self.read_line(line)
    }
}

/// Standard input, locked only while a command is read so the console
/// device can share it.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinCommands;

impl CommandSource for StdinCommands {
    fn read_command(&mut self, line: &mut String) -> io::Result<usize> {
        io::stdin().read_line(line)
    }
}

/// Debugger reading commands from `input` and writing to `output`.
pub struct ConsoleDebugger<R, W> {
    input: R,
    output: W,
}

impl ConsoleDebugger<StdinCommands, io::Stdout> {
    /// Debugger on the process's standard streams.
    pub fn stdio() -> Self {
        Self::new(StdinCommands, io::stdout())
    }
}

impl<R: CommandSource, W: Write> ConsoleDebugger<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn session(&mut self, view: &MachineView<'_>) -> io::Result<Resume> {
        writeln!(self.output, "Next instruction to execute: {}", view.next_instruction())?;

        loop {
            write!(self.output, "debug> ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_command(&mut line)? == 0 {
                return Ok(Resume::Halt);
            }
            if let Some(resume) = self.command(line.trim(), view)? {
                return Ok(resume);
            }
        }
    }

    /// Run one command. Returns a decision if the command resumes the machine.
    fn command(&mut self, line: &str, view: &MachineView<'_>) -> io::Result<Option<Resume>> {
        let mut args = line.split_whitespace();
        let Some(cmd) = args.next() else {
            return Ok(None);
        };

        match cmd {
            "step" | "s" => return Ok(Some(Resume::Step)),
            "continue" | "c" => return Ok(Some(Resume::Continue)),
            "exit" | "e" => return Ok(Some(Resume::Halt)),
            "reg" | "r" => match args.next() {
                Some(name) => match view.register(name) {
                    Some(word) => writeln!(self.output, "{}: {}", name.to_uppercase(), word)?,
                    None => writeln!(self.output, "unknown register {}", name)?,
                },
                None => self.show_registers(view)?,
            },
            "mem" | "m" => match args.next().and_then(|arg| arg.parse::<usize>().ok()) {
                Some(page) => self.show_page(view, page)?,
                None => writeln!(self.output, "usage: mem <page>")?,
            },
            "pagetable" | "pt" => self.show_page_table(view)?,
            "location" | "l" => writeln!(self.output, "IP = {} ({:?} mode)", view.ip(), view.mode())?,
            "help" | "h" => writeln!(self.output, "{}", HELP)?,
            other => writeln!(self.output, "unknown command {}; type help", other)?,
        }
        Ok(None)
    }

    fn show_registers(&mut self, view: &MachineView<'_>) -> io::Result<()> {
        for (i, (name, word)) in view.registers().iter().enumerate() {
            write!(self.output, "{:>5}: {:<17}", name, word.to_string())?;
            if i % 4 == 3 {
                writeln!(self.output)?;
            }
        }
        writeln!(self.output)
    }

    fn show_page(&mut self, view: &MachineView<'_>, page: usize) -> io::Result<()> {
        let Some(words) = view.page(page) else {
            return writeln!(self.output, "no page {}", page);
        };
        let base = page * PAGE_SIZE;
        for (offset, word) in words.iter().enumerate().filter(|(_, word)| !word.is_empty()) {
            writeln!(self.output, "{:05}: {}", base + offset, word)?;
        }
        Ok(())
    }

    fn show_page_table(&mut self, view: &MachineView<'_>) -> io::Result<()> {
        let table = view.page_table();
        writeln!(self.output, "PTBR = {}, PTLR = {}", table.base, table.length)?;
        for (page, entry) in view.page_entries() {
            writeln!(self.output, "{:>3}: frame {:>3} flags {}", page, entry.frame, entry.flags)?;
        }
        Ok(())
    }
}

impl<R: CommandSource, W: Write> DebugHook for ConsoleDebugger<R, W> {
    fn pause(&mut self, view: &MachineView<'_>) -> Resume {
        self.session(view).unwrap_or_else(|e| {
            log::error!("debugger I/O error: {}", e);
            Resume::Halt
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferConsole;
    use crate::cpu::{Machine, Options, RegId};
    use crate::image::Listing;
    use crate::storage::MemoryDisk;

    fn machine(source: &str) -> Machine<MemoryDisk, BufferConsole> {
        let options = Options { timer: 0, debug: true, ..Options::default() };
        let mut m = Machine::new(options, MemoryDisk::new(), BufferConsole::new()).unwrap();
        m.load_program(0, &Listing::parse(source).unwrap().words()).unwrap();
        m
    }

    fn session(m: &mut Machine<MemoryDisk, BufferConsole>, commands: &str) -> String {
        let mut debugger = ConsoleDebugger::new(commands.as_bytes(), Vec::new());
        m.run_limited(100, &mut debugger).unwrap();
        String::from_utf8(debugger.into_output()).unwrap()
    }

    #[test]
    fn test_step_and_inspect() {
        let mut m = machine("BRKP\nMOV R0, 7\nMOV R1, 8\nHALT");
        let out = session(&mut m, "s\nr r0\nl\nc\n");

        assert!(out.contains("Next instruction to execute: MOV R0, 7"));
        assert!(out.contains("Next instruction to execute: MOV R1, 8"));
        assert!(out.contains("R0: 7"));
        assert!(out.contains("IP = 4 (Kernel mode)"));
        assert!(m.is_halted());
        assert_eq!(m.regs.int(RegId::general(1)), 8);
    }

    #[test]
    fn test_exit_halts() {
        let mut m = machine("BRKP\nMOV R0, 7\nHALT");
        session(&mut m, "exit\n");
        assert!(m.is_halted());
        assert!(m.regs.word(RegId::general(0)).is_empty());
    }

    #[test]
    fn test_end_of_input_halts() {
        let mut m = machine("BRKP\nMOV R0, 7\nHALT");
        session(&mut m, "");
        assert!(m.regs.word(RegId::general(0)).is_empty());
    }

    #[test]
    fn test_memory_and_page_table() {
        let mut m = machine("BRKP\nHALT");
        m.regs.set_int(RegId::PTBR, 100).unwrap();
        m.regs.set_int(RegId::PTLR, 1).unwrap();
        m.mem.get_word_mut(100).unwrap().store_integer(9).unwrap();
        m.mem.get_word_mut(101).unwrap().store_string("0110").unwrap();

        let out = session(&mut m, "m 0\npt\nbogus\nc\n");
        assert!(out.contains("00000: BRKP"));
        assert!(out.contains("PTBR = 100, PTLR = 1"));
        assert!(out.contains("  0: frame   9 flags 0110"));
        assert!(out.contains("unknown command bogus"));
    }
}
