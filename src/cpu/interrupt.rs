//! Traps, interrupts and exceptions.
//!
//! Software `INT`, device completions and timer expiry all enter the kernel
//! through [`Machine::trap`]: the current `IP` is pushed on the stack, the
//! machine switches to kernel mode and jumps to the vector. Exceptions do not
//! touch the stack; they record the faulting state in `EIP`, `EC`, `EPN` and
//! `EMA` and jump to [`EXCEPTION_VECTOR`].

use serde::{Serialize, Deserialize};
use crate::console::{line_to_word, Console};
use crate::cpu::device::{ConsoleRequest, DiskOp, DiskRequest};
use crate::cpu::execute::{Fault, Machine, MachineError, MachineState, Mode};
use crate::cpu::memory::PAGE_SIZE;
use crate::cpu::registers::RegId;
use crate::storage::BlockStorage;

/// Address of the exception handler.
pub const EXCEPTION_VECTOR: i64 = 2 * PAGE_SIZE as i64;

pub const TIMER_INTERRUPT: i64 = 0;
pub const DISK_INTERRUPT: i64 = 1;
pub const CONSOLE_INTERRUPT: i64 = 2;

/// Highest interrupt number.
pub const MAX_INTERRUPT: i64 = 18;

/// Handler address for interrupt `n`, or `None` if there is no such interrupt.
pub fn interrupt_address(n: i64) -> Option<i64> {
    if (0..=MAX_INTERRUPT).contains(&n) {
        Some((n * 2 + 4) * PAGE_SIZE as i64)
    } else {
        None
    }
}

/// Exception cause as stored in `EC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionCause {
    PageFault,
    IllegalInstruction,
    IllegalMemory,
    Arithmetic,
}

impl ExceptionCause {
    pub fn code(self) -> i64 {
        match self {
            ExceptionCause::PageFault => 0,
            ExceptionCause::IllegalInstruction => 1,
            ExceptionCause::IllegalMemory => 2,
            ExceptionCause::Arithmetic => 3,
        }
    }
}

/// Interrupts raised but not yet delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptLatch {
    pub disk: bool,
    pub console: bool,
    pub timer: bool,
}

impl InterruptLatch {
    /// Take the highest priority pending interrupt.
    pub fn take_next(&mut self) -> Option<i64> {
        if std::mem::take(&mut self.disk) {
            Some(DISK_INTERRUPT)
        } else if std::mem::take(&mut self.console) {
            Some(CONSOLE_INTERRUPT)
        } else if std::mem::take(&mut self.timer) {
            Some(TIMER_INTERRUPT)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.disk || self.console || self.timer)
    }
}

impl<S: BlockStorage, C: Console> Machine<S, C> {
    /// Enter the kernel at `vector`, saving `IP` on the current stack.
    pub(crate) fn trap(&mut self, vector: i64) -> Result<(), Fault> {
        let ip = self.regs.word(RegId::IP).clone();
        self.push_word(&ip)?;
        self.mode = Mode::Kernel;
        self.regs.set_int(RegId::IP, vector)?;
        Ok(())
    }

    /// Record a user-mode fault and enter the exception handler.
    pub(crate) fn raise_exception(&mut self, ip: i64, fault: &Fault) -> Result<(), MachineError> {
        let cause = fault.cause();
        log::debug!("exception at {}: {} (cause {:?})", ip, fault, cause);

        self.regs.set_int(RegId::EIP, ip)?;
        self.regs.set_int(RegId::EC, cause.code())?;
        if let Some(page) = fault.page() {
            self.regs.set_int(RegId::EPN, page)?;
        }
        if let Some(addr) = fault.address() {
            self.regs.set_int(RegId::EMA, addr)?;
        }

        self.mode = Mode::Kernel;
        self.regs.set_int(RegId::IP, EXCEPTION_VECTOR)?;
        Ok(())
    }

    // ==================================================================
    // Post-execute phase
    // ==================================================================

    /// Clock tick run after every instruction.
    ///
    /// A device that fails to complete its request stops the machine.
    pub(crate) fn post_execute(&mut self) -> Result<(), MachineError> {
        match self.clock_tick() {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("post-execute failed: {}", e);
                self.state = MachineState::Error;
                Err(e)
            }
        }
    }

    fn clock_tick(&mut self) -> Result<(), MachineError> {
        if self.mode == Mode::User && self.options.timer > 0 {
            self.timer = self.timer.saturating_sub(1);
            if self.timer == 0 {
                self.pending.timer = true;
                self.timer = self.options.timer;
            }
        }

        if let Some(request) = self.disk.tick() {
            self.complete_disk(request)?;
            self.pending.disk = true;
        }
        if let Some(request) = self.console_device.tick() {
            self.complete_console(request)?;
            self.pending.console = true;
        }

        if self.mode == Mode::User {
            if let Some(n) = self.pending.take_next() {
                self.deliver(n)?;
            }
        }
        Ok(())
    }

    fn deliver(&mut self, n: i64) -> Result<(), MachineError> {
        let Some(vector) = interrupt_address(n) else {
            return Ok(());
        };
        log::debug!("delivering interrupt {}", n);

        let ip = self.regs.int(RegId::IP);
        if let Err(fault) = self.trap(vector) {
            log::error!("fault while delivering interrupt {}: {}", n, fault);
            self.raise_exception(ip, &fault)?;
        }
        Ok(())
    }

    fn complete_disk(&mut self, request: DiskRequest) -> Result<(), MachineError> {
        log::debug!("disk: {}", request);
        match request.op {
            DiskOp::Load => {
                let page = self.mem.get_page_mut(request.page)?;
                self.storage.read_block(request.block, page)?;
            }
            DiskOp::Store => {
                let page = self.mem.get_page(request.page)?;
                self.storage.write_block(request.block, page)?;
            }
        }
        Ok(())
    }

    fn complete_console(&mut self, request: ConsoleRequest) -> Result<(), MachineError> {
        log::debug!("console: {}", request);
        match request {
            ConsoleRequest::Read { target } => {
                let line = self.console.read_line()
                    .map_err(|e| MachineError::Console(e.to_string()))?;
                self.regs.set_word(target, &line_to_word(&line));
            }
            ConsoleRequest::Print { text } => {
                self.console.write_line(&text)
                    .map_err(|e| MachineError::Console(e.to_string()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_address() {
        assert_eq!(interrupt_address(0), Some(4 * PAGE_SIZE as i64));
        assert_eq!(interrupt_address(4), Some(12 * PAGE_SIZE as i64));
        assert_eq!(interrupt_address(18), Some(40 * PAGE_SIZE as i64));
        assert_eq!(interrupt_address(-1), None);
        assert_eq!(interrupt_address(19), None);
    }

    #[test]
    fn test_latch_priority() {
        let mut latch = InterruptLatch { disk: true, console: true, timer: true };
        assert_eq!(latch.take_next(), Some(DISK_INTERRUPT));
        assert_eq!(latch.take_next(), Some(CONSOLE_INTERRUPT));
        assert_eq!(latch.take_next(), Some(TIMER_INTERRUPT));
        assert_eq!(latch.take_next(), None);
        assert!(latch.is_empty());
    }

    #[test]
    fn test_cause_codes() {
        assert_eq!(ExceptionCause::PageFault.code(), 0);
        assert_eq!(ExceptionCause::Arithmetic.code(), 3);
    }
}
