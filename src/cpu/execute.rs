//! XSM execution engine.
//!
//! Implements the fetch-decode-execute cycle, the privilege checks and all
//! instruction behaviors. Traps and the post-execute clock tick live in
//! [`crate::cpu::interrupt`].

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use crate::console::{line_to_word, Console};
use crate::cpu::config::{ConfigError, Options};
use crate::cpu::debug::{DebugHook, MachineView, Resume};
use crate::cpu::decode::{self, AddrTerm, ArithOp, CmpOp, DecodeError, Instruction, MemRef, Operand, INSTRUCTION_SIZE};
use crate::cpu::device::{ConsoleRequest, Device, DeviceStatus, DiskOp, DiskRequest};
use crate::cpu::interrupt::{interrupt_address, ExceptionCause, InterruptLatch};
use crate::cpu::memory::{Memory, MemoryError, PageTable, NUM_PAGES, PAGE_SIZE};
use crate::cpu::registers::{RegId, Registers, NUM_GENERAL};
use crate::storage::{BlockStorage, StorageError, NUM_BLOCKS};
use crate::word::{cipher, Word, WordError};

/// Privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Physical addressing, all instructions allowed.
    Kernel,
    /// Translated addressing, privileged instructions fault.
    User,
}

/// Machine execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// Machine is running normally.
    Running,
    /// Machine has halted (executed HALT, or stopped from the debugger).
    Halted,
    /// Machine hit a fault in kernel mode.
    Error,
}

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The instruction completed.
    Executed(Instruction),
    /// The instruction faulted in user mode and the exception handler was entered.
    Exception(Fault),
}

/// The XSM machine.
pub struct Machine<S: BlockStorage, C: Console> {
    /// Register file.
    pub regs: Registers,
    /// Physical memory.
    pub mem: Memory,
    /// Current privilege level.
    pub mode: Mode,
    /// Current execution state.
    pub state: MachineState,
    /// Instruction count.
    pub cycles: u64,
    pub(crate) options: Options,
    pub(crate) timer: u32,
    pub(crate) disk: Device<DiskRequest>,
    pub(crate) console_device: Device<ConsoleRequest>,
    pub(crate) pending: InterruptLatch,
    pub(crate) storage: S,
    pub(crate) console: C,
    debugging: bool,
}

impl<S: BlockStorage, C: Console> Machine<S, C> {
    /// Create a machine in kernel mode with empty registers and memory.
    pub fn new(options: Options, storage: S, console: C) -> Result<Self, MachineError> {
        options.validate()?;
        Ok(Self {
            regs: Registers::new(),
            mem: Memory::new(),
            mode: Mode::Kernel,
            state: MachineState::Running,
            cycles: 0,
            options,
            timer: options.timer,
            disk: Device::new(),
            console_device: Device::new(),
            pending: InterruptLatch::default(),
            storage,
            console,
            debugging: false,
        })
    }

    /// Clear the machine, load the boot block into page 0 and start in
    /// kernel mode at address 0.
    pub fn boot(&mut self) -> Result<(), MachineError> {
        self.mem.clear();
        self.regs.reset();
        let page = self.mem.get_page_mut(0)?;
        self.storage.read_block(0, page)?;

        self.regs.set_int(RegId::IP, 0)?;
        self.mode = Mode::Kernel;
        self.state = MachineState::Running;
        self.cycles = 0;
        self.timer = self.options.timer;
        self.disk.clear();
        self.console_device.clear();
        self.pending = InterruptLatch::default();
        self.debugging = false;

        log::info!("booted from block 0");
        Ok(())
    }

    /// Copy words into physical memory.
    pub fn load_program(&mut self, start: i64, words: &[Word]) -> Result<(), MachineError> {
        self.mem.load_words(start, words)?;
        Ok(())
    }

    /// Execute a single instruction and run the post-execute phase.
    pub fn step(&mut self) -> Result<Step, MachineError> {
        if self.state != MachineState::Running {
            return Err(MachineError::NotRunning(self.state));
        }

        let ip = self.regs.int(RegId::IP);
        let outcome = self.fetch(ip).and_then(|(first, second)| {
            // Advance IP before decode (jumps will override)
            self.regs.set_int(RegId::IP, ip + INSTRUCTION_SIZE as i64)?;
            let instr = decode::decode_slot(&first, &second)?;
            self.check_privilege(&instr)?;
            log::trace!("{:>6} {:?} {}", ip, self.mode, instr);
            self.execute(&instr)?;
            Ok(instr)
        });
        self.cycles += 1;

        match outcome {
            Ok(instr) => {
                if self.state == MachineState::Running {
                    self.post_execute()?;
                }
                Ok(Step::Executed(instr))
            }
            Err(fault) => self.handle_fault(ip, fault),
        }
    }

    /// Run until halt, stopping in the debugger whenever debugging is active.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self, hook: &mut dyn DebugHook) -> Result<u64, MachineError> {
        self.run_limited(u64::MAX, hook)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64, hook: &mut dyn DebugHook) -> Result<u64, MachineError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == MachineState::Running && self.cycles < limit {
            if self.debugging {
                match hook.pause(&self.view()) {
                    Resume::Step => {}
                    Resume::Continue => self.debugging = false,
                    Resume::Halt => {
                        log::info!("halted from debugger at {}", self.regs.int(RegId::IP));
                        self.state = MachineState::Halted;
                        break;
                    }
                }
            }
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    fn handle_fault(&mut self, ip: i64, fault: Fault) -> Result<Step, MachineError> {
        log::error!("fault at {} in {:?} mode: {}", ip, self.mode, fault);

        match self.mode {
            Mode::User => {
                self.raise_exception(ip, &fault)?;
                self.post_execute()?;
                Ok(Step::Exception(fault))
            }
            Mode::Kernel => {
                self.state = MachineState::Error;
                Err(MachineError::KernelFault { ip, fault })
            }
        }
    }

    fn fetch(&self, ip: i64) -> Result<(Word, Word), Fault> {
        let first = self.mem.get_word(ip).map_err(|e| Fault::from_memory(e, ip))?;
        let next = ip + 1;
        let second = self.mem.get_word(next).map_err(|e| Fault::from_memory(e, next))?;
        Ok((first.clone(), second.clone()))
    }

    fn check_privilege(&self, instr: &Instruction) -> Result<(), Fault> {
        if self.mode == Mode::Kernel {
            return Ok(());
        }

        let opcode = instr.opcode();
        if opcode.is_privileged() {
            return Err(Fault::IllegalInstruction(format!("{} in user mode", opcode.mnemonic())));
        }
        if let Some(reg) = instr.registers().into_iter().find(|reg| !reg.user_accessible()) {
            return Err(Fault::IllegalInstruction(format!("register {} in user mode", reg)));
        }
        Ok(())
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: &Instruction) -> Result<(), Fault> {
        match instr {
            // ==================== Data movement ====================

            Instruction::Mov { dest, src } => {
                let value = self.read(src)?;
                match dest {
                    Operand::Reg(reg) => self.regs.set_word(*reg, &value),
                    Operand::Mem(mem) => {
                        let addr = self.address(mem);
                        self.store(addr, &value)?;
                    }
                    Operand::Int(_) | Operand::Str(_) => {
                        return Err(Fault::MalformedOperand(dest.to_string()));
                    }
                }
            }

            Instruction::Port { dest, src } => {
                let value = self.regs.word(*src).clone();
                self.regs.set_word(*dest, &value);
            }

            // ==================== Arithmetic ====================

            Instruction::Arith { op, dest, src } => {
                let lhs = integer_of(self.regs.word(*dest))?;
                let rhs = integer_of(&self.read(src)?)?;
                // Saturated results never fit in a word, so overflow surfaces on store.
                let result = match op {
                    ArithOp::Add => lhs.saturating_add(rhs),
                    ArithOp::Sub => lhs.saturating_sub(rhs),
                    ArithOp::Mul => lhs.saturating_mul(rhs),
                    ArithOp::Div => lhs.checked_div(rhs).ok_or(Fault::DivisionByZero)?,
                    ArithOp::Mod => lhs.checked_rem(rhs).ok_or(Fault::DivisionByZero)?,
                };
                self.regs.set_int(*dest, result)?;
            }

            Instruction::Inr(reg) => {
                let value = integer_of(self.regs.word(*reg))?;
                self.regs.set_int(*reg, value.saturating_add(1))?;
            }

            Instruction::Dcr(reg) => {
                let value = integer_of(self.regs.word(*reg))?;
                self.regs.set_int(*reg, value.saturating_sub(1))?;
            }

            Instruction::Cmp { op, dest, src } => {
                let rhs = self.read(src)?;
                let ordering = self.regs.word(*dest).compare(&rhs);
                let holds = match op {
                    CmpOp::Lt => ordering.is_lt(),
                    CmpOp::Gt => ordering.is_gt(),
                    CmpOp::Eq => ordering.is_eq(),
                    CmpOp::Ne => ordering.is_ne(),
                    CmpOp::Ge => ordering.is_ge(),
                    CmpOp::Le => ordering.is_le(),
                };
                self.regs.set_int(*dest, i64::from(holds))?;
            }

            // ==================== Control transfer ====================

            Instruction::Jz { test, target } => {
                if is_zero(self.regs.word(*test)) {
                    self.jump(target)?;
                }
            }

            Instruction::Jnz { test, target } => {
                if !is_zero(self.regs.word(*test)) {
                    self.jump(target)?;
                }
            }

            Instruction::Jmp { target } => self.jump(target)?,

            Instruction::Push(reg) => {
                let value = self.regs.word(*reg).clone();
                self.push_word(&value)?;
            }

            Instruction::Pop(reg) => {
                let value = self.pop_word()?;
                self.regs.set_word(*reg, &value);
            }

            Instruction::Call { target } => {
                let addr = self.jump_target(target)?;
                let ret = self.regs.word(RegId::IP).clone();
                self.push_word(&ret)?;
                self.regs.set_int(RegId::IP, addr)?;
            }

            Instruction::Ret => {
                let ret = self.pop_word()?;
                self.regs.set_word(RegId::IP, &ret);
            }

            Instruction::Backup => {
                for reg in context_registers() {
                    let value = self.regs.word(reg).clone();
                    self.push_word(&value)?;
                }
            }

            Instruction::Restore => {
                for reg in context_registers().rev() {
                    let value = self.pop_word()?;
                    self.regs.set_word(reg, &value);
                }
            }

            Instruction::Int(n) => {
                let vector = interrupt_address(*n)
                    .ok_or_else(|| Fault::MalformedOperand(format!("interrupt {}", n)))?;
                self.trap(vector)?;
            }

            Instruction::Iret => self.iret()?,

            // ==================== Devices ====================

            Instruction::Loadi { page, block } => {
                let (page, block) = self.transfer_args(page, block)?;
                let start = (page * PAGE_SIZE) as i64;
                let frame = self.mem.get_page_mut(page).map_err(|e| Fault::from_memory(e, start))?;
                self.storage.read_block(block, frame)?;
            }

            Instruction::Load { page, block } => {
                let (page, block) = self.transfer_args(page, block)?;
                self.issue_disk(DiskRequest { op: DiskOp::Load, page, block });
            }

            Instruction::Store { page, block } => {
                let (page, block) = self.transfer_args(page, block)?;
                self.issue_disk(DiskRequest { op: DiskOp::Store, page, block });
            }

            Instruction::Encrypt(reg) => cipher::encrypt(self.regs.word_mut(*reg)),

            Instruction::In(reg) => self.issue_console(ConsoleRequest::Read { target: *reg }),

            Instruction::Ini(reg) => {
                let line = self.console.read_line().map_err(|e| Fault::Device(e.to_string()))?;
                self.regs.set_word(*reg, &line_to_word(&line));
            }

            Instruction::Out(reg) => {
                let text = self.regs.word(*reg).as_string();
                self.issue_console(ConsoleRequest::Print { text });
            }

            // ==================== Special ====================

            Instruction::Brkp => {
                if self.options.debug {
                    log::info!("breakpoint at {}", self.regs.int(RegId::IP) - INSTRUCTION_SIZE as i64);
                    self.debugging = true;
                }
            }

            Instruction::Halt => {
                log::info!("halted after {} instructions", self.cycles + 1);
                self.state = MachineState::Halted;
            }
        }

        Ok(())
    }

    // ==================================================================
    // Addressing
    // ==================================================================

    /// The page table described by `PTBR` and `PTLR`.
    pub fn page_table(&self) -> PageTable {
        PageTable {
            base: self.regs.int(RegId::PTBR),
            length: self.regs.int(RegId::PTLR),
        }
    }

    /// Map an address in the current mode to a physical address.
    fn translate(&self, vaddr: i64, for_write: bool) -> Result<i64, Fault> {
        match self.mode {
            Mode::Kernel if Memory::is_valid_address(vaddr) => Ok(vaddr),
            Mode::Kernel => Err(Fault::OutOfRange(vaddr)),
            Mode::User => self.translate_user(vaddr, for_write),
        }
    }

    fn translate_user(&self, vaddr: i64, for_write: bool) -> Result<i64, Fault> {
        self.mem
            .translate(self.page_table(), vaddr, for_write)
            .map_err(|e| Fault::from_memory(e, vaddr))
    }

    fn term(&self, term: AddrTerm) -> i64 {
        match term {
            AddrTerm::Reg(reg) => self.regs.int(reg),
            AddrTerm::Int(value) => value,
        }
    }

    fn address(&self, mem: &MemRef) -> i64 {
        let offset = mem.offset.map_or(0, |term| self.term(term));
        self.term(mem.base).saturating_add(offset)
    }

    fn load(&self, vaddr: i64) -> Result<Word, Fault> {
        let addr = self.translate(vaddr, false)?;
        let word = self.mem.get_word(addr).map_err(|e| Fault::from_memory(e, vaddr))?;
        Ok(word.clone())
    }

    fn store(&mut self, vaddr: i64, value: &Word) -> Result<(), Fault> {
        let addr = self.translate(vaddr, true)?;
        let word = self.mem.get_word_mut(addr).map_err(|e| Fault::from_memory(e, vaddr))?;
        word.copy_from(value);
        Ok(())
    }

    /// Value of a source operand.
    fn read(&self, operand: &Operand) -> Result<Word, Fault> {
        match operand {
            Operand::Reg(reg) => Ok(self.regs.word(*reg).clone()),
            Operand::Int(value) => Ok(Word::from_int(*value)?),
            Operand::Str(text) => {
                Word::from_text(text).map_err(|e| Fault::MalformedOperand(e.to_string()))
            }
            Operand::Mem(mem) => self.load(self.address(mem)),
        }
    }

    fn jump_target(&self, target: &Operand) -> Result<i64, Fault> {
        let vaddr = integer_of(&self.read(target)?)?;
        self.translate(vaddr, false)
    }

    fn jump(&mut self, target: &Operand) -> Result<(), Fault> {
        let addr = self.jump_target(target)?;
        self.regs.set_int(RegId::IP, addr)?;
        Ok(())
    }

    // ==================================================================
    // Stack
    // ==================================================================

    pub(crate) fn push_word(&mut self, value: &Word) -> Result<(), Fault> {
        let sp = self.regs.int(RegId::SP) + 1;
        self.store(sp, value)?;
        self.regs.set_int(RegId::SP, sp)?;
        Ok(())
    }

    fn pop_word(&mut self) -> Result<Word, Fault> {
        let sp = self.regs.int(RegId::SP);
        let value = self.load(sp)?;
        self.regs.set_int(RegId::SP, sp - 1)?;
        Ok(value)
    }

    /// Return from the kernel. The saved `IP` lives on the user stack.
    fn iret(&mut self) -> Result<(), Fault> {
        let sp = self.regs.int(RegId::SP);
        let addr = self.translate_user(sp, false)?;
        let ret = self.mem.get_word(addr).map_err(|e| Fault::from_memory(e, sp))?.clone();

        self.regs.set_int(RegId::SP, sp - 1)?;
        self.regs.set_word(RegId::IP, &ret);
        self.mode = Mode::User;
        Ok(())
    }

    // ==================================================================
    // Devices
    // ==================================================================

    fn transfer_args(&self, page: &Operand, block: &Operand) -> Result<(usize, usize), Fault> {
        let page = integer_of(&self.read(page)?)?;
        let block = integer_of(&self.read(block)?)?;

        if !(0..NUM_PAGES as i64).contains(&page) {
            return Err(Fault::MalformedOperand(format!("page {}", page)));
        }
        if !(0..NUM_BLOCKS as i64).contains(&block) {
            return Err(Fault::MalformedOperand(format!("block {}", block)));
        }
        Ok((page as usize, block as usize))
    }

    fn issue_disk(&mut self, request: DiskRequest) {
        if self.disk.issue(request, self.options.disk) {
            log::debug!("disk request issued: {}", request);
        } else {
            log::warn!("disk busy, dropping request: {}", request);
        }
    }

    fn issue_console(&mut self, request: ConsoleRequest) {
        let description = request.to_string();
        if self.console_device.issue(request, self.options.console) {
            log::debug!("console request issued: {}", description);
        } else {
            log::warn!("console busy, dropping request: {}", description);
        }
    }

    // ==================================================================
    // Inspection
    // ==================================================================

    /// Read-only view for debuggers.
    pub fn view(&self) -> MachineView<'_> {
        MachineView {
            regs: &self.regs,
            mem: &self.mem,
            mode: self.mode,
            state: self.state,
            cycles: self.cycles,
        }
    }

    /// Serializable summary of the machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            mode: self.mode,
            cycles: self.cycles,
            timer: self.timer,
            registers: self.regs.iter().map(|(name, word)| (name.to_string(), word.clone())).collect(),
            pending: self.pending,
            disk: self.disk.status(),
            console: self.console_device.status(),
            options: self.options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn disk_status(&self) -> DeviceStatus {
        self.disk.status()
    }

    pub fn console_status(&self) -> DeviceStatus {
        self.console_device.status()
    }

    pub fn pending_interrupts(&self) -> InterruptLatch {
        self.pending
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    /// Pause in the debugger before the next instruction.
    pub fn set_debugging(&mut self, on: bool) {
        self.debugging = on;
    }

    pub fn is_halted(&self) -> bool {
        self.state == MachineState::Halted
    }

    pub fn is_running(&self) -> bool {
        self.state == MachineState::Running
    }

    /// Flush and release the disk.
    pub fn shutdown(&mut self) -> Result<(), MachineError> {
        self.storage.close()?;
        Ok(())
    }
}

impl<S: BlockStorage, C: Console> fmt::Debug for Machine<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .field("pending", &self.pending)
            .finish()
    }
}

/// Registers saved by `BACKUP`, in push order.
fn context_registers() -> impl DoubleEndedIterator<Item = RegId> {
    [RegId::BP, RegId::PTBR, RegId::PTLR]
        .into_iter()
        .chain((0..NUM_GENERAL).map(RegId::general))
}

fn integer_of(word: &Word) -> Result<i64, Fault> {
    if word.is_integer() {
        Ok(word.as_integer())
    } else {
        Err(Fault::MalformedOperand(format!("{:?} is not an integer", word)))
    }
}

fn is_zero(word: &Word) -> bool {
    word.is_integer() && word.as_integer() == 0
}

/// Serializable machine state, as printed by `--dump-state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: MachineState,
    pub mode: Mode,
    pub cycles: u64,
    pub timer: u32,
    pub registers: Vec<(String, Word)>,
    pub pending: InterruptLatch,
    pub disk: DeviceStatus,
    pub console: DeviceStatus,
    pub options: Options,
}

/// Faults raised by a single instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("illegal instruction: {0}")]
    IllegalInstruction(String),

    #[error("malformed operand: {0}")]
    MalformedOperand(String),

    #[error("address {0} out of range")]
    OutOfRange(i64),

    #[error("page fault on page {page} at address {addr}")]
    PageFault { page: i64, addr: i64 },

    #[error("write to read-only page {page} at address {addr}")]
    ProtectionFault { page: i64, addr: i64 },

    #[error("unknown register {0:?}")]
    UnknownRegister(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow: {0}")]
    Overflow(#[from] WordError),

    #[error("device error: {0}")]
    Device(String),
}

impl Fault {
    /// Convert a memory error raised while accessing `addr`.
    pub fn from_memory(err: MemoryError, addr: i64) -> Self {
        match err {
            MemoryError::OutOfRange(a) => Fault::OutOfRange(a),
            MemoryError::PageOutOfRange(_) => Fault::OutOfRange(addr),
            MemoryError::PageFault { page } => Fault::PageFault { page, addr },
            MemoryError::ProtectionFault { page, addr } => Fault::ProtectionFault { page, addr },
        }
    }

    /// Exception cause reported in `EC`.
    pub fn cause(&self) -> ExceptionCause {
        match self {
            Fault::PageFault { .. } => ExceptionCause::PageFault,
            Fault::OutOfRange(_) | Fault::ProtectionFault { .. } => ExceptionCause::IllegalMemory,
            Fault::DivisionByZero | Fault::Overflow(_) => ExceptionCause::Arithmetic,
            Fault::IllegalInstruction(_)
            | Fault::MalformedOperand(_)
            | Fault::UnknownRegister(_)
            | Fault::Device(_) => ExceptionCause::IllegalInstruction,
        }
    }

    /// Virtual page involved in a paging fault.
    pub fn page(&self) -> Option<i64> {
        match self {
            Fault::PageFault { page, .. } | Fault::ProtectionFault { page, .. } => Some(*page),
            _ => None,
        }
    }

    /// Address involved in a memory fault.
    pub fn address(&self) -> Option<i64> {
        match self {
            Fault::PageFault { addr, .. } | Fault::ProtectionFault { addr, .. } => Some(*addr),
            Fault::OutOfRange(addr) => Some(*addr),
            _ => None,
        }
    }
}

impl From<DecodeError> for Fault {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::IllegalInstruction(text) => Fault::IllegalInstruction(text),
            DecodeError::UnknownRegister(name) => Fault::UnknownRegister(name),
            other => Fault::MalformedOperand(other.to_string()),
        }
    }
}

impl From<StorageError> for Fault {
    fn from(err: StorageError) -> Self {
        Fault::Device(err.to_string())
    }
}

/// Errors that stop the machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    #[error("machine is not running ({0:?})")]
    NotRunning(MachineState),

    #[error("fault in kernel mode at {ip}: {fault}")]
    KernelFault { ip: i64, fault: Fault },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("console error: {0}")]
    Console(String),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Word(#[from] WordError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferConsole;
    use crate::cpu::interrupt::EXCEPTION_VECTOR;
    use crate::cpu::debug::NoDebugger;
    use crate::storage::{MemoryDisk, BLOCK_SIZE};

    type TestMachine = Machine<MemoryDisk, BufferConsole>;

    /// Physical address of the user program (virtual page 0 maps to frame 5).
    const USER_CODE: i64 = 5 * PAGE_SIZE as i64;

    fn machine_with(options: Options) -> TestMachine {
        Machine::new(options, MemoryDisk::new(), BufferConsole::new()).unwrap()
    }

    fn machine() -> TestMachine {
        machine_with(Options { timer: 0, ..Options::default() })
    }

    fn load(m: &mut TestMachine, start: i64, program: &[&str]) {
        let words: Vec<Word> = program
            .iter()
            .flat_map(|text| decode::encode(text).unwrap())
            .collect();
        m.load_program(start, &words).unwrap();
    }

    fn run(m: &mut TestMachine) -> Result<u64, MachineError> {
        m.run_limited(1000, &mut NoDebugger)
    }

    fn int(m: &TestMachine, name: &str) -> i64 {
        m.regs.get_integer(name).unwrap()
    }

    /// One-page address space at PTBR 1000 and a HALT at the exception vector.
    fn setup_user(m: &mut TestMachine) {
        m.mem.get_word_mut(1000).unwrap().store_integer(5).unwrap();
        m.mem.get_word_mut(1001).unwrap().store_string("011").unwrap();
        m.regs.set_int(RegId::PTBR, 1000).unwrap();
        m.regs.set_int(RegId::PTLR, 1).unwrap();
        m.regs.set_int(RegId::SP, 100).unwrap();
        load(m, EXCEPTION_VECTOR, &["HALT"]);
    }

    fn enter_user(m: &mut TestMachine) {
        m.mode = Mode::User;
        m.regs.set_int(RegId::IP, USER_CODE).unwrap();
    }

    #[test]
    fn test_halt() {
        let mut m = machine();
        load(&mut m, 0, &["HALT"]);
        assert_eq!(run(&mut m).unwrap(), 1);
        assert!(m.is_halted());
        assert_eq!(int(&m, "IP"), 2);
        assert_eq!(m.step().unwrap_err(), MachineError::NotRunning(MachineState::Halted));
    }

    #[test]
    fn test_div_mod() {
        let mut m = machine();
        load(&mut m, 0, &["MOV R0, 10", "MOV R1, 3", "MOV R2, R0", "DIV R2, R1", "MOD R0, R1", "HALT"]);
        run(&mut m).unwrap();
        assert_eq!(int(&m, "R2"), 3);
        assert_eq!(int(&m, "R0"), 1);
    }

    #[test]
    fn test_division_by_zero_in_kernel_is_fatal() {
        let mut m = machine();
        load(&mut m, 0, &["MOV R0, 1", "DIV R0, 0", "HALT"]);
        assert_eq!(
            run(&mut m).unwrap_err(),
            MachineError::KernelFault { ip: 2, fault: Fault::DivisionByZero }
        );
        assert_eq!(m.state, MachineState::Error);
    }

    #[test]
    fn test_arithmetic_overflow() {
        let mut m = machine();
        load(&mut m, 0, &["MOV R0, 9999999999999999", "MUL R0, 10", "HALT"]);
        let err = run(&mut m).unwrap_err();
        assert!(matches!(err, MachineError::KernelFault { fault: Fault::Overflow(_), .. }));
        assert_eq!(int(&m, "R0"), 9_999_999_999_999_999);
    }

    #[test]
    fn test_arithmetic_rejects_strings() {
        let mut m = machine();
        load(&mut m, 0, &["MOV R0, \"abc\"", "INR R0"]);
        let err = run(&mut m).unwrap_err();
        assert!(matches!(err, MachineError::KernelFault { fault: Fault::MalformedOperand(_), .. }));
    }

    #[test]
    fn test_comparisons() {
        let mut m = machine();
        load(&mut m, 0, &[
            "MOV R0, \"apple\"", "MOV R1, \"banana\"", "LT R0, R1",
            "MOV R2, 5", "GT R2, 3",
            "MOV R3, 5", "EQ R3, 6",
            "HALT",
        ]);
        run(&mut m).unwrap();
        assert_eq!(int(&m, "R0"), 1);
        assert_eq!(int(&m, "R2"), 1);
        assert_eq!(int(&m, "R3"), 0);
    }

    #[test]
    fn test_loop_with_jnz() {
        let mut m = machine();
        load(&mut m, 0, &["MOV R0, 3", "DCR R0", "JNZ R0, 2", "HALT"]);
        assert_eq!(run(&mut m).unwrap(), 8);
        assert_eq!(int(&m, "R0"), 0);
    }

    #[test]
    fn test_call_ret() {
        let mut m = machine();
        m.regs.set_int(RegId::SP, 200).unwrap();
        load(&mut m, 0, &["CALL 6", "HALT", "HALT", "MOV R0, 5", "RET"]);
        run(&mut m).unwrap();
        assert_eq!(int(&m, "R0"), 5);
        assert_eq!(int(&m, "SP"), 200);
        assert_eq!(int(&m, "IP"), 4);
        assert_eq!(m.mem.get_word(201).unwrap().as_integer(), 2);
    }

    #[test]
    fn test_stack_symmetry() {
        let mut m = machine();
        m.regs.set_int(RegId::SP, 1000).unwrap();
        load(&mut m, 0, &["MOV R0, \"hello\"", "PUSH R0", "POP R1", "HALT"]);
        run(&mut m).unwrap();
        assert_eq!(int(&m, "SP"), 1000);
        assert_eq!(m.regs.get_string("R1").unwrap(), "hello");
        assert_eq!(m.mem.get_word(1001).unwrap().as_string(), "hello");
    }

    #[test]
    fn test_context_symmetry() {
        let mut m = machine();
        let saved: Vec<RegId> = context_registers().collect();
        assert_eq!(saved.len(), 23);

        for (i, reg) in saved.iter().enumerate() {
            m.regs.set_int(*reg, 100 + i as i64).unwrap();
        }
        m.regs.set_int(RegId::SP, 3000).unwrap();

        let mut program = vec!["BACKUP".to_string()];
        program.extend(saved.iter().map(|reg| format!("MOV {}, -1", reg)));
        program.push("RESTORE".into());
        program.push("HALT".into());
        let program: Vec<&str> = program.iter().map(String::as_str).collect();
        load(&mut m, 0, &program);

        run(&mut m).unwrap();
        for (i, reg) in saved.iter().enumerate() {
            assert_eq!(m.regs.int(*reg), 100 + i as i64, "{}", reg);
        }
        assert_eq!(int(&m, "SP"), 3000);
    }

    #[test]
    fn test_kernel_access_is_physical() {
        let mut m = machine();
        setup_user(&mut m);
        load(&mut m, 0, &["MOV [3], 42", "HALT"]);
        run(&mut m).unwrap();
        assert_eq!(m.mem.get_word(3).unwrap().as_integer(), 42);
        assert!(m.mem.get_word(USER_CODE + 3).unwrap().is_empty());
    }

    #[test]
    fn test_user_access_translates() {
        let mut m = machine();
        setup_user(&mut m);
        load(&mut m, USER_CODE, &["MOV [300], 42", "MOV R1, [300]", "HALT"]);
        enter_user(&mut m);

        run(&mut m).unwrap();
        assert_eq!(m.mem.get_word(USER_CODE + 300).unwrap().as_integer(), 42);
        assert!(m.mem.get_word(300).unwrap().is_empty());
        assert_eq!(int(&m, "R1"), 42);

        // HALT is privileged: the exception handler ran instead.
        assert!(m.is_halted());
        assert_eq!(int(&m, "EC"), ExceptionCause::IllegalInstruction.code());
        assert_eq!(int(&m, "EIP"), USER_CODE + 4);
        assert_eq!(m.mode, Mode::Kernel);
    }

    #[test]
    fn test_page_fault_exception() {
        let mut m = machine();
        setup_user(&mut m);
        load(&mut m, USER_CODE, &["MOV R0, [600]"]);
        enter_user(&mut m);

        let step = m.step().unwrap();
        assert_eq!(step, Step::Exception(Fault::PageFault { page: 1, addr: 600 }));
        assert_eq!(int(&m, "EC"), 0);
        assert_eq!(int(&m, "EPN"), 1);
        assert_eq!(int(&m, "EMA"), 600);
        assert_eq!(int(&m, "EIP"), USER_CODE);
        assert_eq!(int(&m, "IP"), EXCEPTION_VECTOR);
        assert_eq!(int(&m, "SP"), 100);
    }

    #[test]
    fn test_user_cannot_name_kernel_registers() {
        let mut m = machine();
        setup_user(&mut m);
        load(&mut m, USER_CODE, &["MOV R0, PTBR"]);
        enter_user(&mut m);

        assert!(matches!(m.step().unwrap(), Step::Exception(Fault::IllegalInstruction(_))));
        assert!(m.regs.word(RegId::general(0)).is_empty());
    }

    #[test]
    fn test_software_interrupt() {
        let mut m = machine();
        setup_user(&mut m);
        load(&mut m, USER_CODE, &["INT 4"]);
        let vector = interrupt_address(4).unwrap();
        load(&mut m, vector, &["HALT"]);
        enter_user(&mut m);

        m.step().unwrap();
        assert_eq!(m.mode, Mode::Kernel);
        assert_eq!(int(&m, "IP"), 12 * PAGE_SIZE as i64);
        assert_eq!(int(&m, "SP"), 101);
        assert_eq!(m.mem.get_word(USER_CODE + 101).unwrap().as_integer(), USER_CODE + 2);

        run(&mut m).unwrap();
        assert!(m.is_halted());
    }

    #[test]
    fn test_bad_interrupt_number() {
        let mut m = machine();
        load(&mut m, 0, &["INT 19"]);
        assert!(matches!(
            run(&mut m).unwrap_err(),
            MachineError::KernelFault { fault: Fault::MalformedOperand(_), .. }
        ));
    }

    #[test]
    fn test_iret_enters_user_mode() {
        let mut m = machine();
        setup_user(&mut m);
        m.mem.get_word_mut(USER_CODE + 100).unwrap().store_integer(USER_CODE).unwrap();
        load(&mut m, 0, &["IRET"]);
        load(&mut m, USER_CODE, &["HALT"]);

        m.step().unwrap();
        assert_eq!(m.mode, Mode::User);
        assert_eq!(int(&m, "IP"), USER_CODE);
        assert_eq!(int(&m, "SP"), 99);
    }

    #[test]
    fn test_disk_latency() {
        let mut m = machine_with(Options { timer: 0, disk: 3, ..Options::default() });
        setup_user(&mut m);
        m.mem.get_word_mut(USER_CODE + 100).unwrap().store_integer(USER_CODE).unwrap();
        m.mem.get_word_mut(10 * PAGE_SIZE as i64).unwrap().store_string("saved").unwrap();
        load(&mut m, 0, &["STORE 10, 7", "IRET"]);
        load(&mut m, USER_CODE, &["MOV R0, 1", "MOV R0, 2", "MOV R0, 3", "MOV R0, 4"]);
        let vector = interrupt_address(1).unwrap();
        load(&mut m, vector, &["HALT"]);

        // STORE, IRET and two user instructions leave the device busy.
        for _ in 0..4 {
            m.step().unwrap();
            assert!(m.disk_status().busy);
        }
        assert_eq!(m.mode, Mode::User);
        assert!(m.storage().block(7).unwrap()[0].is_empty());

        m.step().unwrap();
        assert!(!m.disk_status().busy);
        assert_eq!(m.storage().block(7).unwrap()[0].as_string(), "saved");
        assert_eq!(m.mode, Mode::Kernel);
        assert_eq!(int(&m, "IP"), vector);
        assert_eq!(int(&m, "R0"), 3);
    }

    #[test]
    fn test_busy_disk_drops_request() {
        let mut m = machine_with(Options { timer: 0, disk: 5, ..Options::default() });
        load(&mut m, 0, &["LOAD 10, 3", "LOAD 11, 4", "HALT"]);
        run(&mut m).unwrap();
        assert_eq!(m.disk_status().request.as_deref(), Some("load block 3 into page 10"));
    }

    #[test]
    fn test_kernel_latches_interrupts() {
        let mut m = machine_with(Options { timer: 0, disk: 0, ..Options::default() });
        load(&mut m, 0, &["LOAD 10, 3", "MOV R0, R0", "MOV R0, R0", "HALT"]);
        run(&mut m).unwrap();
        assert!(m.pending_interrupts().disk);
        assert_eq!(m.mode, Mode::Kernel);
    }

    #[test]
    fn test_loadi() {
        let mut m = machine();
        let mut block = vec![Word::empty(); BLOCK_SIZE];
        block[0] = Word::from_text("boot").unwrap();
        block[9] = Word::from(99);
        m.storage.write_block(3, &block).unwrap();

        load(&mut m, 0, &["LOADI 10, 3", "HALT"]);
        run(&mut m).unwrap();
        let page = m.mem.get_page(10).unwrap();
        assert_eq!(page[0].as_string(), "boot");
        assert_eq!(page[9].as_integer(), 99);
    }

    #[test]
    fn test_loadi_rejects_bad_block() {
        let mut m = machine();
        load(&mut m, 0, &["LOADI 10, 512"]);
        assert!(matches!(
            run(&mut m).unwrap_err(),
            MachineError::KernelFault { fault: Fault::MalformedOperand(_), .. }
        ));
    }

    #[test]
    fn test_console_out_is_asynchronous() {
        let mut m = machine_with(Options { timer: 0, console: 1, ..Options::default() });
        load(&mut m, 0, &["MOV P0, \"hi\"", "OUT", "MOV P0, \"changed\"", "MOV R0, R0", "HALT"]);

        for _ in 0..3 {
            m.step().unwrap();
        }
        assert!(m.console().output().is_empty());
        m.step().unwrap();
        assert_eq!(m.console().output(), ["hi".to_string()]);
        assert!(m.pending_interrupts().console);
    }

    #[test]
    fn test_console_in_and_ini() {
        let mut m = Machine::new(
            Options { timer: 0, console: 0, ..Options::default() },
            MemoryDisk::new(),
            BufferConsole::with_input(["typed", "a line longer than one word"]),
        )
        .unwrap();
        load(&mut m, 0, &["INI R3", "IN R4", "MOV R0, R0", "HALT"]);
        run(&mut m).unwrap();
        assert_eq!(m.regs.get_string("R3").unwrap(), "typed");
        assert_eq!(m.regs.get_string("R4").unwrap(), "a line longer th");
    }

    #[test]
    fn test_port_and_encrypt() {
        let mut m = machine();
        load(&mut m, 0, &["MOV R0, \"abc\"", "PORT P1, R0", "ENCRYPT R0", "HALT"]);
        run(&mut m).unwrap();
        assert_eq!(m.regs.get_string("P1").unwrap(), "abc");
        assert_eq!(m.regs.get_string("R0").unwrap(), "nop");
    }

    #[test]
    fn test_timer_interrupt() {
        let mut m = machine_with(Options { timer: 2, ..Options::default() });
        setup_user(&mut m);
        load(&mut m, USER_CODE, &["MOV R0, 1", "MOV R0, 2", "MOV R0, 3"]);
        let vector = interrupt_address(0).unwrap();
        load(&mut m, vector, &["HALT"]);
        enter_user(&mut m);

        m.step().unwrap();
        assert_eq!(m.mode, Mode::User);
        m.step().unwrap();
        assert_eq!(m.mode, Mode::Kernel);
        assert_eq!(int(&m, "IP"), vector);
        assert_eq!(m.mem.get_word(USER_CODE + 101).unwrap().as_integer(), USER_CODE + 4);
    }

    #[test]
    fn test_illegal_instruction_in_kernel_is_fatal() {
        let mut m = machine();
        load(&mut m, 0, &["HALT"]);
        m.mem.get_word_mut(0).unwrap().store_string("FLY R0").unwrap();
        assert_eq!(
            run(&mut m).unwrap_err(),
            MachineError::KernelFault { ip: 0, fault: Fault::IllegalInstruction("FLY".into()) }
        );
    }

    #[test]
    fn test_boot_loads_block_zero() {
        let mut disk = MemoryDisk::new();
        let words: Vec<Word> = ["MOV R5, 7", "HALT"]
            .iter()
            .flat_map(|text| decode::encode(text).unwrap())
            .collect();
        disk.fill_block(0, &words).unwrap();

        let mut m = Machine::new(Options::default(), disk, BufferConsole::new()).unwrap();
        m.regs.set_int(RegId::IP, 400).unwrap();
        m.regs.set_int(RegId::general(3), 9).unwrap();
        m.mem.get_word_mut(3000).unwrap().store_string("stale").unwrap();
        m.boot().unwrap();
        assert_eq!(int(&m, "IP"), 0);
        assert!(m.regs.word(RegId::general(3)).is_empty());
        assert!(m.mem.get_word(3000).unwrap().is_empty());
        run(&mut m).unwrap();
        assert_eq!(int(&m, "R5"), 7);
    }

    #[test]
    fn test_add_sub_mul() {
        let mut m = machine();
        load(&mut m, 0, &[
            "MOV R0, 7", "ADD R0, 4",
            "MOV R1, 10", "SUB R1, R0",
            "MOV R2, -3", "MUL R2, R1",
            "HALT",
        ]);
        run(&mut m).unwrap();
        assert_eq!(int(&m, "R0"), 11);
        assert_eq!(int(&m, "R1"), -1);
        assert_eq!(int(&m, "R2"), 3);
    }

    #[test]
    fn test_jz_and_jmp() {
        let mut m = machine();
        load(&mut m, 0, &[
            "MOV R0, 0", "JZ R0, 8", "MOV R1, 1", "HALT",
            "MOV R2, 2", "JMP 14", "MOV R2, 3",
            "MOV R3, 5", "JZ R3, 6", "HALT",
        ]);
        run(&mut m).unwrap();
        assert!(m.regs.word(RegId::general(1)).is_empty());
        assert_eq!(int(&m, "R2"), 2);
        assert_eq!(int(&m, "IP"), 20);
    }

    #[test]
    fn test_ne_ge_le() {
        let mut m = machine();
        load(&mut m, 0, &[
            "MOV R0, 5", "NE R0, 5",
            "MOV R1, 5", "GE R1, 5",
            "MOV R2, 6", "LE R2, 5",
            "MOV R3, \"b\"", "MOV R4, \"a\"", "GE R3, R4",
            "HALT",
        ]);
        run(&mut m).unwrap();
        assert_eq!(int(&m, "R0"), 0);
        assert_eq!(int(&m, "R1"), 1);
        assert_eq!(int(&m, "R2"), 0);
        assert_eq!(int(&m, "R3"), 1);
    }

    #[test]
    fn test_user_write_to_read_only_page() {
        let mut m = machine();
        setup_user(&mut m);
        m.mem.get_word_mut(1001).unwrap().store_string("010").unwrap();
        load(&mut m, USER_CODE, &["MOV [3], 1"]);
        enter_user(&mut m);

        let step = m.step().unwrap();
        assert_eq!(step, Step::Exception(Fault::ProtectionFault { page: 0, addr: 3 }));
        assert_eq!(int(&m, "EC"), ExceptionCause::IllegalMemory.code());
        assert_eq!(int(&m, "EMA"), 3);
        assert_eq!(int(&m, "EIP"), USER_CODE);
        assert_eq!(int(&m, "IP"), EXCEPTION_VECTOR);
        assert_eq!(m.mode, Mode::Kernel);
        assert!(m.mem.get_word(USER_CODE + 3).unwrap().is_empty());
    }

    #[test]
    fn test_user_division_by_zero() {
        let mut m = machine();
        setup_user(&mut m);
        load(&mut m, USER_CODE, &["MOV R0, 7", "DIV R0, 0"]);
        enter_user(&mut m);

        m.step().unwrap();
        assert_eq!(m.step().unwrap(), Step::Exception(Fault::DivisionByZero));
        assert_eq!(int(&m, "EC"), ExceptionCause::Arithmetic.code());
        assert_eq!(int(&m, "EIP"), USER_CODE + 2);
        assert_eq!(int(&m, "IP"), EXCEPTION_VECTOR);
        assert_eq!(int(&m, "R0"), 7);
        assert_eq!(m.mode, Mode::Kernel);
    }

    #[test]
    fn test_console_failure_stops_machine() {
        let mut m = machine_with(Options { timer: 0, console: 0, ..Options::default() });
        load(&mut m, 0, &["IN R0", "MOV R1, 1", "MOV R1, 2", "HALT"]);

        assert!(matches!(run(&mut m).unwrap_err(), MachineError::Console(_)));
        assert_eq!(m.state, MachineState::Error);
        assert!(!m.console_status().busy);
        assert_eq!(int(&m, "R1"), 1);
        assert_eq!(m.step().unwrap_err(), MachineError::NotRunning(MachineState::Error));
    }

    struct Recorder {
        seen: Vec<i64>,
        answers: Vec<Resume>,
    }

    impl DebugHook for Recorder {
        fn pause(&mut self, view: &MachineView<'_>) -> Resume {
            self.seen.push(view.ip());
            if self.answers.is_empty() {
                Resume::Continue
            } else {
                self.answers.remove(0)
            }
        }
    }

    #[test]
    fn test_breakpoint_pauses_when_debugging() {
        let mut m = machine_with(Options { timer: 0, debug: true, ..Options::default() });
        load(&mut m, 0, &["BRKP", "MOV R0, 1", "MOV R1, 2", "HALT"]);

        let mut hook = Recorder { seen: Vec::new(), answers: vec![Resume::Step, Resume::Continue] };
        m.run(&mut hook).unwrap();
        assert_eq!(hook.seen, vec![2, 4]);
        assert!(m.is_halted());
    }

    #[test]
    fn test_breakpoint_ignored_without_debug() {
        let mut m = machine();
        load(&mut m, 0, &["BRKP", "HALT"]);
        let mut hook = Recorder { seen: Vec::new(), answers: Vec::new() };
        m.run(&mut hook).unwrap();
        assert!(hook.seen.is_empty());
    }

    #[test]
    fn test_debugger_halt() {
        let mut m = machine();
        load(&mut m, 0, &["MOV R0, 1", "HALT"]);
        m.set_debugging(true);
        let mut hook = Recorder { seen: Vec::new(), answers: vec![Resume::Halt] };
        m.run(&mut hook).unwrap();
        assert!(m.is_halted());
        assert!(m.regs.word(RegId::general(0)).is_empty());
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut m = machine();
        load(&mut m, 0, &["MOV R0, 4", "HALT"]);
        run(&mut m).unwrap();
        let json = serde_json::to_string(&m.snapshot()).unwrap();
        assert!(json.contains("\"state\":\"Halted\""));
        assert!(json.contains("\"mode\":\"Kernel\""));
        assert!(json.contains("[\"R0\",4]"));
    }
}
