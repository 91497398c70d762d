//! Instruction decoder for XSM.
//!
//! Instructions live in memory as text, two words per instruction slot. The
//! slot text is split into tokens and decoded once per fetch into an
//! [`Instruction`] whose operands are fully resolved, so the execute stage
//! never touches the token stream.

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use crate::cpu::registers::RegId;
use crate::word::{Word, WordError};

/// Words per instruction slot.
pub const INSTRUCTION_SIZE: usize = 2;

// ============================================================================
// Tokens
// ============================================================================

/// A lexical token of instruction text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// The instruction mnemonic (always the first identifier).
    Keyword(String),
    /// Any later identifier.
    Register(String),
    Integer(i64),
    Str(String),
    Comma,
    OpenBracket,
    CloseBracket,
    Plus,
}

/// Split instruction text into tokens.
pub fn tokenize(text: &str) -> Result<Vec<Token>, DecodeError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '[' => {
                chars.next();
                tokens.push(Token::OpenBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::CloseBracket);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '"' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, ch)) => literal.push(ch),
                        None => return Err(DecodeError::UnterminatedString(text.to_string())),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            '-' | '0'..='9' => {
                chars.next();
                let mut end = start + c.len_utf8();
                while let Some(&(i, ch)) = chars.peek() {
                    if !ch.is_ascii_digit() {
                        break;
                    }
                    end = i + ch.len_utf8();
                    chars.next();
                }
                let literal = &text[start..end];
                let value = literal
                    .parse::<i64>()
                    .map_err(|_| DecodeError::BadLiteral(literal.to_string()))?;
                tokens.push(Token::Integer(value));
            }
            c if c.is_ascii_alphabetic() => {
                let mut end = start;
                while let Some(&(i, ch)) = chars.peek() {
                    if !ch.is_ascii_alphanumeric() {
                        break;
                    }
                    end = i + ch.len_utf8();
                    chars.next();
                }
                let ident = text[start..end].to_string();
                if tokens.is_empty() {
                    tokens.push(Token::Keyword(ident));
                } else {
                    tokens.push(Token::Register(ident));
                }
            }
            other => return Err(DecodeError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

/// A token stream with one token of lookahead.
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect(&mut self, wanted: Token, what: &'static str) -> Result<(), DecodeError> {
        match self.next() {
            Some(token) if token == wanted => Ok(()),
            found => Err(DecodeError::malformed(what, found)),
        }
    }

    fn comma(&mut self) -> Result<(), DecodeError> {
        self.expect(Token::Comma, "','")
    }

    fn register(&mut self) -> Result<RegId, DecodeError> {
        match self.next() {
            Some(Token::Register(name)) => RegId::parse(&name).ok_or(DecodeError::UnknownRegister(name)),
            found => Err(DecodeError::malformed("register", found)),
        }
    }

    fn integer(&mut self) -> Result<i64, DecodeError> {
        match self.next() {
            Some(Token::Integer(value)) => Ok(value),
            found => Err(DecodeError::malformed("integer", found)),
        }
    }

    fn term(&mut self) -> Result<AddrTerm, DecodeError> {
        let token = self.next();
        term_from(token, "register or integer")
    }

    fn mem_ref(&mut self) -> Result<MemRef, DecodeError> {
        self.expect(Token::OpenBracket, "'['")?;
        let base = self.term()?;
        let offset = if self.peek() == Some(&Token::Plus) {
            self.next();
            Some(self.term()?)
        } else {
            None
        };
        self.expect(Token::CloseBracket, "']'")?;
        Ok(MemRef { base, offset })
    }

    /// Any operand form, disambiguated by the next token.
    fn operand(&mut self) -> Result<Operand, DecodeError> {
        if self.peek() == Some(&Token::OpenBracket) {
            return Ok(Operand::Mem(self.mem_ref()?));
        }
        match self.next() {
            Some(Token::Str(text)) => Ok(Operand::Str(text)),
            token => Ok(term_from(token, "operand")?.into()),
        }
    }

    /// A register or an integer literal.
    fn value(&mut self) -> Result<Operand, DecodeError> {
        Ok(self.term()?.into())
    }

    fn optional_register(&mut self, default: RegId) -> Result<RegId, DecodeError> {
        if self.is_empty() {
            Ok(default)
        } else {
            self.register()
        }
    }

    fn finish(&self) -> Result<(), DecodeError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(DecodeError::TrailingToken(format!("{:?}", token))),
        }
    }
}

fn term_from(token: Option<Token>, what: &'static str) -> Result<AddrTerm, DecodeError> {
    match token {
        Some(Token::Register(name)) => RegId::parse(&name)
            .map(AddrTerm::Reg)
            .ok_or(DecodeError::UnknownRegister(name)),
        Some(Token::Integer(value)) => Ok(AddrTerm::Int(value)),
        found => Err(DecodeError::malformed(what, found)),
    }
}

// ============================================================================
// Opcodes
// ============================================================================

/// Operation codes, in the machine's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Mov, Add, Sub, Mul, Div, Mod, Inr, Dcr,
    Lt, Gt, Eq, Ne, Ge, Le,
    Jz, Jnz, Jmp, Push, Pop, Call, Ret, Brkp, Int,
    Loadi, Load, Store, Encrypt, Backup, Restore,
    Port, In, Ini, Out, Iret, Halt,
}

impl Opcode {
    const ALL: [(Opcode, &'static str); 35] = [
        (Opcode::Mov, "MOV"), (Opcode::Add, "ADD"), (Opcode::Sub, "SUB"),
        (Opcode::Mul, "MUL"), (Opcode::Div, "DIV"), (Opcode::Mod, "MOD"),
        (Opcode::Inr, "INR"), (Opcode::Dcr, "DCR"),
        (Opcode::Lt, "LT"), (Opcode::Gt, "GT"), (Opcode::Eq, "EQ"),
        (Opcode::Ne, "NE"), (Opcode::Ge, "GE"), (Opcode::Le, "LE"),
        (Opcode::Jz, "JZ"), (Opcode::Jnz, "JNZ"), (Opcode::Jmp, "JMP"),
        (Opcode::Push, "PUSH"), (Opcode::Pop, "POP"),
        (Opcode::Call, "CALL"), (Opcode::Ret, "RET"),
        (Opcode::Brkp, "BRKP"), (Opcode::Int, "INT"),
        (Opcode::Loadi, "LOADI"), (Opcode::Load, "LOAD"), (Opcode::Store, "STORE"),
        (Opcode::Encrypt, "ENCRYPT"), (Opcode::Backup, "BACKUP"), (Opcode::Restore, "RESTORE"),
        (Opcode::Port, "PORT"), (Opcode::In, "IN"), (Opcode::Ini, "INI"),
        (Opcode::Out, "OUT"), (Opcode::Iret, "IRET"), (Opcode::Halt, "HALT"),
    ];

    /// Look up a mnemonic, ignoring case.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(keyword))
            .map(|(op, _)| *op)
    }

    pub fn mnemonic(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, name)| *name)
            .unwrap_or("???")
    }

    /// Instructions that may only run in kernel mode.
    pub fn is_privileged(self) -> bool {
        matches!(
            self,
            Opcode::Port
                | Opcode::Loadi
                | Opcode::Load
                | Opcode::Store
                | Opcode::Encrypt
                | Opcode::Backup
                | Opcode::Restore
                | Opcode::In
                | Opcode::Ini
                | Opcode::Out
                | Opcode::Iret
                | Opcode::Halt
        )
    }
}

// ============================================================================
// Operands and instructions
// ============================================================================

/// One side of a `[base+offset]` address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddrTerm {
    Reg(RegId),
    Int(i64),
}

/// A dereferenced memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemRef {
    pub base: AddrTerm,
    pub offset: Option<AddrTerm>,
}

/// A resolved operand descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Reg(RegId),
    Int(i64),
    Str(String),
    Mem(MemRef),
}

impl From<AddrTerm> for Operand {
    fn from(term: AddrTerm) -> Self {
        match term {
            AddrTerm::Reg(reg) => Operand::Reg(reg),
            AddrTerm::Int(value) => Operand::Int(value),
        }
    }
}

/// Binary arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Lt,
    Gt,
    Eq,
    Ne,
    Ge,
    Le,
}

/// A fully decoded XSM instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Data movement ====================

    /// dest := src (register or memory destination)
    Mov { dest: Operand, src: Operand },
    /// Copy between a port register and another register
    Port { dest: RegId, src: RegId },

    // ==================== Arithmetic ====================

    Arith { op: ArithOp, dest: RegId, src: Operand },
    Inr(RegId),
    Dcr(RegId),
    Cmp { op: CmpOp, dest: RegId, src: Operand },

    // ==================== Control transfer ====================

    Jz { test: RegId, target: Operand },
    Jnz { test: RegId, target: Operand },
    Jmp { target: Operand },
    Push(RegId),
    Pop(RegId),
    Call { target: Operand },
    Ret,
    Backup,
    Restore,
    Int(i64),
    Iret,

    // ==================== Devices ====================

    /// Synchronous block load: page := block
    Loadi { page: Operand, block: Operand },
    /// Asynchronous block load
    Load { page: Operand, block: Operand },
    /// Asynchronous block store: block := page
    Store { page: Operand, block: Operand },
    Encrypt(RegId),
    /// Asynchronous console read into a register
    In(RegId),
    /// Synchronous console read into a register
    Ini(RegId),
    /// Asynchronous console print of a register
    Out(RegId),

    // ==================== Special ====================

    Brkp,
    Halt,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Mov { .. } => Opcode::Mov,
            Instruction::Port { .. } => Opcode::Port,
            Instruction::Arith { op, .. } => match op {
                ArithOp::Add => Opcode::Add,
                ArithOp::Sub => Opcode::Sub,
                ArithOp::Mul => Opcode::Mul,
                ArithOp::Div => Opcode::Div,
                ArithOp::Mod => Opcode::Mod,
            },
            Instruction::Inr(_) => Opcode::Inr,
            Instruction::Dcr(_) => Opcode::Dcr,
            Instruction::Cmp { op, .. } => match op {
                CmpOp::Lt => Opcode::Lt,
                CmpOp::Gt => Opcode::Gt,
                CmpOp::Eq => Opcode::Eq,
                CmpOp::Ne => Opcode::Ne,
                CmpOp::Ge => Opcode::Ge,
                CmpOp::Le => Opcode::Le,
            },
            Instruction::Jz { .. } => Opcode::Jz,
            Instruction::Jnz { .. } => Opcode::Jnz,
            Instruction::Jmp { .. } => Opcode::Jmp,
            Instruction::Push(_) => Opcode::Push,
            Instruction::Pop(_) => Opcode::Pop,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::Ret => Opcode::Ret,
            Instruction::Backup => Opcode::Backup,
            Instruction::Restore => Opcode::Restore,
            Instruction::Int(_) => Opcode::Int,
            Instruction::Iret => Opcode::Iret,
            Instruction::Loadi { .. } => Opcode::Loadi,
            Instruction::Load { .. } => Opcode::Load,
            Instruction::Store { .. } => Opcode::Store,
            Instruction::Encrypt(_) => Opcode::Encrypt,
            Instruction::In(_) => Opcode::In,
            Instruction::Ini(_) => Opcode::Ini,
            Instruction::Out(_) => Opcode::Out,
            Instruction::Brkp => Opcode::Brkp,
            Instruction::Halt => Opcode::Halt,
        }
    }

    /// Registers named by the instruction's operands.
    pub fn registers(&self) -> Vec<RegId> {
        fn term(t: &AddrTerm, out: &mut Vec<RegId>) {
            if let AddrTerm::Reg(reg) = t {
                out.push(*reg);
            }
        }
        fn operand(op: &Operand, out: &mut Vec<RegId>) {
            match op {
                Operand::Reg(reg) => out.push(*reg),
                Operand::Mem(mem) => {
                    term(&mem.base, out);
                    if let Some(offset) = &mem.offset {
                        term(offset, out);
                    }
                }
                Operand::Int(_) | Operand::Str(_) => {}
            }
        }

        let mut out = Vec::new();
        match self {
            Instruction::Mov { dest, src } => {
                operand(dest, &mut out);
                operand(src, &mut out);
            }
            Instruction::Port { dest, src } => out.extend([*dest, *src]),
            Instruction::Arith { dest, src, .. } | Instruction::Cmp { dest, src, .. } => {
                out.push(*dest);
                operand(src, &mut out);
            }
            Instruction::Jz { test, target } | Instruction::Jnz { test, target } => {
                out.push(*test);
                operand(target, &mut out);
            }
            Instruction::Jmp { target } | Instruction::Call { target } => operand(target, &mut out),
            Instruction::Loadi { page, block }
            | Instruction::Load { page, block }
            | Instruction::Store { page, block } => {
                operand(page, &mut out);
                operand(block, &mut out);
            }
            Instruction::Inr(reg)
            | Instruction::Dcr(reg)
            | Instruction::Push(reg)
            | Instruction::Pop(reg)
            | Instruction::Encrypt(reg)
            | Instruction::In(reg)
            | Instruction::Ini(reg)
            | Instruction::Out(reg) => out.push(*reg),
            Instruction::Ret
            | Instruction::Backup
            | Instruction::Restore
            | Instruction::Int(_)
            | Instruction::Iret
            | Instruction::Brkp
            | Instruction::Halt => {}
        }
        out
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode one instruction from its text.
pub fn decode(text: &str) -> Result<Instruction, DecodeError> {
    let mut stream = TokenStream::new(tokenize(text)?);

    let keyword = match stream.next() {
        Some(Token::Keyword(keyword)) => keyword,
        _ => return Err(DecodeError::IllegalInstruction(text.trim().to_string())),
    };
    let opcode = Opcode::from_keyword(&keyword)
        .ok_or_else(|| DecodeError::IllegalInstruction(keyword.clone()))?;

    let instr = decode_operands(opcode, &mut stream)?;
    stream.finish()?;
    Ok(instr)
}

fn decode_operands(opcode: Opcode, s: &mut TokenStream) -> Result<Instruction, DecodeError> {
    let instr = match opcode {
        Opcode::Mov => {
            let dest = s.operand()?;
            s.comma()?;
            let src = s.operand()?;
            match (&dest, &src) {
                (Operand::Int(_) | Operand::Str(_), _) => {
                    return Err(DecodeError::Malformed {
                        expected: "register or memory destination",
                        found: dest.to_string(),
                    })
                }
                (Operand::Mem(_), Operand::Mem(_)) => {
                    return Err(DecodeError::Malformed {
                        expected: "at most one memory operand",
                        found: "two memory operands".into(),
                    })
                }
                _ => {}
            }
            Instruction::Mov { dest, src }
        }
        Opcode::Port => {
            let dest = s.register()?;
            s.comma()?;
            let src = s.register()?;
            if !dest.is_port() && !src.is_port() {
                return Err(DecodeError::Malformed {
                    expected: "a port register",
                    found: format!("{}, {}", dest, src),
                });
            }
            Instruction::Port { dest, src }
        }
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
            let op = match opcode {
                Opcode::Add => ArithOp::Add,
                Opcode::Sub => ArithOp::Sub,
                Opcode::Mul => ArithOp::Mul,
                Opcode::Div => ArithOp::Div,
                _ => ArithOp::Mod,
            };
            let dest = s.register()?;
            s.comma()?;
            Instruction::Arith { op, dest, src: s.value()? }
        }
        Opcode::Inr => Instruction::Inr(s.register()?),
        Opcode::Dcr => Instruction::Dcr(s.register()?),
        Opcode::Lt | Opcode::Gt | Opcode::Eq | Opcode::Ne | Opcode::Ge | Opcode::Le => {
            let op = match opcode {
                Opcode::Lt => CmpOp::Lt,
                Opcode::Gt => CmpOp::Gt,
                Opcode::Eq => CmpOp::Eq,
                Opcode::Ne => CmpOp::Ne,
                Opcode::Ge => CmpOp::Ge,
                _ => CmpOp::Le,
            };
            let dest = s.register()?;
            s.comma()?;
            Instruction::Cmp { op, dest, src: s.value()? }
        }
        Opcode::Jz | Opcode::Jnz => {
            let test = s.register()?;
            s.comma()?;
            let target = s.value()?;
            if opcode == Opcode::Jz {
                Instruction::Jz { test, target }
            } else {
                Instruction::Jnz { test, target }
            }
        }
        Opcode::Jmp => Instruction::Jmp { target: s.value()? },
        Opcode::Call => Instruction::Call { target: s.value()? },
        Opcode::Push => Instruction::Push(s.register()?),
        Opcode::Pop => Instruction::Pop(s.register()?),
        Opcode::Ret => Instruction::Ret,
        Opcode::Backup => Instruction::Backup,
        Opcode::Restore => Instruction::Restore,
        Opcode::Int => Instruction::Int(s.integer()?),
        Opcode::Iret => Instruction::Iret,
        Opcode::Loadi | Opcode::Load | Opcode::Store => {
            let page = s.value()?;
            s.comma()?;
            let block = s.value()?;
            match opcode {
                Opcode::Loadi => Instruction::Loadi { page, block },
                Opcode::Load => Instruction::Load { page, block },
                _ => Instruction::Store { page, block },
            }
        }
        Opcode::Encrypt => Instruction::Encrypt(s.register()?),
        Opcode::In => Instruction::In(s.optional_register(RegId::P0)?),
        Opcode::Ini => Instruction::Ini(s.optional_register(RegId::P0)?),
        Opcode::Out => Instruction::Out(s.optional_register(RegId::P0)?),
        Opcode::Brkp => Instruction::Brkp,
        Opcode::Halt => Instruction::Halt,
    };
    Ok(instr)
}

// ============================================================================
// Instruction slots
// ============================================================================

/// Join the two words of an instruction slot back into instruction text.
pub fn slot_text(first: &Word, second: &Word) -> String {
    let head = first.as_string();
    let tail = second.as_string();
    if tail.is_empty() {
        head
    } else {
        format!("{}, {}", head, tail)
    }
}

/// Decode the instruction held in a two-word slot.
pub fn decode_slot(first: &Word, second: &Word) -> Result<Instruction, DecodeError> {
    decode(&slot_text(first, second))
}

/// Encode instruction text into a two-word slot.
///
/// The text is decoded first, then its canonical form is split at the first
/// comma: the mnemonic and first operand go in the first word, the rest in
/// the second.
pub fn encode(text: &str) -> Result<[Word; INSTRUCTION_SIZE], DecodeError> {
    let canonical = decode(text)?.to_string();
    let (head, tail) = match canonical.split_once(", ") {
        Some((head, tail)) => (head, tail),
        None => (canonical.as_str(), ""),
    };
    Ok([Word::from_text(head)?, Word::from_text(tail)?])
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for AddrTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrTerm::Reg(reg) => write!(f, "{}", reg),
            AddrTerm::Int(value) => write!(f, "{}", value),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{}", reg),
            Operand::Int(value) => write!(f, "{}", value),
            Operand::Str(text) => write!(f, "\"{}\"", text),
            Operand::Mem(MemRef { base, offset: None }) => write!(f, "[{}]", base),
            Operand::Mem(MemRef { base, offset: Some(offset) }) => write!(f, "[{}+{}]", base, offset),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.opcode().mnemonic();
        match self {
            Instruction::Mov { dest, src } => write!(f, "{} {}, {}", m, dest, src),
            Instruction::Port { dest, src } => write!(f, "{} {}, {}", m, dest, src),
            Instruction::Arith { dest, src, .. } | Instruction::Cmp { dest, src, .. } => {
                write!(f, "{} {}, {}", m, dest, src)
            }
            Instruction::Jz { test, target } | Instruction::Jnz { test, target } => {
                write!(f, "{} {}, {}", m, test, target)
            }
            Instruction::Jmp { target } | Instruction::Call { target } => write!(f, "{} {}", m, target),
            Instruction::Loadi { page, block }
            | Instruction::Load { page, block }
            | Instruction::Store { page, block } => write!(f, "{} {}, {}", m, page, block),
            Instruction::Int(n) => write!(f, "{} {}", m, n),
            Instruction::Inr(reg)
            | Instruction::Dcr(reg)
            | Instruction::Push(reg)
            | Instruction::Pop(reg)
            | Instruction::Encrypt(reg)
            | Instruction::In(reg)
            | Instruction::Ini(reg)
            | Instruction::Out(reg) => write!(f, "{} {}", m, reg),
            Instruction::Ret
            | Instruction::Backup
            | Instruction::Restore
            | Instruction::Iret
            | Instruction::Brkp
            | Instruction::Halt => write!(f, "{}", m),
        }
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("illegal instruction {0:?}")]
    IllegalInstruction(String),

    #[error("expected {expected}, found {found}")]
    Malformed { expected: &'static str, found: String },

    #[error("unexpected trailing token {0}")]
    TrailingToken(String),

    #[error("unknown register {0:?}")]
    UnknownRegister(String),

    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),

    #[error("unterminated string in {0:?}")]
    UnterminatedString(String),

    #[error("bad integer literal {0:?}")]
    BadLiteral(String),

    #[error("instruction does not fit in its slot: {0}")]
    SlotOverflow(#[from] WordError),
}

impl DecodeError {
    fn malformed(expected: &'static str, found: Option<Token>) -> Self {
        DecodeError::Malformed {
            expected,
            found: match found {
                Some(token) => format!("{:?}", token),
                None => "end of instruction".into(),
            },
        }
    }

    /// Check whether this error comes from an unknown mnemonic.
    pub fn is_illegal_instruction(&self) -> bool {
        matches!(self, DecodeError::IllegalInstruction(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: usize) -> RegId {
        RegId::general(n)
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("MOV [R1+4], \"hi there\"").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Keyword("MOV".into()),
                Token::OpenBracket,
                Token::Register("R1".into()),
                Token::Plus,
                Token::Integer(4),
                Token::CloseBracket,
                Token::Comma,
                Token::Str("hi there".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_negative_literal() {
        assert_eq!(
            tokenize("ADD R0, -12").unwrap(),
            vec![
                Token::Keyword("ADD".into()),
                Token::Register("R0".into()),
                Token::Comma,
                Token::Integer(-12),
            ]
        );
    }

    #[test]
    fn test_decode_mov_forms() {
        assert_eq!(
            decode("mov r0, r1").unwrap(),
            Instruction::Mov { dest: Operand::Reg(r(0)), src: Operand::Reg(r(1)) }
        );
        assert_eq!(
            decode("MOV R2, [512]").unwrap(),
            Instruction::Mov {
                dest: Operand::Reg(r(2)),
                src: Operand::Mem(MemRef { base: AddrTerm::Int(512), offset: None }),
            }
        );
        assert_eq!(
            decode("MOV [SP+R3], \"abc\"").unwrap(),
            Instruction::Mov {
                dest: Operand::Mem(MemRef {
                    base: AddrTerm::Reg(RegId::SP),
                    offset: Some(AddrTerm::Reg(r(3))),
                }),
                src: Operand::Str("abc".into()),
            }
        );
    }

    #[test]
    fn test_decode_rejects_bad_mov() {
        assert!(matches!(decode("MOV 5, R0"), Err(DecodeError::Malformed { .. })));
        assert!(matches!(decode("MOV [R0], [R1]"), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let err = decode("FLY R0").unwrap_err();
        assert_eq!(err, DecodeError::IllegalInstruction("FLY".into()));
        assert!(err.is_illegal_instruction());
    }

    #[test]
    fn test_decode_unknown_register() {
        assert_eq!(decode("INR R42").unwrap_err(), DecodeError::UnknownRegister("R42".into()));
    }

    #[test]
    fn test_decode_operand_count() {
        assert!(matches!(decode("ADD R0"), Err(DecodeError::Malformed { .. })));
        assert!(matches!(decode("HALT R0"), Err(DecodeError::TrailingToken(_))));
        assert!(matches!(decode("PORT R0, R1"), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_decode_optional_port() {
        assert_eq!(decode("OUT").unwrap(), Instruction::Out(RegId::P0));
        assert_eq!(decode("IN R5").unwrap(), Instruction::In(r(5)));
    }

    #[test]
    fn test_opcode_lookup() {
        assert_eq!(Opcode::from_keyword("halt"), Some(Opcode::Halt));
        assert_eq!(Opcode::from_keyword("Loadi"), Some(Opcode::Loadi));
        assert_eq!(Opcode::from_keyword("NOP"), None);
        assert!(Opcode::Iret.is_privileged());
        assert!(!Opcode::Int.is_privileged());
    }

    #[test]
    fn test_encode_splits_at_first_comma() {
        let [head, tail] = encode("mov  [R1+4],\"a,b\"").unwrap();
        assert_eq!(head.as_string(), "MOV [R1+4]");
        assert_eq!(tail.as_string(), "\"a,b\"");
        assert_eq!(
            decode_slot(&head, &tail).unwrap(),
            decode("MOV [R1+4], \"a,b\"").unwrap()
        );
    }

    #[test]
    fn test_encode_single_word() {
        let [head, tail] = encode("halt").unwrap();
        assert_eq!(head.as_string(), "HALT");
        assert!(tail.is_empty());
        assert_eq!(slot_text(&head, &tail), "HALT");
    }

    #[test]
    fn test_encode_overflow() {
        assert!(matches!(
            encode("MOV R0, \"a string far too long\""),
            Err(DecodeError::SlotOverflow(_))
        ));
    }

    #[test]
    fn test_registers_used() {
        let instr = decode("MOV [BP+R2], R7").unwrap();
        assert_eq!(instr.registers(), vec![RegId::BP, r(2), r(7)]);
    }
}
