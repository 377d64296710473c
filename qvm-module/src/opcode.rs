use bitflags::bitflags;
use num_derive::FromPrimitive;
use std::fmt;

/// Operand-stack slots available to a single function.
pub const PROC_OPSTACK_SIZE: usize = 30;

bitflags! {
    /// Static properties of an opcode.
    pub struct OpFlags: u8 {
        /// A conditional branch whose operand is an instruction index.
        const BRANCH = 0x01;
        /// Operates on `f32` bit patterns.
        const FPU = 0x02;
        /// Writes to the data segment.
        const STORE = 0x04;
    }
}

/// Width of the literal operand that follows an opcode byte in the code section.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    None,
    Byte,
    Word,
}

impl Operand {
    pub fn width(self) -> usize {
        match self {
            Operand::None => 0,
            Operand::Byte => 1,
            Operand::Word => 4,
        }
    }
}

/// Static descriptor for an opcode.
#[derive(Clone, Copy, Debug)]
pub struct OpInfo {
    pub name: &'static str,
    pub operand: Operand,
    /// Net operand-stack change in bytes.
    pub stack: i8,
    /// Number of operand-stack slots the opcode consumes.
    pub nargs: u8,
    pub flags: OpFlags,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Opcode {
    Undef = 0,
    Ignore,
    Break,
    Enter,
    Leave,
    Call,
    Push,
    Pop,
    Const,
    Local,
    Jump,
    Eq,
    Ne,
    Lti,
    Lei,
    Gti,
    Gei,
    Ltu,
    Leu,
    Gtu,
    Geu,
    Eqf,
    Nef,
    Ltf,
    Lef,
    Gtf,
    Gef,
    Load1,
    Load2,
    Load4,
    Store1,
    Store2,
    Store4,
    Arg,
    BlockCopy,
    Sex8,
    Sex16,
    Negi,
    Add,
    Sub,
    Divi,
    Divu,
    Modi,
    Modu,
    Muli,
    Mulu,
    Band,
    Bor,
    Bxor,
    Bcom,
    Lsh,
    Rshi,
    Rshu,
    Negf,
    Addf,
    Subf,
    Divf,
    Mulf,
    Cvif,
    Cvfi,
}

pub const OPCODE_COUNT: usize = Opcode::Cvfi as usize + 1;

const fn op(name: &'static str, operand: Operand, stack: i8, nargs: u8, flags: OpFlags) -> OpInfo {
    OpInfo {
        name,
        operand,
        stack,
        nargs,
        flags,
    }
}

const NONE: OpFlags = OpFlags::empty();
const BR: OpFlags = OpFlags::BRANCH;
const FBR: OpFlags = OpFlags::from_bits_truncate(OpFlags::BRANCH.bits() | OpFlags::FPU.bits());
const FPU: OpFlags = OpFlags::FPU;
const STORE: OpFlags = OpFlags::STORE;

use self::Operand::{Byte, None as Nil, Word};

/// Indexed by `Opcode as usize`.
static OPCODES: [OpInfo; OPCODE_COUNT] = [
    op("undef", Nil, 0, 0, NONE),
    op("ignore", Nil, 0, 0, NONE),
    op("break", Nil, 0, 0, NONE),
    op("enter", Word, 0, 0, NONE),
    op("leave", Word, -4, 1, NONE),
    op("call", Nil, 0, 1, NONE),
    op("push", Nil, 4, 0, NONE),
    op("pop", Nil, -4, 1, NONE),
    op("const", Word, 4, 0, NONE),
    op("local", Word, 4, 0, NONE),
    op("jump", Nil, -4, 1, NONE),
    op("eq", Word, -8, 2, BR),
    op("ne", Word, -8, 2, BR),
    op("lti", Word, -8, 2, BR),
    op("lei", Word, -8, 2, BR),
    op("gti", Word, -8, 2, BR),
    op("gei", Word, -8, 2, BR),
    op("ltu", Word, -8, 2, BR),
    op("leu", Word, -8, 2, BR),
    op("gtu", Word, -8, 2, BR),
    op("geu", Word, -8, 2, BR),
    op("eqf", Word, -8, 2, FBR),
    op("nef", Word, -8, 2, FBR),
    op("ltf", Word, -8, 2, FBR),
    op("lef", Word, -8, 2, FBR),
    op("gtf", Word, -8, 2, FBR),
    op("gef", Word, -8, 2, FBR),
    op("load1", Nil, 0, 1, NONE),
    op("load2", Nil, 0, 1, NONE),
    op("load4", Nil, 0, 1, NONE),
    op("store1", Nil, -8, 2, STORE),
    op("store2", Nil, -8, 2, STORE),
    op("store4", Nil, -8, 2, STORE),
    op("arg", Byte, -4, 1, STORE),
    op("block_copy", Word, -8, 2, STORE),
    op("sex8", Nil, 0, 1, NONE),
    op("sex16", Nil, 0, 1, NONE),
    op("negi", Nil, 0, 1, NONE),
    op("add", Nil, -4, 2, NONE),
    op("sub", Nil, -4, 2, NONE),
    op("divi", Nil, -4, 2, NONE),
    op("divu", Nil, -4, 2, NONE),
    op("modi", Nil, -4, 2, NONE),
    op("modu", Nil, -4, 2, NONE),
    op("muli", Nil, -4, 2, NONE),
    op("mulu", Nil, -4, 2, NONE),
    op("band", Nil, -4, 2, NONE),
    op("bor", Nil, -4, 2, NONE),
    op("bxor", Nil, -4, 2, NONE),
    op("bcom", Nil, 0, 1, NONE),
    op("lsh", Nil, -4, 2, NONE),
    op("rshi", Nil, -4, 2, NONE),
    op("rshu", Nil, -4, 2, NONE),
    op("negf", Nil, 0, 1, FPU),
    op("addf", Nil, -4, 2, FPU),
    op("subf", Nil, -4, 2, FPU),
    op("divf", Nil, -4, 2, FPU),
    op("mulf", Nil, -4, 2, FPU),
    op("cvif", Nil, 0, 1, FPU),
    op("cvfi", Nil, 0, 1, FPU),
];

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        num_traits::FromPrimitive::from_u8(byte)
    }

    pub fn info(self) -> &'static OpInfo {
        &OPCODES[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_branch(self) -> bool {
        self.info().flags.contains(OpFlags::BRANCH)
    }

    /// All opcodes in encoding order.
    pub fn all() -> impl Iterator<Item = Opcode> {
        (0..OPCODE_COUNT as u8).filter_map(Opcode::from_byte)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_encoding() {
        assert_eq!(Opcode::all().count(), OPCODE_COUNT);
        for (i, op) in Opcode::all().enumerate() {
            assert_eq!(op as usize, i);
        }
        assert_eq!(Opcode::from_byte(OPCODE_COUNT as u8), None);
        assert_eq!(Opcode::from_byte(0xff), None);
    }

    #[test]
    fn operand_widths() {
        assert_eq!(Opcode::Enter.info().operand.width(), 4);
        assert_eq!(Opcode::Arg.info().operand.width(), 1);
        assert_eq!(Opcode::BlockCopy.info().operand.width(), 4);
        assert_eq!(Opcode::Add.info().operand.width(), 0);
        assert!(!Opcode::Jump.is_branch());
        assert_eq!(Opcode::all().filter(|op| op.is_branch()).count(), 16);
        for op in Opcode::all().filter(|op| op.is_branch()) {
            assert_eq!(op.info().operand, Operand::Word, "{}", op);
            assert_eq!(op.info().stack, -8, "{}", op);
        }
    }

    #[test]
    fn float_flags() {
        let fpu: Vec<_> = Opcode::all()
            .filter(|op| op.info().flags.contains(OpFlags::FPU))
            .collect();
        assert!(fpu.contains(&Opcode::Gef));
        assert!(fpu.contains(&Opcode::Cvfi));
        assert!(!fpu.contains(&Opcode::Gei));
        assert_eq!(fpu.len(), 13);
    }
}
