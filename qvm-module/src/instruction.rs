use crate::opcode::{OpFlags, Opcode, Operand};
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Facts the verifier records about a decoded instruction.
    #[derive(Default)]
    pub struct InstrFlags: u8 {
        /// Control may arrive here by a branch or a computed jump.
        const JUMP_TARGET = 0x01;
        /// A `JUMP` whose destination is only known at run time.
        const SWITCH = 0x02;
        /// First instruction of a function.
        const ROOT = 0x04;
        const FPU = 0x08;
        const STORE = 0x10;
    }
}

/// One decoded and verified bytecode operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    /// Literal operand; zero for opcodes without one.
    pub value: i32,
    /// Operand-stack depth in bytes before this instruction executes, relative to function entry.
    pub op_stack: u32,
    pub flags: InstrFlags,
}

impl Instruction {
    pub fn new(op: Opcode, value: i32) -> Self {
        let info = op.info();
        let mut flags = InstrFlags::empty();
        if info.flags.contains(OpFlags::FPU) {
            flags |= InstrFlags::FPU;
        }
        if info.flags.contains(OpFlags::STORE) {
            flags |= InstrFlags::STORE;
        }
        if op == Opcode::Enter {
            flags |= InstrFlags::ROOT;
        }
        Instruction {
            op,
            value,
            op_stack: 0,
            flags,
        }
    }

    /// Operand-stack depth in slots before this instruction executes.
    pub fn depth(&self) -> usize {
        self.op_stack as usize / 4
    }

    pub fn is_jump_target(&self) -> bool {
        self.flags.contains(InstrFlags::JUMP_TARGET)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op.info().operand {
            Operand::None => write!(f, "{}", self.op),
            Operand::Byte => write!(f, "{} {}", self.op, self.value),
            Operand::Word if self.op.is_branch() => write!(f, "{} @{}", self.op, self.value),
            Operand::Word => write!(f, "{} {}", self.op, self.value),
        }
    }
}
