//! Common types for representing qvm bytecode modules.
//!
//! These types are shared by `qvmc` and `qvm-runtime`: the opcode table, the image header, the
//! verifier that turns untrusted bytes into a [`Module`], and the [`VmCtx`] layout that compiled
//! code is generated against.

#![deny(bare_trait_objects)]

pub mod builder;
pub mod error;
mod header;
mod instruction;
mod module;
mod opcode;
mod symbols;
mod verify;
mod vmctx;

pub use crate::error::LoadError;
pub use crate::header::{
    Header, Version, MAX_DATA_SEGMENT, PROGRAM_STACK_SIZE, VM_MAGIC, VM_MAGIC_VER2,
};
pub use crate::instruction::{InstrFlags, Instruction};
pub use crate::module::{FunctionSpec, Module};
pub use crate::opcode::{OpFlags, OpInfo, Opcode, Operand, OPCODE_COUNT, PROC_OPSTACK_SIZE};
pub use crate::symbols::{Symbol, SymbolTable};
pub use crate::vmctx::{
    BlockCopyFn, FaultCode, NativeFunction, SyscallFn, VmCtx, MAX_FRAME_DEPTH,
};

/// Arguments a host call may pass to a module entry point.
pub const MAX_VMMAIN_ARGS: usize = 13;
/// Words in the parameter block handed to a syscall handler, including the syscall number.
pub const MAX_SYSCALL_ARGS: usize = 16;
