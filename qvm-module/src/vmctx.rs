//! The context block shared between the runtime and compiled code.
//!
//! Compiled functions receive a `*mut VmCtx` and address its fields by the offsets below, so the
//! layout is fixed with `repr(C)`.

use memoffset::offset_of;
use num_derive::FromPrimitive;
use std::ffi::c_void;
use std::fmt;

/// Deepest chain of bytecode calls within one host invocation.
pub const MAX_FRAME_DEPTH: u32 = 1024;

/// Signature of every compiled module function.
pub type NativeFunction = unsafe extern "C" fn(ctx: *mut VmCtx, program_stack: i32) -> i32;
/// Services a syscall on behalf of compiled code.
pub type SyscallFn = unsafe extern "C" fn(ctx: *mut VmCtx, program_stack: i32, number: i32) -> i32;
pub type BlockCopyFn = unsafe extern "C" fn(ctx: *mut VmCtx, dest: i32, src: i32, count: i32);

/// A sandbox violation detected while executing a module.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum FaultCode {
    /// `ENTER` moved the program stack below its bottom.
    StackOverflow = 1,
    /// `LEAVE` moved the program stack above the segment.
    StackUnderflow,
    IllegalInstruction,
    DivideByZero,
    BadCallTarget,
    BadJumpTarget,
    CallDepthExceeded,
    /// Host-to-module nesting exceeded the configured call level.
    CallLevelExceeded,
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultCode::StackOverflow => "program stack overflow",
            FaultCode::StackUnderflow => "program stack underflow",
            FaultCode::IllegalInstruction => "illegal instruction",
            FaultCode::DivideByZero => "integer division by zero",
            FaultCode::BadCallTarget => "call to an address that is not a function",
            FaultCode::BadJumpTarget => "computed jump to an invalid target",
            FaultCode::CallDepthExceeded => "call depth exceeded",
            FaultCode::CallLevelExceeded => "host call nesting exceeded",
        };
        f.write_str(s)
    }
}

#[repr(C)]
#[repr(align(8))]
pub struct VmCtx {
    pub memory: *mut u8,
    pub entry_points: *const usize,
    /// One counter per function, indexed by ordinal.
    pub call_counts: *mut u32,
    pub break_count: *mut u32,
    pub syscall: SyscallFn,
    pub block_copy: BlockCopyFn,
    /// Opaque to compiled code; owned by the runtime.
    pub host: *mut c_void,
    pub memory_size: u32,
    /// Function ordinal whose entries bump `break_count`, or -1.
    pub break_function: i32,
    /// Zero while running; a `FaultCode` or `VmCtx::UNWIND` once compiled code must return.
    pub fault: u32,
    pub fault_pc: u32,
    pub frame_depth: u32,
}

impl VmCtx {
    /// The runtime asked compiled code to unwind; the reason is recorded on the host side.
    pub const UNWIND: u32 = u32::MAX;

    pub fn offset_memory() -> i32 {
        offset_of!(VmCtx, memory) as i32
    }
    pub fn offset_entry_points() -> i32 {
        offset_of!(VmCtx, entry_points) as i32
    }
    pub fn offset_call_counts() -> i32 {
        offset_of!(VmCtx, call_counts) as i32
    }
    pub fn offset_break_count() -> i32 {
        offset_of!(VmCtx, break_count) as i32
    }
    pub fn offset_syscall() -> i32 {
        offset_of!(VmCtx, syscall) as i32
    }
    pub fn offset_block_copy() -> i32 {
        offset_of!(VmCtx, block_copy) as i32
    }
    pub fn offset_break_function() -> i32 {
        offset_of!(VmCtx, break_function) as i32
    }
    pub fn offset_fault() -> i32 {
        offset_of!(VmCtx, fault) as i32
    }
    pub fn offset_fault_pc() -> i32 {
        offset_of!(VmCtx, fault_pc) as i32
    }
    pub fn offset_frame_depth() -> i32 {
        offset_of!(VmCtx, frame_depth) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn fault_codes_round_trip_through_u32() {
        for code in 1..=8u32 {
            let fault = FaultCode::from_u32(code).unwrap();
            assert_eq!(fault as u32, code);
        }
        assert_eq!(FaultCode::from_u32(0), None);
        assert_eq!(FaultCode::from_u32(VmCtx::UNWIND), None);
    }

    #[test]
    fn pointer_fields_precede_scalars() {
        let ptr = std::mem::size_of::<usize>() as i32;
        assert_eq!(VmCtx::offset_memory(), 0);
        assert_eq!(VmCtx::offset_block_copy(), 5 * ptr);
        assert_eq!(VmCtx::offset_fault(), 7 * ptr + 8);
    }
}
