use thiserror::Error;

/// Reasons a bytecode image is rejected at load time.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Image is {len} bytes, shorter than the {needed}-byte header")]
    TooShort { len: usize, needed: usize },
    #[error("Bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("Header field {field} is negative ({value})")]
    NegativeField { field: &'static str, value: i32 },
    #[error("{section} section ({offset}+{length}) extends beyond the {image_len}-byte image")]
    SectionOutOfBounds {
        section: &'static str,
        offset: u64,
        length: u64,
        image_len: usize,
    },
    #[error("{section} section length {length} is not a multiple of 4")]
    Misaligned { section: &'static str, length: u32 },
    #[error("Instruction count {count} is invalid for a {code_length}-byte code section")]
    BadInstructionCount { count: u32, code_length: u32 },
    #[error("Data segment of {0} bytes exceeds the allowed maximum")]
    SegmentTooLarge(u64),
    #[error("Program stack (bottom {stack_bottom}) overlaps {initialized} bytes of initialized data")]
    StackOverlapsData { stack_bottom: i64, initialized: i64 },
    #[error("Code section ends inside instruction {index}")]
    TruncatedCode { index: usize },
    #[error("Unknown opcode {byte:#04x} at instruction {index} (code offset {offset})")]
    UnknownOpcode { index: usize, offset: usize, byte: u8 },
    #[error("Operand stack underflow at instruction {index}")]
    OperandStackUnderflow { index: usize },
    #[error("Operand stack overflow at instruction {index} ({depth} bytes)")]
    OperandStackOverflow { index: usize, depth: i64 },
    #[error("Invalid {op} at instruction {index}: {reason}")]
    InvalidInstruction {
        index: usize,
        op: &'static str,
        reason: &'static str,
    },
    #[error("Invalid jump target {target} at instruction {index}")]
    InvalidJumpTarget { index: usize, target: i32 },
    #[error("Invalid jump target {target} in jump table entry {entry}")]
    InvalidJumpTableEntry { entry: usize, target: i32 },
    #[error("Invalid call target {target} at instruction {index}")]
    InvalidCallTarget { index: usize, target: i32 },
    #[error("Malformed symbol map at line {line}: {reason}")]
    BadSymbolMap { line: usize, reason: String },
    #[error("I/O error")]
    IOError(#[from] std::io::Error),
}
