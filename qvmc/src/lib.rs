//! Native code generation for qvm modules.
//!
//! Each module function becomes one Cranelift function taking the invocation's `VmCtx` and the
//! program stack pointer. Generated code reproduces the interpreter's observable behavior,
//! including the fault code and instruction index of every sandbox violation.

#![deny(bare_trait_objects)]

mod compiler;
mod error;
mod function;
pub mod fusion;

pub use crate::{
    compiler::{CompiledModule, Compiler, OptLevel},
    error::Error,
    fusion::{fused_at, MacroOp},
};
