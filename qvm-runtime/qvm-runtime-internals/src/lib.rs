//! `qvm-runtime-internals` loads verified qvm modules into sandboxed instances and runs them with
//! either the interpreter or native code generated by `qvmc`.

#![deny(bare_trait_objects)]

#[macro_use]
pub mod error;

pub mod alloc;
mod compiled;
pub mod config;
pub mod instance;
mod interpreter;
pub mod profile;
pub mod vmctx;
