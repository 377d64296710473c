//! Test suites shared by both execution engines.
//!
//! Every suite is a macro taking `name => engine` pairs and expands to one module of tests per
//! engine, so the interpreter and native code are held to the same expectations.

pub mod arith;
pub mod control;
pub mod fault;
pub mod helpers;
pub mod memory;
pub mod syscall;
