//! `qvm-runtime` is a library for loading, verifying, and running Quake III style `.qvm`
//! bytecode modules in lightweight sandboxes.
//!
//! A [`Module`] is verified once and shared behind an `Arc`; each [`Instance`] owns its own data
//! segment and runs under either the interpreter or native code from `qvmc`, as chosen by its
//! [`Config`].
//!
//! ```
//! use qvm_runtime::builder::ImageBuilder;
//! use qvm_runtime::{Config, Error, Instance, Module, Opcode, SyscallArgs, Vmctx};
//! use std::sync::Arc;
//!
//! let mut b = ImageBuilder::new();
//! // vmMain() returns syscall 3(20) + 1
//! b.function("vmMain", 16)
//!     .constant(20)
//!     .arg(8)
//!     .syscall(3)
//!     .constant(1)
//!     .op(Opcode::Add)
//!     .leave();
//! let module = Arc::new(Module::load_with_map(&b.build(), &b.map())?);
//! let mut inst = Instance::new("doc", module, &Config::default())?;
//!
//! let mut handler = |_vm: &mut Vmctx<'_>, args: &SyscallArgs| -> Result<i32, Error> {
//!     Ok(args.number() * args.arg(0))
//! };
//! assert_eq!(inst.call_by_name(&mut handler, "vmMain", [])?, 61);
//! # Ok::<(), Error>(())
//! ```

#![deny(bare_trait_objects)]

pub use qvm_module::{
    builder, FaultCode, FunctionSpec, Header, Instruction, LoadError, Module, Opcode, SymbolTable,
    Version, MAX_SYSCALL_ARGS, MAX_VMMAIN_ARGS,
};
pub use qvm_runtime_internals::config::{Config, Engine, OptLevel};
pub use qvm_runtime_internals::error::Error;
pub use qvm_runtime_internals::instance::{
    self, FaultDetails, Instance, State, SyscallRecord,
};
pub use qvm_runtime_internals::profile::ProfileEntry;
pub use qvm_runtime_internals::vmctx::{NoSyscalls, SyscallArgs, SyscallHandler, Vmctx};
pub use qvmc::CompiledModule;
