//! Interfaces for accessing instance data from syscall handlers.

use crate::error::Error;
use crate::instance::Instance;
use qvm_module::{Module, MAX_SYSCALL_ARGS};
use std::ffi::CStr;
use std::fmt;
use std::ops::Index;

/// The parameter block of a syscall: the syscall number followed by the words the module placed
/// in its outgoing argument area.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs(pub(crate) [i32; MAX_SYSCALL_ARGS]);

impl SyscallArgs {
    pub fn new(words: [i32; MAX_SYSCALL_ARGS]) -> SyscallArgs {
        SyscallArgs(words)
    }

    pub fn number(&self) -> i32 {
        self.0[0]
    }

    /// The `n`th argument, counting from zero.
    ///
    /// # Panics
    ///
    /// If `n` is not below `MAX_SYSCALL_ARGS - 1`.
    pub fn arg(&self, n: usize) -> i32 {
        self.0[n + 1]
    }

    /// The `n`th argument reinterpreted as a float.
    pub fn arg_f32(&self, n: usize) -> f32 {
        f32::from_bits(self.arg(n) as u32)
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }
}

impl Index<usize> for SyscallArgs {
    type Output = i32;

    fn index(&self, index: usize) -> &i32 {
        &self.0[index]
    }
}

impl fmt::Debug for SyscallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // trailing zero words are noise in logs
        let used = self.0.iter().rposition(|&w| w != 0).map_or(1, |i| i + 1);
        f.debug_list().entries(&self.0[..used]).finish()
    }
}

/// The host side of a module's syscalls.
///
/// `Ok(value)` becomes the result of the module's `CALL`. `Err` ends the whole invocation and is
/// returned from [`Instance::call`]; the instance itself stays usable.
pub trait SyscallHandler {
    fn syscall(&mut self, vm: &mut Vmctx<'_>, args: &SyscallArgs) -> Result<i32, Error>;
}

impl<F> SyscallHandler for F
where
    F: FnMut(&mut Vmctx<'_>, &SyscallArgs) -> Result<i32, Error>,
{
    fn syscall(&mut self, vm: &mut Vmctx<'_>, args: &SyscallArgs) -> Result<i32, Error> {
        self(vm, args)
    }
}

/// A handler for modules that are not expected to make syscalls.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSyscalls;

impl SyscallHandler for NoSyscalls {
    fn syscall(&mut self, _vm: &mut Vmctx<'_>, args: &SyscallArgs) -> Result<i32, Error> {
        Err(Error::RuntimeTerminated(format!(
            "unexpected syscall {}",
            args.number()
        )))
    }
}

/// A running instance as seen from a syscall handler.
pub struct Vmctx<'a> {
    instance: &'a mut Instance,
}

impl<'a> Vmctx<'a> {
    pub(crate) fn new(instance: &'a mut Instance) -> Vmctx<'a> {
        Vmctx { instance }
    }

    pub fn name(&self) -> &str {
        self.instance.name()
    }

    pub fn module(&self) -> &Module {
        self.instance.module()
    }

    /// The whole data segment.
    pub fn memory(&self) -> &[u8] {
        self.instance.memory.as_slice()
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        self.instance.memory.as_mut_slice()
    }

    pub fn read_u8(&self, addr: i32) -> Result<u8, Error> {
        Ok(self.instance.memory.slice(addr, 1)?[0])
    }

    pub fn read_i16(&self, addr: i32) -> Result<i16, Error> {
        let b = self.instance.memory.slice(addr, 2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i32(&self, addr: i32) -> Result<i32, Error> {
        let b = self.instance.memory.slice(addr, 4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32(&self, addr: i32) -> Result<f32, Error> {
        Ok(f32::from_bits(self.read_i32(addr)? as u32))
    }

    pub fn write_u8(&mut self, addr: i32, value: u8) -> Result<(), Error> {
        self.write(addr, &[value])
    }

    pub fn write_i16(&mut self, addr: i32, value: i16) -> Result<(), Error> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn write_i32(&mut self, addr: i32, value: i32) -> Result<(), Error> {
        self.write(addr, &value.to_le_bytes())
    }

    pub fn write_f32(&mut self, addr: i32, value: f32) -> Result<(), Error> {
        self.write_i32(addr, value.to_bits() as i32)
    }

    /// Copies `bytes` into module memory at `addr`.
    pub fn write(&mut self, addr: i32, bytes: &[u8]) -> Result<(), Error> {
        self.instance
            .memory
            .slice_mut(addr, bytes.len())?
            .copy_from_slice(bytes);
        Ok(())
    }

    pub fn slice(&self, addr: i32, len: usize) -> Result<&[u8], Error> {
        self.instance.memory.slice(addr, len)
    }

    pub fn slice_mut(&mut self, addr: i32, len: usize) -> Result<&mut [u8], Error> {
        self.instance.memory.slice_mut(addr, len)
    }

    pub fn read_cstr(&self, addr: i32) -> Result<&CStr, Error> {
        self.instance.memory.cstr(addr)
    }

    pub fn symbolicate(&self, pc: usize) -> String {
        self.instance.module().symbolicate(pc)
    }

    /// Nesting depth of host invocations, including the one that issued this syscall.
    pub fn call_level(&self) -> u32 {
        self.instance.call_level()
    }

    /// Invokes the module again from inside a syscall. The nested call runs on fresh program
    /// stack below the caller's arguments.
    pub fn call<const N: usize>(
        &mut self,
        handler: &mut dyn SyscallHandler,
        entry: usize,
        args: [i32; N],
    ) -> Result<i32, Error> {
        self.instance.call(handler, entry, args)
    }

    pub fn call_by_name<const N: usize>(
        &mut self,
        handler: &mut dyn SyscallHandler,
        name: &str,
        args: [i32; N],
    ) -> Result<i32, Error> {
        self.instance.call_by_name(handler, name, args)
    }
}
