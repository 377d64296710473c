//! Glue between the runtime and native code generated by `qvmc`.
//!
//! Native code sees the instance only through a `VmCtx` built on the Rust stack for each
//! invocation. Syscalls re-enter Rust through `syscall_trampoline`, which finds the instance and
//! handler through `VmCtx::host`. Errors and panics must not unwind through native frames, so the
//! trampoline parks them in the `HostFrame`, sets `VmCtx::UNWIND`, and lets the generated code
//! return normally.

use crate::alloc;
use crate::error::Error;
use crate::instance::Instance;
use crate::vmctx::SyscallHandler;
use num_traits::FromPrimitive;
use qvm_module::{FaultCode, VmCtx};
use qvmc::CompiledModule;
use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

enum Unwind {
    Error(Error),
    Panic(Box<dyn Any + Send + 'static>),
}

struct HostFrame<'h> {
    instance: *mut Instance,
    handler: *mut (dyn SyscallHandler + 'h),
    unwind: Option<Unwind>,
}

pub(crate) fn run(
    inst: &mut Instance,
    native: &CompiledModule,
    handler: &mut dyn SyscallHandler,
    entry: usize,
    ps: i32,
) -> Result<i32, Error> {
    let func = native.function(entry).ok_or(Error::FuncNotFound(entry))?;

    let mut ctx = VmCtx {
        memory: inst.memory.as_mut_ptr(),
        entry_points: native.entry_points().as_ptr(),
        call_counts: inst.counters.call_counts_ptr(),
        break_count: inst.counters.break_count_ptr(),
        syscall: syscall_trampoline,
        block_copy: block_copy_trampoline,
        host: ptr::null_mut(),
        memory_size: inst.memory.size(),
        break_function: inst.break_function,
        fault: 0,
        fault_pc: 0,
        frame_depth: 0,
    };
    let mut frame = HostFrame {
        instance: inst as *mut Instance,
        handler: handler as *mut dyn SyscallHandler,
        unwind: None,
    };
    ctx.host = &mut frame as *mut HostFrame<'_> as *mut c_void;

    // safety: the context points at live buffers owned by `inst` and `native`, both of which
    // outlive the call; the generated code only touches memory through the segment mask
    let result = unsafe { func(&mut ctx, ps) };

    match ctx.fault {
        0 => Ok(result),
        VmCtx::UNWIND => match frame.unwind.take() {
            Some(Unwind::Error(e)) => Err(e),
            Some(Unwind::Panic(payload)) => panic::resume_unwind(payload),
            None => Err(qvm_format_err!("native code unwound without a reason")),
        },
        code => {
            if let Some(kind) = FaultCode::from_u32(code) {
                return Err(inst.fault(kind, ctx.fault_pc as usize));
            }
            qvm_bail!("native code reported unknown fault {}", code);
        }
    }
}

unsafe extern "C" fn syscall_trampoline(ctx: *mut VmCtx, ps: i32, number: i32) -> i32 {
    let frame = &mut *((*ctx).host as *mut HostFrame<'_>);
    let instance = frame.instance;
    let handler = frame.handler;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        (*instance).syscall(&mut *handler, ps, number)
    }));
    let reason = match outcome {
        Ok(Ok(value)) => return value,
        Ok(Err(e)) => Unwind::Error(e),
        Err(payload) => Unwind::Panic(payload),
    };
    frame.unwind = Some(reason);
    (*ctx).fault = VmCtx::UNWIND;
    0
}

unsafe extern "C" fn block_copy_trampoline(ctx: *mut VmCtx, dest: i32, src: i32, count: i32) {
    let ctx = &*ctx;
    let memory = std::slice::from_raw_parts_mut(ctx.memory, ctx.memory_size as usize);
    alloc::block_copy(memory, dest, src, count)
}
