//! The portable engine.
//!
//! Operand-stack slots are addressed by the depth the verifier recorded for each instruction, so
//! the interpreter never tracks a stack pointer of its own: the top of the stack before
//! instruction `i` is `stack[base + depth(i) - 1]`. A call makes the callee's base the slot that
//! held the call target, which is exactly where its `LEAVE` leaves the result.

use crate::error::Error;
use crate::instance::Instance;
use crate::vmctx::SyscallHandler;
use qvm_module::{FaultCode, Opcode, MAX_FRAME_DEPTH, PROC_OPSTACK_SIZE};

struct Frame {
    return_pc: usize,
    base: usize,
}

#[inline]
fn f(bits: i32) -> f32 {
    f32::from_bits(bits as u32)
}

#[inline]
fn bits(value: f32) -> i32 {
    value.to_bits() as i32
}

/// Executes the function at `entry` until its outermost `LEAVE`, with the program stack at `ps`.
pub(crate) fn run(
    inst: &mut Instance,
    handler: &mut dyn SyscallHandler,
    entry: usize,
    mut ps: i32,
) -> Result<i32, Error> {
    let module = inst.module.clone();
    let code = module.instructions();
    let stack_bottom = module.stack_bottom();
    let segment_size = module.segment_size() as i64;

    let mut stack = vec![0i32; PROC_OPSTACK_SIZE];
    let mut frames: Vec<Frame> = Vec::new();
    let mut base = 0usize;
    let mut pc = entry;

    loop {
        let ins = code[pc];
        // index one past the top of the stack
        let s = base + ins.depth();
        let mut next = pc + 1;

        macro_rules! binop {
            ($e:expr) => {{
                let b = stack[s - 1];
                let a = stack[s - 2];
                stack[s - 2] = $e(a, b);
            }};
        }
        macro_rules! branch {
            ($cond:expr) => {{
                let b = stack[s - 1];
                let a = stack[s - 2];
                if $cond(a, b) {
                    next = ins.value as usize;
                }
            }};
        }

        match ins.op {
            Opcode::Undef => return Err(inst.fault(FaultCode::IllegalInstruction, pc)),
            Opcode::Ignore => (),
            Opcode::Break => inst.counters.bump_break(),
            Opcode::Enter => {
                if let Some(func) = module.function_by_entry(pc) {
                    inst.counters.bump_call(func.ordinal);
                    if func.ordinal as i32 == inst.break_function {
                        inst.counters.bump_break();
                    }
                }
                ps = ps.wrapping_sub(ins.value);
                if ps < stack_bottom {
                    return Err(inst.fault(FaultCode::StackOverflow, pc));
                }
            }
            Opcode::Leave => {
                ps = ps.wrapping_add(ins.value);
                if ps as i64 > segment_size {
                    return Err(inst.fault(FaultCode::StackUnderflow, pc));
                }
                match frames.pop() {
                    None => return Ok(stack[s - 1]),
                    Some(frame) => {
                        next = frame.return_pc;
                        base = frame.base;
                    }
                }
            }
            Opcode::Call => {
                let target = stack[s - 1];
                inst.memory.store4(ps, next as i32);
                if target < 0 {
                    stack[s - 1] = inst.syscall(handler, ps, -1 - target)?;
                } else {
                    if module.function_by_entry(target as usize).is_none() {
                        return Err(inst.fault(FaultCode::BadCallTarget, pc));
                    }
                    if frames.len() as u32 >= MAX_FRAME_DEPTH {
                        return Err(inst.fault(FaultCode::CallDepthExceeded, pc));
                    }
                    frames.push(Frame {
                        return_pc: next,
                        base,
                    });
                    base = s - 1;
                    if stack.len() < base + PROC_OPSTACK_SIZE {
                        stack.resize(base + PROC_OPSTACK_SIZE, 0);
                    }
                    next = target as usize;
                }
            }
            Opcode::Push => stack[s] = 0,
            Opcode::Pop => (),
            Opcode::Const => stack[s] = ins.value,
            Opcode::Local => stack[s] = ps.wrapping_add(ins.value),
            Opcode::Jump => {
                let target = stack[s - 1];
                if !module.jump_allowed(pc, target) {
                    return Err(inst.fault(FaultCode::BadJumpTarget, pc));
                }
                next = target as usize;
            }

            Opcode::Eq => branch!(|a, b| a == b),
            Opcode::Ne => branch!(|a, b| a != b),
            Opcode::Lti => branch!(|a: i32, b| a < b),
            Opcode::Lei => branch!(|a: i32, b| a <= b),
            Opcode::Gti => branch!(|a: i32, b| a > b),
            Opcode::Gei => branch!(|a: i32, b| a >= b),
            Opcode::Ltu => branch!(|a: i32, b: i32| (a as u32) < (b as u32)),
            Opcode::Leu => branch!(|a: i32, b: i32| (a as u32) <= (b as u32)),
            Opcode::Gtu => branch!(|a: i32, b: i32| (a as u32) > (b as u32)),
            Opcode::Geu => branch!(|a: i32, b: i32| (a as u32) >= (b as u32)),
            Opcode::Eqf => branch!(|a, b| f(a) == f(b)),
            Opcode::Nef => branch!(|a, b| f(a) != f(b)),
            Opcode::Ltf => branch!(|a, b| f(a) < f(b)),
            Opcode::Lef => branch!(|a, b| f(a) <= f(b)),
            Opcode::Gtf => branch!(|a, b| f(a) > f(b)),
            Opcode::Gef => branch!(|a, b| f(a) >= f(b)),

            Opcode::Load1 => stack[s - 1] = inst.memory.load1(stack[s - 1]),
            Opcode::Load2 => stack[s - 1] = inst.memory.load2(stack[s - 1]),
            Opcode::Load4 => stack[s - 1] = inst.memory.load4(stack[s - 1]),
            Opcode::Store1 => inst.memory.store1(stack[s - 2], stack[s - 1]),
            Opcode::Store2 => inst.memory.store2(stack[s - 2], stack[s - 1]),
            Opcode::Store4 => inst.memory.store4(stack[s - 2], stack[s - 1]),
            Opcode::Arg => inst
                .memory
                .store4(ps.wrapping_add(ins.value), stack[s - 1]),
            Opcode::BlockCopy => inst
                .memory
                .block_copy(stack[s - 2], stack[s - 1], ins.value),

            Opcode::Sex8 => stack[s - 1] = stack[s - 1] as i8 as i32,
            Opcode::Sex16 => stack[s - 1] = stack[s - 1] as i16 as i32,
            Opcode::Negi => stack[s - 1] = stack[s - 1].wrapping_neg(),
            Opcode::Add => binop!(i32::wrapping_add),
            Opcode::Sub => binop!(i32::wrapping_sub),
            Opcode::Muli | Opcode::Mulu => binop!(i32::wrapping_mul),
            Opcode::Divi | Opcode::Modi | Opcode::Divu | Opcode::Modu => {
                let b = stack[s - 1];
                let a = stack[s - 2];
                if b == 0 {
                    return Err(inst.fault(FaultCode::DivideByZero, pc));
                }
                stack[s - 2] = match ins.op {
                    Opcode::Divi => a.wrapping_div(b),
                    Opcode::Modi => a.wrapping_rem(b),
                    Opcode::Divu => ((a as u32) / (b as u32)) as i32,
                    _ => ((a as u32) % (b as u32)) as i32,
                };
            }
            Opcode::Band => binop!(|a, b| a & b),
            Opcode::Bor => binop!(|a, b| a | b),
            Opcode::Bxor => binop!(|a, b| a ^ b),
            Opcode::Bcom => stack[s - 1] = !stack[s - 1],
            Opcode::Lsh => binop!(|a: i32, b| a.wrapping_shl(b as u32)),
            Opcode::Rshi => binop!(|a: i32, b| a.wrapping_shr(b as u32)),
            Opcode::Rshu => binop!(|a: i32, b| (a as u32).wrapping_shr(b as u32) as i32),

            Opcode::Negf => stack[s - 1] = bits(-f(stack[s - 1])),
            Opcode::Addf => binop!(|a, b| bits(f(a) + f(b))),
            Opcode::Subf => binop!(|a, b| bits(f(a) - f(b))),
            Opcode::Mulf => binop!(|a, b| bits(f(a) * f(b))),
            Opcode::Divf => binop!(|a, b| bits(f(a) / f(b))),
            Opcode::Cvif => stack[s - 1] = bits(stack[s - 1] as f32),
            Opcode::Cvfi => stack[s - 1] = f(stack[s - 1]) as i32,
        }
        pc = next;
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, Engine};
    use crate::error::Error;
    use crate::instance::Instance;
    use crate::vmctx::NoSyscalls;
    use qvm_module::builder::ImageBuilder;
    use qvm_module::{FaultCode, Opcode};
    use std::sync::Arc;

    fn run(b: &ImageBuilder) -> Result<i32, Error> {
        let config = Config::default().with_engine(Engine::Interpreted);
        let mut inst = Instance::new("interp", Arc::new(b.module()?), &config)?;
        inst.call(&mut NoSyscalls, 0, [])
    }

    #[test]
    fn nested_calls_return_through_frames() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8)
            .constant(100)
            .call("seven")
            .op(Opcode::Add)
            .leave();
        b.function("seven", 8).constant(7).leave();
        assert_eq!(run(&b).unwrap(), 107);
    }

    #[test]
    fn unbounded_recursion_exceeds_call_depth() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8).call("vmMain").leave();
        let err = run(&b).unwrap_err();
        // each frame only uses 8 bytes of program stack, so frame depth trips first
        assert_eq!(err.fault().unwrap().kind, FaultCode::CallDepthExceeded);
        assert_eq!(err.fault().unwrap().pc, 2);
    }

    #[test]
    fn large_frames_overflow_the_program_stack() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 0x8000).call("vmMain").leave();
        let err = run(&b).unwrap_err();
        assert_eq!(err.fault().unwrap().kind, FaultCode::StackOverflow);
        assert_eq!(err.fault().unwrap().pc, 0);
    }
}
