//! Translation of one module function into Cranelift IR.
//!
//! The operand stack lives in Cranelift variables indexed by the depth the verifier recorded for
//! each instruction, and the program stack pointer is one more variable. Every instruction that
//! can be reached by a branch starts a new block. Sandbox violations store a fault code and pc in
//! the `VmCtx` and return 0; callers check `VmCtx::fault` after every call and return the same way.

use crate::fusion::{self, MacroOp};
use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{
    types, AbiParam, Block, Endianness, FuncRef, Function, InstBuilder, MemFlags, SigRef,
    Signature, Type, Value,
};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Switch, Variable};
use qvm_module::{
    FaultCode, FunctionSpec, Instruction, Module, Opcode, VmCtx, MAX_FRAME_DEPTH,
    PROC_OPSTACK_SIZE,
};
use std::collections::HashMap;

/// `fn(ctx, program_stack) -> i32`, shared by every module function.
pub(crate) fn native_signature(call_conv: CallConv, ptr: Type) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(ptr));
    sig.params.push(AbiParam::new(types::I32));
    sig.returns.push(AbiParam::new(types::I32));
    sig
}

fn syscall_signature(call_conv: CallConv, ptr: Type) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(ptr));
    sig.params.push(AbiParam::new(types::I32));
    sig.params.push(AbiParam::new(types::I32));
    sig.returns.push(AbiParam::new(types::I32));
    sig
}

fn block_copy_signature(call_conv: CallConv, ptr: Type) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(ptr));
    for _ in 0..3 {
        sig.params.push(AbiParam::new(types::I32));
    }
    sig
}

/// The target of a `CALL` that is known at translation time: the preceding `CONST`, provided
/// control cannot reach the `CALL` or `JUMP` at `i` from elsewhere.
pub(crate) fn static_operand(code: &[Instruction], i: usize) -> Option<i32> {
    if i == 0 || code[i].is_jump_target() {
        return None;
    }
    let prev = code[i - 1];
    if prev.op == Opcode::Const {
        Some(prev.value)
    } else {
        None
    }
}

enum Callee {
    Direct(FuncRef),
    Indirect(Value),
}

pub(crate) struct FunctionTranslator<'a> {
    builder: FunctionBuilder<'a>,
    module: &'a Module,
    code: &'a [Instruction],
    spec: &'a FunctionSpec,
    /// Direct-call references, keyed by the callee's entry instruction.
    callees: &'a HashMap<usize, FuncRef>,
    ptr: Type,
    flags: MemFlags,
    ctx: Value,
    memory: Value,
    ps: Variable,
    slots: Vec<Variable>,
    blocks: HashMap<usize, Block>,
    native_sig: SigRef,
    syscall_sig: SigRef,
    block_copy_sig: SigRef,
}

impl<'a> FunctionTranslator<'a> {
    pub(crate) fn new(
        func: &'a mut Function,
        fctx: &'a mut FunctionBuilderContext,
        module: &'a Module,
        spec: &'a FunctionSpec,
        callees: &'a HashMap<usize, FuncRef>,
        ptr: Type,
    ) -> Self {
        let call_conv = func.signature.call_conv;
        let mut builder = FunctionBuilder::new(func, fctx);
        let native_sig = builder.import_signature(native_signature(call_conv, ptr));
        let syscall_sig = builder.import_signature(syscall_signature(call_conv, ptr));
        let block_copy_sig = builder.import_signature(block_copy_signature(call_conv, ptr));

        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        let ctx = builder.block_params(entry)[0];
        let ps_in = builder.block_params(entry)[1];

        let mut flags = MemFlags::trusted();
        flags.set_endianness(Endianness::Little);

        let ps = Variable::from_u32(0);
        builder.declare_var(ps, types::I32);
        builder.def_var(ps, ps_in);
        let zero = builder.ins().iconst(types::I32, 0);
        let slots: Vec<Variable> = (0..=PROC_OPSTACK_SIZE)
            .map(|n| {
                let var = Variable::from_u32(n as u32 + 1);
                builder.declare_var(var, types::I32);
                builder.def_var(var, zero);
                var
            })
            .collect();
        let memory = builder
            .ins()
            .load(ptr, flags, ctx, VmCtx::offset_memory());

        let code = module.instructions();
        let mut blocks = HashMap::new();
        for i in spec.entry..spec.end {
            if code[i].is_jump_target() {
                blocks.insert(i, builder.create_block());
            }
        }

        FunctionTranslator {
            builder,
            module,
            code,
            spec,
            callees,
            ptr,
            flags,
            ctx,
            memory,
            ps,
            slots,
            blocks,
            native_sig,
            syscall_sig,
            block_copy_sig,
        }
    }

    pub(crate) fn translate(mut self) {
        let mut terminated = false;
        let mut i = self.spec.entry;
        while i < self.spec.end {
            if let Some(&block) = self.blocks.get(&i) {
                if !terminated {
                    self.builder.ins().jump(block, &[]);
                }
                self.builder.switch_to_block(block);
                terminated = false;
            } else if terminated {
                // unreachable unless something jumps here, which the verifier rules out
                let dead = self.builder.create_block();
                self.builder.switch_to_block(dead);
                terminated = false;
            }

            if let Some(mop) = fusion::fused_at(&self.code[..self.spec.end], i) {
                self.macro_op(mop);
                i += mop.len();
                continue;
            }
            terminated = self.instruction(i);
            i += 1;
        }
        if !terminated {
            self.fault(FaultCode::IllegalInstruction, self.spec.end - 1);
        }
        self.builder.seal_all_blocks();
        self.builder.finalize();
    }

    fn iconst(&mut self, value: i32) -> Value {
        // narrow immediates must be zero-extended
        self.builder.ins().iconst(types::I32, value as u32 as i64)
    }

    fn get(&mut self, slot: usize) -> Value {
        self.builder.use_var(self.slots[slot])
    }

    fn set(&mut self, slot: usize, value: Value) {
        self.builder.def_var(self.slots[slot], value);
    }

    fn ctx_load(&mut self, ty: Type, offset: i32) -> Value {
        self.builder.ins().load(ty, self.flags, self.ctx, offset)
    }

    fn ctx_store(&mut self, value: Value, offset: i32) {
        self.builder.ins().store(self.flags, value, self.ctx, offset);
    }

    /// Host address of module address `addr`, masked into the segment and aligned down.
    fn effective(&mut self, addr: Value, align: u32) -> Value {
        let mask = self.module.data_mask() & !(align - 1);
        let mask = self.iconst(mask as i32);
        let masked = self.builder.ins().band(addr, mask);
        let offset = self.builder.ins().uextend(self.ptr, masked);
        self.builder.ins().iadd(self.memory, offset)
    }

    fn load(&mut self, addr: Value, width: u32) -> Value {
        let p = self.effective(addr, width);
        let flags = self.flags;
        match width {
            1 => self.builder.ins().uload8(types::I32, flags, p, 0),
            2 => self.builder.ins().uload16(types::I32, flags, p, 0),
            _ => self.builder.ins().load(types::I32, flags, p, 0),
        }
    }

    fn store(&mut self, addr: Value, value: Value, width: u32) {
        let p = self.effective(addr, width);
        let flags = self.flags;
        match width {
            1 => self.builder.ins().istore8(flags, value, p, 0),
            2 => self.builder.ins().istore16(flags, value, p, 0),
            _ => self.builder.ins().store(flags, value, p, 0),
        };
    }

    fn local_addr(&mut self, offset: i32) -> Value {
        let ps = self.builder.use_var(self.ps);
        let offset = self.iconst(offset);
        self.builder.ins().iadd(ps, offset)
    }

    /// Records `code` at `pc` and returns from the function.
    fn fault(&mut self, code: FaultCode, pc: usize) {
        let code = self.iconst(code as i32);
        self.ctx_store(code, VmCtx::offset_fault());
        let pc = self.iconst(pc as i32);
        self.ctx_store(pc, VmCtx::offset_fault_pc());
        let zero = self.iconst(0);
        self.builder.ins().return_(&[zero]);
    }

    fn fault_if(&mut self, cond: Value, code: FaultCode, pc: usize) {
        let fault = self.builder.create_block();
        let ok = self.builder.create_block();
        self.builder.set_cold_block(fault);
        self.builder.ins().brif(cond, fault, &[], ok, &[]);
        self.builder.switch_to_block(fault);
        self.fault(code, pc);
        self.builder.switch_to_block(ok);
    }

    /// Returns immediately if a callee or the host recorded a fault.
    fn return_if_faulted(&mut self) {
        let fault = self.ctx_load(types::I32, VmCtx::offset_fault());
        let exit = self.builder.create_block();
        let ok = self.builder.create_block();
        self.builder.set_cold_block(exit);
        self.builder.ins().brif(fault, exit, &[], ok, &[]);
        self.builder.switch_to_block(exit);
        let zero = self.iconst(0);
        self.builder.ins().return_(&[zero]);
        self.builder.switch_to_block(ok);
    }

    fn bump_counter(&mut self, counters: Value, offset: i32, amount: Value) {
        let flags = self.flags;
        let count = self.builder.ins().load(types::I32, flags, counters, offset);
        let count = self.builder.ins().iadd(count, amount);
        self.builder.ins().store(flags, count, counters, offset);
    }

    fn macro_op(&mut self, mop: MacroOp) {
        match mop {
            MacroOp::SelfCopy { .. } => (),
            MacroOp::ReadModifyWrite { local, op, operand } => {
                let addr = self.local_addr(local);
                let p = self.effective(addr, 4);
                let flags = self.flags;
                let value = self.builder.ins().load(types::I32, flags, p, 0);
                let operand = self.iconst(operand);
                let result = match op {
                    Opcode::Add => self.builder.ins().iadd(value, operand),
                    Opcode::Sub => self.builder.ins().isub(value, operand),
                    Opcode::Band => self.builder.ins().band(value, operand),
                    _ => self.builder.ins().bor(value, operand),
                };
                self.builder.ins().store(flags, result, p, 0);
            }
        }
    }

    /// Translates instruction `i`; returns true if it ended the current block.
    fn instruction(&mut self, i: usize) -> bool {
        let ins = self.code[i];
        let d = ins.depth();

        macro_rules! binop {
            ($method:ident) => {{
                let b = self.get(d - 1);
                let a = self.get(d - 2);
                let r = self.builder.ins().$method(a, b);
                self.set(d - 2, r);
            }};
        }
        macro_rules! fbinop {
            ($method:ident) => {{
                let b = self.get(d - 1);
                let a = self.get(d - 2);
                let fa = self.builder.ins().bitcast(types::F32, MemFlags::new(), a);
                let fb = self.builder.ins().bitcast(types::F32, MemFlags::new(), b);
                let fr = self.builder.ins().$method(fa, fb);
                let r = self.builder.ins().bitcast(types::I32, MemFlags::new(), fr);
                self.set(d - 2, r);
            }};
        }

        match ins.op {
            Opcode::Undef => {
                self.fault(FaultCode::IllegalInstruction, i);
                return true;
            }
            Opcode::Ignore | Opcode::Pop => (),
            Opcode::Break => {
                let counter = self.ctx_load(self.ptr, VmCtx::offset_break_count());
                let one = self.iconst(1);
                self.bump_counter(counter, 0, one);
            }
            Opcode::Enter => self.enter(i, ins.value),
            Opcode::Leave => {
                let ps = self.builder.use_var(self.ps);
                let n = self.iconst(ins.value);
                let ps = self.builder.ins().iadd(ps, n);
                self.builder.def_var(self.ps, ps);
                let size = self.iconst(self.module.segment_size() as i32);
                let over = self.builder.ins().icmp(IntCC::SignedGreaterThan, ps, size);
                self.fault_if(over, FaultCode::StackUnderflow, i);
                let result = self.get(d - 1);
                self.builder.ins().return_(&[result]);
                return true;
            }
            Opcode::Call => self.call(i, d),
            Opcode::Push => {
                let zero = self.iconst(0);
                self.set(d, zero);
            }
            Opcode::Const => {
                let v = self.iconst(ins.value);
                self.set(d, v);
            }
            Opcode::Local => {
                let addr = self.local_addr(ins.value);
                self.set(d, addr);
            }
            Opcode::Jump => {
                self.jump(i, d);
                return true;
            }

            Opcode::Eq => return self.branch_int(i, d, IntCC::Equal),
            Opcode::Ne => return self.branch_int(i, d, IntCC::NotEqual),
            Opcode::Lti => return self.branch_int(i, d, IntCC::SignedLessThan),
            Opcode::Lei => return self.branch_int(i, d, IntCC::SignedLessThanOrEqual),
            Opcode::Gti => return self.branch_int(i, d, IntCC::SignedGreaterThan),
            Opcode::Gei => return self.branch_int(i, d, IntCC::SignedGreaterThanOrEqual),
            Opcode::Ltu => return self.branch_int(i, d, IntCC::UnsignedLessThan),
            Opcode::Leu => return self.branch_int(i, d, IntCC::UnsignedLessThanOrEqual),
            Opcode::Gtu => return self.branch_int(i, d, IntCC::UnsignedGreaterThan),
            Opcode::Geu => return self.branch_int(i, d, IntCC::UnsignedGreaterThanOrEqual),
            Opcode::Eqf => return self.branch_float(i, d, FloatCC::Equal),
            Opcode::Nef => return self.branch_float(i, d, FloatCC::NotEqual),
            Opcode::Ltf => return self.branch_float(i, d, FloatCC::LessThan),
            Opcode::Lef => return self.branch_float(i, d, FloatCC::LessThanOrEqual),
            Opcode::Gtf => return self.branch_float(i, d, FloatCC::GreaterThan),
            Opcode::Gef => return self.branch_float(i, d, FloatCC::GreaterThanOrEqual),

            Opcode::Load1 | Opcode::Load2 | Opcode::Load4 => {
                let width = match ins.op {
                    Opcode::Load1 => 1,
                    Opcode::Load2 => 2,
                    _ => 4,
                };
                let addr = self.get(d - 1);
                let v = self.load(addr, width);
                self.set(d - 1, v);
            }
            Opcode::Store1 | Opcode::Store2 | Opcode::Store4 => {
                let width = match ins.op {
                    Opcode::Store1 => 1,
                    Opcode::Store2 => 2,
                    _ => 4,
                };
                let value = self.get(d - 1);
                let addr = self.get(d - 2);
                self.store(addr, value, width);
            }
            Opcode::Arg => {
                let value = self.get(d - 1);
                let addr = self.local_addr(ins.value);
                self.store(addr, value, 4);
            }
            Opcode::BlockCopy => {
                let src = self.get(d - 1);
                let dest = self.get(d - 2);
                let count = self.iconst(ins.value);
                let helper = self.ctx_load(self.ptr, VmCtx::offset_block_copy());
                let ctx = self.ctx;
                self.builder
                    .ins()
                    .call_indirect(self.block_copy_sig, helper, &[ctx, dest, src, count]);
            }

            Opcode::Sex8 | Opcode::Sex16 => {
                let narrow = if ins.op == Opcode::Sex8 {
                    types::I8
                } else {
                    types::I16
                };
                let v = self.get(d - 1);
                let v = self.builder.ins().ireduce(narrow, v);
                let v = self.builder.ins().sextend(types::I32, v);
                self.set(d - 1, v);
            }
            Opcode::Negi => {
                let v = self.get(d - 1);
                let v = self.builder.ins().ineg(v);
                self.set(d - 1, v);
            }
            Opcode::Add => binop!(iadd),
            Opcode::Sub => binop!(isub),
            Opcode::Muli | Opcode::Mulu => binop!(imul),
            Opcode::Divi | Opcode::Modi => self.signed_division(i, d, ins.op),
            Opcode::Divu | Opcode::Modu => {
                let b = self.get(d - 1);
                let a = self.get(d - 2);
                let zero = self.iconst(0);
                let is_zero = self.builder.ins().icmp(IntCC::Equal, b, zero);
                self.fault_if(is_zero, FaultCode::DivideByZero, i);
                let r = if ins.op == Opcode::Divu {
                    self.builder.ins().udiv(a, b)
                } else {
                    self.builder.ins().urem(a, b)
                };
                self.set(d - 2, r);
            }
            Opcode::Band => binop!(band),
            Opcode::Bor => binop!(bor),
            Opcode::Bxor => binop!(bxor),
            Opcode::Bcom => {
                let v = self.get(d - 1);
                let v = self.builder.ins().bnot(v);
                self.set(d - 1, v);
            }
            // shift amounts are taken modulo 32, as in the interpreter
            Opcode::Lsh => binop!(ishl),
            Opcode::Rshi => binop!(sshr),
            Opcode::Rshu => binop!(ushr),

            Opcode::Negf => {
                let v = self.get(d - 1);
                let f = self.builder.ins().bitcast(types::F32, MemFlags::new(), v);
                let f = self.builder.ins().fneg(f);
                let v = self.builder.ins().bitcast(types::I32, MemFlags::new(), f);
                self.set(d - 1, v);
            }
            Opcode::Addf => fbinop!(fadd),
            Opcode::Subf => fbinop!(fsub),
            Opcode::Mulf => fbinop!(fmul),
            Opcode::Divf => fbinop!(fdiv),
            Opcode::Cvif => {
                let v = self.get(d - 1);
                let f = self.builder.ins().fcvt_from_sint(types::F32, v);
                let v = self.builder.ins().bitcast(types::I32, MemFlags::new(), f);
                self.set(d - 1, v);
            }
            Opcode::Cvfi => {
                let v = self.get(d - 1);
                let f = self.builder.ins().bitcast(types::F32, MemFlags::new(), v);
                let v = self.builder.ins().fcvt_to_sint_sat(types::I32, f);
                self.set(d - 1, v);
            }
        }
        false
    }

    fn enter(&mut self, i: usize, frame: i32) {
        if let Some(func) = self.module.function_by_entry(i) {
            let ordinal = func.ordinal;
            let one = self.iconst(1);
            let counts = self.ctx_load(self.ptr, VmCtx::offset_call_counts());
            self.bump_counter(counts, (ordinal * 4) as i32, one);

            let break_function = self.ctx_load(types::I32, VmCtx::offset_break_function());
            let this = self.iconst(ordinal as i32);
            let hit = self.builder.ins().icmp(IntCC::Equal, break_function, this);
            let hit = self.builder.ins().uextend(types::I32, hit);
            let counter = self.ctx_load(self.ptr, VmCtx::offset_break_count());
            self.bump_counter(counter, 0, hit);
        }

        let ps = self.builder.use_var(self.ps);
        let n = self.iconst(frame);
        let ps = self.builder.ins().isub(ps, n);
        self.builder.def_var(self.ps, ps);
        let bottom = self.iconst(self.module.stack_bottom());
        let below = self.builder.ins().icmp(IntCC::SignedLessThan, ps, bottom);
        self.fault_if(below, FaultCode::StackOverflow, i);
    }

    fn signed_division(&mut self, i: usize, d: usize, op: Opcode) {
        let b = self.get(d - 1);
        let a = self.get(d - 2);
        let zero = self.iconst(0);
        let is_zero = self.builder.ins().icmp(IntCC::Equal, b, zero);
        self.fault_if(is_zero, FaultCode::DivideByZero, i);

        // i32::MIN / -1 wraps instead of trapping
        let min = self.iconst(i32::MIN);
        let minus_one = self.iconst(-1);
        let one = self.iconst(1);
        let a_min = self.builder.ins().icmp(IntCC::Equal, a, min);
        let b_neg = self.builder.ins().icmp(IntCC::Equal, b, minus_one);
        let overflow = self.builder.ins().band(a_min, b_neg);
        let divisor = self.builder.ins().select(overflow, one, b);
        let r = if op == Opcode::Divi {
            self.builder.ins().sdiv(a, divisor)
        } else {
            self.builder.ins().srem(a, divisor)
        };
        self.set(d - 2, r);
    }

    /// Emits a conditional branch and positions the builder at the fall-through. Returns true if
    /// the fall-through already has its own block, which the main loop switches to.
    fn branch_to(&mut self, i: usize, cond: Value, target: usize) -> bool {
        let taken = self.blocks[&target];
        match self.blocks.get(&(i + 1)) {
            Some(&next) => {
                self.builder.ins().brif(cond, taken, &[], next, &[]);
                true
            }
            None => {
                let next = self.builder.create_block();
                self.builder.ins().brif(cond, taken, &[], next, &[]);
                self.builder.switch_to_block(next);
                false
            }
        }
    }

    fn branch_int(&mut self, i: usize, d: usize, cc: IntCC) -> bool {
        let b = self.get(d - 1);
        let a = self.get(d - 2);
        let cond = self.builder.ins().icmp(cc, a, b);
        self.branch_to(i, cond, self.code[i].value as usize)
    }

    fn branch_float(&mut self, i: usize, d: usize, cc: FloatCC) -> bool {
        let b = self.get(d - 1);
        let a = self.get(d - 2);
        let fa = self.builder.ins().bitcast(types::F32, MemFlags::new(), a);
        let fb = self.builder.ins().bitcast(types::F32, MemFlags::new(), b);
        let cond = self.builder.ins().fcmp(cc, fa, fb);
        self.branch_to(i, cond, self.code[i].value as usize)
    }

    fn jump(&mut self, i: usize, d: usize) {
        if let Some(target) = static_operand(self.code, i) {
            if self.module.jump_allowed(i, target) {
                let block = self.blocks[&(target as usize)];
                self.builder.ins().jump(block, &[]);
            } else {
                self.fault(FaultCode::BadJumpTarget, i);
            }
            return;
        }

        let target = self.get(d - 1);
        let invalid = self.builder.create_block();
        self.builder.set_cold_block(invalid);
        let mut switch = Switch::new();
        for t in self.spec.entry..self.spec.end {
            if self.module.jump_allowed(i, t as i32) {
                switch.set_entry(t as u128, self.blocks[&t]);
            }
        }
        switch.emit(&mut self.builder, target, invalid);
        self.builder.switch_to_block(invalid);
        self.fault(FaultCode::BadJumpTarget, i);
    }

    fn call(&mut self, i: usize, d: usize) {
        let target = self.get(d - 1);
        let ps = self.builder.use_var(self.ps);
        let return_pc = self.iconst(i as i32 + 1);
        self.store(ps, return_pc, 4);

        if let Some(t) = static_operand(self.code, i) {
            if t < 0 {
                let number = self.iconst(-1 - t);
                self.syscall(ps, number, d);
            } else if let Some(&fref) = self.callees.get(&(t as usize)) {
                self.native_call(Callee::Direct(fref), ps, d, i);
            } else {
                self.fault(FaultCode::BadCallTarget, i);
                let dead = self.builder.create_block();
                self.builder.switch_to_block(dead);
            }
            return;
        }

        let sys = self.builder.create_block();
        let func = self.builder.create_block();
        let join = self.builder.create_block();
        let zero = self.iconst(0);
        let negative = self.builder.ins().icmp(IntCC::SignedLessThan, target, zero);
        self.builder.ins().brif(negative, sys, &[], func, &[]);

        self.builder.switch_to_block(sys);
        let minus_one = self.iconst(-1);
        let number = self.builder.ins().isub(minus_one, target);
        self.syscall(ps, number, d);
        self.builder.ins().jump(join, &[]);

        self.builder.switch_to_block(func);
        let count = self.iconst(self.code.len() as i32);
        let out_of_range = self
            .builder
            .ins()
            .icmp(IntCC::UnsignedGreaterThanOrEqual, target, count);
        self.fault_if(out_of_range, FaultCode::BadCallTarget, i);
        let entry_points = self.ctx_load(self.ptr, VmCtx::offset_entry_points());
        let index = self.builder.ins().uextend(self.ptr, target);
        let width = self.builder.ins().iconst(self.ptr, self.ptr.bytes() as i64);
        let offset = self.builder.ins().imul(index, width);
        let slot = self.builder.ins().iadd(entry_points, offset);
        let callee = self.builder.ins().load(self.ptr, self.flags, slot, 0);
        let null = self.builder.ins().iconst(self.ptr, 0);
        let is_null = self.builder.ins().icmp(IntCC::Equal, callee, null);
        self.fault_if(is_null, FaultCode::BadCallTarget, i);
        self.native_call(Callee::Indirect(callee), ps, d, i);
        self.builder.ins().jump(join, &[]);

        self.builder.switch_to_block(join);
    }

    fn syscall(&mut self, ps: Value, number: Value, d: usize) {
        let helper = self.ctx_load(self.ptr, VmCtx::offset_syscall());
        let ctx = self.ctx;
        let call = self
            .builder
            .ins()
            .call_indirect(self.syscall_sig, helper, &[ctx, ps, number]);
        let result = self.builder.inst_results(call)[0];
        self.set(d - 1, result);
        self.return_if_faulted();
    }

    fn native_call(&mut self, callee: Callee, ps: Value, d: usize, i: usize) {
        let depth = self.ctx_load(types::I32, VmCtx::offset_frame_depth());
        let limit = self.iconst(MAX_FRAME_DEPTH as i32);
        let too_deep = self
            .builder
            .ins()
            .icmp(IntCC::UnsignedGreaterThanOrEqual, depth, limit);
        self.fault_if(too_deep, FaultCode::CallDepthExceeded, i);
        let one = self.iconst(1);
        let deeper = self.builder.ins().iadd(depth, one);
        self.ctx_store(deeper, VmCtx::offset_frame_depth());

        let ctx = self.ctx;
        let call = match callee {
            Callee::Direct(fref) => self.builder.ins().call(fref, &[ctx, ps]),
            Callee::Indirect(ptr) => self
                .builder
                .ins()
                .call_indirect(self.native_sig, ptr, &[ctx, ps]),
        };
        let result = self.builder.inst_results(call)[0];
        self.ctx_store(depth, VmCtx::offset_frame_depth());
        self.set(d - 1, result);
        self.return_if_faulted();
    }
}
