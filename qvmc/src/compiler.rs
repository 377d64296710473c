use crate::error::Error;
use crate::function::{native_signature, static_operand, FunctionTranslator};
use cranelift_codegen::ir::{FuncRef, UserFuncName};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context as ClifContext;
use cranelift_frontend::FunctionBuilderContext;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module as ClifModule};
use log::debug;
use qvm_module::{FunctionSpec, Instruction, Module, NativeFunction, Opcode};
use std::collections::HashMap;
use std::mem::{self, ManuallyDrop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    None,
    Speed,
    SpeedAndSize,
}

impl Default for OptLevel {
    fn default() -> OptLevel {
        OptLevel::Speed
    }
}

impl OptLevel {
    pub fn to_flag(&self) -> &str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Generates host code for verified modules.
pub struct Compiler {
    isa: OwnedTargetIsa,
    opt_level: OptLevel,
}

impl Compiler {
    pub fn new(opt_level: OptLevel) -> Result<Self, Error> {
        let mut flags_builder = settings::builder();
        flags_builder.enable("enable_verifier")?;
        flags_builder.set("opt_level", opt_level.to_flag())?;
        flags_builder.set("use_colocated_libcalls", "false")?;
        flags_builder.set("is_pic", "false")?;
        let isa = cranelift_native::builder()
            .map_err(Error::UnsupportedHost)?
            .finish(settings::Flags::new(flags_builder))?;
        Ok(Compiler { isa, opt_level })
    }

    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// Translates every function of `module` and links the result into executable memory.
    pub fn compile(&self, module: &Module) -> Result<CompiledModule, Error> {
        let builder = JITBuilder::with_isa(self.isa.clone(), cranelift_module::default_libcall_names());
        let mut jit = JITModule::new(builder);
        let ids = declare_functions(&mut jit, module)?;

        let mut ctx = jit.make_context();
        let mut fctx = FunctionBuilderContext::new();
        for (spec, &id) in module.functions().iter().zip(ids.iter()) {
            self.translate(&mut jit, &ids, module, spec, id, &mut ctx, &mut fctx)?;
            jit.define_function(id, &mut ctx)
                .map_err(|source| Error::FunctionDefinition {
                    function: module.symbolicate(spec.entry),
                    source,
                })?;
            jit.clear_context(&mut ctx);
        }
        jit.finalize_definitions()?;

        let mut entry_points = vec![0usize; module.instruction_count()].into_boxed_slice();
        for (spec, &id) in module.functions().iter().zip(ids.iter()) {
            entry_points[spec.entry] = jit.get_finalized_function(id) as usize;
        }
        debug!(
            "compiled {} functions ({} instructions) at opt level {}",
            ids.len(),
            module.instruction_count(),
            self.opt_level.to_flag()
        );
        Ok(CompiledModule {
            jit: ManuallyDrop::new(jit),
            entry_points,
            instructions: module.instructions().into(),
            segment_size: module.segment_size(),
        })
    }

    /// Renders the Cranelift IR of every function without generating machine code.
    pub fn clif(&self, module: &Module) -> Result<String, Error> {
        let builder = JITBuilder::with_isa(self.isa.clone(), cranelift_module::default_libcall_names());
        let mut jit = JITModule::new(builder);
        let ids = declare_functions(&mut jit, module)?;

        let mut out = String::new();
        let mut ctx = jit.make_context();
        let mut fctx = FunctionBuilderContext::new();
        for (spec, &id) in module.functions().iter().zip(ids.iter()) {
            self.translate(&mut jit, &ids, module, spec, id, &mut ctx, &mut fctx)?;
            out.push_str(&format!("; {}\n{}\n", module.symbolicate(spec.entry), ctx.func));
            jit.clear_context(&mut ctx);
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn translate(
        &self,
        jit: &mut JITModule,
        ids: &[FuncId],
        module: &Module,
        spec: &FunctionSpec,
        id: FuncId,
        ctx: &mut ClifContext,
        fctx: &mut FunctionBuilderContext,
    ) -> Result<(), Error> {
        ctx.func.signature = native_signature(jit.isa().default_call_conv(), jit.target_config().pointer_type());
        ctx.func.name = UserFuncName::user(0, id.as_u32());

        let code = module.instructions();
        let mut callees: HashMap<usize, FuncRef> = HashMap::new();
        for i in spec.entry..spec.end {
            if code[i].op != Opcode::Call {
                continue;
            }
            let target = match static_operand(code, i) {
                Some(t) if t >= 0 => t as usize,
                _ => continue,
            };
            if callees.contains_key(&target) {
                continue;
            }
            if let Some(callee) = module.function_by_entry(target) {
                let fref = jit.declare_func_in_func(ids[callee.ordinal], &mut ctx.func);
                callees.insert(target, fref);
            }
        }

        let ptr = jit.target_config().pointer_type();
        FunctionTranslator::new(&mut ctx.func, fctx, module, spec, &callees, ptr).translate();
        Ok(())
    }
}

fn declare_functions(jit: &mut JITModule, module: &Module) -> Result<Vec<FuncId>, Error> {
    let sig = native_signature(jit.isa().default_call_conv(), jit.target_config().pointer_type());
    module
        .functions()
        .iter()
        .map(|f| {
            let name = format!("qvm_fn_{}", f.ordinal);
            jit.declare_function(&name, Linkage::Local, &sig)
                .map_err(Error::from)
        })
        .collect()
}

/// Native code for one module, indexed by instruction.
pub struct CompiledModule {
    jit: ManuallyDrop<JITModule>,
    entry_points: Box<[usize]>,
    /// The verified code this was generated from. Function ordinals, frame layout and the data
    /// mask are all baked into the native code, so it may only run against the same module.
    instructions: Box<[Instruction]>,
    segment_size: u32,
}

impl CompiledModule {
    /// One slot per instruction: the address of the function starting there, or 0.
    pub fn entry_points(&self) -> &[usize] {
        &self.entry_points
    }

    /// Whether this code was generated from `module`, or from a module identical to it.
    pub fn is_compiled_from(&self, module: &Module) -> bool {
        self.segment_size == module.segment_size() && *self.instructions == *module.instructions()
    }

    pub fn function(&self, entry: usize) -> Option<NativeFunction> {
        match self.entry_points.get(entry) {
            Some(&0) | None => None,
            // safety: non-zero slots hold finalized functions with the native signature
            Some(&addr) => Some(unsafe { mem::transmute::<usize, NativeFunction>(addr) }),
        }
    }
}

impl Drop for CompiledModule {
    fn drop(&mut self) {
        // safety: function pointers handed out by `function` do not outlive `self`
        unsafe { ManuallyDrop::take(&mut self.jit).free_memory() }
    }
}

// safety: the code and data of a finalized module are never written again
unsafe impl Send for CompiledModule {}
unsafe impl Sync for CompiledModule {}

#[cfg(test)]
mod tests {
    use super::*;
    use qvm_module::builder::ImageBuilder;

    #[test]
    fn opt_level_flags() {
        assert_eq!(OptLevel::default(), OptLevel::Speed);
        assert_eq!(OptLevel::None.to_flag(), "none");
        assert_eq!(OptLevel::SpeedAndSize.to_flag(), "speed_and_size");
    }

    #[test]
    fn entry_points_cover_functions_only() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8).call("helper").leave();
        b.function("helper", 8).constant(7).leave();
        let module = b.module().unwrap();
        let compiled = Compiler::new(OptLevel::None).unwrap().compile(&module).unwrap();

        assert_eq!(compiled.entry_points().len(), module.instruction_count());
        for (i, &addr) in compiled.entry_points().iter().enumerate() {
            assert_eq!(addr != 0, module.function_by_entry(i).is_some(), "slot {}", i);
        }
        assert!(compiled.function(1).is_none());
        assert!(compiled.function(module.instruction_count()).is_none());
    }

    #[test]
    fn compiled_code_remembers_its_module() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8).constant(1).leave();
        let module = b.module().unwrap();
        let compiled = Compiler::new(OptLevel::None).unwrap().compile(&module).unwrap();
        assert!(compiled.is_compiled_from(&module));
        assert!(compiled.is_compiled_from(&b.module().unwrap()));

        // same length, different constant
        let mut other = ImageBuilder::new();
        other.function("vmMain", 8).constant(2).leave();
        assert!(!compiled.is_compiled_from(&other.module().unwrap()));

        // same code, bigger segment
        let mut bigger = ImageBuilder::new();
        bigger.bss(0x20000);
        bigger.function("vmMain", 8).constant(1).leave();
        let bigger = bigger.module().unwrap();
        assert_eq!(bigger.instructions(), module.instructions());
        assert!(!compiled.is_compiled_from(&bigger));
    }

    #[test]
    fn clif_names_each_function() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8).constant(1).leave();
        b.function("second", 8).constant(2).leave();
        let text = Compiler::new(OptLevel::Speed)
            .unwrap()
            .clif(&b.module().unwrap())
            .unwrap();
        assert!(text.contains("; vmMain"));
        assert!(text.contains("; second"));
        assert!(text.contains("function"));
    }
}
