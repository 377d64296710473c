use crate::alloc::{Counters, DataSegment};
use crate::compiled;
use crate::config::{Config, Engine};
use crate::error::Error;
use crate::interpreter;
use crate::vmctx::{SyscallArgs, SyscallHandler, Vmctx};
use qvm_module::{FaultCode, Module, MAX_SYSCALL_ARGS, MAX_VMMAIN_ARGS};
use qvmc::{CompiledModule, Compiler};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, debug_span, info, trace, warn};

/// Bytes reserved below the caller's program stack for a host invocation: the return marker, a
/// zero word, and the argument slots.
const INVOCATION_FRAME: i32 = 8 + 4 * MAX_VMMAIN_ARGS as i32;

/// Details about a sandbox violation that stopped an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultDetails {
    pub kind: FaultCode,
    /// Instruction index of the faulting instruction.
    pub pc: usize,
    /// Symbol of the function containing `pc`, if the module has a symbol map.
    pub function: Option<String>,
}

impl fmt::Display for FaultDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at instruction {}", self.kind, self.pc)?;
        if let Some(ref name) = self.function {
            write!(f, " (in {})", name)?;
        }
        Ok(())
    }
}

/// The lifecycle state of an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// The instance can be invoked.
    Ready,
    /// A fault stopped the instance; it refuses further invocations.
    Faulted(FaultDetails),
}

/// One entry of the syscall log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyscallRecord {
    pub number: i32,
    pub args: SyscallArgs,
    /// `None` if the handler ended the invocation.
    pub result: Option<i32>,
}

pub(crate) enum ExecEngine {
    Interpreted,
    Compiled(Arc<CompiledModule>),
}

/// A module loaded into its own data segment, ready to be invoked.
///
/// Instances are `Send` so they may move between threads, but a single instance never runs on
/// two threads at once.
pub struct Instance {
    name: String,
    pub(crate) module: Arc<Module>,
    config: Config,
    pub(crate) engine: ExecEngine,
    pub(crate) memory: DataSegment,
    pub(crate) counters: Counters,
    /// Current top of the program stack; invocations start below it.
    pub(crate) program_stack: i32,
    call_level: u32,
    /// Function ordinal whose entries count as breakpoint hits, or -1.
    pub(crate) break_function: i32,
    state: State,
    syscall_log: Option<VecDeque<SyscallRecord>>,
}

impl Instance {
    /// Creates an instance, generating native code first if the configured engine asks for it.
    pub fn new(name: &str, module: Arc<Module>, config: &Config) -> Result<Instance, Error> {
        config.validate()?;
        let engine = match config.engine {
            Engine::Interpreted => ExecEngine::Interpreted,
            Engine::Compiled => {
                let native = Compiler::new(config.opt_level)?.compile(&module)?;
                ExecEngine::Compiled(Arc::new(native))
            }
            Engine::Auto => match Compiler::new(config.opt_level).and_then(|c| c.compile(&module))
            {
                Ok(native) => ExecEngine::Compiled(Arc::new(native)),
                Err(e) => {
                    info!(vm = name, error = %e, "native code unavailable, using the interpreter");
                    ExecEngine::Interpreted
                }
            },
        };
        Instance::with_engine(name, module, engine, config)
    }

    /// Creates an instance that runs native code compiled earlier for the same module, so several
    /// instances can share one compilation.
    pub fn with_native(
        name: &str,
        module: Arc<Module>,
        native: Arc<CompiledModule>,
        config: &Config,
    ) -> Result<Instance, Error> {
        config.validate()?;
        if !native.is_compiled_from(&module) {
            return Err(Error::InvalidArgument(
                "native code was compiled for a different module",
            ));
        }
        Instance::with_engine(name, module, ExecEngine::Compiled(native), config)
    }

    fn with_engine(
        name: &str,
        module: Arc<Module>,
        engine: ExecEngine,
        config: &Config,
    ) -> Result<Instance, Error> {
        let memory = DataSegment::for_module(&module)?;
        let counters = Counters::new(module.functions().len())?;
        let program_stack = memory.size() as i32;
        let syscall_log = match config.syscall_log_capacity {
            0 => None,
            n => Some(VecDeque::with_capacity(n)),
        };
        let inst = Instance {
            name: name.to_owned(),
            module,
            config: *config,
            engine,
            memory,
            counters,
            program_stack,
            call_level: 0,
            break_function: -1,
            state: State::Ready,
            syscall_log,
        };
        debug!(
            vm = name,
            engine = ?inst.engine(),
            segment = inst.memory.size(),
            functions = inst.module.functions().len(),
            "instance created"
        );
        Ok(inst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The engine actually in use; never `Engine::Auto`.
    pub fn engine(&self) -> Engine {
        match self.engine {
            ExecEngine::Interpreted => Engine::Interpreted,
            ExecEngine::Compiled(_) => Engine::Compiled,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.state, State::Faulted(_))
    }

    /// The whole data segment.
    pub fn memory(&self) -> &[u8] {
        self.memory.as_slice()
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.as_mut_slice()
    }

    /// Current nesting depth of host invocations.
    pub fn call_level(&self) -> u32 {
        self.call_level
    }

    pub fn program_stack(&self) -> i32 {
        self.program_stack
    }

    /// Runs the function starting at instruction `entry` with up to `MAX_VMMAIN_ARGS` arguments.
    pub fn call<const N: usize>(
        &mut self,
        handler: &mut dyn SyscallHandler,
        entry: usize,
        args: [i32; N],
    ) -> Result<i32, Error> {
        #[allow(clippy::let_unit_value)]
        let () = ArgCount::<N>::OK;
        self.invoke(handler, entry, &args)
    }

    /// Runs the function named `name` in the module's symbol map.
    pub fn call_by_name<const N: usize>(
        &mut self,
        handler: &mut dyn SyscallHandler,
        name: &str,
        args: [i32; N],
    ) -> Result<i32, Error> {
        let entry = self
            .module
            .symbol_to_value(name)
            .ok_or_else(|| Error::SymbolNotFound(name.to_owned()))?;
        self.call(handler, entry, args)
    }

    fn invoke(
        &mut self,
        handler: &mut dyn SyscallHandler,
        entry: usize,
        args: &[i32],
    ) -> Result<i32, Error> {
        if let State::Faulted(ref details) = self.state {
            return Err(Error::InstanceFaulted(details.clone()));
        }
        if self.module.function_by_entry(entry).is_none() {
            return Err(Error::FuncNotFound(entry));
        }

        let span = debug_span!("vm", name = %self.name, level = self.call_level + 1);
        let _enter = span.enter();

        if self.call_level >= self.config.max_call_level {
            return Err(self.fault(FaultCode::CallLevelExceeded, entry));
        }
        let saved = self.program_stack;
        let ps = saved - INVOCATION_FRAME;
        if ps < self.module.stack_bottom() {
            return Err(self.fault(FaultCode::StackOverflow, entry));
        }
        self.memory.store4(ps, -1);
        self.memory.store4(ps + 4, 0);
        for i in 0..MAX_VMMAIN_ARGS {
            let arg = args.get(i).copied().unwrap_or(0);
            self.memory.store4(ps + 8 + 4 * i as i32, arg);
        }

        self.call_level += 1;
        let result = match self.engine {
            ExecEngine::Interpreted => interpreter::run(self, handler, entry, ps),
            ExecEngine::Compiled(ref native) => {
                let native = native.clone();
                compiled::run(self, &native, handler, entry, ps)
            }
        };
        self.call_level -= 1;
        self.program_stack = saved;
        result
    }

    /// Services syscall `number` for a module whose program stack is at `ps`.
    ///
    /// Both engines come through here. The module's outgoing argument area starts at `ps + 8`;
    /// the number is written into the word below it so the handler sees one contiguous block.
    pub(crate) fn syscall(
        &mut self,
        handler: &mut dyn SyscallHandler,
        ps: i32,
        number: i32,
    ) -> Result<i32, Error> {
        self.memory.store4(ps + 4, number);
        let mut words = [0; MAX_SYSCALL_ARGS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.memory.load4(ps + 4 + 4 * i as i32);
        }
        let args = SyscallArgs(words);

        let saved = self.program_stack;
        self.program_stack = ps - 4;
        let result = handler.syscall(&mut Vmctx::new(self), &args);
        self.program_stack = saved;

        if self.config.trace_syscalls {
            trace!(vm = %self.name, number, ?args, result = ?result.as_ref().ok(), "syscall");
        }
        if let Some(ref mut log) = self.syscall_log {
            if log.len() == self.config.syscall_log_capacity {
                log.pop_front();
            }
            log.push_back(SyscallRecord {
                number,
                args,
                result: result.as_ref().ok().copied(),
            });
        }
        if let State::Faulted(ref details) = self.state {
            // a nested invocation faulted and the handler swallowed the error
            return Err(Error::RuntimeFault(details.clone()));
        }
        result
    }

    /// Records a fault at `pc`, after which the instance refuses to run.
    pub(crate) fn fault(&mut self, kind: FaultCode, pc: usize) -> Error {
        let function = self
            .module
            .function_at(pc)
            .and_then(|f| self.module.symbols().at(f.entry))
            .map(|s| s.name.clone());
        let details = FaultDetails { kind, pc, function };
        warn!(vm = %self.name, location = %self.module.symbolicate(pc), "{}", details);
        self.state = State::Faulted(details.clone());
        Error::RuntimeFault(details)
    }

    pub fn symbolicate(&self, pc: usize) -> String {
        self.module.symbolicate(pc)
    }

    /// Name of the function containing `pc`.
    pub fn function_symbol(&self, pc: usize) -> Option<&str> {
        let f = self.module.function_at(pc)?;
        self.module.symbols().at(f.entry).map(|s| s.name.as_str())
    }

    /// Counts entries into the function starting at `entry` as breakpoint hits. `None` clears it.
    pub fn set_break_function(&mut self, entry: Option<usize>) -> Result<(), Error> {
        self.break_function = match entry {
            None => -1,
            Some(entry) => match self.module.function_by_entry(entry) {
                Some(f) => f.ordinal as i32,
                None => return Err(Error::FuncNotFound(entry)),
            },
        };
        Ok(())
    }

    /// Times the break function was entered, plus `BREAK` instructions executed.
    pub fn break_count(&self) -> u32 {
        self.counters.break_count()
    }

    /// The most recent syscalls, oldest first. Empty unless the log is enabled.
    pub fn syscall_log(&self) -> impl Iterator<Item = &SyscallRecord> {
        self.syscall_log.iter().flat_map(|log| log.iter())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        debug!(vm = %self.name, "instance dropped");
    }
}

struct ArgCount<const N: usize>;

impl<const N: usize> ArgCount<N> {
    const OK: () = assert!(N <= MAX_VMMAIN_ARGS, "too many arguments for a module entry point");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmctx::NoSyscalls;
    use qvm_module::builder::ImageBuilder;
    use qvm_module::Opcode;

    const INTERP: Config = Config::default().with_engine(Engine::Interpreted);

    fn instance(b: &ImageBuilder, config: &Config) -> Instance {
        Instance::new("test", Arc::new(b.module().unwrap()), config).unwrap()
    }

    #[test]
    fn arguments_are_laid_out_below_the_stack() {
        let mut b = ImageBuilder::new();
        // vmMain(a, b) = a - b; arguments sit at frame + 8
        b.function("vmMain", 8)
            .local(16)
            .op(Opcode::Load4)
            .local(20)
            .op(Opcode::Load4)
            .op(Opcode::Sub)
            .leave();
        let mut inst = instance(&b, &INTERP);
        assert_eq!(inst.call(&mut NoSyscalls, 0, [10, 3]).unwrap(), 7);
        let ps = inst.memory.size() as i32 - INVOCATION_FRAME;
        assert_eq!(inst.memory.load4(ps), -1);
        assert_eq!(inst.memory.load4(ps + 8), 10);
        assert_eq!(inst.program_stack(), inst.memory.size() as i32);
    }

    #[test]
    fn unknown_entry_and_symbol() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8).constant(1).leave();
        let mut inst = instance(&b, &INTERP);
        assert!(matches!(
            inst.call(&mut NoSyscalls, 1, []),
            Err(Error::FuncNotFound(1))
        ));
        assert!(matches!(
            inst.call_by_name(&mut NoSyscalls, "missing", []),
            Err(Error::SymbolNotFound(_))
        ));
        assert_eq!(inst.call_by_name(&mut NoSyscalls, "vmMain", []).unwrap(), 1);
        assert!(!inst.is_faulted());
    }

    #[test]
    fn faulted_instance_refuses_calls() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8).op(Opcode::Undef).constant(0).leave();
        let mut inst = instance(&b, &INTERP);
        let fault = match inst.call(&mut NoSyscalls, 0, []) {
            Err(Error::RuntimeFault(details)) => details,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(fault.kind, FaultCode::IllegalInstruction);
        assert_eq!(fault.pc, 1);
        assert_eq!(fault.function.as_deref(), Some("vmMain"));
        assert!(matches!(
            inst.call(&mut NoSyscalls, 0, []),
            Err(Error::InstanceFaulted(ref d)) if *d == fault
        ));
    }

    #[test]
    fn break_function_must_be_an_entry() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8).constant(1).leave();
        let mut inst = instance(&b, &INTERP);
        assert!(inst.set_break_function(Some(2)).is_err());
        inst.set_break_function(Some(0)).unwrap();
        inst.call(&mut NoSyscalls, 0, []).unwrap();
        inst.call(&mut NoSyscalls, 0, []).unwrap();
        assert_eq!(inst.break_count(), 2);
        inst.set_break_function(None).unwrap();
        inst.call(&mut NoSyscalls, 0, []).unwrap();
        assert_eq!(inst.break_count(), 2);
    }

    #[test]
    fn syscall_log_is_bounded() {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 16)
            .constant(5)
            .arg(8)
            .syscall(1)
            .op(Opcode::Pop)
            .syscall(2)
            .op(Opcode::Pop)
            .syscall(3)
            .leave();
        let mut inst = instance(&b, &INTERP.with_syscall_log_capacity(2));
        let mut handler =
            |_: &mut Vmctx<'_>, args: &SyscallArgs| -> Result<i32, Error> { Ok(args.number() * 10) };
        assert_eq!(inst.call(&mut handler, 0, []).unwrap(), 30);
        let log: Vec<_> = inst.syscall_log().map(|r| (r.number, r.result)).collect();
        assert_eq!(log, vec![(2, Some(20)), (3, Some(30))]);
        assert_eq!(inst.syscall_log().next().unwrap().args.arg(0), 5);
    }
}
