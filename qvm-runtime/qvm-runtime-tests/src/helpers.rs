use qvm_module::builder::ImageBuilder;
use qvm_runtime::{
    Config, Engine, Error, FaultCode, Instance, Module, NoSyscalls, SyscallArgs, Vmctx,
};
use std::sync::Arc;

pub fn module(b: &ImageBuilder) -> Arc<Module> {
    Arc::new(b.module().expect("test image verifies"))
}

pub fn instance(b: &ImageBuilder, engine: Engine) -> Instance {
    instance_with(b, Config::default().with_engine(engine))
}

pub fn instance_with(b: &ImageBuilder, config: Config) -> Instance {
    Instance::new("test", module(b), &config).expect("instance can be created")
}

/// Runs `vmMain` with `args` and no syscalls.
pub fn run<const N: usize>(b: &ImageBuilder, engine: Engine, args: [i32; N]) -> Result<i32, Error> {
    instance(b, engine).call_by_name(&mut NoSyscalls, "vmMain", args)
}

/// Size of the data segment `b` would get, whatever code is added to it.
pub fn segment_size(b: &ImageBuilder) -> u32 {
    let mut probe = b.clone();
    probe.function("probe", 8).constant(0).leave();
    probe.module().expect("probe verifies").segment_size()
}

/// `vmMain() { return a <op> b; }`
pub fn binop(engine: Engine, op: qvm_module::Opcode, a: i32, b: i32) -> i32 {
    let mut builder = ImageBuilder::new();
    builder
        .function("vmMain", 8)
        .constant(a)
        .constant(b)
        .op(op)
        .leave();
    run(&builder, engine, []).expect("binop runs")
}

/// `vmMain() { return <op> a; }`
pub fn unop(engine: Engine, op: qvm_module::Opcode, a: i32) -> i32 {
    let mut builder = ImageBuilder::new();
    builder.function("vmMain", 8).constant(a).op(op).leave();
    run(&builder, engine, []).expect("unop runs")
}

pub fn fbinop(engine: Engine, op: qvm_module::Opcode, a: f32, b: f32) -> f32 {
    f32::from_bits(binop(engine, op, a.to_bits() as i32, b.to_bits() as i32) as u32)
}

/// Asserts that `result` is a fault of `kind` at instruction `pc`.
pub fn assert_fault(result: Result<i32, Error>, kind: FaultCode, pc: usize) {
    match result {
        Err(Error::RuntimeFault(details)) => {
            assert_eq!(details.kind, kind, "{}", details);
            assert_eq!(details.pc, pc, "{}", details);
        }
        other => panic!("expected {} at {}, got {:?}", kind, pc, other),
    }
}

/// A handler that records every syscall and answers with `number * 100 + arg(0)`.
#[derive(Debug, Default)]
pub struct Recorder {
    pub calls: Vec<(i32, Vec<i32>)>,
}

impl qvm_runtime::SyscallHandler for Recorder {
    fn syscall(&mut self, _vm: &mut Vmctx<'_>, args: &SyscallArgs) -> Result<i32, Error> {
        self.calls
            .push((args.number(), (0..4).map(|n| args.arg(n)).collect()));
        Ok(args.number() * 100 + args.arg(0))
    }
}
