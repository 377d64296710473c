//! Random programs must behave identically under both engines.

use proptest::prelude::*;
use qvm_runtime::builder::ImageBuilder;
use qvm_runtime::{
    Config, Engine, Error, FaultCode, Instance, Module, NoSyscalls, Opcode, SyscallRecord,
};
use qvm_runtime_tests::helpers::Recorder;
use std::collections::BTreeSet;
use std::sync::Arc;

const BINOPS: &[Opcode] = &[
    Opcode::Add,
    Opcode::Sub,
    Opcode::Muli,
    Opcode::Mulu,
    Opcode::Divi,
    Opcode::Divu,
    Opcode::Modi,
    Opcode::Modu,
    Opcode::Band,
    Opcode::Bor,
    Opcode::Bxor,
    Opcode::Lsh,
    Opcode::Rshi,
    Opcode::Rshu,
];

const UNOPS: &[Opcode] = &[Opcode::Negi, Opcode::Bcom, Opcode::Sex8, Opcode::Sex16];

const FLOAT_OPS: &[Opcode] = &[Opcode::Addf, Opcode::Subf, Opcode::Mulf, Opcode::Divf];

#[derive(Clone, Debug)]
enum Step {
    Binary(Opcode, i32),
    Unary(Opcode),
}

fn step() -> impl Strategy<Value = Step> {
    let operand = prop_oneof![-4i32..=4, any::<i32>(), Just(i32::MIN), Just(-1)];
    prop_oneof![
        (prop::sample::select(BINOPS), operand).prop_map(|(op, v)| Step::Binary(op, v)),
        prop::sample::select(UNOPS).prop_map(Step::Unary),
    ]
}

const UPDATES: &[Opcode] = &[
    Opcode::Add,
    Opcode::Sub,
    Opcode::Band,
    Opcode::Bor,
    Opcode::Bxor,
    Opcode::Muli,
    Opcode::Divi,
    Opcode::Lsh,
];

const CONDITIONS: &[Opcode] = &[
    Opcode::Eq,
    Opcode::Ne,
    Opcode::Lti,
    Opcode::Gei,
    Opcode::Ltu,
    Opcode::Geu,
];

/// What one block of a generated program does to the accumulator.
#[derive(Clone, Debug)]
enum Action {
    Update(Opcode, i32),
    /// `acc = mix(acc)`, a module function that makes a syscall of its own.
    Mix,
    Syscall(i32),
}

/// How a block ends. Targets are reduced to a later block, so every program terminates.
#[derive(Clone, Debug)]
enum Exit {
    Next,
    Return,
    Jump(usize),
    Branch(Opcode, i32, usize),
    /// Jumps to the first target if `acc` is even, the second if odd, through a computed `JUMP`.
    Computed(usize, usize),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (prop::sample::select(UPDATES), -8i32..8).prop_map(|(op, c)| Action::Update(op, c)),
        1 => Just(Action::Mix),
        2 => (0i32..8).prop_map(Action::Syscall),
    ]
}

fn exit() -> impl Strategy<Value = Exit> {
    prop_oneof![
        3 => Just(Exit::Next),
        1 => Just(Exit::Return),
        3 => any::<usize>().prop_map(Exit::Jump),
        3 => (prop::sample::select(CONDITIONS), 0i32..4, any::<usize>())
            .prop_map(|(op, c, t)| Exit::Branch(op, c, t)),
        3 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Exit::Computed(a, b)),
    ]
}

/// `vmMain(x)` keeps an accumulator at local 16, starting from `x`, and runs `blocks` in order
/// unless an exit skips ahead.
fn control_program(blocks: &[(Action, Exit)]) -> ImageBuilder {
    const ACC: i32 = 16;
    let n = blocks.len();
    let block = |k: usize| -> String {
        if k == n {
            "end".to_owned()
        } else {
            format!("b{}", k)
        }
    };

    let mut b = ImageBuilder::new();
    let mut table = BTreeSet::new();
    b.function("vmMain", 24)
        .local(ACC)
        .local(32)
        .op(Opcode::Load4)
        .op(Opcode::Store4);
    for (k, (action, exit)) in blocks.iter().enumerate() {
        let forward = |t: usize| block(k + 1 + t % (n - k));
        b.label(&block(k)).local(ACC).local(ACC).op(Opcode::Load4);
        match *action {
            Action::Update(op, c) => b.constant(c).op(op),
            Action::Mix => b.arg(8).call("mix"),
            Action::Syscall(number) => b.arg(8).syscall(number),
        };
        b.op(Opcode::Store4);
        match *exit {
            Exit::Next => (),
            Exit::Return => {
                b.local(ACC).op(Opcode::Load4).leave();
            }
            Exit::Jump(t) => {
                b.jump(&forward(t));
            }
            Exit::Branch(op, c, t) => {
                b.local(ACC)
                    .op(Opcode::Load4)
                    .constant(3)
                    .op(Opcode::Band)
                    .constant(c)
                    .branch(op, &forward(t));
            }
            Exit::Computed(even, odd) => {
                let (even, odd) = (forward(even), forward(odd));
                b.local(ACC)
                    .op(Opcode::Load4)
                    .constant(1)
                    .op(Opcode::Band)
                    .const_label(&odd)
                    .op(Opcode::Muli)
                    .local(ACC)
                    .op(Opcode::Load4)
                    .constant(1)
                    .op(Opcode::Band)
                    .constant(1)
                    .op(Opcode::Bxor)
                    .const_label(&even)
                    .op(Opcode::Muli)
                    .op(Opcode::Add)
                    .op(Opcode::Jump);
                table.insert(even);
                table.insert(odd);
            }
        }
    }
    b.label("end").local(ACC).op(Opcode::Load4).leave();
    for target in &table {
        b.jump_target(target);
    }

    // mix(a) = syscall 9(a) + 1
    b.function("mix", 16)
        .local(24)
        .op(Opcode::Load4)
        .arg(8)
        .syscall(9)
        .constant(1)
        .op(Opcode::Add)
        .leave();
    b
}

type Observed = (Outcome, Vec<(i32, Vec<i32>)>, Vec<SyscallRecord>);

/// The result of `vmMain(x)` together with every syscall the host saw, in order.
fn run_recorded(module: &Arc<Module>, engine: Engine, x: i32) -> Observed {
    let config = Config::default()
        .with_engine(engine)
        .with_syscall_log_capacity(256);
    let mut inst = Instance::new("equivalence", module.clone(), &config).unwrap();
    let mut recorder = Recorder::default();
    let result = outcome(inst.call_by_name(&mut recorder, "vmMain", [x]));
    (result, recorder.calls, inst.syscall_log().cloned().collect())
}

type Outcome = Result<i32, (FaultCode, usize)>;

fn outcome(result: Result<i32, Error>) -> Outcome {
    match result {
        Ok(v) => Ok(v),
        Err(Error::RuntimeFault(d)) => Err((d.kind, d.pc)),
        Err(e) => panic!("unexpected error {}", e),
    }
}

fn run_both(b: &ImageBuilder, args: [i32; 2]) -> (Outcome, Outcome, Vec<u8>, Vec<u8>) {
    let module = Arc::new(b.module().expect("generated image verifies"));
    let mut results = Vec::new();
    for &engine in &[Engine::Interpreted, Engine::Compiled] {
        let config = Config::default().with_engine(engine);
        let mut inst = Instance::new("equivalence", module.clone(), &config).unwrap();
        let r = outcome(inst.call_by_name(&mut NoSyscalls, "vmMain", args));
        results.push((r, data(&module, &inst)));
    }
    let (c, cm) = results.pop().unwrap();
    let (i, im) = results.pop().unwrap();
    (i, c, im, cm)
}

/// Everything below the program stack.
fn data(module: &Module, inst: &Instance) -> Vec<u8> {
    inst.memory()[..module.stack_bottom() as usize].to_vec()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn integer_programs(seed in any::<i32>(), steps in prop::collection::vec(step(), 1..24)) {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8).constant(seed);
        for s in &steps {
            match *s {
                Step::Binary(op, v) => b.constant(v).op(op),
                Step::Unary(op) => b.op(op),
            };
        }
        b.leave();
        let (interpreted, compiled, _, _) = run_both(&b, [0, 0]);
        prop_assert_eq!(interpreted, compiled);
    }

    #[test]
    fn float_programs(
        seed in -1000i32..1000,
        steps in prop::collection::vec((prop::sample::select(FLOAT_OPS), -50i32..50), 1..12),
    ) {
        let mut b = ImageBuilder::new();
        b.function("vmMain", 8).constant(seed).op(Opcode::Cvif);
        for &(op, v) in &steps {
            b.constant(v).op(Opcode::Cvif).op(op);
        }
        // converting back erases NaN payloads, which the engines may produce differently
        b.op(Opcode::Cvfi).leave();
        let (interpreted, compiled, _, _) = run_both(&b, [0, 0]);
        prop_assert_eq!(interpreted, compiled);
    }

    #[test]
    fn control_flow_programs(
        x in prop_oneof![-8i32..8, any::<i32>()],
        blocks in prop::collection::vec((action(), exit()), 1..16),
    ) {
        let module = Arc::new(control_program(&blocks).module().expect("generated image verifies"));
        let interpreted = run_recorded(&module, Engine::Interpreted, x);
        let compiled = run_recorded(&module, Engine::Compiled, x);
        prop_assert_eq!(interpreted, compiled);
    }

    #[test]
    fn memory_programs(
        stores in prop::collection::vec((0i32..256, any::<i32>(), 0usize..3), 1..16),
        probe in 0i32..256,
        shift in 0i32..4,
    ) {
        let mut b = ImageBuilder::new();
        b.data_word(0xdead_beef);
        b.bss(256);
        b.function("vmMain", 16);
        for &(addr, value, width) in &stores {
            let op = [Opcode::Store1, Opcode::Store2, Opcode::Store4][width];
            // the second argument pushes some addresses outside the segment
            b.constant(addr)
                .local(28)
                .op(Opcode::Load4)
                .op(Opcode::Add)
                .constant(value)
                .op(op);
        }
        b.constant(probe)
            .op(Opcode::Load4)
            .constant(0)
            .constant(probe)
            .op(Opcode::Load2)
            .op(Opcode::Bxor)
            .op(Opcode::Add)
            .leave();
        let offset = ((shift as u32) << 30) as i32;
        let (interpreted, compiled, im, cm) = run_both(&b, [0, offset]);
        prop_assert_eq!(interpreted, compiled);
        prop_assert!(im == cm, "data segments differ");
    }
}
