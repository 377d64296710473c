#[macro_export]
macro_rules! syscall_tests {
    ( $( $engine_id:ident => $engine:path ),* ) => {
        $(
            mod $engine_id {
                use qvm_runtime::builder::ImageBuilder;
                use qvm_runtime::{
                    Config, Engine, Error, FaultCode, NoSyscalls, Opcode, SyscallArgs, Vmctx,
                };
                use std::panic::{self, AssertUnwindSafe};
                use $crate::helpers::{instance, instance_with, Recorder};

                const ENGINE: Engine = $engine;

                /// `vmMain(a, b) { return syscall 7(a, b) + syscall 2(b); }`
                fn two_syscalls() -> ImageBuilder {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 24)
                        .local(32)
                        .op(Opcode::Load4)
                        .arg(8)
                        .local(36)
                        .op(Opcode::Load4)
                        .arg(12)
                        .syscall(7)
                        .local(36)
                        .op(Opcode::Load4)
                        .arg(8)
                        .syscall(2)
                        .op(Opcode::Add)
                        .leave();
                    b
                }

                #[test]
                fn arguments_and_results() {
                    let mut inst = instance(&two_syscalls(), ENGINE);
                    let mut recorder = Recorder::default();
                    let result = inst.call_by_name(&mut recorder, "vmMain", [5, 6]).unwrap();
                    assert_eq!(result, 705 + 206);
                    assert_eq!(recorder.calls[0], (7, vec![5, 6, 0, 0]));
                    // the second call reuses the argument area, so the stale word is still there
                    assert_eq!(recorder.calls[1], (2, vec![6, 6, 0, 0]));
                }

                #[test]
                fn handler_reads_and_writes_memory() {
                    let mut b = ImageBuilder::new();
                    let greeting = b.lit_bytes(b"hello\0\0\0") as i32;
                    let out = b.bss(4) as i32;
                    b.function("vmMain", 16)
                        .constant(greeting)
                        .arg(8)
                        .constant(out)
                        .arg(12)
                        .syscall(0)
                        .op(Opcode::Pop)
                        .constant(out)
                        .op(Opcode::Load4)
                        .leave();
                    let mut handler = |vm: &mut Vmctx<'_>, args: &SyscallArgs| -> Result<i32, Error> {
                        let len = vm.read_cstr(args.arg(0))?.to_bytes().len();
                        vm.write_i32(args.arg(1), len as i32 * 10)?;
                        Ok(0)
                    };
                    let mut inst = instance(&b, ENGINE);
                    assert_eq!(inst.call_by_name(&mut handler, "vmMain", []).unwrap(), 50);
                }

                #[test]
                fn handler_errors_end_the_invocation() {
                    let mut inst = instance(&two_syscalls(), ENGINE);
                    match inst.call_by_name(&mut NoSyscalls, "vmMain", [1, 2]) {
                        Err(Error::RuntimeTerminated(msg)) => assert_eq!(msg, "unexpected syscall 7"),
                        other => panic!("unexpected {:?}", other),
                    }
                    assert!(!inst.is_faulted());
                    assert_eq!(inst.call_level(), 0);
                    assert_eq!(inst.program_stack() as u32, inst.module().segment_size());
                    let mut recorder = Recorder::default();
                    assert!(inst.call_by_name(&mut recorder, "vmMain", [1, 2]).is_ok());
                }

                #[test]
                fn handler_panics_propagate() {
                    let mut inst = instance(&two_syscalls(), ENGINE);
                    let mut handler = |_vm: &mut Vmctx<'_>, _args: &SyscallArgs| -> Result<i32, Error> {
                        panic!("handler panic");
                    };
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        inst.call_by_name(&mut handler, "vmMain", [1, 2])
                    }));
                    assert!(outcome.is_err());
                }

                fn reentrant() -> ImageBuilder {
                    let mut b = ImageBuilder::new();
                    // vmMain(n) { return syscall 1(n) + 1; }
                    b.function("vmMain", 16)
                        .local(24)
                        .op(Opcode::Load4)
                        .arg(8)
                        .syscall(1)
                        .constant(1)
                        .op(Opcode::Add)
                        .leave();
                    b.function("double", 8)
                        .local(16)
                        .op(Opcode::Load4)
                        .constant(2)
                        .op(Opcode::Muli)
                        .leave();
                    b
                }

                #[test]
                fn syscalls_can_reenter_the_module() {
                    let mut inst = instance(&reentrant(), ENGINE);
                    let mut levels = Vec::new();
                    let mut handler = |vm: &mut Vmctx<'_>, args: &SyscallArgs| -> Result<i32, Error> {
                        levels.push(vm.call_level());
                        vm.call_by_name(&mut NoSyscalls, "double", [args.arg(0)])
                    };
                    assert_eq!(inst.call_by_name(&mut handler, "vmMain", [21]).unwrap(), 43);
                    assert_eq!(levels, vec![1]);
                    assert_eq!(inst.call_level(), 0);
                    assert_eq!(inst.program_stack() as u32, inst.module().segment_size());
                }

                #[test]
                fn call_level_limit() {
                    let config = Config::default().with_engine(ENGINE).with_max_call_level(1);
                    let mut inst = instance_with(&reentrant(), config);
                    // the handler swallows the nested fault; the instance is faulted regardless
                    let mut handler = |vm: &mut Vmctx<'_>, args: &SyscallArgs| -> Result<i32, Error> {
                        Ok(vm.call_by_name(&mut NoSyscalls, "double", [args.arg(0)]).unwrap_or(-1))
                    };
                    let err = inst.call_by_name(&mut handler, "vmMain", [21]).unwrap_err();
                    let details = err.fault().expect("fault details").clone();
                    assert_eq!(details.kind, FaultCode::CallLevelExceeded);
                    assert_eq!(Some(details.pc), inst.module().symbol_to_value("double"));
                    assert!(inst.is_faulted());
                    match inst.call_by_name(&mut handler, "vmMain", [21]) {
                        Err(Error::InstanceFaulted(d)) => assert_eq!(d, details),
                        other => panic!("unexpected {:?}", other),
                    }
                }

                #[test]
                fn syscall_log_keeps_the_most_recent() {
                    let config = Config::default()
                        .with_engine(ENGINE)
                        .with_syscall_log_capacity(1)
                        .with_trace_syscalls(true);
                    let mut inst = instance_with(&two_syscalls(), config);
                    inst.call_by_name(&mut Recorder::default(), "vmMain", [3, 4]).unwrap();
                    let log: Vec<_> = inst.syscall_log().collect();
                    assert_eq!(log.len(), 1);
                    assert_eq!(log[0].number, 2);
                    assert_eq!(log[0].args.arg(0), 4);
                    assert_eq!(log[0].result, Some(204));
                }
            }
        )*
    };
}
