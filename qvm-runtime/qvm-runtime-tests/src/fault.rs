#[macro_export]
macro_rules! fault_tests {
    ( $( $engine_id:ident => $engine:path ),* ) => {
        $(
            mod $engine_id {
                use qvm_runtime::builder::ImageBuilder;
                use qvm_runtime::{Config, Engine, Error, FaultCode, Instance, NoSyscalls, Opcode, State};
                use $crate::helpers::{assert_fault, instance, module, run};

                const ENGINE: Engine = $engine;

                fn divider() -> ImageBuilder {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 16)
                        .local(24)
                        .op(Opcode::Load4)
                        .arg(8)
                        .call("divide")
                        .leave();
                    b.function("divide", 8)
                        .constant(100)
                        .local(16)
                        .op(Opcode::Load4)
                        .op(Opcode::Divi)
                        .leave();
                    b
                }

                #[test]
                fn faults_name_the_function() {
                    let b = divider();
                    let mut inst = instance(&b, ENGINE);
                    assert_eq!(inst.call_by_name(&mut NoSyscalls, "vmMain", [4]).unwrap(), 25);

                    let err = inst.call_by_name(&mut NoSyscalls, "vmMain", [0]).unwrap_err();
                    let details = err.fault().expect("a fault").clone();
                    let divide = inst.module().symbol_to_value("divide").unwrap();
                    assert_eq!(details.kind, FaultCode::DivideByZero);
                    assert_eq!(details.pc, divide + 4);
                    assert_eq!(details.function.as_deref(), Some("divide"));
                    assert!(details.to_string().contains("(in divide)"), "{}", details);
                    assert_eq!(inst.state(), &State::Faulted(details.clone()));

                    match inst.call_by_name(&mut NoSyscalls, "vmMain", [4]) {
                        Err(Error::InstanceFaulted(d)) => assert_eq!(d, details),
                        other => panic!("unexpected {:?}", other),
                    }
                }

                #[test]
                fn faults_are_per_instance() {
                    let shared = module(&divider());
                    let config = Config::default().with_engine(ENGINE);
                    let mut bad = Instance::new("bad", shared.clone(), &config).unwrap();
                    let mut good = Instance::new("good", shared, &config).unwrap();
                    assert!(bad.call_by_name(&mut NoSyscalls, "vmMain", [0]).is_err());
                    assert_eq!(good.call_by_name(&mut NoSyscalls, "vmMain", [50]).unwrap(), 2);
                    assert!(bad.is_faulted() && !good.is_faulted());
                }

                #[test]
                fn illegal_instruction() {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 8).op(Opcode::Undef).constant(0).leave();
                    assert_fault(run(&b, ENGINE, []), FaultCode::IllegalInstruction, 1);
                }

                fn dynamic_call() -> ImageBuilder {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 16)
                        .local(24)
                        .op(Opcode::Load4)
                        .op(Opcode::Call)
                        .leave();
                    b.function("seven", 8).constant(7).leave();
                    b
                }

                #[test]
                fn computed_calls() {
                    let b = dynamic_call();
                    let seven = b.module().unwrap().symbol_to_value("seven").unwrap() as i32;
                    assert_eq!(run(&b, ENGINE, [seven]).unwrap(), 7);
                    assert_fault(run(&b, ENGINE, [seven + 1]), FaultCode::BadCallTarget, 3);
                    assert_fault(run(&b, ENGINE, [10_000]), FaultCode::BadCallTarget, 3);
                    // negative targets are syscalls
                    match run(&b, ENGINE, [-1]) {
                        Err(Error::RuntimeTerminated(msg)) => assert_eq!(msg, "unexpected syscall 0"),
                        other => panic!("unexpected {:?}", other),
                    }
                }

                fn switch() -> ImageBuilder {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 16)
                        .local(24)
                        .op(Opcode::Load4)
                        .op(Opcode::Jump)
                        .label("one")
                        .constant(1)
                        .leave()
                        .label("two")
                        .constant(2)
                        .leave();
                    b.function("other", 8).constant(3).leave();
                    b
                }

                #[test]
                fn bad_computed_jumps() {
                    let b = switch();
                    let other = b.module().unwrap().symbol_to_value("other").unwrap() as i32;
                    // the leave at 5 expects a value on the stack, 0 is an enter, and `other + 1`
                    // is in another function
                    for &target in &[5, 0, -5, 1 << 20, other + 1] {
                        assert_fault(run(&b, ENGINE, [target]), FaultCode::BadJumpTarget, 3);
                    }

                    let mut table = switch();
                    table.jump_target("two");
                    assert_eq!(run(&table, ENGINE, [6]).unwrap(), 2);
                    assert_fault(run(&table, ENGINE, [4]), FaultCode::BadJumpTarget, 3);
                }

                #[test]
                fn program_stack_overflow() {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 0x1000).call("vmMain").leave();
                    assert_fault(run(&b, ENGINE, []), FaultCode::StackOverflow, 0);
                }

                #[test]
                fn call_depth_limit() {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 8).call("vmMain").leave();
                    assert_fault(run(&b, ENGINE, []), FaultCode::CallDepthExceeded, 2);
                }
            }
        )*
    };
}
