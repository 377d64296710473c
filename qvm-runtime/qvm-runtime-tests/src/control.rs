#[macro_export]
macro_rules! control_tests {
    ( $( $engine_id:ident => $engine:path ),* ) => {
        $(
            mod $engine_id {
                use qvm_runtime::builder::ImageBuilder;
                use qvm_runtime::{Engine, Error, NoSyscalls, Opcode};
                use $crate::helpers::{instance, run};

                const ENGINE: Engine = $engine;

                fn factorial() -> ImageBuilder {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 16)
                        .local(24)
                        .op(Opcode::Load4)
                        .arg(8)
                        .call("fact")
                        .leave();
                    b.function("fact", 16)
                        .local(24)
                        .op(Opcode::Load4)
                        .constant(1)
                        .branch(Opcode::Gti, "recurse")
                        .constant(1)
                        .leave()
                        .label("recurse")
                        .local(24)
                        .op(Opcode::Load4)
                        .local(24)
                        .op(Opcode::Load4)
                        .constant(1)
                        .op(Opcode::Sub)
                        .arg(8)
                        .call("fact")
                        .op(Opcode::Muli)
                        .leave();
                    b
                }

                #[test]
                fn recursion_with_arguments() {
                    let b = factorial();
                    assert_eq!(run(&b, ENGINE, [1]).unwrap(), 1);
                    assert_eq!(run(&b, ENGINE, [10]).unwrap(), 3_628_800);
                }

                #[test]
                fn call_by_entry() {
                    let b = factorial();
                    let mut inst = instance(&b, ENGINE);
                    let fact = inst.module().symbol_to_value("fact").unwrap();
                    // `fact` reads its argument from the invocation frame like any entry point
                    assert_eq!(inst.call(&mut NoSyscalls, fact, [5]).unwrap(), 120);
                    assert_eq!(inst.program_stack() as u32, inst.module().segment_size());
                }

                #[test]
                fn unknown_entry_points() {
                    let mut inst = instance(&factorial(), ENGINE);
                    match inst.call(&mut NoSyscalls, 1, []) {
                        Err(Error::FuncNotFound(1)) => (),
                        other => panic!("unexpected {:?}", other),
                    }
                    match inst.call_by_name(&mut NoSyscalls, "nope", []) {
                        Err(Error::SymbolNotFound(name)) => assert_eq!(name, "nope"),
                        other => panic!("unexpected {:?}", other),
                    }
                    assert!(!inst.is_faulted());
                }

                #[test]
                fn thirteen_arguments() {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 8).local(16).op(Opcode::Load4);
                    for k in 1..13 {
                        b.local(16 + 4 * k).op(Opcode::Load4).op(Opcode::Add);
                    }
                    b.leave();
                    let args = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13];
                    assert_eq!(run(&b, ENGINE, args).unwrap(), 91);
                    // missing arguments read as zero
                    assert_eq!(run(&b, ENGINE, [1, 2]).unwrap(), 3);
                }

                fn compare(op: Opcode, a: i32, b: i32) -> i32 {
                    let mut builder = ImageBuilder::new();
                    builder
                        .function("vmMain", 16)
                        .local(24)
                        .op(Opcode::Load4)
                        .local(28)
                        .op(Opcode::Load4)
                        .branch(op, "yes")
                        .constant(0)
                        .leave()
                        .label("yes")
                        .constant(1)
                        .leave();
                    run(&builder, ENGINE, [a, b]).expect("compare runs")
                }

                fn comparef(op: Opcode, a: f32, b: f32) -> i32 {
                    compare(op, a.to_bits() as i32, b.to_bits() as i32)
                }

                #[test]
                fn integer_branches() {
                    assert_eq!(compare(Opcode::Eq, 3, 3), 1);
                    assert_eq!(compare(Opcode::Ne, 3, 3), 0);
                    assert_eq!(compare(Opcode::Lti, -1, 1), 1);
                    assert_eq!(compare(Opcode::Ltu, -1, 1), 0);
                    assert_eq!(compare(Opcode::Lei, 2, 2), 1);
                    assert_eq!(compare(Opcode::Leu, 2, 2), 1);
                    assert_eq!(compare(Opcode::Gti, 2, 1), 1);
                    assert_eq!(compare(Opcode::Gtu, -1, 1), 1);
                    assert_eq!(compare(Opcode::Gei, 1, 2), 0);
                    assert_eq!(compare(Opcode::Geu, 0, 1), 0);
                }

                #[test]
                fn float_branches() {
                    assert_eq!(comparef(Opcode::Eqf, 1.0, 1.0), 1);
                    assert_eq!(comparef(Opcode::Eqf, -0.0, 0.0), 1);
                    assert_eq!(comparef(Opcode::Ltf, 1.0, 2.0), 1);
                    assert_eq!(comparef(Opcode::Lef, 2.0, 2.0), 1);
                    assert_eq!(comparef(Opcode::Gtf, -0.0, 0.0), 0);
                    assert_eq!(comparef(Opcode::Gef, 2.0, 2.0), 1);
                    // unordered operands only satisfy `!=`
                    assert_eq!(comparef(Opcode::Nef, f32::NAN, f32::NAN), 1);
                    assert_eq!(comparef(Opcode::Eqf, f32::NAN, f32::NAN), 0);
                    assert_eq!(comparef(Opcode::Ltf, f32::NAN, 1.0), 0);
                    assert_eq!(comparef(Opcode::Gef, f32::NAN, 1.0), 0);
                }

                #[test]
                fn counted_loop() {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 24)
                        .local(8)
                        .constant(0)
                        .op(Opcode::Store4)
                        .local(12)
                        .constant(1)
                        .op(Opcode::Store4)
                        .label("loop")
                        .local(12)
                        .op(Opcode::Load4)
                        .local(32)
                        .op(Opcode::Load4)
                        .branch(Opcode::Gti, "done")
                        .local(8)
                        .local(8)
                        .op(Opcode::Load4)
                        .local(12)
                        .op(Opcode::Load4)
                        .op(Opcode::Add)
                        .op(Opcode::Store4)
                        .local(12)
                        .local(12)
                        .op(Opcode::Load4)
                        .constant(1)
                        .op(Opcode::Add)
                        .op(Opcode::Store4)
                        .jump("loop")
                        .label("done")
                        .local(8)
                        .op(Opcode::Load4)
                        .leave();
                    assert_eq!(run(&b, ENGINE, [100]).unwrap(), 5050);
                    assert_eq!(run(&b, ENGINE, [0]).unwrap(), 0);
                }

                #[test]
                fn branch_into_a_read_modify_write() {
                    // vmMain(x) { local = 5; return x ? (local = 7 + 10) : (local += 10); }
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 16)
                        .local(8)
                        .constant(5)
                        .op(Opcode::Store4)
                        .local(8)
                        .constant(7)
                        .local(24)
                        .op(Opcode::Load4)
                        .constant(0)
                        .branch(Opcode::Ne, "operand")
                        .op(Opcode::Pop)
                        .op(Opcode::Pop)
                        .local(8)
                        .local(8)
                        .op(Opcode::Load4)
                        .label("operand")
                        .constant(10)
                        .op(Opcode::Add)
                        .op(Opcode::Store4)
                        .local(8)
                        .op(Opcode::Load4)
                        .leave();
                    assert_eq!(run(&b, ENGINE, [0]).unwrap(), 15);
                    assert_eq!(run(&b, ENGINE, [1]).unwrap(), 17);
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
                    b
                }

                #[test]
                fn computed_jumps() {
                    let b = switch();
                    assert_eq!(run(&b, ENGINE, [4]).unwrap(), 1);
                    assert_eq!(run(&b, ENGINE, [6]).unwrap(), 2);

                    let mut table = switch();
                    table.jump_target("one").jump_target("two");
                    let mut inst = instance(&table, ENGINE);
                    assert_eq!(inst.call_by_name(&mut NoSyscalls, "vmMain", [6]).unwrap(), 2);
                    assert_eq!(inst.call_by_name(&mut NoSyscalls, "vmMain", [4]).unwrap(), 1);
                }

                #[test]
                fn breakpoints_and_profile() {
                    let mut b = ImageBuilder::new();
                    b.function("vmMain", 8)
                        .op(Opcode::Break)
                        .call("leaf")
                        .op(Opcode::Pop)
                        .call("leaf")
                        .op(Opcode::Pop)
                        .op(Opcode::Push)
                        .leave();
                    b.function("leaf", 8).constant(9).leave();
                    let mut inst = instance(&b, ENGINE);
                    let leaf = inst.module().symbol_to_value("leaf").unwrap();
                    inst.set_break_function(Some(leaf)).unwrap();

                    assert_eq!(inst.call_by_name(&mut NoSyscalls, "vmMain", []).unwrap(), 0);
                    assert_eq!(inst.break_count(), 3);
                    let profile = inst.profile();
                    assert_eq!(profile[0].name.as_deref(), Some("leaf"));
                    assert_eq!(profile[0].calls, 2);
                    assert_eq!(profile[1].calls, 1);

                    inst.set_break_function(None).unwrap();
                    inst.clear_profile();
                    inst.call_by_name(&mut NoSyscalls, "vmMain", []).unwrap();
                    assert_eq!(inst.break_count(), 1);
                    assert!(inst.set_break_function(Some(leaf + 1)).is_err());
                }
            }
        )*
    };
}
