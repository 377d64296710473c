use qvm_module::builder::ImageBuilder;
use qvm_module::{InstrFlags, LoadError, Module, Opcode, Version};
use std::io::Write;

fn add_module() -> ImageBuilder {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8)
        .constant(5)
        .constant(7)
        .op(Opcode::Add)
        .leave();
    b
}

/// `vmMain(target)` jumps to the instruction index passed as its first argument.
fn switch_module(version: Version) -> ImageBuilder {
    let mut b = ImageBuilder::new();
    b.version(version);
    b.function("vmMain", 16)
        .local(24)
        .op(Opcode::Load4)
        .op(Opcode::Jump)
        .label("a")
        .constant(10)
        .leave()
        .label("b")
        .constant(20)
        .leave();
    if version == Version::V2 {
        b.jump_target("a").jump_target("b");
    }
    b
}

#[test]
fn accepts_simple_function() {
    let module = add_module().module().expect("module verifies");
    let depths: Vec<u32> = module.instructions().iter().map(|i| i.op_stack).collect();
    assert_eq!(depths, vec![0, 0, 4, 8, 4]);
    let f = &module.functions()[0];
    assert_eq!((f.entry, f.end, f.frame_size, f.max_depth), (0, 5, 8, 2));
    assert!(module.instructions()[0].flags.contains(InstrFlags::ROOT));
    assert_eq!(module.symbol_to_value("vmMain"), Some(0));
    assert_eq!(module.segment_size(), 0x10000);
    assert_eq!(module.data_mask(), 0xffff);
    assert_eq!(module.stack_bottom(), 0);
}

#[test]
fn rejects_unknown_opcode() {
    let mut image = add_module().build();
    // header (32) + enter (5) puts the first const at byte 37
    image[37] = 0xee;
    match Module::load(&image) {
        Err(LoadError::UnknownOpcode {
            index: 1,
            offset: 5,
            byte: 0xee,
        }) => (),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn rejects_truncated_code() {
    let mut b = add_module();
    let mut image = b.build();
    // claim one more instruction than the code section holds
    image[4] = 6;
    assert!(matches!(
        Module::load(&image),
        Err(LoadError::TruncatedCode { index: 5 })
    ));
    b.version(Version::V2);
    assert!(Module::load(&b.build()).is_ok());
}

#[test]
fn rejects_jump_table_entry_past_code() {
    let mut b = switch_module(Version::V2);
    b.raw_jump_target(100);
    let err = b.module().expect_err("jump table entry is out of range");
    assert!(matches!(
        err,
        LoadError::InvalidJumpTableEntry {
            entry: 2,
            target: 100
        }
    ));
    assert!(
        err.to_string().to_lowercase().contains("invalid jump target"),
        "{}",
        err
    );
}

#[test]
fn rejects_jump_table_entry_with_live_operands() {
    let mut b = switch_module(Version::V2);
    // instruction 2 is the load4, entered with one value on the stack
    b.raw_jump_target(2);
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidJumpTableEntry { target: 2, .. })
    ));
}

#[test]
fn jump_table_limits_computed_targets() {
    let module = switch_module(Version::V2).module().unwrap();
    assert!(module.instructions()[3].flags.contains(InstrFlags::SWITCH));
    assert!(module.functions()[0].switch);
    assert!(module.jump_allowed(3, 4));
    assert!(module.jump_allowed(3, 6));
    assert!(!module.jump_allowed(3, 1), "not in the jump table");
    assert!(!module.jump_allowed(3, 5), "operand depth differs");
    assert!(!module.jump_allowed(3, 0), "function entry");
    assert!(!module.jump_allowed(3, -1));
    assert!(!module.jump_allowed(3, 8));
}

#[test]
fn without_jump_table_any_empty_stack_instruction_is_a_target() {
    let module = switch_module(Version::V1).module().unwrap();
    assert!(module.jump_allowed(3, 1));
    assert!(module.jump_allowed(3, 4));
    assert!(!module.jump_allowed(3, 0));
    assert!(!module.jump_allowed(3, 2));
}

#[test]
fn rejects_branch_into_another_function() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8)
        .constant(1)
        .constant(2)
        .branch(Opcode::Eq, "other_body")
        .constant(0)
        .leave();
    b.function("other", 8)
        .label("other_body")
        .constant(0)
        .leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidJumpTarget { index: 3, target: 7 })
    ));
}

#[test]
fn rejects_branch_with_mismatched_depth() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8)
        .label("deep")
        .constant(1)
        .constant(1)
        .constant(2)
        .branch(Opcode::Lti, "deep")
        .leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidJumpTarget { index: 4, .. })
    ));
}

#[test]
fn rejects_static_jump_outside_code() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8)
        .constant(1000)
        .op(Opcode::Jump)
        .constant(0)
        .leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidJumpTarget {
            index: 2,
            target: 1000
        })
    ));
}

#[test]
fn rejects_static_jump_to_itself() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8)
        .label("spin")
        .jump("spin")
        .constant(0)
        .leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidJumpTarget {
            index: 2,
            target: 1
        })
    ));
}

#[test]
fn rejects_operand_stack_overflow() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8);
    for _ in 0..30 {
        b.constant(1);
    }
    for _ in 0..29 {
        b.op(Opcode::Add);
    }
    b.leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::OperandStackOverflow { index: 30, .. })
    ));
}

#[test]
fn accepts_deepest_allowed_stack() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8);
    for _ in 0..29 {
        b.constant(1);
    }
    for _ in 0..28 {
        b.op(Opcode::Add);
    }
    b.leave();
    let module = b.module().unwrap();
    assert_eq!(module.functions()[0].max_depth, 29);
}

#[test]
fn rejects_operand_stack_underflow() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8).constant(1).op(Opcode::Add).leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::OperandStackUnderflow { index: 2 })
    ));
}

#[test]
fn rejects_mismatched_leave() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8).constant(1).op_with(Opcode::Leave, 16);
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidInstruction {
            index: 2,
            op: "leave",
            ..
        })
    ));
}

#[test]
fn rejects_bad_frame_sizes() {
    for frame in &[0u32, 4, 10, 0x10000] {
        let mut b = ImageBuilder::new();
        b.function("vmMain", *frame).constant(1).leave();
        assert!(
            matches!(
                b.module(),
                Err(LoadError::InvalidInstruction { index: 0, op: "enter", .. })
            ),
            "frame {}",
            frame
        );
    }
}

#[test]
fn rejects_call_to_non_function() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8)
        .constant(2)
        .op(Opcode::Call)
        .leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidCallTarget { index: 2, target: 2 })
    ));
}

#[test]
fn rejects_function_without_leave() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8).constant(1).leave().constant(2);
    b.function("second", 8).constant(1).leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidInstruction { index: 4, op: "enter", .. })
    ));
}

#[test]
fn rejects_argument_outside_frame() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 16).constant(1).arg(16).constant(0).leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidInstruction { op: "arg", .. })
    ));

    let mut b = ImageBuilder::new();
    b.function("vmMain", 16).constant(1).arg(12).constant(0).leave();
    assert!(b.module().is_ok());
}

#[test]
fn rejects_oversized_block_copy() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8)
        .constant(0)
        .constant(4)
        .op_with(Opcode::BlockCopy, 0x10000)
        .constant(0)
        .leave();
    assert!(matches!(
        b.module(),
        Err(LoadError::InvalidInstruction { op: "block_copy", .. })
    ));
}

#[test]
fn functions_and_symbols() {
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8).call("helper").leave();
    b.function("helper", 8).constant(3).leave();
    let module = b.module().unwrap();
    assert_eq!(module.functions().len(), 2);
    assert_eq!(module.function_at(2).unwrap().ordinal, 0);
    assert_eq!(module.function_at(4).unwrap().ordinal, 1);
    assert_eq!(module.function_by_entry(4).unwrap().end, 7);
    assert!(module.function_by_entry(5).is_none());
    assert_eq!(module.symbolicate(5), "helper+1");
    assert_eq!(module.symbolicate(4), "helper");
    assert!(module.function_at(7).is_none());
}

#[test]
fn data_image_holds_words_then_literals() {
    let mut b = add_module();
    let word = b.data_word(0xdead_beef);
    let text = b.lit_bytes(b"hi\0");
    let scratch = b.bss(64);
    assert_eq!((word, text, scratch), (0, 4, 7));
    let module = b.module().unwrap();
    assert_eq!(module.data_image(), &[0xef, 0xbe, 0xad, 0xde, b'h', b'i', 0][..]);
    assert_eq!(module.segment_size(), 0x20000);
}

#[test]
fn loads_from_file_with_sibling_map() {
    let dir = tempfile::tempdir().unwrap();
    let mut b = ImageBuilder::new();
    b.function("vmMain", 8).call("helper").leave();
    b.function("helper", 8).constant(3).leave();

    let qvm = dir.path().join("game.qvm");
    std::fs::write(&qvm, b.build()).unwrap();
    assert!(Module::from_file(&qvm).unwrap().symbols().is_empty());

    let mut map = std::fs::File::create(dir.path().join("game.map")).unwrap();
    map.write_all(b.map().as_bytes()).unwrap();
    let module = Module::from_file(&qvm).unwrap();
    assert_eq!(module.symbol_to_value("helper"), Some(4));

    assert!(matches!(
        Module::from_file(dir.path().join("missing.qvm")),
        Err(LoadError::IOError(_))
    ));
}

#[test]
fn symbols_must_address_code() {
    let module = add_module().module().unwrap();
    let table = qvm_module::SymbolTable::parse_map("0 ff farAway\n").unwrap();
    assert!(matches!(
        module.with_symbols(table),
        Err(LoadError::BadSymbolMap { .. })
    ));
}
