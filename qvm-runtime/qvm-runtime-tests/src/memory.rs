#[macro_export]
macro_rules! memory_tests {
    ( $( $engine_id:ident => $engine:path ),* ) => {
        $(
            mod $engine_id {
                use qvm_runtime::builder::ImageBuilder;
                use qvm_runtime::{Engine, NoSyscalls, Opcode};
                use $crate::helpers::{instance, run, segment_size};

                const ENGINE: Engine = $engine;

                fn load(op: Opcode, addr: i32) -> i32 {
                    let mut b = ImageBuilder::new();
                    b.data_word(0x8122_3344);
                    b.data_word(0x5566_7788);
                    b.function("vmMain", 8).constant(addr).op(op).leave();
                    run(&b, ENGINE, []).expect("load runs")
                }

                #[test]
                fn loads_are_little_endian_and_zero_extended() {
                    assert_eq!(load(Opcode::Load1, 0), 0x44);
                    assert_eq!(load(Opcode::Load1, 3), 0x81);
                    assert_eq!(load(Opcode::Load2, 2), 0x8122);
                    assert_eq!(load(Opcode::Load4, 4), 0x5566_7788);
                }

                #[test]
                fn wide_loads_align_down() {
                    assert_eq!(load(Opcode::Load2, 1), 0x3344);
                    assert_eq!(load(Opcode::Load4, 7), 0x5566_7788);
                }

                #[test]
                fn addresses_wrap_around_the_segment() {
                    let mut b = ImageBuilder::new();
                    b.data_word(0x1234_5678);
                    let size = segment_size(&b) as i32;
                    b.function("vmMain", 8).constant(size).op(Opcode::Load4).leave();
                    assert_eq!(run(&b, ENGINE, []).unwrap(), 0x1234_5678);

                    let mut b = ImageBuilder::new();
                    let slot = b.bss(4) as i32;
                    let size = segment_size(&b) as i32;
                    b.function("vmMain", 8)
                        .constant(slot - size)
                        .op(Opcode::Load4)
                        .leave();
                    let mut inst = instance(&b, ENGINE);
                    let slot = slot as usize;
                    inst.memory_mut()[slot..slot + 4].copy_from_slice(&[1, 0, 0, 0]);
                    assert_eq!(inst.call_by_name(&mut NoSyscalls, "vmMain", []).unwrap(), 1);
                }

                #[test]
                fn stores_of_each_width() {
                    let mut b = ImageBuilder::new();
                    let at = b.bss(16) as i32;
                    b.function("vmMain", 8)
                        .constant(at)
                        .constant(0x1234_5678)
                        .op(Opcode::Store4)
                        .constant(at + 4)
                        .constant(0x1234_5678)
                        .op(Opcode::Store2)
                        .constant(at + 8)
                        .constant(0x1234_5678)
                        .op(Opcode::Store1)
                        .constant(0)
                        .leave();
                    let mut inst = instance(&b, ENGINE);
                    inst.call_by_name(&mut NoSyscalls, "vmMain", []).unwrap();
                    let at = at as usize;
                    assert_eq!(
                        &inst.memory()[at..at + 12],
                        &[0x78, 0x56, 0x34, 0x12, 0x78, 0x56, 0, 0, 0x78, 0, 0, 0]
                    );
                }

                #[test]
                fn locals_and_block_copy() {
                    let mut b = ImageBuilder::new();
                    let src = b.lit_bytes(b"hello\0") as i32;
                    let dest = b.bss(8) as i32;
                    // copies the string, then updates a local in place and returns it
                    b.function("vmMain", 16)
                        .constant(dest)
                        .constant(src)
                        .op_with(Opcode::BlockCopy, 6)
                        .local(8)
                        .constant(40)
                        .op(Opcode::Store4)
                        .local(8)
                        .local(8)
                        .op(Opcode::Load4)
                        .constant(2)
                        .op(Opcode::Add)
                        .op(Opcode::Store4)
                        .local(8)
                        .op(Opcode::Load4)
                        .leave();
                    let mut inst = instance(&b, ENGINE);
                    assert_eq!(inst.call_by_name(&mut NoSyscalls, "vmMain", []).unwrap(), 42);
                    let dest = dest as usize;
                    assert_eq!(&inst.memory()[dest..dest + 6], b"hello\0");
                }

                #[test]
                fn block_copy_is_clamped_to_the_segment() {
                    let mut b = ImageBuilder::new();
                    let src = b.lit_bytes(b"abcd") as i32;
                    let size = segment_size(&b) as i32;
                    b.function("vmMain", 8)
                        .constant(size - 2)
                        .constant(src)
                        .op_with(Opcode::BlockCopy, 4)
                        .constant(0)
                        .leave();
                    let mut inst = instance(&b, ENGINE);
                    inst.call_by_name(&mut NoSyscalls, "vmMain", []).unwrap();
                    let end = size as usize;
                    assert_eq!(&inst.memory()[end - 2..], b"ab");
                    assert_eq!(&inst.memory()[..4], b"abcd");
                }

                #[test]
                fn memory_persists_across_calls() {
                    let mut b = ImageBuilder::new();
                    let counter = b.bss(4) as i32;
                    b.function("vmMain", 8)
                        .constant(counter)
                        .constant(counter)
                        .op(Opcode::Load4)
                        .constant(1)
                        .op(Opcode::Add)
                        .op(Opcode::Store4)
                        .constant(counter)
                        .op(Opcode::Load4)
                        .leave();
                    let mut inst = instance(&b, ENGINE);
                    for expected in 1..=3 {
                        assert_eq!(inst.call_by_name(&mut NoSyscalls, "vmMain", []).unwrap(), expected);
                    }
                }
            }
        )*
    };
}
