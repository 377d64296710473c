#[macro_export]
macro_rules! arith_tests {
    ( $( $engine_id:ident => $engine:path ),* ) => {
        $(
            mod $engine_id {
                use qvm_runtime::builder::ImageBuilder;
                use qvm_runtime::{Engine, FaultCode, Opcode};
                use $crate::helpers::{assert_fault, binop, fbinop, run, unop};

                const ENGINE: Engine = $engine;

                #[test]
                fn integer_binops() {
                    assert_eq!(binop(ENGINE, Opcode::Add, 40, 2), 42);
                    assert_eq!(binop(ENGINE, Opcode::Add, i32::MAX, 1), i32::MIN);
                    assert_eq!(binop(ENGINE, Opcode::Sub, 2, 40), -38);
                    assert_eq!(binop(ENGINE, Opcode::Muli, -3, 7), -21);
                    assert_eq!(binop(ENGINE, Opcode::Mulu, 0x10000, 0x10000), 0);
                    assert_eq!(binop(ENGINE, Opcode::Band, 0b1100, 0b1010), 0b1000);
                    assert_eq!(binop(ENGINE, Opcode::Bor, 0b1100, 0b1010), 0b1110);
                    assert_eq!(binop(ENGINE, Opcode::Bxor, 0b1100, 0b1010), 0b0110);
                }

                #[test]
                fn division() {
                    assert_eq!(binop(ENGINE, Opcode::Divi, -7, 2), -3);
                    assert_eq!(binop(ENGINE, Opcode::Modi, -7, 2), -1);
                    assert_eq!(binop(ENGINE, Opcode::Divu, -8, 2), 0x7fff_fffc);
                    assert_eq!(binop(ENGINE, Opcode::Modu, -1, 10), 5);
                    assert_eq!(binop(ENGINE, Opcode::Divi, i32::MIN, -1), i32::MIN);
                    assert_eq!(binop(ENGINE, Opcode::Modi, i32::MIN, -1), 0);
                }

                #[test]
                fn division_by_zero_faults() {
                    for &op in &[Opcode::Divi, Opcode::Divu, Opcode::Modi, Opcode::Modu] {
                        let mut b = ImageBuilder::new();
                        b.function("vmMain", 8).constant(1).constant(0).op(op).leave();
                        assert_fault(run(&b, ENGINE, []), FaultCode::DivideByZero, 3);
                    }
                }

                #[test]
                fn shifts_take_the_amount_modulo_32() {
                    assert_eq!(binop(ENGINE, Opcode::Lsh, 1, 4), 16);
                    assert_eq!(binop(ENGINE, Opcode::Lsh, 1, 33), 2);
                    assert_eq!(binop(ENGINE, Opcode::Rshi, -8, 1), -4);
                    assert_eq!(binop(ENGINE, Opcode::Rshu, -8, 1), 0x7fff_fffc);
                    assert_eq!(binop(ENGINE, Opcode::Rshu, -8, 32), -8);
                }

                #[test]
                fn unary() {
                    assert_eq!(unop(ENGINE, Opcode::Negi, 5), -5);
                    assert_eq!(unop(ENGINE, Opcode::Negi, i32::MIN), i32::MIN);
                    assert_eq!(unop(ENGINE, Opcode::Bcom, 0), -1);
                    assert_eq!(unop(ENGINE, Opcode::Sex8, 0x80), -128);
                    assert_eq!(unop(ENGINE, Opcode::Sex8, 0x1234_567f), 0x7f);
                    assert_eq!(unop(ENGINE, Opcode::Sex16, 0x8000), -32768);
                }

                #[test]
                fn float_ops() {
                    assert_eq!(fbinop(ENGINE, Opcode::Addf, 1.5, 2.25), 3.75);
                    assert_eq!(fbinop(ENGINE, Opcode::Subf, 1.5, 2.25), -0.75);
                    assert_eq!(fbinop(ENGINE, Opcode::Mulf, 1.5, -2.0), -3.0);
                    assert_eq!(fbinop(ENGINE, Opcode::Divf, 1.0, 4.0), 0.25);
                    assert!(fbinop(ENGINE, Opcode::Divf, 1.0, 0.0).is_infinite());
                    let neg = unop(ENGINE, Opcode::Negf, 2.5f32.to_bits() as i32);
                    assert_eq!(f32::from_bits(neg as u32), -2.5);
                }

                #[test]
                fn float_conversions() {
                    let cvif = unop(ENGINE, Opcode::Cvif, -3);
                    assert_eq!(f32::from_bits(cvif as u32), -3.0);
                    let cvfi = |v: f32| unop(ENGINE, Opcode::Cvfi, v.to_bits() as i32);
                    assert_eq!(cvfi(-2.7), -2);
                    assert_eq!(cvfi(2.7), 2);
                    assert_eq!(cvfi(1e10), i32::MAX);
                    assert_eq!(cvfi(-1e10), i32::MIN);
                    assert_eq!(cvfi(f32::NAN), 0);
                }
            }
        )*
    };
}
