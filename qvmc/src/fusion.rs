//! Recognition of instruction sequences that compile to a single native operation.

use qvm_module::{Instruction, Opcode};

/// A run of bytecode instructions that is translated as one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroOp {
    /// `LOCAL a; LOCAL a; LOAD4; CONST c; <op>; STORE4`: updates the local at `a` in place.
    ReadModifyWrite { local: i32, op: Opcode, operand: i32 },
    /// `LOCAL a; LOCAL a; LOAD4; STORE4`: stores a local back to itself.
    SelfCopy { local: i32 },
}

impl MacroOp {
    /// Number of instructions the macro-op replaces.
    pub fn len(&self) -> usize {
        match self {
            MacroOp::ReadModifyWrite { .. } => 6,
            MacroOp::SelfCopy { .. } => 4,
        }
    }
}

fn is_rmw_op(op: Opcode) -> bool {
    matches!(op, Opcode::Add | Opcode::Sub | Opcode::Band | Opcode::Bor)
}

/// Returns the macro-op starting at instruction `i`, if any.
///
/// Control may only enter a fused run at its first instruction, so a candidate whose later
/// instructions include a jump target is left alone.
pub fn fused_at(code: &[Instruction], i: usize) -> Option<MacroOp> {
    let window = |len: usize| -> Option<&[Instruction]> {
        let run = code.get(i..i + len)?;
        if run[1..].iter().any(|ins| ins.is_jump_target()) {
            None
        } else {
            Some(run)
        }
    };

    let head = window(4)?;
    if head[0].op != Opcode::Local
        || head[1].op != Opcode::Local
        || head[0].value != head[1].value
        || head[2].op != Opcode::Load4
    {
        return None;
    }
    let local = head[0].value;

    if head[3].op == Opcode::Store4 {
        return Some(MacroOp::SelfCopy { local });
    }
    let run = window(6)?;
    if run[3].op == Opcode::Const && is_rmw_op(run[4].op) && run[5].op == Opcode::Store4 {
        return Some(MacroOp::ReadModifyWrite {
            local,
            op: run[4].op,
            operand: run[3].value,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use qvm_module::InstrFlags;

    fn code(ops: &[(Opcode, i32)]) -> Vec<Instruction> {
        ops.iter().map(|&(op, v)| Instruction::new(op, v)).collect()
    }

    #[test]
    fn increments_a_local() {
        let c = code(&[
            (Opcode::Local, 8),
            (Opcode::Local, 8),
            (Opcode::Load4, 0),
            (Opcode::Const, 1),
            (Opcode::Add, 0),
            (Opcode::Store4, 0),
        ]);
        assert_eq!(
            fused_at(&c, 0),
            Some(MacroOp::ReadModifyWrite {
                local: 8,
                op: Opcode::Add,
                operand: 1
            })
        );
        assert_eq!(fused_at(&c, 1), None);
    }

    #[test]
    fn self_copy() {
        let c = code(&[
            (Opcode::Local, 4),
            (Opcode::Local, 4),
            (Opcode::Load4, 0),
            (Opcode::Store4, 0),
        ]);
        let m = fused_at(&c, 0).unwrap();
        assert_eq!(m, MacroOp::SelfCopy { local: 4 });
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn rejects_near_misses() {
        let different_locals = code(&[
            (Opcode::Local, 4),
            (Opcode::Local, 8),
            (Opcode::Load4, 0),
            (Opcode::Store4, 0),
        ]);
        assert_eq!(fused_at(&different_locals, 0), None);

        let multiply = code(&[
            (Opcode::Local, 8),
            (Opcode::Local, 8),
            (Opcode::Load4, 0),
            (Opcode::Const, 3),
            (Opcode::Muli, 0),
            (Opcode::Store4, 0),
        ]);
        assert_eq!(fused_at(&multiply, 0), None);

        let truncated = code(&[(Opcode::Local, 8), (Opcode::Local, 8), (Opcode::Load4, 0)]);
        assert_eq!(fused_at(&truncated, 0), None);
    }

    #[test]
    fn jump_target_inside_blocks_fusion() {
        let mut c = code(&[
            (Opcode::Local, 8),
            (Opcode::Local, 8),
            (Opcode::Load4, 0),
            (Opcode::Const, 1),
            (Opcode::Sub, 0),
            (Opcode::Store4, 0),
        ]);
        c[0].flags |= InstrFlags::JUMP_TARGET;
        assert!(fused_at(&c, 0).is_some(), "entering at the head is fine");
        c[3].flags |= InstrFlags::JUMP_TARGET;
        assert_eq!(fused_at(&c, 0), None);
    }
}
