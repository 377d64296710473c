//! Decoding and static verification of the code section.
//!
//! Every check here is a precondition the engines rely on instead of re-deriving at run time:
//! operand-stack depths are fixed per instruction, static control transfers stay inside their
//! function and land on a matching depth, and frame sizes fit the program stack.

use crate::error::LoadError;
use crate::header::{Header, PROGRAM_STACK_SIZE};
use crate::instruction::{InstrFlags, Instruction};
use crate::module::FunctionSpec;
use crate::opcode::{Opcode, Operand, PROC_OPSTACK_SIZE};
use byteorder::{ByteOrder, LittleEndian};

pub(crate) struct Verified {
    pub instructions: Vec<Instruction>,
    pub functions: Vec<FunctionSpec>,
    pub jump_table: Vec<i32>,
}

pub(crate) fn decode(code: &[u8], count: usize) -> Result<Vec<Instruction>, LoadError> {
    let mut instructions = Vec::with_capacity(count);
    let mut offset = 0;
    for index in 0..count {
        let byte = *code.get(offset).ok_or(LoadError::TruncatedCode { index })?;
        let op = Opcode::from_byte(byte).ok_or(LoadError::UnknownOpcode {
            index,
            offset,
            byte,
        })?;
        offset += 1;
        let width = op.info().operand.width();
        let operand = code
            .get(offset..offset + width)
            .ok_or(LoadError::TruncatedCode { index })?;
        let value = match op.info().operand {
            Operand::None => 0,
            Operand::Byte => operand[0] as i32,
            Operand::Word => LittleEndian::read_i32(operand),
        };
        offset += width;
        instructions.push(Instruction::new(op, value));
    }
    Ok(instructions)
}

fn invalid(index: usize, op: Opcode, reason: &'static str) -> LoadError {
    LoadError::InvalidInstruction {
        index,
        op: op.name(),
        reason,
    }
}

/// Computes operand-stack depths and function boundaries.
fn assign_depths(code: &mut [Instruction]) -> Result<Vec<FunctionSpec>, LoadError> {
    if code[0].op != Opcode::Enter {
        return Err(invalid(0, code[0].op, "module must begin with enter"));
    }
    if code[code.len() - 1].op != Opcode::Leave {
        let last = code.len() - 1;
        return Err(invalid(last, code[last].op, "module must end with leave"));
    }

    let limit = (PROC_OPSTACK_SIZE * 4) as i64;
    let mut functions: Vec<FunctionSpec> = Vec::new();
    let mut depth: i64 = 0;
    for index in 0..code.len() {
        let ins = code[index];
        let info = ins.op.info();

        if ins.op == Opcode::Enter {
            if index > 0 && code[index - 1].op != Opcode::Leave {
                return Err(invalid(index, ins.op, "function not preceded by leave"));
            }
            if depth != 0 {
                return Err(invalid(index, ins.op, "operand stack not empty on entry"));
            }
            if ins.value < 8 || ins.value as u32 >= PROGRAM_STACK_SIZE || ins.value % 4 != 0 {
                return Err(invalid(index, ins.op, "bad frame size"));
            }
            if let Some(prev) = functions.last_mut() {
                prev.end = index;
            }
            functions.push(FunctionSpec {
                ordinal: functions.len(),
                entry: index,
                end: code.len(),
                frame_size: ins.value as u32,
                max_depth: 0,
                switch: false,
            });
        }

        if depth < 4 * info.nargs as i64 {
            return Err(LoadError::OperandStackUnderflow { index });
        }
        code[index].op_stack = depth as u32;
        depth += info.stack as i64;
        if depth < 0 {
            return Err(LoadError::OperandStackUnderflow { index });
        }
        if depth >= limit {
            return Err(LoadError::OperandStackOverflow { index, depth });
        }
        // `functions` is non-empty: instruction 0 is an enter.
        let current = functions.len() - 1;
        let slots = (depth.max(code[index].op_stack as i64) / 4) as u32;
        if slots > functions[current].max_depth {
            functions[current].max_depth = slots;
        }
    }
    Ok(functions)
}

fn check_target(
    code: &[Instruction],
    func: &FunctionSpec,
    index: usize,
    target: i32,
    expected_depth: u32,
) -> Result<usize, LoadError> {
    let bad = LoadError::InvalidJumpTarget { index, target };
    if target < 0 {
        return Err(bad);
    }
    let t = target as usize;
    if t <= func.entry || t >= func.end {
        return Err(bad);
    }
    if code[t].op_stack != expected_depth {
        return Err(bad);
    }
    Ok(t)
}

fn check_instructions(
    code: &mut [Instruction],
    functions: &mut [FunctionSpec],
    data_segment: u32,
) -> Result<(), LoadError> {
    for func in functions.iter_mut() {
        for index in func.entry..func.end {
            let ins = code[index];
            let prev = if index > func.entry {
                Some(code[index - 1])
            } else {
                None
            };
            match ins.op {
                Opcode::Leave => {
                    if ins.value as u32 != func.frame_size {
                        return Err(invalid(index, ins.op, "frame size differs from enter"));
                    }
                    if ins.op_stack != 4 {
                        return Err(invalid(index, ins.op, "operand stack must hold one value"));
                    }
                }
                op if op.is_branch() => {
                    let t = check_target(code, func, index, ins.value, ins.op_stack - 8)?;
                    code[t].flags |= InstrFlags::JUMP_TARGET;
                }
                Opcode::Jump => match prev {
                    Some(p) if p.op == Opcode::Const => {
                        if p.value as usize == index - 1 {
                            // `CONST self; JUMP` spins forever
                            return Err(LoadError::InvalidJumpTarget {
                                index,
                                target: p.value,
                            });
                        }
                        let t = check_target(code, func, index, p.value, ins.op_stack - 4)?;
                        code[t].flags |= InstrFlags::JUMP_TARGET;
                    }
                    _ => {
                        code[index].flags |= InstrFlags::SWITCH;
                        func.switch = true;
                    }
                },
                Opcode::Call => {
                    if let Some(p) = prev {
                        if p.op == Opcode::Const && p.value >= 0 {
                            let t = p.value as usize;
                            if t >= code.len() || code[t].op != Opcode::Enter {
                                return Err(LoadError::InvalidCallTarget {
                                    index,
                                    target: p.value,
                                });
                            }
                        }
                    }
                }
                Opcode::Arg => {
                    if ins.value < 8 || ins.value as u32 > func.frame_size - 4 || ins.value % 4 != 0
                    {
                        return Err(invalid(index, ins.op, "argument offset outside frame"));
                    }
                }
                Opcode::BlockCopy => {
                    if ins.value < 0 || ins.value as u32 >= data_segment {
                        return Err(invalid(index, ins.op, "count exceeds data segment"));
                    }
                }
                _ => (),
            }
        }
    }
    Ok(())
}

pub(crate) fn read_jump_table(header: &Header, image: &[u8]) -> Vec<i32> {
    let start = header.jump_table_offset() as usize;
    image[start..start + header.jtrg_length as usize]
        .chunks_exact(4)
        .map(LittleEndian::read_i32)
        .collect()
}

fn mark_jump_table(code: &mut [Instruction], table: &[i32], version2: bool) -> Result<(), LoadError> {
    if !version2 {
        // Without a table any empty-stack instruction may be a computed-jump destination.
        for ins in code.iter_mut() {
            if ins.op_stack == 0 && ins.op != Opcode::Enter {
                ins.flags |= InstrFlags::JUMP_TARGET;
            }
        }
        return Ok(());
    }
    for (entry, &target) in table.iter().enumerate() {
        let bad = LoadError::InvalidJumpTableEntry { entry, target };
        if target < 0 || target as usize >= code.len() {
            return Err(bad);
        }
        let ins = &mut code[target as usize];
        if ins.op_stack != 0 || ins.op == Opcode::Enter {
            return Err(bad);
        }
        ins.flags |= InstrFlags::JUMP_TARGET;
    }
    Ok(())
}

pub(crate) fn verify(header: &Header, image: &[u8]) -> Result<Verified, LoadError> {
    let code_start = header.code_offset as usize;
    let code = &image[code_start..code_start + header.code_length as usize];
    let mut instructions = decode(code, header.instruction_count as usize)?;
    let mut functions = assign_depths(&mut instructions)?;
    check_instructions(&mut instructions, &mut functions, header.segment_size())?;
    let jump_table = read_jump_table(header, image);
    mark_jump_table(
        &mut instructions,
        &jump_table,
        header.version == crate::header::Version::V2,
    )?;
    Ok(Verified {
        instructions,
        functions,
        jump_table,
    })
}
