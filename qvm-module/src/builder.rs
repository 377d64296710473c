//! A small assembler for producing images in tests and tools.
//!
//! ```
//! # use qvm_module::builder::ImageBuilder;
//! # use qvm_module::Opcode;
//! let mut b = ImageBuilder::new();
//! b.function("vmMain", 8).constant(5).constant(7).op(Opcode::Add).leave();
//! let module = b.module().unwrap();
//! assert_eq!(module.functions().len(), 1);
//! ```

use crate::error::LoadError;
use crate::header::{Header, Version, PROGRAM_STACK_SIZE};
use crate::module::Module;
use crate::opcode::{Opcode, Operand};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Value {
    Imm(i32),
    Label(String),
}

#[derive(Clone, Debug)]
pub struct ImageBuilder {
    version: Version,
    code: Vec<(Opcode, Value)>,
    labels: HashMap<String, usize>,
    symbols: Vec<(String, usize)>,
    frame: u32,
    data: Vec<u8>,
    lit: Vec<u8>,
    bss: u32,
    stack_size: u32,
    jump_table: Vec<Value>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        ImageBuilder::new()
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        ImageBuilder {
            version: Version::V1,
            code: Vec::new(),
            labels: HashMap::new(),
            symbols: Vec::new(),
            frame: 0,
            data: Vec::new(),
            lit: Vec::new(),
            bss: 0,
            stack_size: PROGRAM_STACK_SIZE,
            jump_table: Vec::new(),
        }
    }

    pub fn version(&mut self, version: Version) -> &mut Self {
        self.version = version;
        self
    }

    /// Bytes of bss reserved for the program stack. Defaults to the full program stack.
    pub fn stack_size(&mut self, size: u32) -> &mut Self {
        self.stack_size = size;
        self
    }

    /// Index of the next instruction to be emitted.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        let here = self.here();
        if self.labels.insert(name.to_owned(), here).is_some() {
            panic!("label `{}` defined twice", name);
        }
        self
    }

    /// Starts a function: defines a label and code symbol, then emits `ENTER frame`.
    pub fn function(&mut self, name: &str, frame: u32) -> &mut Self {
        self.label(name);
        self.symbols.push((name.to_owned(), self.here()));
        self.frame = frame;
        self.op_with(Opcode::Enter, frame as i32)
    }

    /// Emits `LEAVE` for the current function's frame.
    pub fn leave(&mut self) -> &mut Self {
        let frame = self.frame as i32;
        self.op_with(Opcode::Leave, frame)
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.op_with(op, 0)
    }

    pub fn op_with(&mut self, op: Opcode, value: i32) -> &mut Self {
        self.code.push((op, Value::Imm(value)));
        self
    }

    pub fn constant(&mut self, value: i32) -> &mut Self {
        self.op_with(Opcode::Const, value)
    }

    pub fn constant_f32(&mut self, value: f32) -> &mut Self {
        self.op_with(Opcode::Const, value.to_bits() as i32)
    }

    pub fn local(&mut self, offset: i32) -> &mut Self {
        self.op_with(Opcode::Local, offset)
    }

    pub fn arg(&mut self, offset: u8) -> &mut Self {
        self.op_with(Opcode::Arg, offset as i32)
    }

    /// `CONST <address of label>`.
    pub fn const_label(&mut self, label: &str) -> &mut Self {
        self.code.push((Opcode::Const, Value::Label(label.to_owned())));
        self
    }

    /// A conditional branch to `label`.
    pub fn branch(&mut self, op: Opcode, label: &str) -> &mut Self {
        assert!(op.is_branch(), "{} is not a branch", op);
        self.code.push((op, Value::Label(label.to_owned())));
        self
    }

    /// `CONST label; JUMP`.
    pub fn jump(&mut self, label: &str) -> &mut Self {
        self.const_label(label).op(Opcode::Jump)
    }

    /// `CONST label; CALL`.
    pub fn call(&mut self, label: &str) -> &mut Self {
        self.const_label(label).op(Opcode::Call)
    }

    /// `CONST -1-number; CALL`.
    pub fn syscall(&mut self, number: i32) -> &mut Self {
        self.constant(-1 - number).op(Opcode::Call)
    }

    /// Appends a data word and returns its address.
    pub fn data_word(&mut self, word: u32) -> u32 {
        assert!(self.lit.is_empty(), "data words must precede literals");
        assert_eq!(self.bss, 0, "data words must precede bss");
        let addr = self.data.len() as u32;
        let mut bytes = [0; 4];
        LittleEndian::write_u32(&mut bytes, word);
        self.data.extend_from_slice(&bytes);
        addr
    }

    /// Appends literal bytes and returns the address of the first one.
    pub fn lit_bytes(&mut self, bytes: &[u8]) -> u32 {
        assert_eq!(self.bss, 0, "literals must precede bss");
        let addr = (self.data.len() + self.lit.len()) as u32;
        self.lit.extend_from_slice(bytes);
        addr
    }

    /// Reserves zero-initialized bytes and returns their address.
    pub fn bss(&mut self, len: u32) -> u32 {
        let addr = (self.data.len() + self.lit.len()) as u32 + self.bss;
        self.bss += len;
        addr
    }

    /// Declares `label` a computed-jump destination. Selects the version 2 format.
    pub fn jump_target(&mut self, label: &str) -> &mut Self {
        self.version = Version::V2;
        self.jump_table.push(Value::Label(label.to_owned()));
        self
    }

    /// Adds an unchecked jump-table entry. Selects the version 2 format.
    pub fn raw_jump_target(&mut self, target: i32) -> &mut Self {
        self.version = Version::V2;
        self.jump_table.push(Value::Imm(target));
        self
    }

    fn resolve(&self, value: &Value) -> i32 {
        match value {
            Value::Imm(v) => *v,
            Value::Label(name) => match self.labels.get(name) {
                Some(&idx) => idx as i32,
                None => panic!("undefined label `{}`", name),
            },
        }
    }

    pub fn code_bytes(&self) -> Vec<u8> {
        let mut code = Vec::new();
        for (op, value) in &self.code {
            code.push(*op as u8);
            let v = self.resolve(value);
            match op.info().operand {
                Operand::None => (),
                Operand::Byte => code.push(v as u8),
                Operand::Word => {
                    let mut bytes = [0; 4];
                    LittleEndian::write_i32(&mut bytes, v);
                    code.extend_from_slice(&bytes);
                }
            }
        }
        code
    }

    /// Serializes the image.
    pub fn build(&self) -> Vec<u8> {
        let code = self.code_bytes();
        let jump_table: Vec<i32> = self.jump_table.iter().map(|v| self.resolve(v)).collect();
        let header_size = self.version.header_size() as u32;
        let header = Header {
            version: self.version,
            instruction_count: self.code.len() as u32,
            code_offset: header_size,
            code_length: code.len() as u32,
            data_offset: header_size + code.len() as u32,
            data_length: self.data.len() as u32,
            lit_length: self.lit.len() as u32,
            bss_length: self.bss + self.stack_size,
            jtrg_length: match self.version {
                Version::V1 => 0,
                Version::V2 => jump_table.len() as u32 * 4,
            },
        };

        let mut image = header.to_bytes();
        image.extend_from_slice(&code);
        image.extend_from_slice(&self.data);
        image.extend_from_slice(&self.lit);
        if self.version == Version::V2 {
            for target in jump_table {
                let mut bytes = [0; 4];
                LittleEndian::write_i32(&mut bytes, target);
                image.extend_from_slice(&bytes);
            }
        }
        image
    }

    /// The text symbol map for the functions defined so far.
    pub fn map(&self) -> String {
        self.symbols
            .iter()
            .map(|(name, idx)| format!("0 {:08x} {}\n", idx, name))
            .collect()
    }

    /// Builds and loads the image with its symbols.
    pub fn module(&self) -> Result<Module, LoadError> {
        Module::load_with_map(&self.build(), &self.map())
    }
}
