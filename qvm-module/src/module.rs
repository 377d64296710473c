use crate::error::LoadError;
use crate::header::{Header, PROGRAM_STACK_SIZE};
use crate::instruction::Instruction;
use crate::opcode::Opcode;
use crate::symbols::SymbolTable;
use crate::verify;
use std::path::Path;

/// Static facts about one function, covering instructions `entry..end`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionSpec {
    pub ordinal: usize,
    pub entry: usize,
    pub end: usize,
    /// Program-stack bytes reserved by `ENTER`.
    pub frame_size: u32,
    /// Deepest operand stack reached, in slots.
    pub max_depth: u32,
    /// Contains computed jumps.
    pub switch: bool,
}

impl FunctionSpec {
    pub fn contains(&self, pc: usize) -> bool {
        pc >= self.entry && pc < self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.entry
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A verified, immutable module. Shared by every instance created from it.
#[derive(Debug)]
pub struct Module {
    header: Header,
    instructions: Vec<Instruction>,
    functions: Vec<FunctionSpec>,
    jump_table: Vec<i32>,
    data: Vec<u8>,
    symbols: SymbolTable,
}

impl Module {
    /// Parses and verifies a raw image.
    pub fn load(image: &[u8]) -> Result<Module, LoadError> {
        let header = Header::parse(image)?;
        let verified = verify::verify(&header, image)?;
        let data_start = header.data_offset as usize;
        let data_end = data_start + header.data_length as usize + header.lit_length as usize;
        Ok(Module {
            header,
            instructions: verified.instructions,
            functions: verified.functions,
            jump_table: verified.jump_table,
            data: image[data_start..data_end].to_vec(),
            symbols: SymbolTable::default(),
        })
    }

    /// Loads an image together with its text symbol map.
    pub fn load_with_map(image: &[u8], map: &str) -> Result<Module, LoadError> {
        Module::load(image)?.with_symbols(SymbolTable::parse_map(map)?)
    }

    /// Loads `path`, picking up a sibling `.map` symbol file when one exists.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Module, LoadError> {
        let path = path.as_ref();
        let image = std::fs::read(path)?;
        let map_path = path.with_extension("map");
        if map_path.is_file() {
            let map = std::fs::read_to_string(map_path)?;
            Module::load_with_map(&image, &map)
        } else {
            Module::load(&image)
        }
    }

    pub fn with_symbols(mut self, symbols: SymbolTable) -> Result<Module, LoadError> {
        if let Some(max) = symbols.max_value() {
            if max >= self.instructions.len() {
                return Err(LoadError::BadSymbolMap {
                    line: 0,
                    reason: format!("symbol value {:#x} beyond the code section", max),
                });
            }
        }
        self.symbols = symbols;
        Ok(self)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn functions(&self) -> &[FunctionSpec] {
        &self.functions
    }

    /// Computed-jump targets declared by the image (version 2 only).
    pub fn jump_table(&self) -> &[i32] {
        &self.jump_table
    }

    /// The function containing `pc`.
    pub fn function_at(&self, pc: usize) -> Option<&FunctionSpec> {
        if pc >= self.instructions.len() {
            return None;
        }
        let idx = match self.functions.binary_search_by_key(&pc, |f| f.entry) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        self.functions.get(idx)
    }

    /// The function starting exactly at `entry`.
    pub fn function_by_entry(&self, entry: usize) -> Option<&FunctionSpec> {
        self.functions
            .binary_search_by_key(&entry, |f| f.entry)
            .ok()
            .map(|i| &self.functions[i])
    }

    /// Initialized bytes (data words followed by literals) copied to the bottom of the segment.
    pub fn data_image(&self) -> &[u8] {
        &self.data
    }

    pub fn segment_size(&self) -> u32 {
        self.header.segment_size()
    }

    pub fn data_mask(&self) -> u32 {
        self.segment_size() - 1
    }

    /// Lowest address the program stack may reach.
    pub fn stack_bottom(&self) -> i32 {
        (self.segment_size() - PROGRAM_STACK_SIZE) as i32
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Resolves a symbol name to its instruction index.
    pub fn symbol_to_value(&self, name: &str) -> Option<usize> {
        self.symbols.by_name(name).map(|s| s.value)
    }

    /// Renders `pc` as `name+offset`, falling back to the hex address.
    pub fn symbolicate(&self, pc: usize) -> String {
        match self.symbols.lookup(pc) {
            Some((sym, 0)) => sym.name.clone(),
            Some((sym, off)) => format!("{}+{}", sym.name, off),
            None => format!("{:#x}", pc),
        }
    }

    /// Whether a computed `JUMP` at `from` may transfer control to `target`.
    ///
    /// Both engines apply exactly this rule; anything rejected here is a fault.
    pub fn jump_allowed(&self, from: usize, target: i32) -> bool {
        if target < 0 {
            return false;
        }
        let t = target as usize;
        let func = match self.function_at(from) {
            Some(f) => f,
            None => return false,
        };
        if !func.contains(t) {
            return false;
        }
        let dest = &self.instructions[t];
        dest.op != Opcode::Enter
            && dest.is_jump_target()
            && dest.op_stack + 4 == self.instructions[from].op_stack
    }
}
