//! Target program containers.
//!
//! A strict ownership tree: the [`Program`] owns its functions, a function owns its
//! basic blocks and a block owns its instructions. Operands are the one exception;
//! they live in the program's [`OperandPool`] and are shared by id.

use super::instruction::Instruction;
use super::operand::{Operand, OperandId, OperandPool};
use crate::core::{CompileError, CompileResult};
use hashbrown::HashMap;
use std::fmt;

/// Named, ordered run of instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    name: String,
    instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
        }
    }

    pub fn with_instructions(name: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Self {
            name: name.into(),
            instructions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    /// Move the instructions out, leaving the block empty.
    pub fn take_instructions(&mut self) -> Vec<Instruction> {
        std::mem::take(&mut self.instructions)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Last instruction transfers control.
    pub fn is_terminated(&self) -> bool {
        self.instructions.last().is_some_and(Instruction::is_terminator)
    }

    /// Index of the first instruction of the trailing control transfer group:
    /// the final run of jumps (or RET/HALT) plus a CMP feeding it.
    pub fn terminator_start(&self) -> usize {
        let mut start = self.instructions.len();
        while start > 0 && self.instructions[start - 1].is_terminator() {
            start -= 1;
        }
        if start > 0
            && start < self.instructions.len()
            && matches!(
                self.instructions[start - 1],
                Instruction::Binary {
                    op: super::BinaryOp::Cmp,
                    ..
                }
            )
        {
            start -= 1;
        }
        start
    }
}

/// A lowered function.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    blocks: Vec<BasicBlock>,
    /// Abstract registers defined from the caller-pushed argument slots.
    pub args: Vec<OperandId>,
    /// Frame size in words.
    pub stack_size: u32,
    /// Immediate shared by the prologue `SUB SP` and the epilogue `ADD SP`.
    pub frame: Option<OperandId>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            args: Vec::new(),
            stack_size: 0,
            frame: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push_block(&mut self, block: BasicBlock) -> CompileResult<()> {
        if self.block(block.name()).is_some() {
            return Err(CompileError::DuplicateBlock {
                function: self.name.clone(),
                block: block.name().to_string(),
            });
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<BasicBlock> {
        &mut self.blocks
    }

    pub fn block(&self, name: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.name() == name)
    }

    /// First block; execution of the function starts here.
    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(BasicBlock::len).sum()
    }
}

/// A whole target program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    functions: Vec<Function>,
    index: HashMap<String, usize>,
    entry: Option<String>,
    pool: OperandPool,
    block_counter: usize,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function; names are unique.
    pub fn add_function(&mut self, function: Function) -> CompileResult<()> {
        if self.index.contains_key(function.name()) {
            return Err(CompileError::DuplicateFunction {
                name: function.name().to_string(),
            });
        }
        self.index.insert(function.name().to_string(), self.functions.len());
        self.functions.push(function);
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.index.get(name).map(|&idx| &self.functions[idx])
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.index.get(name).map(|&idx| &mut self.functions[idx])
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    /// Split borrow of the functions and the operand pool.
    pub fn parts_mut(&mut self) -> (&mut [Function], &mut OperandPool) {
        (&mut self.functions, &mut self.pool)
    }

    pub fn pool(&self) -> &OperandPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut OperandPool {
        &mut self.pool
    }

    pub fn set_entry(&mut self, name: impl Into<String>) {
        self.entry = Some(name.into());
    }

    /// The explicitly designated entry function, if any.
    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    /// Move the entry function to the front so it is laid out at address 0.
    pub fn place_entry_first(&mut self) -> CompileResult<()> {
        let Some(entry) = self.entry.clone() else {
            return Ok(());
        };
        let idx = *self
            .index
            .get(&entry)
            .ok_or_else(|| CompileError::MissingEntry { name: entry.clone() })?;
        if idx != 0 {
            let function = self.functions.remove(idx);
            self.functions.insert(0, function);
            self.index = self
                .functions
                .iter()
                .enumerate()
                .map(|(i, f)| (f.name().to_string(), i))
                .collect();
        }
        Ok(())
    }

    /// Program-unique block name derived from `base`.
    pub fn fresh_block_name(&mut self, base: &str) -> String {
        let name = format!("{}{}", base, self.block_counter);
        self.block_counter += 1;
        name
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(Function::instruction_count).sum()
    }

    /// All instructions in layout order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.functions
            .iter()
            .flat_map(|f| f.blocks().iter())
            .flat_map(|b| b.instructions().iter())
    }

    /// Every operand referenced by an instruction, resolved through the pool.
    pub fn referenced_operands(&self) -> impl Iterator<Item = &Operand> {
        self.instructions()
            .flat_map(|inst| inst.operands())
            .map(|id| &self.pool[id])
    }

    /// One instruction per line, prefixed with its address.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (address, inst) in self.instructions().enumerate() {
            out.push_str(&format!("{:>4}  {}\n", address, inst.display(&self.pool)));
        }
        out
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for function in &self.functions {
            writeln!(f, "{}:", function.name())?;
            for block in function.blocks() {
                writeln!(f, "  {}:", block.name())?;
                for inst in block.instructions() {
                    writeln!(f, "    {}", inst.display(&self.pool))?;
                }
            }
        }
        Ok(())
    }
}
