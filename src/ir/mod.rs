// This module defines the register-based intermediate representation the backend
// consumes. A Program is an insertion-ordered collection of Functions looked up by name;
// a Function owns an arena of values (one Op per value id) plus ordered blocks that list
// the value ids they execute, with the first block acting as the entry. Ops cover
// immediates, stack locals (alloca/ld/st), integer arithmetic and comparisons, direct and
// indirect calls, and the block terminators br/jmp/ret/retr. FunctionBuilder constructs
// functions programmatically, and the textual form printed by Display is what parser.rs
// reads back, so tests and the t86c driver can describe programs as plain text.

//! Register-based IR consumed by the instruction selector.

pub mod parser;

pub use parser::{parse, ParseError};

use crate::core::{CompileError, CompileResult};
use hashbrown::HashMap;
use std::fmt;

/// Index of a value in its function's value arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a block in its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Integer arithmetic, bitwise and comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    pub const ALL: [BinOp; 13] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Div,
        BinOp::Mod,
        BinOp::And,
        BinOp::Or,
        BinOp::Lt,
        BinOp::Le,
        BinOp::Gt,
        BinOp::Ge,
        BinOp::Eq,
        BinOp::Ne,
    ];

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Lt => "lt",
            BinOp::Le => "le",
            BinOp::Gt => "gt",
            BinOp::Ge => "ge",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
        }
    }

    pub fn from_mnemonic(text: &str) -> Option<BinOp> {
        BinOp::ALL.into_iter().find(|op| op.mnemonic() == text)
    }
}

/// Call target.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Direct(String),
    Indirect(ValueId),
}

/// One IR operation. Every op occupies a value id; ops without a result
/// (stores, terminators) simply have no users.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Incoming argument `index`; not placed in any block.
    Arg { index: usize },
    Imm(i64),
    ImmF(f64),
    /// Stack local of `size` bytes; the value is its address.
    Alloca { size: u64 },
    Load { addr: ValueId },
    Store { addr: ValueId, value: ValueId },
    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    /// Address of a global symbol.
    Symbol(String),
    Call { callee: Callee, args: Vec<ValueId> },
    Br { cond: ValueId, then_block: BlockId, else_block: BlockId },
    Jmp { target: BlockId },
    Ret,
    RetVal { value: ValueId },
}

impl Op {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Arg { .. } => "arg",
            Op::Imm(_) => "ldi",
            Op::ImmF(_) => "ldf",
            Op::Alloca { .. } => "alloca",
            Op::Load { .. } => "ld",
            Op::Store { .. } => "st",
            Op::Binary { op, .. } => op.mnemonic(),
            Op::Symbol(_) => "sym",
            Op::Call { .. } => "call",
            Op::Br { .. } => "br",
            Op::Jmp { .. } => "jmp",
            Op::Ret => "ret",
            Op::RetVal { .. } => "retr",
        }
    }

    /// Values read by this op.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Op::Arg { .. } | Op::Imm(_) | Op::ImmF(_) | Op::Alloca { .. } | Op::Symbol(_) => {
                Vec::new()
            }
            Op::Load { addr } => vec![*addr],
            Op::Store { addr, value } => vec![*addr, *value],
            Op::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Op::Call { callee, args } => {
                let mut operands = Vec::with_capacity(args.len() + 1);
                if let Callee::Indirect(target) = callee {
                    operands.push(*target);
                }
                operands.extend(args.iter().copied());
                operands
            }
            Op::Br { cond, .. } => vec![*cond],
            Op::Jmp { .. } | Op::Ret => Vec::new(),
            Op::RetVal { value } => vec![*value],
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Op::Br {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Op::Jmp { target } => vec![*target],
            _ => Vec::new(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Br { .. } | Op::Jmp { .. } | Op::Ret | Op::RetVal { .. })
    }

    /// Whether the op defines a value other ops may read.
    pub fn has_result(&self) -> bool {
        !matches!(
            self,
            Op::Store { .. } | Op::Br { .. } | Op::Jmp { .. } | Op::Ret | Op::RetVal { .. }
        )
    }
}

/// Named, ordered list of value ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub insts: Vec<ValueId>,
}

/// An IR function.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    name: String,
    args: Vec<ValueId>,
    blocks: Vec<Block>,
    values: Vec<Op>,
    value_names: Vec<Option<String>>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument values in declaration order.
    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn entry(&self) -> BlockId {
        BlockId::ENTRY
    }

    pub fn op(&self, value: ValueId) -> Option<&Op> {
        self.values.get(value.index())
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn value_name(&self, value: ValueId) -> Option<&str> {
        self.value_names.get(value.index()).and_then(|name| name.as_deref())
    }

    /// Name used when printing a value.
    pub fn display_value(&self, value: ValueId) -> String {
        match self.value_name(value) {
            Some(name) => format!("%{}", name),
            None => format!("%{}", value.0),
        }
    }
}

/// Incremental construction of a [`Function`].
pub struct FunctionBuilder {
    function: Function,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, arg_count: usize) -> Self {
        let mut function = Function {
            name: name.into(),
            args: Vec::with_capacity(arg_count),
            blocks: Vec::new(),
            values: Vec::new(),
            value_names: Vec::new(),
        };
        for index in 0..arg_count {
            let id = ValueId(function.values.len() as u32);
            function.values.push(Op::Arg { index });
            function.value_names.push(None);
            function.args.push(id);
        }
        Self {
            function,
            current: None,
        }
    }

    /// Argument value `index`.
    pub fn arg(&self, index: usize) -> Option<ValueId> {
        self.function.args.get(index).copied()
    }

    /// Create a block; the first one created is the entry.
    pub fn block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.function.blocks.len() as u32);
        self.function.blocks.push(Block {
            name: name.into(),
            insts: Vec::new(),
        });
        if self.current.is_none() {
            self.current = Some(id);
        }
        id
    }

    /// Append subsequent ops to `block`.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn name_value(&mut self, value: ValueId, name: impl Into<String>) {
        if let Some(slot) = self.function.value_names.get_mut(value.index()) {
            *slot = Some(name.into());
        }
    }

    /// Append an op to the current block, creating an `entry` block if none exists.
    pub fn push(&mut self, op: Op) -> ValueId {
        let block = match self.current {
            Some(block) => block,
            None => self.block("entry"),
        };
        let id = ValueId(self.function.values.len() as u32);
        self.function.values.push(op);
        self.function.value_names.push(None);
        self.function.blocks[block.index()].insts.push(id);
        id
    }

    pub fn imm(&mut self, value: i64) -> ValueId {
        self.push(Op::Imm(value))
    }

    pub fn alloca(&mut self, size: u64) -> ValueId {
        self.push(Op::Alloca { size })
    }

    pub fn load(&mut self, addr: ValueId) -> ValueId {
        self.push(Op::Load { addr })
    }

    pub fn store(&mut self, addr: ValueId, value: ValueId) -> ValueId {
        self.push(Op::Store { addr, value })
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(Op::Binary { op, lhs, rhs })
    }

    pub fn call(&mut self, callee: impl Into<String>, args: Vec<ValueId>) -> ValueId {
        self.push(Op::Call {
            callee: Callee::Direct(callee.into()),
            args,
        })
    }

    pub fn br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) -> ValueId {
        self.push(Op::Br {
            cond,
            then_block,
            else_block,
        })
    }

    pub fn jmp(&mut self, target: BlockId) -> ValueId {
        self.push(Op::Jmp { target })
    }

    pub fn ret(&mut self) -> ValueId {
        self.push(Op::Ret)
    }

    pub fn ret_value(&mut self, value: ValueId) -> ValueId {
        self.push(Op::RetVal { value })
    }

    pub fn finish(self) -> Function {
        self.function
    }
}

/// An IR program: functions in insertion order, unique by name.
#[derive(Debug, Clone, Default)]
pub struct Program {
    functions: Vec<Function>,
    index: HashMap<String, usize>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

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

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| self.display_value(*a)).collect();
        writeln!(f, "fn {}({}) {{", self.name, args.join(", "))?;
        let block_name = |id: &BlockId| {
            self.block(*id)
                .map(|b| b.name.clone())
                .unwrap_or_else(|| format!("<block{}>", id.0))
        };
        for block in &self.blocks {
            writeln!(f, "{}:", block.name)?;
            for &value in &block.insts {
                let Some(op) = self.op(value) else {
                    continue;
                };
                write!(f, "    ")?;
                if op.has_result() {
                    write!(f, "{} = ", self.display_value(value))?;
                }
                let v = |id: &ValueId| self.display_value(*id);
                match op {
                    Op::Arg { index } => write!(f, "arg {}", index)?,
                    Op::Imm(imm) => write!(f, "ldi {}", imm)?,
                    Op::ImmF(imm) => write!(f, "ldf {}", imm)?,
                    Op::Alloca { size } => write!(f, "alloca {}", size)?,
                    Op::Load { addr } => write!(f, "ld {}", v(addr))?,
                    Op::Store { addr, value } => write!(f, "st {}, {}", v(addr), v(value))?,
                    Op::Binary { op, lhs, rhs } => {
                        write!(f, "{} {}, {}", op.mnemonic(), v(lhs), v(rhs))?
                    }
                    Op::Symbol(name) => write!(f, "sym @{}", name)?,
                    Op::Call { callee, args } => {
                        let args: Vec<String> = args.iter().map(v).collect();
                        match callee {
                            Callee::Direct(name) => write!(f, "call @{}({})", name, args.join(", "))?,
                            Callee::Indirect(target) => {
                                write!(f, "call {}({})", v(target), args.join(", "))?
                            }
                        }
                    }
                    Op::Br {
                        cond,
                        then_block,
                        else_block,
                    } => write!(
                        f,
                        "br {}, {}, {}",
                        v(cond),
                        block_name(then_block),
                        block_name(else_block)
                    )?,
                    Op::Jmp { target } => write!(f, "jmp {}", block_name(target))?,
                    Op::Ret => write!(f, "ret")?,
                    Op::RetVal { value } => write!(f, "retr {}", v(value))?,
                }
                writeln!(f)?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}
