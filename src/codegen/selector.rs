// This module implements instruction selection from the register-based IR to T86. It
// starts at the entry function and discovers further functions lazily through a FIFO
// worklist fed by call sites, with a visited set marked on enqueue so every function
// (including directly recursive ones) is lowered exactly once. Inside a function, blocks
// are discovered the same way starting from the IR entry block; labels are handed out
// when a block is first enqueued, so forward and backward branches can reference blocks
// that are not lowered yet. Each function gets a prologue block, its body blocks in
// worklist order and one shared epilogue block. Generated block names join the function
// name and a block name with `$`, which IR identifiers cannot contain. Values live in
// abstract registers that never cross a block: a pre-pass finds values used outside the
// block segment that defines them and gives them a home stack slot, stores them after
// definition and reloads them where they are used. Comparisons feeding only their
// block's branch are fused into CMP plus an inverted conditional jump; all others are
// materialized as 0/1.

//! IR to T86 instruction selection.

use super::calling_convention;
use super::stack::{StackAllocator, WORD_BYTES};
use crate::core::{CompilationSession, CompileError, CompileResult};
use crate::ir::{self, BinOp, BlockId, Callee, Op, ValueId};
use crate::t86::{
    BasicBlock, BinaryOp, Function, Instruction, JumpOp, Operand, OperandId, Program, Register,
};
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;

/// Map a comparison to the jump taken when it holds.
pub fn condition_jump(op: BinOp) -> Option<JumpOp> {
    Some(match op {
        BinOp::Lt => JumpOp::Jl,
        BinOp::Le => JumpOp::Jle,
        BinOp::Gt => JumpOp::Jg,
        BinOp::Ge => JumpOp::Jge,
        BinOp::Eq => JumpOp::Je,
        BinOp::Ne => JumpOp::Jne,
        _ => return None,
    })
}

/// Arithmetic IR operators and their T86 opcode.
pub fn arithmetic_opcode(op: BinOp) -> Option<BinaryOp> {
    Some(match op {
        BinOp::Add => BinaryOp::Add,
        BinOp::Sub => BinaryOp::Sub,
        BinOp::Mul => BinaryOp::Mul,
        BinOp::Div => BinaryOp::Div,
        BinOp::Mod => BinaryOp::Mod,
        BinOp::And => BinaryOp::And,
        BinOp::Or => BinaryOp::Or,
        _ => return None,
    })
}

/// Lowers a whole IR program, one reachable function at a time.
pub struct InstructionSelector<'a, 'arena> {
    ir: &'a ir::Program,
    session: &'a CompilationSession<'arena>,
    program: Program,
    pending: VecDeque<String>,
    visited: HashSet<String>,
    next_register: u32,
}

impl<'a, 'arena> InstructionSelector<'a, 'arena> {
    pub fn new(ir: &'a ir::Program, session: &'a CompilationSession<'arena>) -> Self {
        Self {
            ir,
            session,
            program: Program::new(),
            pending: VecDeque::new(),
            visited: HashSet::new(),
            // R0 is the return register, abstract registers start above it.
            next_register: 1,
        }
    }

    /// Lower every function reachable from `entry`.
    pub fn select(mut self, entry: &str) -> CompileResult<Program> {
        if self.ir.function(entry).is_none() {
            return Err(CompileError::MissingEntry {
                name: entry.to_string(),
            });
        }
        log::info!("🔧 Selecting instructions from entry `{}`", entry);

        self.program.set_entry(entry);
        self.enqueue(entry);

        while let Some(name) = self.pending.pop_front() {
            let ir = self.ir;
            let function = ir
                .function(&name)
                .ok_or_else(|| CompileError::FunctionNotFound { name: name.clone() })?;
            let lowered = FunctionLowering::new(&mut self, function)?.lower()?;
            self.program.add_function(lowered)?;
        }

        Ok(self.program)
    }

    fn enqueue(&mut self, name: &str) {
        if self.visited.insert(name.to_string()) {
            log::debug!("📥 Function `{}` queued for lowering", name);
            self.pending.push_back(name.to_string());
        }
    }

    fn fresh_register(&mut self) -> OperandId {
        let index = self.next_register;
        self.next_register += 1;
        self.program.pool_mut().reg(Register::Virtual(index))
    }
}

/// Facts about one IR function gathered before lowering it.
#[derive(Debug, Default)]
struct FunctionAnalysis {
    /// Comparisons lowered together with the branch that consumes them.
    fused: HashSet<ValueId>,
    /// Values that need a home slot because they are read outside their segment.
    escaping: HashSet<ValueId>,
    uses: HashMap<ValueId, usize>,
}

impl FunctionAnalysis {
    fn analyze(function: &ir::Function) -> CompileResult<Self> {
        let malformed = |reason: String| CompileError::MalformedIr {
            function: function.name().to_string(),
            reason,
        };

        if function.blocks().is_empty() {
            return Err(malformed("function has no blocks".to_string()));
        }

        let mut placed: HashMap<ValueId, BlockId> = HashMap::new();
        for block_id in function.block_ids() {
            let Some(block) = function.block(block_id) else {
                continue;
            };
            if block.insts.is_empty() {
                return Err(malformed(format!("block `{}` is empty", block.name)));
            }
            for (pos, &value) in block.insts.iter().enumerate() {
                let op = function
                    .op(value)
                    .ok_or_else(|| malformed(format!("block `{}` lists unknown value", block.name)))?;
                if matches!(op, Op::Arg { .. }) {
                    return Err(malformed(format!(
                        "argument {} placed in block `{}`",
                        function.display_value(value),
                        block.name
                    )));
                }
                let last = pos + 1 == block.insts.len();
                if op.is_terminator() != last {
                    let reason = if last {
                        format!("block `{}` is not terminated", block.name)
                    } else {
                        format!("instruction after the terminator of block `{}`", block.name)
                    };
                    return Err(malformed(reason));
                }
                for successor in op.successors() {
                    if function.block(successor).is_none() {
                        return Err(malformed(format!("branch to unknown block {}", successor.0)));
                    }
                }
                if placed.insert(value, block_id).is_some() {
                    return Err(malformed(format!(
                        "value {} is placed twice",
                        function.display_value(value)
                    )));
                }
            }
        }

        let mut analysis = FunctionAnalysis::default();
        for block in function.blocks() {
            for &value in &block.insts {
                for operand in function.op(value).map(Op::operands).unwrap_or_default() {
                    let defined = match function.op(operand) {
                        Some(Op::Arg { .. }) => true,
                        Some(op) => op.has_result() && placed.contains_key(&operand),
                        None => false,
                    };
                    if !defined {
                        return Err(malformed(format!(
                            "{} does not name a value",
                            function.display_value(operand)
                        )));
                    }
                    *analysis.uses.entry(operand).or_insert(0) += 1;
                }
            }
        }

        // A comparison is fused when its only use is the branch ending its own block.
        for block_id in function.block_ids() {
            let Some(block) = function.block(block_id) else {
                continue;
            };
            let Some(&last) = block.insts.last() else {
                continue;
            };
            if let Some(Op::Br { cond, .. }) = function.op(last) {
                let is_compare = matches!(
                    function.op(*cond),
                    Some(Op::Binary { op, .. }) if op.is_comparison()
                );
                if is_compare
                    && placed.get(cond) == Some(&block_id)
                    && analysis.uses.get(cond) == Some(&1)
                {
                    analysis.fused.insert(*cond);
                }
            }
        }

        // Segment numbering: a materialized comparison splits its block.
        let mut def_site: HashMap<ValueId, (BlockId, usize)> = HashMap::new();
        for block_id in function.block_ids() {
            let Some(block) = function.block(block_id) else {
                continue;
            };
            let mut segment = 0;
            for &value in &block.insts {
                def_site.insert(value, (block_id, segment));
                if analysis.is_materialized_compare(function, value) {
                    segment += 1;
                }
            }
        }

        for block_id in function.block_ids() {
            let Some(block) = function.block(block_id) else {
                continue;
            };
            let mut segment = 0;
            for &value in &block.insts {
                let Some(op) = function.op(value) else {
                    continue;
                };
                if analysis.fused.contains(&value) {
                    continue;
                }
                let reads = match op {
                    Op::Br { cond, .. } if analysis.fused.contains(cond) => {
                        function.op(*cond).map(Op::operands).unwrap_or_default()
                    }
                    _ => op.operands(),
                };
                for operand in reads {
                    match function.op(operand) {
                        Some(Op::Arg { .. } | Op::Alloca { .. }) => {}
                        _ if analysis.is_materialized_compare(function, operand) => {
                            analysis.escaping.insert(operand);
                        }
                        _ => {
                            if def_site.get(&operand) != Some(&(block_id, segment)) {
                                analysis.escaping.insert(operand);
                            }
                        }
                    }
                }
                if analysis.is_materialized_compare(function, value) {
                    analysis.escaping.insert(value);
                    segment += 1;
                }
            }
        }

        Ok(analysis)
    }

    fn is_materialized_compare(&self, function: &ir::Function, value: ValueId) -> bool {
        matches!(function.op(value), Some(Op::Binary { op, .. }) if op.is_comparison())
            && !self.fused.contains(&value)
    }

    fn use_count(&self, value: ValueId) -> usize {
        self.uses.get(&value).copied().unwrap_or(0)
    }
}

/// Lowering state of one function.
struct FunctionLowering<'s, 'a, 'arena> {
    sel: &'s mut InstructionSelector<'a, 'arena>,
    function: &'a ir::Function,
    analysis: FunctionAnalysis,
    target: Function,
    frame: OperandId,
    stack: StackAllocator,
    labels: HashMap<BlockId, String>,
    worklist: VecDeque<BlockId>,
    /// BP offsets of allocas.
    slots: HashMap<ValueId, i64>,
    /// BP offsets of home slots.
    homes: HashMap<ValueId, i64>,
    /// Abstract register holding a value in the current segment.
    local: HashMap<ValueId, OperandId>,
    block: BasicBlock,
    done: Vec<BasicBlock>,
    epilogue: String,
}

impl<'s, 'a, 'arena> FunctionLowering<'s, 'a, 'arena> {
    fn new(
        sel: &'s mut InstructionSelector<'a, 'arena>,
        function: &'a ir::Function,
    ) -> CompileResult<Self> {
        sel.session.set_current_function(function.name());
        let analysis = FunctionAnalysis::analyze(function)?;

        let mut stack = StackAllocator::new();
        let mut escaping: Vec<ValueId> = analysis.escaping.iter().copied().collect();
        escaping.sort();
        let homes = escaping
            .into_iter()
            .map(|value| (value, stack.allocate_word()))
            .collect();

        let epilogue = sel
            .program
            .fresh_block_name(&format!("{}$epilogue", function.name()));
        let frame = sel.program.pool_mut().imm(0);
        let mut target = Function::new(function.name());
        target.frame = Some(frame);

        Ok(Self {
            sel,
            function,
            analysis,
            target,
            frame,
            stack,
            labels: HashMap::new(),
            worklist: VecDeque::new(),
            slots: HashMap::new(),
            homes,
            local: HashMap::new(),
            block: BasicBlock::new(""),
            done: Vec::new(),
            epilogue,
        })
    }

    fn lower(mut self) -> CompileResult<Function> {
        let name = self.function.name();
        log::info!("🔧 Lowering function `{}`", name);

        let prologue_name = self.sel.program.fresh_block_name(&format!("{}$prologue", name));
        let body = self.label_for(self.function.entry())?;

        let arg_registers: Vec<OperandId> = (0..self.function.args().len())
            .map(|_| self.sel.fresh_register())
            .collect();
        self.target.args = arg_registers.clone();
        self.start_block(prologue_name);
        let frame = self.frame;
        let insts = calling_convention::prologue(self.sel.program.pool_mut(), frame, &arg_registers, &body);
        self.emit_all(insts);
        self.finish_block();

        while let Some(block) = self.worklist.pop_front() {
            self.lower_block(block)?;
        }

        self.start_block(self.epilogue.clone());
        let insts = calling_convention::epilogue(self.sel.program.pool_mut(), frame);
        self.emit_all(insts);
        self.finish_block();

        self.target.stack_size = self.stack.size();
        self.sel
            .program
            .pool_mut()
            .set(frame, Operand::Imm(self.stack.size() as i64));

        for block in std::mem::take(&mut self.done) {
            self.target.push_block(block)?;
        }
        self.sel
            .session
            .record_function_lowered(name, self.target.instruction_count());
        log::debug!(
            "✅ `{}` lowered: {} blocks, {} instructions, frame {} words",
            name,
            self.target.blocks().len(),
            self.target.instruction_count(),
            self.target.stack_size
        );
        Ok(self.target)
    }

    /// Label of an IR block, enqueueing the block the first time it is seen.
    fn label_for(&mut self, block: BlockId) -> CompileResult<String> {
        if let Some(label) = self.labels.get(&block) {
            return Ok(label.clone());
        }
        let ir_block = self.function.block(block).ok_or_else(|| CompileError::MalformedIr {
            function: self.function.name().to_string(),
            reason: format!("branch to unknown block {}", block.0),
        })?;
        let label = self
            .sel
            .program
            .fresh_block_name(&format!("{}${}", self.function.name(), ir_block.name));
        self.labels.insert(block, label.clone());
        self.worklist.push_back(block);
        Ok(label)
    }

    fn start_block(&mut self, name: String) {
        self.block = BasicBlock::new(name);
        self.local.clear();
        self.sel.session.record_block_lowered();
    }

    fn finish_block(&mut self) {
        let block = std::mem::replace(&mut self.block, BasicBlock::new(""));
        log::trace!("📦 Finished block {} ({} instructions)", block.name(), block.len());
        self.done.push(block);
    }

    fn emit(&mut self, inst: Instruction) {
        log::trace!("    {}", inst.display(self.sel.program.pool()));
        self.sel.session.record_instruction_selected(inst.mnemonic());
        self.block.push(inst);
    }

    fn emit_all(&mut self, insts: Vec<Instruction>) {
        for inst in insts {
            self.emit(inst);
        }
    }

    fn slot_operand(&mut self, offset: i64) -> OperandId {
        self.sel.program.pool_mut().add(Operand::frame_slot(offset))
    }

    fn not_implemented(&self, opcode: &str) -> CompileError {
        CompileError::NotImplemented {
            opcode: opcode.to_string(),
            function: self.function.name().to_string(),
        }
    }

    fn malformed(&self, reason: String) -> CompileError {
        CompileError::MalformedIr {
            function: self.function.name().to_string(),
            reason,
        }
    }

    fn lower_block(&mut self, block: BlockId) -> CompileResult<()> {
        let label = self.label_for(block)?;
        let function = self.function;
        let ir_block = function
            .block(block)
            .ok_or_else(|| self.malformed(format!("unknown block {}", block.0)))?;
        log::trace!("📦 Lowering block {} as {}", ir_block.name, label);

        self.start_block(label);
        for &value in &ir_block.insts {
            self.lower_instruction(value)?;
        }
        self.finish_block();
        Ok(())
    }

    fn lower_instruction(&mut self, value: ValueId) -> CompileResult<()> {
        let function = self.function;
        let op = function
            .op(value)
            .ok_or_else(|| self.malformed(format!("unknown value {}", value.0)))?;

        match op {
            Op::Arg { .. } => Ok(()),
            Op::Imm(imm) => self.lower_imm(value, *imm),
            Op::ImmF(_) => Err(self.not_implemented("ldf")),
            Op::Symbol(_) => Err(self.not_implemented("sym")),
            Op::Alloca { size } => self.lower_alloca(value, *size),
            Op::Load { addr } => self.lower_load(value, *addr),
            Op::Store { addr, value: stored } => self.lower_store(*addr, *stored),
            Op::Binary { op, lhs, rhs } if op.is_comparison() => {
                if self.analysis.fused.contains(&value) {
                    Ok(())
                } else {
                    self.lower_materialized_compare(value, *op, *lhs, *rhs)
                }
            }
            Op::Binary { op, lhs, rhs } => self.lower_arithmetic(value, *op, *lhs, *rhs),
            Op::Call { callee, args } => self.lower_call(value, callee, args),
            Op::Br {
                cond,
                then_block,
                else_block,
            } => self.lower_branch(*cond, *then_block, *else_block),
            Op::Jmp { target } => {
                let label = self.label_for(*target)?;
                let label = self.sel.program.pool_mut().label(label);
                self.emit(Instruction::jump(JumpOp::Jmp, label));
                Ok(())
            }
            Op::Ret => {
                self.emit_jump_to_epilogue();
                Ok(())
            }
            Op::RetVal { value: returned } => {
                let source = self.resolve(*returned)?;
                let inst = calling_convention::return_value(self.sel.program.pool_mut(), source);
                self.emit(inst);
                self.emit_jump_to_epilogue();
                Ok(())
            }
        }
    }

    /// Register holding `value` in the current segment, loading it if needed.
    fn resolve(&mut self, value: ValueId) -> CompileResult<OperandId> {
        if let Some(&register) = self.local.get(&value) {
            return Ok(register);
        }
        let function = self.function;
        let source = match function.op(value) {
            Some(Op::Arg { index }) => calling_convention::arg_slot(*index),
            Some(Op::Alloca { .. }) => return Err(self.not_implemented("alloca address as value")),
            _ => match self.homes.get(&value) {
                Some(&offset) => Operand::frame_slot(offset),
                None => {
                    return Err(self.malformed(format!(
                        "{} is used before its definition",
                        function.display_value(value)
                    )))
                }
            },
        };
        let register = self.sel.fresh_register();
        let source = self.sel.program.pool_mut().add(source);
        self.emit(Instruction::mov(register, source));
        self.local.insert(value, register);
        Ok(register)
    }

    /// Bind a freshly computed value and store it home when other segments read it.
    fn define(&mut self, value: ValueId, register: OperandId) {
        self.local.insert(value, register);
        if let Some(&offset) = self.homes.get(&value) {
            let home = self.slot_operand(offset);
            self.emit(Instruction::mov(home, register));
        }
    }

    fn alloca_slot(&self, addr: ValueId, opcode: &str) -> CompileResult<i64> {
        self.slots
            .get(&addr)
            .copied()
            .ok_or_else(|| self.not_implemented(&format!("{} through a computed address", opcode)))
    }

    fn lower_imm(&mut self, value: ValueId, imm: i64) -> CompileResult<()> {
        let register = self.sel.fresh_register();
        let source = self.sel.program.pool_mut().imm(imm);
        self.emit(Instruction::mov(register, source));
        self.define(value, register);
        Ok(())
    }

    fn lower_alloca(&mut self, value: ValueId, size: u64) -> CompileResult<()> {
        let offset = self
            .stack
            .allocate(size)
            .ok_or_else(|| CompileError::UnsupportedLocalSize {
                size,
                function: self.function.name().to_string(),
            })?;
        log::trace!("📍 alloca {} bytes at [BP - {}] (word {})", size, -offset, WORD_BYTES);
        self.slots.insert(value, offset);
        let slot = self.slot_operand(offset);
        let zero = self.sel.program.pool_mut().imm(0);
        self.emit(Instruction::mov(slot, zero));
        Ok(())
    }

    fn lower_load(&mut self, value: ValueId, addr: ValueId) -> CompileResult<()> {
        let offset = self.alloca_slot(addr, "ld")?;
        let register = self.sel.fresh_register();
        let slot = self.slot_operand(offset);
        self.emit(Instruction::mov(register, slot));
        self.define(value, register);
        Ok(())
    }

    fn lower_store(&mut self, addr: ValueId, stored: ValueId) -> CompileResult<()> {
        let offset = self.alloca_slot(addr, "st")?;
        let source = self.resolve(stored)?;
        let slot = self.slot_operand(offset);
        self.emit(Instruction::mov(slot, source));
        Ok(())
    }

    fn lower_arithmetic(
        &mut self,
        value: ValueId,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> CompileResult<()> {
        let opcode = arithmetic_opcode(op).ok_or_else(|| self.not_implemented(op.mnemonic()))?;
        let left = self.resolve(lhs)?;
        let right = self.resolve(rhs)?;
        let result = self.sel.fresh_register();
        self.emit(Instruction::mov(result, left));
        self.emit(Instruction::binary(opcode, result, right));
        self.define(value, result);
        Ok(())
    }

    /// `MOV [t], 1; CMP a, b; Jcc join; JMP false`, then `false: MOV [t], 0; JMP join`.
    fn lower_materialized_compare(
        &mut self,
        value: ValueId,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> CompileResult<()> {
        let jump = condition_jump(op).ok_or_else(|| self.not_implemented(op.mnemonic()))?;
        let offset = *self
            .homes
            .get(&value)
            .ok_or_else(|| self.malformed("comparison without a result slot".to_string()))?;
        let left = self.resolve(lhs)?;
        let right = self.resolve(rhs)?;

        let name = self.function.name();
        let false_name = self.sel.program.fresh_block_name(&format!("{}$cmp_false", name));
        let join_name = self.sel.program.fresh_block_name(&format!("{}$cmp_join", name));

        let slot = self.slot_operand(offset);
        let one = self.sel.program.pool_mut().imm(1);
        self.emit(Instruction::mov(slot, one));
        self.emit(Instruction::binary(BinaryOp::Cmp, left, right));
        let join = self.sel.program.pool_mut().label(join_name.clone());
        self.emit(Instruction::jump(jump, join));
        let false_label = self.sel.program.pool_mut().label(false_name.clone());
        self.emit(Instruction::jump(JumpOp::Jmp, false_label));
        self.finish_block();

        self.start_block(false_name);
        let slot = self.slot_operand(offset);
        let zero = self.sel.program.pool_mut().imm(0);
        self.emit(Instruction::mov(slot, zero));
        let join = self.sel.program.pool_mut().label(join_name.clone());
        self.emit(Instruction::jump(JumpOp::Jmp, join));
        self.finish_block();

        self.start_block(join_name);
        Ok(())
    }

    fn lower_call(&mut self, value: ValueId, callee: &Callee, args: &[ValueId]) -> CompileResult<()> {
        let name = match callee {
            Callee::Direct(name) => name,
            Callee::Indirect(_) => {
                return Err(CompileError::UnsupportedCall {
                    function: self.function.name().to_string(),
                })
            }
        };
        let ir = self.sel.ir;
        let target = ir
            .function(name)
            .ok_or_else(|| CompileError::FunctionNotFound { name: name.clone() })?;
        if target.args().len() != args.len() {
            return Err(self.malformed(format!(
                "call to `{}` passes {} arguments, expected {}",
                name,
                args.len(),
                target.args().len()
            )));
        }
        self.sel.enqueue(name);

        let mut registers = Vec::with_capacity(args.len());
        for arg in args {
            registers.push(self.resolve(*arg)?);
        }
        let insts = calling_convention::call_sequence(self.sel.program.pool_mut(), name, &registers);
        self.emit_all(insts);

        if self.analysis.use_count(value) > 0 {
            let result = self.sel.fresh_register();
            let ret = self.sel.program.pool_mut().reg(Register::RETURN);
            self.emit(Instruction::mov(result, ret));
            self.define(value, result);
        }
        Ok(())
    }

    fn lower_branch(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) -> CompileResult<()> {
        let then_label = self.label_for(then_block)?;
        let else_label = self.label_for(else_block)?;

        let function = self.function;
        let jump = match function.op(cond) {
            Some(Op::Binary { op, lhs, rhs }) if self.analysis.fused.contains(&cond) => {
                let jump = condition_jump(*op)
                    .and_then(JumpOp::negate)
                    .ok_or_else(|| self.not_implemented(op.mnemonic()))?;
                let left = self.resolve(*lhs)?;
                let right = self.resolve(*rhs)?;
                self.emit(Instruction::binary(BinaryOp::Cmp, left, right));
                jump
            }
            _ => {
                let value = self.resolve(cond)?;
                let zero = self.sel.program.pool_mut().imm(0);
                self.emit(Instruction::binary(BinaryOp::Cmp, value, zero));
                JumpOp::Jz
            }
        };

        let else_target = self.sel.program.pool_mut().label(else_label);
        self.emit(Instruction::jump(jump, else_target));
        let then_target = self.sel.program.pool_mut().label(then_label);
        self.emit(Instruction::jump(JumpOp::Jmp, then_target));
        Ok(())
    }

    fn emit_jump_to_epilogue(&mut self) {
        let label = self.sel.program.pool_mut().label(self.epilogue.clone());
        self.emit(Instruction::jump(JumpOp::Jmp, label));
    }
}

/// Lower every function reachable from `entry` into an abstract-register program.
pub fn select(ir: &ir::Program, entry: &str, session: &CompilationSession<'_>) -> CompileResult<Program> {
    InstructionSelector::new(ir, session).select(entry)
}
