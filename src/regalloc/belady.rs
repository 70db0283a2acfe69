// This module implements the local register allocator. Each basic block is allocated in
// isolation with a single forward pass driven by the block's liveness tables. Abstract
// registers and memory words are bound to physical registers on demand: a MOV from an
// immediate, a special register or uncached memory claims a register, a MOV between
// values that are already resident only records an alias and turns into NOP, and stores
// to memory that is read again later stay in the register as dirty cache entries until
// their last read, a call, an eviction or the end of the block writes them back. When no
// register is free the resident value whose next read lies furthest ahead is evicted
// (Belady's MIN restricted to one block). Rewriting is done through the shared operand
// pool, so binding an abstract register updates every instruction that refers to it; an
// abstract register that comes back from a spill in a different register is moved to a
// fresh operand instance for its remaining uses. Before an arithmetic instruction
// overwrites a register, other live values aliasing it are copied out or spilled.

//! Belady-style local register allocation.

use super::liveness::BlockLiveness;
use crate::codegen::StackAllocator;
use crate::core::{CompilationSession, CompileError, CompileResult};
use crate::t86::{
    BasicBlock, BinaryOp, Function, Instruction, JumpOp, Operand, OperandId, OperandPool, Program,
    RegSet, Register, UnaryOp,
};
use hashbrown::{HashMap, HashSet};

/// Allocates physical registers `R1..=Rn` block by block.
pub struct LocalAllocator<'a, 'arena> {
    session: &'a CompilationSession<'arena>,
    registers: u32,
}

impl<'a, 'arena> LocalAllocator<'a, 'arena> {
    pub fn new(session: &'a CompilationSession<'arena>, registers: usize) -> Self {
        Self {
            session,
            registers: registers as u32,
        }
    }

    /// Allocate every block of every function.
    pub fn allocate_program(&self, program: &mut Program) -> CompileResult<()> {
        log::info!("🧮 Allocating {} physical registers", self.registers);
        let (functions, pool) = program.parts_mut();
        for function in functions.iter_mut() {
            self.allocate_function(function, pool)?;
        }
        Ok(())
    }

    /// Allocate one function and grow its frame by the spill slots it needed.
    pub fn allocate_function(&self, function: &mut Function, pool: &mut OperandPool) -> CompileResult<()> {
        self.session.set_current_function(function.name());
        let mut stack = StackAllocator::with_size(function.stack_size);
        for block in function.blocks_mut().iter_mut() {
            self.allocate_block(block, pool, &mut stack)?;
        }

        if stack.size() != function.stack_size {
            log::debug!(
                "📐 `{}` frame grows from {} to {} words",
                function.name(),
                function.stack_size,
                stack.size()
            );
        }
        function.stack_size = stack.size();
        if let Some(frame) = function.frame {
            pool.set(frame, Operand::Imm(stack.size() as i64));
        }
        Ok(())
    }

    /// Rewrite one block so it only references physical registers.
    pub fn allocate_block(
        &self,
        block: &mut BasicBlock,
        pool: &mut OperandPool,
        stack: &mut StackAllocator,
    ) -> CompileResult<()> {
        let group_start = block.terminator_start();
        let name = block.name().to_string();
        let insts = block.take_instructions();
        let count = insts.len();
        log::debug!("🧮 Allocating block {} ({} instructions)", name, count);

        let liveness = BlockLiveness::compute(self.session.arena(), &insts, pool);
        let mut state = BlockState::new(name, pool, &liveness, stack, self.session, self.registers);

        for (index, inst) in insts.into_iter().enumerate() {
            if index == group_start {
                state.write_back_all();
            }
            state.allocate_instruction(index, inst)?;
            state.release_dead(index);
        }
        if group_start >= count {
            state.write_back_all();
        }

        *block.instructions_mut() = state.finish()?;
        Ok(())
    }
}

/// What the allocator needs to know about an operand.
enum Class {
    /// Abstract register, identified by its original operand.
    Virtual(Operand),
    /// Memory word that may be cached in a register.
    Memory(Operand),
    /// Immediates, labels and special registers.
    Other,
}

/// Allocation state of the block being processed.
struct BlockState<'b, 'arena> {
    block: String,
    pool: &'b mut OperandPool,
    liveness: &'b BlockLiveness<'arena>,
    stack: &'b mut StackAllocator,
    session: &'b CompilationSession<'arena>,
    registers: u32,
    /// Register currently holding each abstract register or cached memory word.
    bindings: HashMap<Operand, u32>,
    /// Number of bindings per register.
    occupancy: Vec<u32>,
    free: RegSet,
    /// Cached memory words whose register copy is newer than memory.
    dirty: HashSet<Operand>,
    spill_slots: HashMap<Operand, i64>,
    /// Original abstract operand of every id the allocator rewrote.
    origin: HashMap<OperandId, Operand>,
    /// Ids replaced for the rest of the block after a value moved registers.
    retarget: HashMap<OperandId, OperandId>,
    /// Registers read or written by the current instruction.
    pinned: RegSet,
    out: Vec<Instruction>,
}

impl<'b, 'arena> BlockState<'b, 'arena> {
    fn new(
        block: String,
        pool: &'b mut OperandPool,
        liveness: &'b BlockLiveness<'arena>,
        stack: &'b mut StackAllocator,
        session: &'b CompilationSession<'arena>,
        registers: u32,
    ) -> Self {
        Self {
            block,
            pool,
            liveness,
            stack,
            session,
            registers,
            bindings: HashMap::new(),
            occupancy: vec![0; registers as usize + 1],
            free: RegSet::range(1, registers),
            dirty: HashSet::new(),
            spill_slots: HashMap::new(),
            origin: HashMap::new(),
            retarget: HashMap::new(),
            pinned: RegSet::new(),
            out: Vec::with_capacity(liveness.len()),
        }
    }

    fn emit(&mut self, inst: Instruction) {
        log::trace!("    {}", inst.display(self.pool));
        self.out.push(inst);
    }

    fn physical(&mut self, register: u32) -> OperandId {
        self.pool.reg(Register::Physical(register))
    }

    fn classify(&self, id: OperandId) -> Class {
        if let Some(original) = self.origin.get(&id) {
            return Class::Virtual(original.clone());
        }
        match &self.pool[id] {
            operand @ Operand::Reg(Register::Virtual(_)) => Class::Virtual(operand.clone()),
            operand @ Operand::Mem { .. } => Class::Memory(operand.clone()),
            _ => Class::Other,
        }
    }

    fn retargeted(&self, mut id: OperandId) -> OperandId {
        while let Some(&next) = self.retarget.get(&id) {
            id = next;
        }
        id
    }

    fn apply_retarget(&self, mut inst: Instruction) -> Instruction {
        for id in inst.operands() {
            let target = self.retargeted(id);
            if target != id {
                inst.replace_operand(id, target);
            }
        }
        inst
    }

    fn bind(&mut self, key: Operand, register: u32) {
        match self.bindings.insert(key, register) {
            Some(old) if old == register => return,
            Some(old) => self.release_register(old),
            None => {}
        }
        self.occupancy[register as usize] += 1;
        self.free.remove(register);
    }

    fn unbind(&mut self, key: &Operand) {
        if let Some(register) = self.bindings.remove(key) {
            self.release_register(register);
        }
    }

    fn release_register(&mut self, register: u32) {
        let count = &mut self.occupancy[register as usize];
        debug_assert!(*count > 0, "R{} released more often than bound", register);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.free.insert(register);
        }
    }

    /// Operands bound to `register`, in a stable order.
    fn bound_to(&self, register: u32) -> Vec<Operand> {
        let mut keys: Vec<Operand> = self
            .bindings
            .iter()
            .filter(|(_, &r)| r == register)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn spill_slot(&mut self, key: &Operand) -> i64 {
        if let Some(&offset) = self.spill_slots.get(key) {
            return offset;
        }
        let offset = self.stack.allocate_word();
        self.spill_slots.insert(key.clone(), offset);
        offset
    }

    /// Store register `register` to the spill slot of `key`.
    fn spill_value(&mut self, key: &Operand, register: u32) {
        let offset = self.spill_slot(key);
        log::debug!("💾 Spilling {} from R{} to [BP - {}] in {}", key, register, -offset, self.block);
        let slot = self.pool.add(Operand::frame_slot(offset));
        let source = self.physical(register);
        self.emit(Instruction::mov(slot, source));
        self.session.record_spill();
    }

    fn write_back(&mut self, key: &Operand, register: u32) {
        let target = self.pool.add(key.clone());
        let source = self.physical(register);
        self.emit(Instruction::mov(target, source));
    }

    /// Write every dirty memory word back, keeping the clean copies.
    fn write_back_all(&mut self) {
        let mut dirty: Vec<Operand> = self.dirty.drain().collect();
        dirty.sort();
        for key in dirty {
            if let Some(&register) = self.bindings.get(&key) {
                self.write_back(&key, register);
            }
        }
    }

    /// Empty `register`, saving whatever is still needed from instruction `index` on.
    fn spill_register(&mut self, register: u32, index: usize) {
        for key in self.bound_to(register) {
            match key {
                Operand::Mem { .. } => {
                    if self.dirty.remove(&key) {
                        self.write_back(&key, register);
                    }
                }
                _ => {
                    if self.liveness.next_read(&key, index).is_some() {
                        self.spill_value(&key, register);
                    }
                }
            }
            self.unbind(&key);
        }
    }

    /// Evict the register whose values are read furthest in the future.
    fn evict(&mut self, index: usize) -> CompileResult<()> {
        let mut best: Option<(u32, usize)> = None;
        for register in 1..=self.registers {
            if self.pinned.contains(register) || self.occupancy[register as usize] == 0 {
                continue;
            }
            let distance = self
                .bound_to(register)
                .iter()
                .map(|key| self.liveness.next_read(key, index).unwrap_or(usize::MAX))
                .min()
                .unwrap_or(usize::MAX);
            if best.map_or(true, |(_, furthest)| distance > furthest) {
                best = Some((register, distance));
            }
        }

        let (victim, distance) = best.ok_or_else(|| CompileError::RegisterPressure {
            block: self.block.clone(),
            index,
        })?;
        log::debug!(
            "♻️  Evicting R{} at {}[{}] (next read {})",
            victim,
            self.block,
            index,
            if distance == usize::MAX {
                "never".to_string()
            } else {
                distance.to_string()
            }
        );
        self.spill_register(victim, index);
        Ok(())
    }

    /// A free register, evicting one if necessary.
    fn acquire(&mut self, index: usize) -> CompileResult<u32> {
        if self.free.is_empty() {
            self.evict(index)?;
        }
        self.free.first().ok_or_else(|| CompileError::RegisterPressure {
            block: self.block.clone(),
            index,
        })
    }

    /// Make operand `id` (an instance of abstract register `key`) name `register`.
    /// Returns the id the current instruction must use.
    fn attach(&mut self, id: OperandId, key: &Operand, register: u32) -> OperandId {
        let id = self.retargeted(id);
        let current = self.pool[id].clone();
        match current {
            Operand::Reg(Register::Virtual(_)) => {
                self.origin.insert(id, key.clone());
                self.pool.set(id, Operand::Reg(Register::Physical(register)));
                id
            }
            Operand::Reg(Register::Physical(held)) if held == register => id,
            _ => {
                let split = self.physical(register);
                self.origin.insert(split, key.clone());
                self.retarget.insert(id, split);
                split
            }
        }
    }

    /// Bring abstract register `key` into a register for instruction `index`.
    fn resolve_use(&mut self, index: usize, id: OperandId, key: Operand) -> CompileResult<(u32, OperandId)> {
        let register = if let Some(&register) = self.bindings.get(&key) {
            register
        } else if let Some(&offset) = self.spill_slots.get(&key) {
            let register = self.acquire(index)?;
            let target = self.physical(register);
            let slot = self.pool.add(Operand::frame_slot(offset));
            self.emit(Instruction::mov(target, slot));
            self.session.record_reload();
            log::debug!("📤 Reloading {} into R{} in {}", key, register, self.block);
            self.bind(key.clone(), register);
            register
        } else {
            return Err(CompileError::OperandNotResident {
                block: self.block.clone(),
                index,
                operand: key.to_string(),
            });
        };
        self.pinned.insert(register);
        let id = self.attach(id, &key, register);
        Ok((register, id))
    }

    /// Operand id to use for a read of `id`.
    fn use_operand(&mut self, index: usize, id: OperandId) -> CompileResult<OperandId> {
        match self.classify(id) {
            Class::Virtual(key) => Ok(self.resolve_use(index, id, key)?.1),
            Class::Memory(key) => match self.bindings.get(&key) {
                Some(&register) => {
                    self.pinned.insert(register);
                    Ok(self.physical(register))
                }
                None => Ok(id),
            },
            Class::Other => Ok(id),
        }
    }

    /// Forget any cached copy of a memory word that is about to be overwritten.
    fn invalidate(&mut self, key: &Operand) {
        self.dirty.remove(key);
        self.unbind(key);
    }

    fn allocate_instruction(&mut self, index: usize, inst: Instruction) -> CompileResult<()> {
        self.pinned.clear();
        let inst = self.apply_retarget(inst);
        match inst {
            Instruction::Nullary(_) => self.emit(inst),
            Instruction::Jump {
                op: JumpOp::Call, ..
            } => {
                // The callee may use every general purpose register.
                for register in 1..=self.registers {
                    if self.occupancy[register as usize] > 0 {
                        self.spill_register(register, index);
                    }
                }
                self.emit(inst);
            }
            Instruction::Jump { .. } => self.emit(inst),
            Instruction::Unary {
                op: UnaryOp::Push,
                operand,
            } => {
                let operand = self.use_operand(index, operand)?;
                self.emit(Instruction::push(operand));
            }
            Instruction::Unary {
                op: UnaryOp::Pop,
                operand,
            } => self.allocate_pop(index, operand)?,
            Instruction::Binary {
                op: BinaryOp::Mov,
                target,
                source,
            } => self.allocate_mov(index, target, source)?,
            Instruction::Binary {
                op: BinaryOp::Cmp,
                target,
                source,
            } => {
                let target = self.use_operand(index, target)?;
                let source = self.use_operand(index, source)?;
                self.emit(Instruction::binary(BinaryOp::Cmp, target, source));
            }
            Instruction::Binary { op, target, source } => {
                self.allocate_arithmetic(index, op, target, source)?
            }
        }
        Ok(())
    }

    fn allocate_pop(&mut self, index: usize, operand: OperandId) -> CompileResult<()> {
        match self.classify(operand) {
            Class::Virtual(key) => {
                let register = self.acquire(index)?;
                self.bind(key.clone(), register);
                let operand = self.attach(operand, &key, register);
                self.emit(Instruction::pop(operand));
            }
            Class::Memory(key) => {
                self.invalidate(&key);
                self.emit(Instruction::pop(operand));
            }
            Class::Other => self.emit(Instruction::pop(operand)),
        }
        Ok(())
    }

    fn eliminate(&mut self) {
        self.session.record_move_eliminated();
        self.emit(Instruction::NOP);
    }

    fn allocate_mov(&mut self, index: usize, target: OperandId, source: OperandId) -> CompileResult<()> {
        match self.classify(target) {
            Class::Virtual(target_key) => {
                if !self.liveness.is_live_after(index, &target_key) {
                    log::trace!("    dead definition of {}", target_key);
                    self.eliminate();
                    return Ok(());
                }
                match self.classify(source) {
                    Class::Virtual(source_key) => {
                        let (register, _) = self.resolve_use(index, source, source_key)?;
                        self.bind(target_key.clone(), register);
                        self.attach(target, &target_key, register);
                        self.eliminate();
                    }
                    Class::Memory(memory) => {
                        if let Some(&register) = self.bindings.get(&memory) {
                            self.bind(target_key.clone(), register);
                            self.attach(target, &target_key, register);
                            self.eliminate();
                        } else {
                            let register = self.acquire(index)?;
                            self.pinned.insert(register);
                            self.bind(target_key.clone(), register);
                            let target = self.attach(target, &target_key, register);
                            self.emit(Instruction::mov(target, source));
                            if self.liveness.is_live_after(index, &memory) {
                                self.bind(memory, register);
                            }
                        }
                    }
                    Class::Other => {
                        let register = self.acquire(index)?;
                        self.pinned.insert(register);
                        self.bind(target_key.clone(), register);
                        let target = self.attach(target, &target_key, register);
                        self.emit(Instruction::mov(target, source));
                    }
                }
            }
            Class::Memory(memory) => match self.classify(source) {
                Class::Virtual(source_key) => {
                    let (register, source) = self.resolve_use(index, source, source_key)?;
                    if self.liveness.is_live_after(index, &memory) {
                        self.bind(memory.clone(), register);
                        self.dirty.insert(memory);
                        self.eliminate();
                    } else {
                        self.invalidate(&memory);
                        self.emit(Instruction::mov(target, source));
                    }
                }
                Class::Memory(_) | Class::Other => {
                    let source = self.use_operand(index, source)?;
                    self.invalidate(&memory);
                    self.emit(Instruction::mov(target, source));
                }
            },
            Class::Other => {
                let source = self.use_operand(index, source)?;
                self.emit(Instruction::mov(target, source));
            }
        }
        Ok(())
    }

    fn allocate_arithmetic(
        &mut self,
        index: usize,
        op: BinaryOp,
        target: OperandId,
        source: OperandId,
    ) -> CompileResult<()> {
        match self.classify(target) {
            Class::Virtual(target_key) => {
                let source = self.use_operand(index, source)?;
                let (register, target) = self.resolve_use(index, target, target_key.clone())?;
                self.separate(index, register, &target_key);
                self.emit(Instruction::binary(op, target, source));
            }
            Class::Memory(memory) => {
                let source = self.use_operand(index, source)?;
                if let Some(&register) = self.bindings.get(&memory) {
                    if self.dirty.remove(&memory) {
                        self.write_back(&memory, register);
                    }
                    self.unbind(&memory);
                }
                self.emit(Instruction::binary(op, target, source));
            }
            Class::Other => {
                let source = self.use_operand(index, source)?;
                self.emit(Instruction::binary(op, target, source));
            }
        }
        Ok(())
    }

    /// Detach every other value from `register` before `owner` overwrites it.
    fn separate(&mut self, index: usize, register: u32, owner: &Operand) {
        for key in self.bound_to(register) {
            if &key == owner {
                continue;
            }
            match key {
                Operand::Mem { .. } => {
                    if self.dirty.remove(&key) {
                        self.write_back(&key, register);
                    }
                    self.unbind(&key);
                }
                _ => {
                    if !self.liveness.is_live_after(index, &key) {
                        self.unbind(&key);
                        continue;
                    }
                    match self.free.first() {
                        Some(copy) => {
                            log::trace!("    copy {} from R{} to R{}", key, register, copy);
                            let target = self.physical(copy);
                            let source = self.physical(register);
                            self.emit(Instruction::mov(target, source));
                            self.unbind(&key);
                            self.bind(key, copy);
                        }
                        None => {
                            self.spill_value(&key, register);
                            self.unbind(&key);
                        }
                    }
                }
            }
        }
    }

    /// Drop bindings whose value is not read after instruction `index`.
    fn release_dead(&mut self, index: usize) {
        let mut keys: Vec<Operand> = self.bindings.keys().cloned().collect();
        keys.sort();
        for key in keys {
            if self.liveness.is_live_after(index, &key) {
                continue;
            }
            if self.dirty.remove(&key) {
                if let Some(&register) = self.bindings.get(&key) {
                    self.write_back(&key, register);
                }
            }
            self.unbind(&key);
        }
    }

    /// Tear down the block state and hand back the rewritten instructions.
    fn finish(self) -> CompileResult<Vec<Instruction>> {
        let leaked = self.bindings.len();
        if leaked > 0 || !self.dirty.is_empty() || self.free.len() != self.registers as usize {
            return Err(CompileError::LeakedBinding {
                block: self.block,
                reason: format!(
                    "{} bindings and {} dirty words remain, {} of {} registers free",
                    leaked,
                    self.dirty.len(),
                    self.free.len(),
                    self.registers
                ),
            });
        }
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::t86::NullaryOp;
    use bumpalo::Bump;

    fn render(block: &BasicBlock, pool: &OperandPool) -> Vec<String> {
        block
            .instructions()
            .iter()
            .map(|inst| inst.display(pool).to_string())
            .collect()
    }

    fn assert_all_physical(block: &BasicBlock, pool: &OperandPool, registers: u32) {
        for inst in block.instructions() {
            for id in inst.operands() {
                if let Operand::Reg(reg) | Operand::Mem { base: reg, .. } = &pool[id] {
                    assert!(reg.is_physical(), "{} left abstract", reg);
                    if let Register::Physical(index) = reg {
                        assert!(*index <= registers, "R{} outside the register file", index);
                    }
                }
            }
        }
    }

    #[test]
    fn test_shared_register_freed_by_last_binding() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let liveness = BlockLiveness::compute(&arena, &[], &pool);
        let mut stack = StackAllocator::new();
        let mut state = BlockState::new("b".to_string(), &mut pool, &liveness, &mut stack, &session, 2);

        let a = Operand::Reg(Register::Virtual(1));
        let b = Operand::Reg(Register::Virtual(2));
        state.bind(a.clone(), 1);
        state.bind(b.clone(), 1);
        assert!(!state.free.contains(1));

        state.unbind(&a);
        assert!(!state.free.contains(1));
        state.unbind(&b);
        assert!(state.free.contains(1));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released more often than bound")]
    fn test_double_release_detected() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let liveness = BlockLiveness::compute(&arena, &[], &pool);
        let mut stack = StackAllocator::new();
        let mut state = BlockState::new("b".to_string(), &mut pool, &liveness, &mut stack, &session, 2);

        state.bind(Operand::Reg(Register::Virtual(1)), 1);
        state.release_register(1);
        state.release_register(1);
    }

    #[test]
    fn test_identity_moves_become_nop() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let v1 = pool.reg(Register::Virtual(1));
        let v2 = pool.reg(Register::Virtual(2));
        let ret = pool.reg(Register::RETURN);
        let five = pool.imm(5);

        let mut block = BasicBlock::with_instructions(
            "b",
            vec![
                Instruction::mov(v1, five),
                Instruction::mov(v2, v1),
                Instruction::mov(ret, v2),
                Instruction::Nullary(NullaryOp::Ret),
            ],
        );
        let mut stack = StackAllocator::new();
        LocalAllocator::new(&session, 2)
            .allocate_block(&mut block, &mut pool, &mut stack)
            .unwrap();

        assert_eq!(render(&block, &pool), vec!["MOV R1, 5", "NOP", "MOV R0, R1", "RET"]);
        assert_eq!(session.stats().moves_eliminated, 1);
        assert_eq!(stack.size(), 0);
    }

    #[test]
    fn test_dead_definition_removed() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let v1 = pool.reg(Register::Virtual(1));
        let arg = pool.add(Operand::frame_slot(2));

        let mut block = BasicBlock::with_instructions(
            "b",
            vec![Instruction::mov(v1, arg), Instruction::Nullary(NullaryOp::Ret)],
        );
        let mut stack = StackAllocator::new();
        LocalAllocator::new(&session, 2)
            .allocate_block(&mut block, &mut pool, &mut stack)
            .unwrap();
        assert_eq!(render(&block, &pool), vec!["NOP", "RET"]);
    }

    #[test]
    fn test_shared_operand_rewritten_everywhere() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let v1 = pool.reg(Register::Virtual(1));
        let v2 = pool.reg(Register::Virtual(2));
        let three = pool.imm(3);
        let four = pool.imm(4);
        let ret = pool.reg(Register::RETURN);

        // v1 is one shared instance used by three instructions.
        let mut block = BasicBlock::with_instructions(
            "b",
            vec![
                Instruction::mov(v1, three),
                Instruction::mov(v2, four),
                Instruction::binary(BinaryOp::Add, v1, v2),
                Instruction::mov(ret, v1),
                Instruction::Nullary(NullaryOp::Ret),
            ],
        );
        let mut stack = StackAllocator::new();
        LocalAllocator::new(&session, 2)
            .allocate_block(&mut block, &mut pool, &mut stack)
            .unwrap();

        assert_eq!(
            render(&block, &pool),
            vec!["MOV R1, 3", "MOV R2, 4", "ADD R1, R2", "MOV R0, R1", "RET"]
        );
        assert_eq!(pool[v1], Operand::Reg(Register::Physical(1)));
        assert_all_physical(&block, &pool, 2);
    }

    #[test]
    fn test_spill_under_pressure() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let a = pool.reg(Register::Virtual(1));
        let b = pool.reg(Register::Virtual(2));
        let c = pool.reg(Register::Virtual(3));
        let ret = pool.reg(Register::RETURN);
        let one = pool.imm(1);
        let two = pool.imm(2);
        let three = pool.imm(3);

        // a is read last, so it is the value evicted when c needs a register.
        let mut block = BasicBlock::with_instructions(
            "b",
            vec![
                Instruction::mov(a, one),
                Instruction::mov(b, two),
                Instruction::mov(c, three),
                Instruction::binary(BinaryOp::Add, c, b),
                Instruction::binary(BinaryOp::Add, c, a),
                Instruction::mov(ret, c),
                Instruction::Nullary(NullaryOp::Ret),
            ],
        );
        let mut stack = StackAllocator::new();
        LocalAllocator::new(&session, 2)
            .allocate_block(&mut block, &mut pool, &mut stack)
            .unwrap();

        assert_eq!(
            render(&block, &pool),
            vec![
                "MOV R1, 1",
                "MOV R2, 2",
                "MOV [BP - 1], R1",
                "MOV R1, 3",
                "ADD R1, R2",
                "MOV R2, [BP - 1]",
                "ADD R1, R2",
                "MOV R0, R1",
                "RET",
            ]
        );
        assert_eq!(stack.size(), 1);
        assert_eq!(session.stats().spills, 1);
        assert_eq!(session.stats().reloads, 1);
        assert_all_physical(&block, &pool, 2);
    }

    #[test]
    fn test_store_then_load_stays_in_register() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let v1 = pool.reg(Register::Virtual(1));
        let v2 = pool.reg(Register::Virtual(2));
        let ret = pool.reg(Register::RETURN);
        let seven = pool.imm(7);
        let store = pool.add(Operand::frame_slot(-1));
        let load = pool.add(Operand::frame_slot(-1));

        let mut block = BasicBlock::with_instructions(
            "b",
            vec![
                Instruction::mov(v1, seven),
                Instruction::mov(store, v1),
                Instruction::mov(v2, load),
                Instruction::mov(ret, v2),
                Instruction::Nullary(NullaryOp::Ret),
            ],
        );
        let mut stack = StackAllocator::with_size(1);
        LocalAllocator::new(&session, 2)
            .allocate_block(&mut block, &mut pool, &mut stack)
            .unwrap();

        // The store is deferred until the word's last read, then written back.
        assert_eq!(
            render(&block, &pool),
            vec!["MOV R1, 7", "NOP", "NOP", "MOV [BP - 1], R1", "MOV R0, R1", "RET"]
        );
    }

    #[test]
    fn test_aliased_register_copied_before_write() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let a = pool.reg(Register::Virtual(1));
        let r = pool.reg(Register::Virtual(2));
        let ret = pool.reg(Register::RETURN);
        let slot = pool.add(Operand::frame_slot(-1));
        let five = pool.imm(5);

        // r = a; r += a; [BP-1] = a; return r
        let mut block = BasicBlock::with_instructions(
            "b",
            vec![
                Instruction::mov(a, five),
                Instruction::mov(r, a),
                Instruction::binary(BinaryOp::Add, r, a),
                Instruction::mov(slot, a),
                Instruction::mov(ret, r),
                Instruction::Nullary(NullaryOp::Ret),
            ],
        );
        let mut stack = StackAllocator::with_size(1);
        LocalAllocator::new(&session, 2)
            .allocate_block(&mut block, &mut pool, &mut stack)
            .unwrap();

        assert_eq!(
            render(&block, &pool),
            vec![
                "MOV R1, 5",
                "NOP",
                "MOV R2, R1",
                "ADD R1, R1",
                "MOV [BP - 1], R2",
                "MOV R0, R1",
                "RET",
            ]
        );
    }

    #[test]
    fn test_call_flushes_registers() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let v1 = pool.reg(Register::Virtual(1));
        let ret = pool.reg(Register::RETURN);
        let nine = pool.imm(9);
        let callee = pool.label("f");

        let mut block = BasicBlock::with_instructions(
            "b",
            vec![
                Instruction::mov(v1, nine),
                Instruction::jump(JumpOp::Call, callee),
                Instruction::mov(ret, v1),
                Instruction::Nullary(NullaryOp::Ret),
            ],
        );
        let mut stack = StackAllocator::new();
        LocalAllocator::new(&session, 2)
            .allocate_block(&mut block, &mut pool, &mut stack)
            .unwrap();

        assert_eq!(
            render(&block, &pool),
            vec![
                "MOV R1, 9",
                "MOV [BP - 1], R1",
                "CALL f",
                "MOV R1, [BP - 1]",
                "MOV R0, R1",
                "RET",
            ]
        );
    }

    #[test]
    fn test_operand_not_resident() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut pool = OperandPool::new();
        let v1 = pool.reg(Register::Virtual(1));
        let v2 = pool.reg(Register::Virtual(2));
        let ret = pool.reg(Register::RETURN);

        // v2 is read before anything defined it.
        let mut block = BasicBlock::with_instructions(
            "b",
            vec![
                Instruction::mov(v1, v2),
                Instruction::mov(ret, v1),
                Instruction::Nullary(NullaryOp::Ret),
            ],
        );
        let mut stack = StackAllocator::new();
        let err = LocalAllocator::new(&session, 2)
            .allocate_block(&mut block, &mut pool, &mut stack)
            .unwrap_err();
        assert!(matches!(err, CompileError::OperandNotResident { index: 0, .. }));
    }
}
