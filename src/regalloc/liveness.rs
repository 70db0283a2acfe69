// This module computes per-instruction liveness for one basic block ahead of local
// register allocation. It walks the block backwards, starting from an empty set after the
// last instruction (no cross-block liveness): a MOV kills its target and reads its
// source, CMP reads both operands, the other binary instructions read both operands and
// keep their target live because it is an input, PUSH reads and POP defines its operand.
// Only abstract registers and memory words are tracked; immediates, labels and the
// special registers never need a physical register. Besides the live-after sets it keeps
// the per-instruction read lists, which answer "when is this operand read next" for the
// furthest-next-use spill heuristic. Both tables live in the session arena.

//! Block-local liveness.

use crate::t86::{BinaryOp, Instruction, Operand, OperandPool, UnaryOp};
use bumpalo::{collections::Vec as BumpVec, Bump};
use hashbrown::HashSet;

/// Whether the allocator keeps track of this operand.
pub fn is_tracked(operand: &Operand) -> bool {
    matches!(operand, Operand::Mem { .. }) || operand.is_virtual_register()
}

/// Tracked operands read by `inst` and the one it defines, if any.
pub fn effects(inst: &Instruction, pool: &OperandPool) -> (Vec<Operand>, Option<Operand>) {
    let mut reads = Vec::new();
    let read = |operand: &Operand, reads: &mut Vec<Operand>| {
        if let Operand::Mem { base, .. } = operand {
            let base = Operand::Reg(*base);
            if is_tracked(&base) {
                reads.push(base);
            }
        }
        if is_tracked(operand) {
            reads.push(operand.clone());
        }
    };

    let def = match inst {
        Instruction::Nullary(_) | Instruction::Jump { .. } => None,
        Instruction::Unary {
            op: UnaryOp::Push,
            operand,
        } => {
            read(&pool[*operand], &mut reads);
            None
        }
        Instruction::Unary {
            op: UnaryOp::Pop,
            operand,
        } => Some(pool[*operand].clone()).filter(is_tracked),
        Instruction::Binary {
            op: BinaryOp::Mov,
            target,
            source,
        } => {
            read(&pool[*source], &mut reads);
            if let Operand::Mem { base, .. } = &pool[*target] {
                let base = Operand::Reg(*base);
                if is_tracked(&base) {
                    reads.push(base);
                }
            }
            Some(pool[*target].clone()).filter(is_tracked)
        }
        Instruction::Binary { target, source, .. } => {
            read(&pool[*target], &mut reads);
            read(&pool[*source], &mut reads);
            None
        }
    };
    (reads, def)
}

/// Liveness tables of one block.
pub struct BlockLiveness<'arena> {
    live_after: BumpVec<'arena, HashSet<Operand>>,
    reads: BumpVec<'arena, BumpVec<'arena, Operand>>,
}

impl<'arena> BlockLiveness<'arena> {
    /// Compute live-after sets for `insts` in one backward pass.
    pub fn compute(arena: &'arena Bump, insts: &[Instruction], pool: &OperandPool) -> Self {
        let mut reads = BumpVec::with_capacity_in(insts.len(), arena);
        let mut defs = Vec::with_capacity(insts.len());
        for inst in insts {
            let (inst_reads, def) = effects(inst, pool);
            reads.push(BumpVec::from_iter_in(inst_reads, arena));
            defs.push(def);
        }

        let mut live_after = BumpVec::with_capacity_in(insts.len(), arena);
        for _ in 0..insts.len() {
            live_after.push(HashSet::new());
        }

        let mut live: HashSet<Operand> = HashSet::new();
        for index in (0..insts.len()).rev() {
            live_after[index] = live.clone();
            if let Some(def) = &defs[index] {
                live.remove(def);
            }
            for operand in reads[index].iter() {
                live.insert(operand.clone());
            }
        }

        Self { live_after, reads }
    }

    pub fn len(&self) -> usize {
        self.live_after.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live_after.is_empty()
    }

    /// Operands whose current value is still read after instruction `index`.
    pub fn live_after(&self, index: usize) -> &HashSet<Operand> {
        &self.live_after[index]
    }

    pub fn is_live_after(&self, index: usize, operand: &Operand) -> bool {
        self.live_after
            .get(index)
            .is_some_and(|live| live.contains(operand))
    }

    /// Tracked operands read by instruction `index`.
    pub fn reads(&self, index: usize) -> &[Operand] {
        &self.reads[index]
    }

    /// First instruction at or after `from` that reads `operand`.
    pub fn next_read(&self, operand: &Operand, from: usize) -> Option<usize> {
        (from..self.reads.len()).find(|&index| self.reads[index].contains(operand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::t86::{JumpOp, Register};

    fn set(operands: &[&Operand]) -> HashSet<Operand> {
        operands.iter().map(|op| (*op).clone()).collect()
    }

    #[test]
    fn test_def_use_chain() {
        let mut pool = OperandPool::new();
        let v1 = pool.reg(Register::Virtual(1));
        let v2 = pool.reg(Register::Virtual(2));
        let v3 = pool.reg(Register::Virtual(3));
        let five = pool.imm(5);
        let slot = pool.add(Operand::frame_slot(-1));
        let exit = pool.label("exit");

        let insts = vec![
            Instruction::mov(v1, five),
            Instruction::mov(v2, v1),
            Instruction::binary(BinaryOp::Add, v2, v1),
            Instruction::mov(slot, v2),
            Instruction::mov(v3, slot),
            Instruction::binary(BinaryOp::Cmp, v3, v1),
            Instruction::jump(JumpOp::Jmp, exit),
        ];

        let arena = Bump::new();
        let liveness = BlockLiveness::compute(&arena, &insts, &pool);
        let (r1, r2, r3) = (pool[v1].clone(), pool[v2].clone(), pool[v3].clone());
        let mem = pool[slot].clone();

        assert_eq!(liveness.len(), 7);
        assert_eq!(liveness.live_after(0), &set(&[&r1]));
        assert_eq!(liveness.live_after(1), &set(&[&r1, &r2]));
        assert_eq!(liveness.live_after(2), &set(&[&r1, &r2]));
        assert_eq!(liveness.live_after(3), &set(&[&r1, &mem]));
        assert_eq!(liveness.live_after(4), &set(&[&r1, &r3]));
        assert_eq!(liveness.live_after(5), &set(&[]));
        assert_eq!(liveness.live_after(6), &set(&[]));

        assert!(liveness.is_live_after(3, &mem));
        assert!(!liveness.is_live_after(4, &mem));
        assert!(!liveness.is_live_after(99, &r1));
    }

    #[test]
    fn test_next_read() {
        let mut pool = OperandPool::new();
        let v1 = pool.reg(Register::Virtual(1));
        let v2 = pool.reg(Register::Virtual(2));
        let slot = pool.add(Operand::frame_slot(-1));

        let insts = vec![
            Instruction::mov(v2, v1),
            Instruction::mov(slot, v2),
            Instruction::push(v1),
            Instruction::mov(v2, slot),
        ];
        let arena = Bump::new();
        let liveness = BlockLiveness::compute(&arena, &insts, &pool);
        let r1 = pool[v1].clone();
        let r2 = pool[v2].clone();
        let mem = pool[slot].clone();

        assert_eq!(liveness.next_read(&r1, 0), Some(0));
        assert_eq!(liveness.next_read(&r1, 1), Some(2));
        assert_eq!(liveness.next_read(&r1, 3), None);
        assert_eq!(liveness.next_read(&r2, 1), Some(1));
        assert_eq!(liveness.next_read(&mem, 0), Some(3));
        assert_eq!(liveness.reads(2), &[r1][..]);
    }

    #[test]
    fn test_untracked_operands_ignored() {
        let mut pool = OperandPool::new();
        let sp = pool.reg(Register::Sp);
        let bp = pool.reg(Register::Bp);
        let ret = pool.reg(Register::RETURN);
        let four = pool.imm(4);

        let (reads, def) = effects(&Instruction::mov(bp, sp), &pool);
        assert!(reads.is_empty());
        assert!(def.is_none());

        let (reads, def) = effects(&Instruction::binary(BinaryOp::Sub, sp, four), &pool);
        assert!(reads.is_empty());
        assert!(def.is_none());

        let (reads, _) = effects(&Instruction::push(ret), &pool);
        assert!(reads.is_empty());
    }
}
