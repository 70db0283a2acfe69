// This module implements the peephole optimizer that cleans up the physical-register
// instruction stream produced by the allocator. A cursor walks every instruction of every
// block; at each position the rules are tried in a fixed order against a window starting
// at the cursor, and when one of them deletes something the cursor stays put so the
// instructions that slid into the window are matched again. Windows never extend past
// the end of a block. Blocks that end up empty are removed and jumps to them are
// retargeted to the following block. Whole passes repeat until nothing changes, so
// running the optimizer a second time is a no-op. Arithmetic never touches the flags
// (only CMP sets them), which is what makes deleting `ADD x, 0` safe.

//! Peephole optimization over the allocated program.

use crate::core::CompilationSession;
use crate::t86::{BinaryOp, Function, Instruction, JumpOp, Operand, OperandId, OperandPool, Program};
use hashbrown::HashMap;

/// View of a block's instructions starting at the cursor.
pub struct Window<'w> {
    insts: &'w mut Vec<Instruction>,
    cursor: usize,
    pool: &'w OperandPool,
    fall_through: Option<&'w str>,
}

impl<'w> Window<'w> {
    pub fn new(
        insts: &'w mut Vec<Instruction>,
        cursor: usize,
        pool: &'w OperandPool,
        fall_through: Option<&'w str>,
    ) -> Self {
        Self {
            insts,
            cursor,
            pool,
            fall_through,
        }
    }

    /// Instruction `offset` positions after the cursor, within the block.
    pub fn get(&self, offset: usize) -> Option<&Instruction> {
        self.insts.get(self.cursor + offset)
    }

    pub fn operand(&self, id: OperandId) -> &Operand {
        &self.pool[id]
    }

    /// Whether the instruction at `offset` ends the block.
    pub fn is_last(&self, offset: usize) -> bool {
        self.cursor + offset + 1 == self.insts.len()
    }

    /// Block that executes next when the current block runs off its end.
    pub fn fall_through(&self) -> Option<&str> {
        self.fall_through
    }

    pub fn remove(&mut self, offset: usize) {
        self.insts.remove(self.cursor + offset);
    }

    /// `MOV target, source` at `offset`.
    fn mov(&self, offset: usize) -> Option<(&Operand, &Operand)> {
        match self.get(offset)? {
            Instruction::Binary {
                op: BinaryOp::Mov,
                target,
                source,
            } => Some((&self.pool[*target], &self.pool[*source])),
            _ => None,
        }
    }
}

/// A local rewrite. Returns whether it changed the window.
pub trait PeepholeRule {
    fn name(&self) -> &'static str;
    fn apply(&self, window: &mut Window<'_>) -> bool;
}

/// `ADD x, 0` and `SUB x, 0`.
pub struct ZeroArithmetic;

impl PeepholeRule for ZeroArithmetic {
    fn name(&self) -> &'static str {
        "zero-arithmetic"
    }

    fn apply(&self, window: &mut Window<'_>) -> bool {
        let matched = match window.get(0) {
            Some(Instruction::Binary {
                op: BinaryOp::Add | BinaryOp::Sub,
                source,
                ..
            }) => window.operand(*source).is_immediate(0),
            _ => false,
        };
        if matched {
            window.remove(0);
        }
        matched
    }
}

pub struct NopRemoval;

impl PeepholeRule for NopRemoval {
    fn name(&self) -> &'static str {
        "nop"
    }

    fn apply(&self, window: &mut Window<'_>) -> bool {
        let matched = window.get(0).is_some_and(Instruction::is_nop);
        if matched {
            window.remove(0);
        }
        matched
    }
}

/// `MOV x, x`.
pub struct SelfCopy;

impl PeepholeRule for SelfCopy {
    fn name(&self) -> &'static str {
        "self-copy"
    }

    fn apply(&self, window: &mut Window<'_>) -> bool {
        let matched = window.mov(0).is_some_and(|(target, source)| target == source);
        if matched {
            window.remove(0);
        }
        matched
    }
}

/// `MOV L, a; MOV L, b` drops the first store.
pub struct DeadStore;

impl PeepholeRule for DeadStore {
    fn name(&self) -> &'static str {
        "dead-store"
    }

    fn apply(&self, window: &mut Window<'_>) -> bool {
        let matched = match (window.mov(0), window.mov(1)) {
            (Some((first, _)), Some((second, source))) => first == second && !reads_location(source, first),
            _ => false,
        };
        if matched {
            window.remove(0);
        }
        matched
    }
}

/// Whether evaluating `operand` observes the value stored at `location`.
fn reads_location(operand: &Operand, location: &Operand) -> bool {
    match location {
        Operand::Reg(reg) => operand.mentions(*reg),
        _ => operand == location,
    }
}

/// `MOV a, b; MOV b, a` drops the second move.
pub struct RoundTrip;

impl PeepholeRule for RoundTrip {
    fn name(&self) -> &'static str {
        "round-trip"
    }

    fn apply(&self, window: &mut Window<'_>) -> bool {
        let matched = match (window.mov(0), window.mov(1)) {
            (Some((a, b)), Some((c, d))) => {
                // `MOV R1, [R1]` changes the address the store-back would use.
                let clobbers_address = match a {
                    Operand::Reg(reg) => b.is_memory() && b.mentions(*reg),
                    _ => false,
                };
                a == d && b == c && !clobbers_address
            }
            _ => false,
        };
        if matched {
            window.remove(1);
        }
        matched
    }
}

/// `JMP L` at the end of a block that falls through into `L` anyway.
pub struct FallThroughJump;

impl PeepholeRule for FallThroughJump {
    fn name(&self) -> &'static str {
        "fall-through"
    }

    fn apply(&self, window: &mut Window<'_>) -> bool {
        let matched = match window.get(0) {
            Some(Instruction::Jump {
                op: JumpOp::Jmp,
                target,
            }) if window.is_last(0) => match (window.operand(*target), window.fall_through()) {
                (Operand::Label(label), Some(next)) => label.address.is_none() && label.name == next,
                _ => false,
            },
            _ => false,
        };
        if matched {
            window.remove(0);
        }
        matched
    }
}

/// The rules in the order they are tried at each cursor position.
pub fn default_rules() -> Vec<Box<dyn PeepholeRule>> {
    vec![
        Box::new(ZeroArithmetic),
        Box::new(NopRemoval),
        Box::new(SelfCopy),
        Box::new(DeadStore),
        Box::new(RoundTrip),
        Box::new(FallThroughJump),
    ]
}

/// Runs the rule set to a fixed point.
pub struct PeepholeOptimizer<'a, 'arena> {
    session: &'a CompilationSession<'arena>,
    rules: Vec<Box<dyn PeepholeRule>>,
}

impl<'a, 'arena> PeepholeOptimizer<'a, 'arena> {
    pub fn new(session: &'a CompilationSession<'arena>) -> Self {
        Self::with_rules(session, default_rules())
    }

    pub fn with_rules(session: &'a CompilationSession<'arena>, rules: Vec<Box<dyn PeepholeRule>>) -> Self {
        Self { session, rules }
    }

    /// Optimize until a full pass changes nothing. Returns whether anything changed.
    pub fn optimize(&self, program: &mut Program) -> bool {
        let before = program.instruction_count();
        let mut changed = false;
        let mut passes = 0;
        loop {
            passes += 1;
            let mut pass_changed = false;
            let (functions, pool) = program.parts_mut();
            for function in functions.iter_mut() {
                pass_changed |= self.optimize_function(function, pool);
            }
            if !pass_changed {
                break;
            }
            changed = true;
        }
        log::info!(
            "✨ Peephole: {} -> {} instructions in {} passes",
            before,
            program.instruction_count(),
            passes
        );
        changed
    }

    /// One pass over `function`.
    pub fn optimize_function(&self, function: &mut Function, pool: &mut OperandPool) -> bool {
        let mut changed = false;
        let count = function.blocks().len();
        for index in 0..count {
            let fall_through = fall_through_target(function, index);
            let block = &mut function.blocks_mut()[index];
            let name = block.name().to_string();
            changed |= self.optimize_block(&name, block.instructions_mut(), pool, fall_through.as_deref());
        }
        changed |= remove_empty_blocks(function, pool);
        changed
    }

    fn optimize_block(
        &self,
        block: &str,
        insts: &mut Vec<Instruction>,
        pool: &OperandPool,
        fall_through: Option<&str>,
    ) -> bool {
        let mut changed = false;
        let mut cursor = 0;
        while cursor < insts.len() {
            let mut window = Window::new(insts, cursor, pool, fall_through);
            match self.rules.iter().find(|rule| rule.apply(&mut window)) {
                Some(rule) => {
                    log::debug!("✂️  {} at {}[{}]", rule.name(), block, cursor);
                    self.session.record_peephole_removal(rule.name());
                    changed = true;
                }
                None => cursor += 1,
            }
        }
        changed
    }
}

/// Name of the block control reaches after running off the end of block `index`.
fn fall_through_target(function: &Function, index: usize) -> Option<String> {
    let blocks = function.blocks();
    let next = blocks.get(index + 1)?;
    // An empty final block is kept, and falling into it would leave the function.
    if next.is_empty() && index + 2 == blocks.len() {
        return None;
    }
    Some(next.name().to_string())
}

/// Drop empty blocks that have a successor in layout and retarget jumps to them.
fn remove_empty_blocks(function: &mut Function, pool: &mut OperandPool) -> bool {
    let blocks = function.blocks_mut();
    let mut redirect: HashMap<String, String> = HashMap::new();
    let mut survivor: Option<String> = None;
    let mut keep = vec![true; blocks.len()];
    for index in (0..blocks.len()).rev() {
        let name = blocks[index].name().to_string();
        match &survivor {
            Some(next) if blocks[index].is_empty() => {
                redirect.insert(name, next.clone());
                keep[index] = false;
            }
            _ => survivor = Some(name),
        }
    }
    if redirect.is_empty() {
        return false;
    }

    let mut index = 0;
    blocks.retain(|_| {
        index += 1;
        keep[index - 1]
    });

    for block in blocks.iter() {
        for inst in block.instructions() {
            let Some(target) = inst.jump_target() else {
                continue;
            };
            let retarget = match &pool[target] {
                Operand::Label(label) => redirect.get(&label.name).cloned(),
                _ => None,
            };
            if let Some(name) = retarget {
                log::trace!("    retarget {} to {}", pool[target], name);
                pool.set(target, Operand::label(name));
            }
        }
    }
    log::debug!("🧹 Removed {} empty blocks from `{}`", redirect.len(), function.name());
    true
}

/// Optimize `program` with the default rule set.
pub fn optimize(program: &mut Program, session: &CompilationSession<'_>) -> bool {
    PeepholeOptimizer::new(session).optimize(program)
}
