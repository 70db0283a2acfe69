// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession owns a reference to the arena that per-block scratch data (liveness
// tables and their per-instruction read lists) is allocated in, so a whole compilation
// shares one lifetime and scratch memory is released at once when the arena is dropped.
// It also tracks which function is being compiled and accumulates SessionStats: functions
// and blocks lowered, instructions selected per opcode, spills and reloads inserted by the
// allocator, moves it eliminated, and instructions removed by each peephole rule. Stats
// use interior mutability so every pipeline stage can record through a shared reference.

//! Arena-based compilation session management.
//!
//! All scratch data of a compilation is tied to the session lifetime.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation scratch data.
    arena: &'arena Bump,

    /// Session statistics for debugging and tests.
    stats: RefCell<SessionStats>,

    /// Current function being compiled.
    current_function: RefCell<Option<String>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            current_function: RefCell::new(None),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Allocate an object in the session arena.
    pub fn alloc<T>(&self, value: T) -> &'arena mut T {
        self.arena.alloc(value)
    }

    /// Set current function being compiled.
    pub fn set_current_function(&self, name: &str) {
        *self.current_function.borrow_mut() = Some(name.to_string());
    }

    pub fn current_function(&self) -> Option<String> {
        self.current_function.borrow().clone()
    }

    /// Record that the selector finished a function.
    pub fn record_function_lowered(&self, name: &str, instructions: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_lowered += 1;
        if stats.largest_function_size < instructions {
            stats.largest_function_size = instructions;
            stats.largest_function_name = name.to_string();
        }
    }

    pub fn record_block_lowered(&self) {
        self.stats.borrow_mut().blocks_lowered += 1;
    }

    /// Record one selected target instruction.
    pub fn record_instruction_selected(&self, mnemonic: &'static str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_selected += 1;
        *stats.instruction_counts.entry(mnemonic).or_insert(0) += 1;
    }

    pub fn record_spill(&self) {
        self.stats.borrow_mut().spills += 1;
    }

    pub fn record_reload(&self) {
        self.stats.borrow_mut().reloads += 1;
    }

    pub fn record_move_eliminated(&self) {
        self.stats.borrow_mut().moves_eliminated += 1;
    }

    /// Record an instruction deleted by a peephole rule.
    pub fn record_peephole_removal(&self, rule: &'static str) {
        let mut stats = self.stats.borrow_mut();
        stats.peephole_removals += 1;
        *stats.rule_counts.entry(rule).or_insert(0) += 1;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Number of functions lowered.
    pub functions_lowered: usize,

    /// Number of target basic blocks produced by selection.
    pub blocks_lowered: usize,

    /// Number of target instructions selected.
    pub instructions_selected: usize,

    /// Count of each selected mnemonic.
    pub instruction_counts: HashMap<&'static str, usize>,

    /// Largest function lowered, in instructions.
    pub largest_function_size: usize,

    /// Name of largest function.
    pub largest_function_name: String,

    /// Stores inserted to evict a register.
    pub spills: usize,

    /// Loads inserted to bring a spilled value back.
    pub reloads: usize,

    /// Moves the allocator turned into NOP.
    pub moves_eliminated: usize,

    /// Instructions deleted by the peephole optimizer.
    pub peephole_removals: usize,

    /// Deletions per peephole rule.
    pub rule_counts: HashMap<&'static str, usize>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Functions lowered: {}", self.functions_lowered)?;
        writeln!(f, "  Blocks lowered: {}", self.blocks_lowered)?;
        writeln!(f, "  Instructions selected: {}", self.instructions_selected)?;
        writeln!(f, "  Spills: {}", self.spills)?;
        writeln!(f, "  Reloads: {}", self.reloads)?;
        writeln!(f, "  Moves eliminated: {}", self.moves_eliminated)?;
        writeln!(f, "  Peephole removals: {}", self.peephole_removals)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} instructions)",
                self.largest_function_name, self.largest_function_size
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

            for (mnemonic, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", mnemonic, count)?;
            }
        }

        if !self.rule_counts.is_empty() {
            writeln!(f, "  Peephole rules:")?;
            let mut sorted: Vec<_> = self.rule_counts.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            for (rule, count) in sorted {
                writeln!(f, "    {}: {}", rule, count)?;
            }
        }

        Ok(())
    }
}
