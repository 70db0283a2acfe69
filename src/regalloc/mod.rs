//! Register allocation.
//!
//! Allocation works one basic block at a time: [`liveness`] computes the
//! per-instruction live sets of a block and [`belady`] rewrites the block so it
//! only references the physical registers `R1..=Rn`, spilling to fresh frame
//! slots when the register file runs out.

pub mod belady;
pub mod liveness;

pub use belady::LocalAllocator;
pub use liveness::BlockLiveness;

use crate::core::{CompilationSession, CompileResult};
use crate::t86::Program;

/// Allocate `registers` physical registers for every block of `program`.
pub fn allocate(program: &mut Program, registers: usize, session: &CompilationSession<'_>) -> CompileResult<()> {
    LocalAllocator::new(session, registers).allocate_program(program)
}
