//! Code generation: IR to abstract-register T86.
//!
//! - [`selector`] walks the reachable functions and blocks and emits T86
//!   instructions over abstract registers
//! - [`calling_convention`] builds prologues, epilogues and call sequences
//! - [`stack`] hands out frame slots

pub mod calling_convention;
pub mod selector;
pub mod stack;

pub use selector::{select, InstructionSelector};
pub use stack::{StackAllocator, WORD_BYTES};
