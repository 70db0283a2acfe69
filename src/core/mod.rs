// This module gathers the infrastructure shared by every stage of the T86 backend:
// the arena-based compilation session with its statistics, the error taxonomy used to
// abort compilation, and the compiler configuration that sizes the register file and
// names the entry function.

//! Core backend infrastructure.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based scratch allocation using `bumpalo`
//! - Compilation statistics
//!
//! ## Errors (`error`)
//! - One fatal error enum with a coarse [`ErrorKind`] per stage
//!
//! ## Configuration (`config`)
//! - Register file size, entry symbol, optimizer switch

pub mod config;
pub mod error;
pub mod session;

pub use config::{
    CompilerConfig,
    DEFAULT_ENTRY,
    DEFAULT_PHYSICAL_REGISTERS,
    MAX_PHYSICAL_REGISTERS,
    MIN_PHYSICAL_REGISTERS,
};

pub use error::{
    CompileError,
    CompileResult,
    ErrorKind,
};

pub use session::{
    CompilationSession,
    SessionStats,
};
