//! t86-backend - code generation for the T86 teaching machine.
//!
//! The backend lowers a small register-based IR to T86 assembly: instruction
//! selection over unbounded abstract registers, per-block register allocation
//! with furthest-next-use spilling, a peephole pass and a two-pass assembler
//! that patches labels to addresses.
//!
//! # Primary Usage
//!
//! ```ignore
//! use t86_backend::core::{CompilationSession, CompilerConfig};
//! use t86_backend::Compiler;
//! use bumpalo::Bump;
//!
//! let ir = t86_backend::ir::parse(source)?;
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let compiler = Compiler::new(CompilerConfig::new().with_registers(4), &session)?;
//! let assembled = compiler.compile(&ir)?;
//! println!("{}", assembled.listing());
//! let result = assembled.run(&[5])?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Input IR, builder and text parser
//! - [`t86`] - Target model (registers, operands, instructions, programs)
//! - [`codegen`] - Instruction selection and the calling convention
//! - [`regalloc`] - Block-local liveness and Belady allocation
//! - [`opt`] - Peephole optimizer
//! - [`assembler`] - Label layout and patching
//! - [`vm`] - Reference machine for running assembled programs
//! - [`core`] - Shared infrastructure (session, errors, configuration)

pub mod assembler;
pub mod codegen;
pub mod compiler;
pub mod core;
pub mod ir;
pub mod opt;
pub mod regalloc;
pub mod t86;
pub mod vm;

pub use assembler::{assemble, Layout};
pub use compiler::{compile, Assembled, Compiler};
pub use core::{
    // Session management
    CompilationSession, SessionStats,
    // Errors
    CompileError, CompileResult, ErrorKind,
    // Configuration
    CompilerConfig,
};
pub use vm::{Machine, VmError};
