// This module defines the error taxonomy of the T86 backend using the thiserror crate.
// CompileError covers every fatal condition of the pipeline: lowering failures in the
// instruction selector (missing entry, unknown callee, unhandled opcode, indirect calls,
// oversized locals, malformed IR), allocator invariant violations (an operand expected to
// be resident in a register is not, or no register can be evicted), assembler resolution
// failures (unresolved labels), construction errors (duplicate function or block names)
// and configuration errors. Every variant carries the context needed to report it, and
// ErrorKind groups the variants into categories so a test harness can match an expected
// failure class without caring about the exact message. No error is recoverable: each
// one aborts compilation and no partial program is produced.

//! Error types for the T86 backend.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Coarse error category, one per pipeline stage that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Instruction selection rejected the IR.
    Lowering,
    /// The register allocator hit an internal invariant violation.
    Allocation,
    /// Label resolution failed.
    Assembly,
    /// A program container was built inconsistently.
    Construction,
    /// The compiler configuration is out of range.
    Config,
}

/// Main error type for compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Entry function `{name}` not found")]
    MissingEntry {
        name: String,
    },

    #[error("Call to undefined function `{name}`")]
    FunctionNotFound {
        name: String,
    },

    #[error("Opcode `{opcode}` is not implemented (in function `{function}`)")]
    NotImplemented {
        opcode: String,
        function: String,
    },

    #[error("Indirect call in `{function}` is not supported")]
    UnsupportedCall {
        function: String,
    },

    #[error("Local of {size} bytes in `{function}` does not fit a machine word")]
    UnsupportedLocalSize {
        size: u64,
        function: String,
    },

    #[error("Malformed IR in `{function}`: {reason}")]
    MalformedIr {
        function: String,
        reason: String,
    },

    #[error("Operand {operand} used at {block}[{index}] is not resident in a register")]
    OperandNotResident {
        block: String,
        index: usize,
        operand: String,
    },

    #[error("No evictable register at {block}[{index}]")]
    RegisterPressure {
        block: String,
        index: usize,
    },

    #[error("Register state leaked out of block {block}: {reason}")]
    LeakedBinding {
        block: String,
        reason: String,
    },

    #[error("Unresolved label `{label}`")]
    UnresolvedLabel {
        label: String,
    },

    #[error("Label `{label}` names more than one function or block")]
    DuplicateLabel {
        label: String,
    },

    #[error("Function `{name}` is defined twice")]
    DuplicateFunction {
        name: String,
    },

    #[error("Block `{block}` is defined twice in `{function}`")]
    DuplicateBlock {
        function: String,
        block: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

impl CompileError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::MissingEntry { .. }
            | CompileError::FunctionNotFound { .. }
            | CompileError::NotImplemented { .. }
            | CompileError::UnsupportedCall { .. }
            | CompileError::UnsupportedLocalSize { .. }
            | CompileError::MalformedIr { .. } => ErrorKind::Lowering,
            CompileError::OperandNotResident { .. }
            | CompileError::RegisterPressure { .. }
            | CompileError::LeakedBinding { .. } => ErrorKind::Allocation,
            CompileError::UnresolvedLabel { .. } | CompileError::DuplicateLabel { .. } => {
                ErrorKind::Assembly
            }
            CompileError::DuplicateFunction { .. } | CompileError::DuplicateBlock { .. } => {
                ErrorKind::Construction
            }
            CompileError::InvalidConfig { .. } => ErrorKind::Config,
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
