//! Compiler configuration.
//!
//! The backend has very few knobs: the size of the machine register file the
//! allocator may use, the symbol of the entry function and whether the peephole
//! optimizer runs. Everything else is fixed by the T86 calling convention.

use super::error::{CompileError, CompileResult};

/// Allocatable registers when nothing else is configured.
pub const DEFAULT_PHYSICAL_REGISTERS: usize = 4;

/// A binary instruction needs both of its operands in distinct registers.
pub const MIN_PHYSICAL_REGISTERS: usize = 2;

/// Largest register file the reference machine provides (R1..=R64).
pub const MAX_PHYSICAL_REGISTERS: usize = 64;

/// Default entry symbol.
pub const DEFAULT_ENTRY: &str = "main";

/// Parameters of one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Number of allocatable general purpose registers, `R1..=Rn`.
    pub physical_registers: usize,
    /// Function the program starts executing at.
    pub entry: String,
    /// Run the peephole optimizer after allocation.
    pub optimize: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            physical_registers: DEFAULT_PHYSICAL_REGISTERS,
            entry: DEFAULT_ENTRY.to_string(),
            optimize: true,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registers(mut self, count: usize) -> Self {
        self.physical_registers = count;
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Reject configurations the allocator or the reference machine cannot honour.
    pub fn validate(&self) -> CompileResult<()> {
        if !(MIN_PHYSICAL_REGISTERS..=MAX_PHYSICAL_REGISTERS).contains(&self.physical_registers) {
            return Err(CompileError::InvalidConfig {
                reason: format!(
                    "physical register count {} outside {}..={}",
                    self.physical_registers, MIN_PHYSICAL_REGISTERS, MAX_PHYSICAL_REGISTERS
                ),
            });
        }
        if self.entry.is_empty() {
            return Err(CompileError::InvalidConfig {
                reason: "entry symbol is empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn test_default_config_is_valid() {
        let config = CompilerConfig::default();
        assert_eq!(config.physical_registers, 4);
        assert_eq!(config.entry, "main");
        assert!(config.optimize);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_register_bounds() {
        let err = CompilerConfig::new().with_registers(1).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(CompilerConfig::new().with_registers(2).validate().is_ok());
        assert!(CompilerConfig::new().with_registers(64).validate().is_ok());
        assert!(CompilerConfig::new().with_registers(65).validate().is_err());
    }

    #[test]
    fn test_empty_entry_rejected() {
        assert!(CompilerConfig::new().with_entry("").validate().is_err());
    }
}
