// This module implements the two-pass assembler that turns the optimized program into a
// flat, address-patched instruction stream. The designated entry function is moved to
// the front first so it starts at address 0; the remaining functions keep the order the
// selector discovered them in. Pass one walks functions and blocks in layout order with a
// running instruction counter and records the address of every function and block name;
// functions and blocks share one namespace, so a name defined twice aborts assembly.
// Pass two patches every jump and call label with the address recorded for its name. A
// label naming neither a function nor a block aborts assembly.

//! Two-pass label resolution.

use crate::core::{CompileError, CompileResult};
use crate::t86::{Operand, Program};
use hashbrown::HashMap;

/// Addresses assigned by the assembler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    addresses: HashMap<String, usize>,
    size: usize,
}

impl Layout {
    /// Address of a function or block.
    pub fn address_of(&self, name: &str) -> Option<usize> {
        self.addresses.get(name).copied()
    }

    /// Total number of instructions.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    fn define(&mut self, name: &str, address: usize) -> CompileResult<()> {
        if self.addresses.insert(name.to_string(), address).is_some() {
            return Err(CompileError::DuplicateLabel {
                label: name.to_string(),
            });
        }
        Ok(())
    }

    /// Every label with its address.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.addresses.iter().map(|(name, &address)| (name.as_str(), address))
    }
}

/// Pass one: address of every function and block, in layout order.
///
/// Functions and blocks share one label namespace; a name used twice is an error.
pub fn compute_layout(program: &Program) -> CompileResult<Layout> {
    let mut layout = Layout::default();
    let mut counter = 0;
    for function in program.functions() {
        layout.define(function.name(), counter)?;
        for block in function.blocks() {
            log::debug!("📍 {} at {}", block.name(), counter);
            layout.define(block.name(), counter)?;
            counter += block.len();
        }
    }
    layout.size = counter;
    Ok(layout)
}

/// Pass two: patch every jump and call target.
pub fn patch_labels(program: &mut Program, layout: &Layout) -> CompileResult<()> {
    let targets: Vec<_> = program
        .instructions()
        .filter_map(|inst| inst.jump_target())
        .collect();

    let pool = program.pool_mut();
    for target in targets {
        let Operand::Label(label) = &mut pool[target] else {
            continue;
        };
        let address = layout
            .address_of(&label.name)
            .ok_or_else(|| CompileError::UnresolvedLabel {
                label: label.name.clone(),
            })?;
        label.address = Some(address);
    }
    Ok(())
}

/// Lay out `program` with its entry function first and resolve all labels.
pub fn assemble(program: &mut Program) -> CompileResult<Layout> {
    program.place_entry_first()?;
    let layout = compute_layout(program)?;
    patch_labels(program, &layout)?;
    log::info!(
        "🔗 Assembled {} instructions, {} labels",
        layout.size(),
        layout.len()
    );
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::t86::{BasicBlock, Function, Instruction, JumpOp, NullaryOp};

    fn ret() -> Instruction {
        Instruction::Nullary(NullaryOp::Ret)
    }

    fn two_functions() -> Program {
        let mut program = Program::new();
        let call_f = program.pool_mut().label("f");
        let loop_back = program.pool_mut().label("main.body");

        let mut f = Function::new("f");
        f.push_block(BasicBlock::with_instructions("f.body", vec![Instruction::NOP, ret()]))
            .unwrap();
        program.add_function(f).unwrap();

        let mut main = Function::new("main");
        main.push_block(BasicBlock::with_instructions(
            "main.body",
            vec![Instruction::jump(JumpOp::Call, call_f), Instruction::jump(JumpOp::Jmp, loop_back)],
        ))
        .unwrap();
        main.push_block(BasicBlock::with_instructions("main.exit", vec![ret()]))
            .unwrap();
        program.add_function(main).unwrap();
        program
    }

    #[test]
    fn test_entry_laid_out_first() {
        let mut program = two_functions();
        program.set_entry("main");
        let layout = assemble(&mut program).unwrap();

        assert_eq!(layout.address_of("main"), Some(0));
        assert_eq!(layout.address_of("main.body"), Some(0));
        assert_eq!(layout.address_of("main.exit"), Some(2));
        assert_eq!(layout.address_of("f"), Some(3));
        assert_eq!(layout.address_of("f.body"), Some(3));
        assert_eq!(layout.size(), 5);

        assert_eq!(
            program.listing(),
            "   0  CALL 3\n   1  JMP 0\n   2  RET\n   3  NOP\n   4  RET\n"
        );
    }

    #[test]
    fn test_without_entry_keeps_order() {
        let mut program = two_functions();
        let layout = assemble(&mut program).unwrap();
        assert_eq!(layout.address_of("f"), Some(0));
        assert_eq!(layout.address_of("main"), Some(2));
    }

    #[test]
    fn test_unresolved_label() {
        let mut program = Program::new();
        let missing = program.pool_mut().label("nowhere");
        let mut main = Function::new("main");
        main.push_block(BasicBlock::with_instructions(
            "main.body",
            vec![Instruction::jump(JumpOp::Jmp, missing)],
        ))
        .unwrap();
        program.add_function(main).unwrap();

        let err = assemble(&mut program).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Assembly);
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_function_named_like_block() {
        let mut program = two_functions();
        let mut clash = Function::new("main.exit");
        clash
            .push_block(BasicBlock::with_instructions("main.exit$body", vec![ret()]))
            .unwrap();
        program.add_function(clash).unwrap();

        let err = assemble(&mut program).unwrap_err();
        assert_eq!(err, CompileError::DuplicateLabel { label: "main.exit".to_string() });
        assert_eq!(err.kind(), ErrorKind::Assembly);
    }

    #[test]
    fn test_missing_entry() {
        let mut program = two_functions();
        program.set_entry("start");
        let err = assemble(&mut program).unwrap_err();
        assert!(matches!(err, CompileError::MissingEntry { .. }));
    }
}
