// This module wires the backend stages into one pipeline. A Compiler borrows the
// compilation session and owns a validated CompilerConfig; compile() runs instruction
// selection from the configured entry function, local register allocation with the
// configured register file size, the peephole optimizer when it is enabled, and the
// two-pass assembler, in that order. Each stage can also be called on its own, which the
// tests use to inspect intermediate programs. Any stage error aborts the whole
// compilation and no partial program is returned.

//! End-to-end compilation pipeline.

use crate::assembler::{self, Layout};
use crate::codegen;
use crate::core::{CompilationSession, CompileResult, CompilerConfig, SessionStats};
use crate::ir;
use crate::opt::PeepholeOptimizer;
use crate::regalloc::LocalAllocator;
use crate::t86::Program;
use crate::vm::{Machine, VmResult};
use bumpalo::Bump;

/// An address-patched program together with its layout.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub program: Program,
    pub layout: Layout,
}

impl Assembled {
    /// Run the program on the reference machine.
    pub fn run(&self, args: &[i64]) -> VmResult<i64> {
        Machine::load(&self.program, &self.layout).run(args)
    }

    pub fn listing(&self) -> String {
        self.program.listing()
    }
}

/// Runs the backend stages over one IR program.
pub struct Compiler<'s, 'arena> {
    config: CompilerConfig,
    session: &'s CompilationSession<'arena>,
}

impl<'s, 'arena> Compiler<'s, 'arena> {
    pub fn new(config: CompilerConfig, session: &'s CompilationSession<'arena>) -> CompileResult<Self> {
        config.validate()?;
        Ok(Self { config, session })
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn session(&self) -> &'s CompilationSession<'arena> {
        self.session
    }

    /// Lower every function reachable from the entry to abstract-register T86.
    pub fn select(&self, ir: &ir::Program) -> CompileResult<Program> {
        log::info!("🔧 Selecting instructions from `{}`", self.config.entry);
        codegen::select(ir, &self.config.entry, self.session)
    }

    pub fn allocate(&self, program: &mut Program) -> CompileResult<()> {
        LocalAllocator::new(self.session, self.config.physical_registers).allocate_program(program)
    }

    /// Run the peephole optimizer. Returns whether it changed anything.
    pub fn optimize(&self, program: &mut Program) -> bool {
        PeepholeOptimizer::new(self.session).optimize(program)
    }

    pub fn assemble(&self, program: &mut Program) -> CompileResult<Layout> {
        assembler::assemble(program)
    }

    /// Run the whole pipeline.
    pub fn compile(&self, ir: &ir::Program) -> CompileResult<Assembled> {
        let mut program = self.select(ir)?;
        self.allocate(&mut program)?;
        if self.config.optimize {
            self.optimize(&mut program);
        } else {
            log::info!("⏭️  Peephole optimizer disabled");
        }
        let layout = self.assemble(&mut program)?;
        log::info!(
            "✅ Compiled {} functions into {} instructions",
            program.functions().len(),
            layout.size()
        );
        Ok(Assembled { program, layout })
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }
}

/// Compile `ir` with a fresh session.
pub fn compile(ir: &ir::Program, config: &CompilerConfig) -> CompileResult<Assembled> {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    Compiler::new(config.clone(), &session)?.compile(ir)
}
