// This module implements a small reference machine that executes assembled T86 programs.
// It is used by the tests and by `t86c --run` to check that selection, allocation and
// the peephole rewrites preserve behavior. Memory is a flat array of words with the
// stack growing down from the top; SP and BP are separate registers next to the general
// registers R0..R64. CMP is the only instruction that sets the flags, and arithmetic
// wraps on overflow. A run pushes the entry arguments and a sentinel return address,
// then executes from the entry function until it returns to the sentinel or executes
// HALT, and reports R0. Every malformed access stops the machine with a VmError rather
// than panicking.

//! Reference interpreter for assembled programs.

use crate::assembler::Layout;
use crate::t86::{
    BinaryOp, Instruction, JumpOp, NullaryOp, Operand, OperandId, Program, Register, UnaryOp,
};
use std::cmp::Ordering;
use thiserror::Error;

/// Default memory size in words.
pub const DEFAULT_MEMORY_WORDS: usize = 1 << 16;

/// Default bound on executed instructions.
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// Number of general registers (R0..R64).
pub const GENERAL_REGISTERS: usize = 65;

const SENTINEL: i64 = -1;

/// Runtime failures of the reference machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Division by zero at {pc}")]
    DivisionByZero { pc: usize },

    #[error("Stack overflow at {pc}")]
    StackOverflow { pc: usize },

    #[error("Address {address} is outside memory (at {pc})")]
    InvalidAddress { pc: usize, address: i64 },

    #[error("Jump to {address} leaves the program (at {pc})")]
    InvalidJump { pc: usize, address: i64 },

    #[error("Label `{label}` was never patched (at {pc})")]
    UnpatchedLabel { pc: usize, label: String },

    #[error("Abstract register {register} reached execution (at {pc})")]
    AbstractRegister { pc: usize, register: String },

    #[error("Register {register} does not exist (at {pc})")]
    UnknownRegister { pc: usize, register: String },

    #[error("Operand `{operand}` cannot be written (at {pc})")]
    InvalidTarget { pc: usize, operand: String },

    #[error("Step limit of {limit} instructions exceeded")]
    StepLimit { limit: u64 },
}

pub type VmResult<T> = Result<T, VmError>;

/// Executes one assembled program.
pub struct Machine<'p> {
    program: &'p Program,
    code: Vec<&'p Instruction>,
    entry: usize,
    registers: [i64; GENERAL_REGISTERS],
    sp: i64,
    bp: i64,
    memory: Vec<i64>,
    flags: Ordering,
    pc: usize,
    steps: u64,
    step_limit: u64,
}

impl<'p> Machine<'p> {
    /// Prepare `program`, entering at its designated entry or at address 0.
    pub fn load(program: &'p Program, layout: &Layout) -> Self {
        let entry = program
            .entry()
            .and_then(|name| layout.address_of(name))
            .unwrap_or(0);
        Self {
            program,
            code: program.instructions().collect(),
            entry,
            registers: [0; GENERAL_REGISTERS],
            sp: 0,
            bp: 0,
            memory: vec![0; DEFAULT_MEMORY_WORDS],
            flags: Ordering::Equal,
            pc: 0,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_memory(mut self, words: usize) -> Self {
        self.memory = vec![0; words];
        self
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Instructions executed by the last run.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Call the entry function with `args` and return R0.
    pub fn run(&mut self, args: &[i64]) -> VmResult<i64> {
        self.registers = [0; GENERAL_REGISTERS];
        self.memory.iter_mut().for_each(|word| *word = 0);
        self.sp = self.memory.len() as i64;
        self.bp = self.sp;
        self.flags = Ordering::Equal;
        self.steps = 0;
        self.pc = self.entry;

        for &arg in args.iter().rev() {
            self.push(arg)?;
        }
        self.push(SENTINEL)?;

        log::debug!("▶️  Running from {} with {:?}", self.entry, args);
        while self.step()? {}
        log::debug!("⏹️  Finished after {} steps, R0 = {}", self.steps, self.registers[0]);
        Ok(self.registers[0])
    }

    /// Execute one instruction. Returns false once the program has finished.
    fn step(&mut self) -> VmResult<bool> {
        if self.steps >= self.step_limit {
            return Err(VmError::StepLimit {
                limit: self.step_limit,
            });
        }
        self.steps += 1;

        let pc = self.pc;
        let inst = *self.code.get(pc).ok_or(VmError::InvalidJump {
            pc,
            address: pc as i64,
        })?;
        log::trace!("{:>6}  {}", pc, inst.display(self.program.pool()));
        self.pc += 1;

        match *inst {
            Instruction::Nullary(NullaryOp::Nop) => {}
            Instruction::Nullary(NullaryOp::Halt) => return Ok(false),
            Instruction::Nullary(NullaryOp::Ret) => {
                let address = self.pop()?;
                if address == SENTINEL {
                    return Ok(false);
                }
                self.pc = self.jump_address(address)?;
            }
            Instruction::Unary {
                op: UnaryOp::Push,
                operand,
            } => {
                let value = self.read(operand)?;
                self.push(value)?;
            }
            Instruction::Unary {
                op: UnaryOp::Pop,
                operand,
            } => {
                let value = self.pop()?;
                self.write(operand, value)?;
            }
            Instruction::Binary { op, target, source } => self.binary(op, target, source)?,
            Instruction::Jump { op, target } => {
                let address = self.read(target)?;
                let address = self.jump_address(address)?;
                let taken = match op {
                    JumpOp::Jmp => true,
                    JumpOp::Call => {
                        self.push(self.pc as i64)?;
                        true
                    }
                    JumpOp::Jz | JumpOp::Je => self.flags == Ordering::Equal,
                    JumpOp::Jnz | JumpOp::Jne => self.flags != Ordering::Equal,
                    JumpOp::Jg => self.flags == Ordering::Greater,
                    JumpOp::Jge => self.flags != Ordering::Less,
                    JumpOp::Jl => self.flags == Ordering::Less,
                    JumpOp::Jle => self.flags != Ordering::Greater,
                };
                if taken {
                    self.pc = address;
                }
            }
        }
        Ok(true)
    }

    fn binary(&mut self, op: BinaryOp, target: OperandId, source: OperandId) -> VmResult<()> {
        let pc = self.pc - 1;
        let rhs = self.read(source)?;
        if op == BinaryOp::Mov {
            return self.write(target, rhs);
        }
        let lhs = self.read(target)?;
        let value = match op {
            BinaryOp::Cmp => {
                self.flags = lhs.cmp(&rhs);
                return Ok(());
            }
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Div | BinaryOp::Mod if rhs == 0 => return Err(VmError::DivisionByZero { pc }),
            BinaryOp::Div => lhs.wrapping_div(rhs),
            BinaryOp::Mod => lhs.wrapping_rem(rhs),
            BinaryOp::And => lhs & rhs,
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Mov => rhs,
        };
        self.write(target, value)
    }

    fn jump_address(&self, address: i64) -> VmResult<usize> {
        if address < 0 || address as usize >= self.code.len() {
            return Err(VmError::InvalidJump {
                pc: self.pc.saturating_sub(1),
                address,
            });
        }
        Ok(address as usize)
    }

    fn register(&self, register: Register) -> VmResult<i64> {
        let pc = self.pc.saturating_sub(1);
        match register {
            Register::Sp => Ok(self.sp),
            Register::Bp => Ok(self.bp),
            Register::Physical(index) => self
                .registers
                .get(index as usize)
                .copied()
                .ok_or_else(|| VmError::UnknownRegister {
                    pc,
                    register: register.to_string(),
                }),
            Register::Virtual(_) => Err(VmError::AbstractRegister {
                pc,
                register: register.to_string(),
            }),
        }
    }

    fn set_register(&mut self, register: Register, value: i64) -> VmResult<()> {
        let pc = self.pc.saturating_sub(1);
        match register {
            Register::Sp => self.sp = value,
            Register::Bp => self.bp = value,
            Register::Physical(index) => {
                let slot = self
                    .registers
                    .get_mut(index as usize)
                    .ok_or_else(|| VmError::UnknownRegister {
                        pc,
                        register: register.to_string(),
                    })?;
                *slot = value;
            }
            Register::Virtual(_) => {
                return Err(VmError::AbstractRegister {
                    pc,
                    register: register.to_string(),
                })
            }
        }
        Ok(())
    }

    fn address(&self, base: Register, offset: i64) -> VmResult<usize> {
        let address = self.register(base)?.wrapping_add(offset);
        if address < 0 || address as usize >= self.memory.len() {
            return Err(VmError::InvalidAddress {
                pc: self.pc.saturating_sub(1),
                address,
            });
        }
        Ok(address as usize)
    }

    fn read(&self, id: OperandId) -> VmResult<i64> {
        match &self.program.pool()[id] {
            Operand::Reg(register) => self.register(*register),
            Operand::Mem { base, offset } => Ok(self.memory[self.address(*base, *offset)?]),
            Operand::Imm(value) => Ok(*value),
            Operand::Label(label) => match label.address {
                Some(address) => Ok(address as i64),
                None => Err(VmError::UnpatchedLabel {
                    pc: self.pc.saturating_sub(1),
                    label: label.name.clone(),
                }),
            },
        }
    }

    fn write(&mut self, id: OperandId, value: i64) -> VmResult<()> {
        match &self.program.pool()[id] {
            Operand::Reg(register) => self.set_register(*register, value),
            Operand::Mem { base, offset } => {
                let address = self.address(*base, *offset)?;
                self.memory[address] = value;
                Ok(())
            }
            operand => Err(VmError::InvalidTarget {
                pc: self.pc.saturating_sub(1),
                operand: operand.to_string(),
            }),
        }
    }

    fn push(&mut self, value: i64) -> VmResult<()> {
        if self.sp <= 0 || self.sp as usize > self.memory.len() {
            return Err(VmError::StackOverflow {
                pc: self.pc.saturating_sub(1),
            });
        }
        self.sp -= 1;
        self.memory[self.sp as usize] = value;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<i64> {
        let address = self.sp;
        if address < 0 || address as usize >= self.memory.len() {
            return Err(VmError::InvalidAddress {
                pc: self.pc.saturating_sub(1),
                address,
            });
        }
        self.sp += 1;
        Ok(self.memory[address as usize])
    }
}
