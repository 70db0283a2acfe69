//! T86 instructions.
//!
//! A closed enum over the four instruction shapes. Every shape exposes its operand
//! ids uniformly through [`Instruction::operands`] so liveness, allocation, the
//! peephole rules and the assembler can walk them without matching on opcodes.

use super::operand::{OperandId, OperandPool};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullaryOp {
    Ret,
    Halt,
    Nop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Push,
    Pop,
}

/// Two-operand opcodes. For everything except MOV and CMP the target is both
/// read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Cmp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpOp {
    Jmp,
    Jz,
    Jnz,
    Je,
    Jne,
    Jg,
    Jge,
    Jl,
    Jle,
    Call,
}

impl NullaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            NullaryOp::Ret => "RET",
            NullaryOp::Halt => "HALT",
            NullaryOp::Nop => "NOP",
        }
    }
}

impl UnaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            UnaryOp::Push => "PUSH",
            UnaryOp::Pop => "POP",
        }
    }
}

impl BinaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Mov => "MOV",
            BinaryOp::Add => "ADD",
            BinaryOp::Sub => "SUB",
            BinaryOp::Mul => "MUL",
            BinaryOp::Div => "DIV",
            BinaryOp::Mod => "MOD",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Cmp => "CMP",
        }
    }

    /// Whether the target's previous value is an input.
    pub fn reads_target(self) -> bool {
        !matches!(self, BinaryOp::Mov | BinaryOp::Cmp)
    }

    /// Whether the target is written.
    pub fn writes_target(self) -> bool {
        self != BinaryOp::Cmp
    }
}

impl JumpOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            JumpOp::Jmp => "JMP",
            JumpOp::Jz => "JZ",
            JumpOp::Jnz => "JNZ",
            JumpOp::Je => "JE",
            JumpOp::Jne => "JNE",
            JumpOp::Jg => "JG",
            JumpOp::Jge => "JGE",
            JumpOp::Jl => "JL",
            JumpOp::Jle => "JLE",
            JumpOp::Call => "CALL",
        }
    }

    pub fn is_conditional(self) -> bool {
        !matches!(self, JumpOp::Jmp | JumpOp::Call)
    }

    /// The jump taken exactly when `self` is not. CALL and JMP have none.
    pub fn negate(self) -> Option<JumpOp> {
        Some(match self {
            JumpOp::Jz => JumpOp::Jnz,
            JumpOp::Jnz => JumpOp::Jz,
            JumpOp::Je => JumpOp::Jne,
            JumpOp::Jne => JumpOp::Je,
            JumpOp::Jg => JumpOp::Jle,
            JumpOp::Jle => JumpOp::Jg,
            JumpOp::Jge => JumpOp::Jl,
            JumpOp::Jl => JumpOp::Jge,
            JumpOp::Jmp | JumpOp::Call => return None,
        })
    }
}

/// One target instruction. Operands are handles into the program's pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Nullary(NullaryOp),
    Unary {
        op: UnaryOp,
        operand: OperandId,
    },
    Binary {
        op: BinaryOp,
        target: OperandId,
        source: OperandId,
    },
    /// Jumps and calls; `target` holds a label operand.
    Jump {
        op: JumpOp,
        target: OperandId,
    },
}

impl Instruction {
    pub const NOP: Instruction = Instruction::Nullary(NullaryOp::Nop);

    pub fn mov(target: OperandId, source: OperandId) -> Self {
        Instruction::Binary {
            op: BinaryOp::Mov,
            target,
            source,
        }
    }

    pub fn binary(op: BinaryOp, target: OperandId, source: OperandId) -> Self {
        Instruction::Binary { op, target, source }
    }

    pub fn jump(op: JumpOp, target: OperandId) -> Self {
        Instruction::Jump { op, target }
    }

    pub fn push(operand: OperandId) -> Self {
        Instruction::Unary {
            op: UnaryOp::Push,
            operand,
        }
    }

    pub fn pop(operand: OperandId) -> Self {
        Instruction::Unary {
            op: UnaryOp::Pop,
            operand,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Nullary(op) => op.mnemonic(),
            Instruction::Unary { op, .. } => op.mnemonic(),
            Instruction::Binary { op, .. } => op.mnemonic(),
            Instruction::Jump { op, .. } => op.mnemonic(),
        }
    }

    /// Operands in source order (target first).
    pub fn operands(&self) -> Vec<OperandId> {
        match self {
            Instruction::Nullary(_) => Vec::new(),
            Instruction::Unary { operand, .. } => vec![*operand],
            Instruction::Binary { target, source, .. } => vec![*target, *source],
            Instruction::Jump { target, .. } => vec![*target],
        }
    }

    /// Replace every occurrence of operand `from` with `to`.
    pub fn replace_operand(&mut self, from: OperandId, to: OperandId) {
        match self {
            Instruction::Nullary(_) => {}
            Instruction::Unary { operand, .. } => {
                if *operand == from {
                    *operand = to;
                }
            }
            Instruction::Binary { target, source, .. } => {
                if *target == from {
                    *target = to;
                }
                if *source == from {
                    *source = to;
                }
            }
            Instruction::Jump { target, .. } => {
                if *target == from {
                    *target = to;
                }
            }
        }
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, Instruction::Nullary(NullaryOp::Nop))
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Instruction::Jump { op: JumpOp::Call, .. })
    }

    /// Jumps that transfer control inside a function (everything but CALL).
    pub fn is_jump(&self) -> bool {
        matches!(self, Instruction::Jump { op, .. } if *op != JumpOp::Call)
    }

    /// Instructions that may end a basic block.
    pub fn is_terminator(&self) -> bool {
        self.is_jump() || matches!(self, Instruction::Nullary(NullaryOp::Ret | NullaryOp::Halt))
    }

    /// Label operand of a jump or call.
    pub fn jump_target(&self) -> Option<OperandId> {
        match self {
            Instruction::Jump { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Render with operands resolved through `pool`.
    pub fn display<'a>(&'a self, pool: &'a OperandPool) -> InstructionDisplay<'a> {
        InstructionDisplay { inst: self, pool }
    }
}

/// Display adapter pairing an instruction with its operand pool.
pub struct InstructionDisplay<'a> {
    inst: &'a Instruction,
    pool: &'a OperandPool,
}

impl fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.pool;
        match self.inst {
            Instruction::Nullary(op) => write!(f, "{}", op.mnemonic()),
            Instruction::Unary { op, operand } => write!(f, "{} {}", op.mnemonic(), pool[*operand]),
            Instruction::Binary { op, target, source } => {
                write!(f, "{} {}, {}", op.mnemonic(), pool[*target], pool[*source])
            }
            Instruction::Jump { op, target } => write!(f, "{} {}", op.mnemonic(), pool[*target]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::t86::operand::Operand;
    use crate::t86::register::Register;

    #[test]
    fn test_operand_traversal() {
        let mut pool = OperandPool::new();
        let r1 = pool.reg(Register::Virtual(1));
        let five = pool.imm(5);
        let label = pool.label("loop");

        assert!(Instruction::Nullary(NullaryOp::Ret).operands().is_empty());
        assert_eq!(Instruction::push(r1).operands(), vec![r1]);
        assert_eq!(Instruction::mov(r1, five).operands(), vec![r1, five]);
        assert_eq!(Instruction::jump(JumpOp::Jmp, label).operands(), vec![label]);
    }

    #[test]
    fn test_classification() {
        let mut pool = OperandPool::new();
        let label = pool.label("f");

        assert!(Instruction::jump(JumpOp::Jmp, label).is_terminator());
        assert!(Instruction::jump(JumpOp::Jge, label).is_jump());
        assert!(!Instruction::jump(JumpOp::Call, label).is_jump());
        assert!(Instruction::jump(JumpOp::Call, label).is_call());
        assert!(Instruction::Nullary(NullaryOp::Ret).is_terminator());
        assert!(Instruction::NOP.is_nop());
        assert!(BinaryOp::Add.reads_target());
        assert!(!BinaryOp::Mov.reads_target());
        assert!(!BinaryOp::Cmp.writes_target());
    }

    #[test]
    fn test_negate() {
        assert_eq!(JumpOp::Jl.negate(), Some(JumpOp::Jge));
        assert_eq!(JumpOp::Jle.negate(), Some(JumpOp::Jg));
        assert_eq!(JumpOp::Je.negate(), Some(JumpOp::Jne));
        assert_eq!(JumpOp::Jmp.negate(), None);
        assert_eq!(JumpOp::Call.negate(), None);
    }

    #[test]
    fn test_replace_operand() {
        let mut pool = OperandPool::new();
        let a = pool.reg(Register::Virtual(1));
        let b = pool.reg(Register::Physical(2));
        let mut inst = Instruction::binary(BinaryOp::Add, a, a);
        inst.replace_operand(a, b);
        assert_eq!(inst.operands(), vec![b, b]);
    }

    #[test]
    fn test_display() {
        let mut pool = OperandPool::new();
        let r1 = pool.reg(Register::Physical(1));
        let slot = pool.add(Operand::frame_slot(-2));
        let inst = Instruction::mov(r1, slot);
        assert_eq!(inst.display(&pool).to_string(), "MOV R1, [BP - 2]");
        assert_eq!(Instruction::NOP.display(&pool).to_string(), "NOP");
    }
}
