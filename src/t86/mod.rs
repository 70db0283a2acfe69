//! The T86 target model: registers, operands, instructions and program containers.

pub mod instruction;
pub mod operand;
pub mod program;
pub mod register;

pub use instruction::{BinaryOp, Instruction, InstructionDisplay, JumpOp, NullaryOp, UnaryOp};
pub use operand::{Label, Operand, OperandId, OperandPool};
pub use program::{BasicBlock, Function, Program};
pub use register::{RegSet, Register, RETURN_REGISTER_INDEX};
