// This module implements the cdecl-style calling convention of the T86 target. Arguments
// are pushed by the caller in reverse order, so argument i sits at [BP + 2 + i] once the
// callee has pushed the old base pointer (one word for the return address, one for the
// saved BP). The callee reserves its frame with a single SUB SP in the prologue and
// releases it with ADD SP in the one shared epilogue; both read the same immediate
// operand so the frame can still grow after selection (spill slots). The caller cleans
// the stack after CALL, and results come back in R0.

//! Cdecl calling convention for T86.

use crate::t86::{BinaryOp, Instruction, JumpOp, NullaryOp, Operand, OperandId, OperandPool, Register};

/// Words between BP and the first argument: the saved BP and the return address.
pub const ARG_BASE_OFFSET: i64 = 2;

/// BP-relative offset of argument `index`.
pub fn arg_offset(index: usize) -> i64 {
    ARG_BASE_OFFSET + index as i64
}

/// Memory operand holding argument `index` inside the callee.
pub fn arg_slot(index: usize) -> Operand {
    Operand::frame_slot(arg_offset(index))
}

/// `PUSH BP; MOV BP, SP; SUB SP, frame`, one argument load per register in
/// `arg_registers`, then a jump to the function body.
pub fn prologue(
    pool: &mut OperandPool,
    frame: OperandId,
    arg_registers: &[OperandId],
    body: &str,
) -> Vec<Instruction> {
    let mut insts = Vec::with_capacity(arg_registers.len() + 4);
    insts.push(Instruction::push(pool.reg(Register::Bp)));
    insts.push(Instruction::mov(pool.reg(Register::Bp), pool.reg(Register::Sp)));
    insts.push(Instruction::binary(BinaryOp::Sub, pool.reg(Register::Sp), frame));
    for (index, register) in arg_registers.iter().enumerate() {
        let slot = pool.add(arg_slot(index));
        insts.push(Instruction::mov(*register, slot));
    }
    insts.push(Instruction::jump(JumpOp::Jmp, pool.label(body)));
    insts
}

/// `ADD SP, frame; POP BP; RET`.
pub fn epilogue(pool: &mut OperandPool, frame: OperandId) -> Vec<Instruction> {
    vec![
        Instruction::binary(BinaryOp::Add, pool.reg(Register::Sp), frame),
        Instruction::pop(pool.reg(Register::Bp)),
        Instruction::Nullary(NullaryOp::Ret),
    ]
}

/// Push `args` last to first, call `callee`, then drop the pushed words.
pub fn call_sequence(pool: &mut OperandPool, callee: &str, args: &[OperandId]) -> Vec<Instruction> {
    let mut insts: Vec<Instruction> = args.iter().rev().map(|arg| Instruction::push(*arg)).collect();
    insts.push(Instruction::jump(JumpOp::Call, pool.label(callee)));
    if !args.is_empty() {
        let words = pool.imm(args.len() as i64);
        insts.push(Instruction::binary(BinaryOp::Add, pool.reg(Register::Sp), words));
    }
    insts
}

/// Move a value into the return register.
pub fn return_value(pool: &mut OperandPool, value: OperandId) -> Instruction {
    Instruction::mov(pool.reg(Register::RETURN), value)
}
