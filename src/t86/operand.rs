//! Operands and the operand arena.
//!
//! Instructions never own their operands. Every operand lives in an
//! [`OperandPool`] owned by the target program and instructions refer to it by
//! [`OperandId`]. The selector deliberately hands the *same* id to the instruction
//! that defines an abstract register and to every instruction that uses it, so
//! when the allocator rewrites `pool[id]` from abstract to physical the decision
//! is visible to all of them at once.
//!
//! Equality and hashing on [`Operand`] are structural. The allocator and the
//! peephole optimizer compare operands by value, while propagation goes through
//! the shared ids.

use super::register::Register;
use std::fmt;
use std::ops::{Index, IndexMut};

/// A symbolic jump or call target, patched to an address by the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub address: Option<usize>,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
        }
    }

    pub fn is_patched(&self) -> bool {
        self.address.is_some()
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operand {
    Reg(Register),
    /// Word at `base + offset`.
    Mem { base: Register, offset: i64 },
    Imm(i64),
    Label(Label),
}

impl Operand {
    /// Memory word addressed relative to the base pointer.
    pub fn frame_slot(offset: i64) -> Self {
        Operand::Mem {
            base: Register::Bp,
            offset,
        }
    }

    pub fn label(name: impl Into<String>) -> Self {
        Operand::Label(Label::new(name))
    }

    pub fn as_register(&self) -> Option<Register> {
        match self {
            Operand::Reg(reg) => Some(*reg),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<&Label> {
        match self {
            Operand::Label(label) => Some(label),
            _ => None,
        }
    }

    pub fn is_virtual_register(&self) -> bool {
        matches!(self, Operand::Reg(Register::Virtual(_)))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Mem { .. })
    }

    pub fn is_immediate(&self, value: i64) -> bool {
        matches!(self, Operand::Imm(v) if *v == value)
    }

    /// Whether evaluating this operand reads `register`.
    pub fn mentions(&self, register: Register) -> bool {
        match self {
            Operand::Reg(reg) => *reg == register,
            Operand::Mem { base, .. } => *base == register,
            Operand::Imm(_) | Operand::Label(_) => false,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{}", reg),
            Operand::Mem { base, offset } if *offset < 0 => write!(f, "[{} - {}]", base, -offset),
            Operand::Mem { base, offset } if *offset > 0 => write!(f, "[{} + {}]", base, offset),
            Operand::Mem { base, .. } => write!(f, "[{}]", base),
            Operand::Imm(value) => write!(f, "{}", value),
            Operand::Label(Label {
                address: Some(address),
                ..
            }) => write!(f, "{}", address),
            Operand::Label(label) => write!(f, "{}", label.name),
        }
    }
}

/// Handle of an operand inside an [`OperandPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandId(u32);

impl OperandId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arena of operands shared by all instructions of a program.
#[derive(Debug, Default, Clone)]
pub struct OperandPool {
    operands: Vec<Operand>,
}

impl OperandPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operand and return its handle.
    pub fn add(&mut self, operand: Operand) -> OperandId {
        let id = OperandId(self.operands.len() as u32);
        self.operands.push(operand);
        id
    }

    pub fn reg(&mut self, reg: Register) -> OperandId {
        self.add(Operand::Reg(reg))
    }

    pub fn imm(&mut self, value: i64) -> OperandId {
        self.add(Operand::Imm(value))
    }

    pub fn label(&mut self, name: impl Into<String>) -> OperandId {
        self.add(Operand::label(name))
    }

    pub fn get(&self, id: OperandId) -> &Operand {
        &self.operands[id.index()]
    }

    /// Overwrite the shared operand; every holder of `id` observes the change.
    pub fn set(&mut self, id: OperandId, operand: Operand) {
        self.operands[id.index()] = operand;
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }
}

impl Index<OperandId> for OperandPool {
    type Output = Operand;

    fn index(&self, id: OperandId) -> &Operand {
        self.get(id)
    }
}

impl IndexMut<OperandId> for OperandPool {
    fn index_mut(&mut self, id: OperandId) -> &mut Operand {
        &mut self.operands[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashSet;

    #[test]
    fn test_structural_equality() {
        let a = Operand::frame_slot(-1);
        let b = Operand::Mem {
            base: Register::Bp,
            offset: -1,
        };
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&Operand::frame_slot(-2)));
    }

    #[test]
    fn test_shared_id_propagates() {
        let mut pool = OperandPool::new();
        let shared = pool.reg(Register::Virtual(1));
        let holders = [shared, shared, shared];

        pool.set(shared, Operand::Reg(Register::Physical(2)));
        for id in holders {
            assert_eq!(pool[id], Operand::Reg(Register::Physical(2)));
        }

        // A structurally equal operand with its own id is not affected.
        let other = pool.reg(Register::Virtual(1));
        assert_eq!(pool[other], Operand::Reg(Register::Virtual(1)));
    }

    #[test]
    fn test_operand_display() {
        assert_eq!(Operand::frame_slot(-3).to_string(), "[BP - 3]");
        assert_eq!(Operand::frame_slot(2).to_string(), "[BP + 2]");
        assert_eq!(Operand::Imm(-7).to_string(), "-7");

        let mut label = Label::new("main");
        assert_eq!(Operand::Label(label.clone()).to_string(), "main");
        label.address = Some(14);
        assert_eq!(Operand::Label(label).to_string(), "14");
    }

    #[test]
    fn test_mentions() {
        let slot = Operand::frame_slot(-1);
        assert!(slot.mentions(Register::Bp));
        assert!(!slot.mentions(Register::Sp));
        assert!(Operand::Reg(Register::Physical(1)).mentions(Register::Physical(1)));
        assert!(!Operand::Imm(1).mentions(Register::Physical(1)));
    }
}
