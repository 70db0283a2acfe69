//! T86 registers.
//!
//! General purpose registers start out *abstract* (an unbounded index handed out by
//! the instruction selector) and become *physical* exactly once, when the local
//! allocator binds them to a slot of the machine register file. The stack pointer,
//! the base pointer and `R0` (the return value register) are always physical.

use std::fmt;

/// Index of the register that carries function return values.
pub const RETURN_REGISTER_INDEX: u32 = 0;

/// Largest register index representable in a [`RegSet`].
pub const MAX_REGISTER_INDEX: u32 = 127;

/// A machine or abstract register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// Stack pointer.
    Sp,
    /// Base pointer.
    Bp,
    /// Abstract general purpose register, not yet allocated.
    Virtual(u32),
    /// General purpose register of the machine register file.
    Physical(u32),
}

impl Register {
    /// The reserved return value register (EAX on the original machine).
    pub const RETURN: Register = Register::Physical(RETURN_REGISTER_INDEX);

    pub fn is_virtual(&self) -> bool {
        matches!(self, Register::Virtual(_))
    }

    pub fn is_physical(&self) -> bool {
        !self.is_virtual()
    }

    /// SP, BP and the return value register bypass allocation.
    pub fn is_special(&self) -> bool {
        matches!(self, Register::Sp | Register::Bp) || *self == Register::RETURN
    }

    /// Index of a general purpose register, abstract or physical.
    pub fn index(&self) -> Option<u32> {
        match self {
            Register::Virtual(index) | Register::Physical(index) => Some(*index),
            Register::Sp | Register::Bp => None,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Sp => write!(f, "SP"),
            Register::Bp => write!(f, "BP"),
            Register::Virtual(index) => write!(f, "%v{}", index),
            Register::Physical(index) => write!(f, "R{}", index),
        }
    }
}

/// Bit set over physical register indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegSet {
    bits: u128,
}

impl RegSet {
    /// Create empty register set.
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    /// Registers `first..=last`.
    pub fn range(first: u32, last: u32) -> Self {
        let mut set = Self::new();
        for index in first..=last.min(MAX_REGISTER_INDEX) {
            set.insert(index);
        }
        set
    }

    pub fn contains(&self, index: u32) -> bool {
        index <= MAX_REGISTER_INDEX && self.bits & (1u128 << index) != 0
    }

    pub fn insert(&mut self, index: u32) {
        if index <= MAX_REGISTER_INDEX {
            self.bits |= 1u128 << index;
        }
    }

    pub fn remove(&mut self, index: u32) {
        if index <= MAX_REGISTER_INDEX {
            self.bits &= !(1u128 << index);
        }
    }

    /// Lowest register in the set.
    pub fn first(&self) -> Option<u32> {
        if self.bits == 0 {
            None
        } else {
            Some(self.bits.trailing_zeros())
        }
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn clear(&mut self) {
        self.bits = 0;
    }

    /// Iterate the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..=MAX_REGISTER_INDEX).filter(move |index| self.contains(*index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_classes() {
        assert!(Register::Virtual(3).is_virtual());
        assert!(Register::Sp.is_physical());
        assert!(Register::Sp.is_special());
        assert!(Register::Bp.is_special());
        assert!(Register::RETURN.is_special());
        assert!(!Register::Physical(1).is_special());
        assert_eq!(Register::Bp.index(), None);
        assert_eq!(Register::Physical(2).index(), Some(2));
    }

    #[test]
    fn test_register_display() {
        assert_eq!(Register::Sp.to_string(), "SP");
        assert_eq!(Register::Physical(0).to_string(), "R0");
        assert_eq!(Register::Virtual(12).to_string(), "%v12");
    }

    #[test]
    fn test_regset_operations() {
        let mut set = RegSet::range(1, 4);
        assert_eq!(set.len(), 4);
        assert!(!set.contains(0));
        assert_eq!(set.first(), Some(1));

        set.remove(1);
        set.remove(3);
        assert_eq!(set.first(), Some(2));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![2, 4]);

        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.first(), None);
    }

    #[test]
    fn test_regset_wide_indices() {
        let mut set = RegSet::new();
        set.insert(64);
        set.insert(200);
        assert!(set.contains(64));
        assert!(!set.contains(200));
        assert_eq!(set.len(), 1);
    }
}
