//! Stack slot allocation.
//!
//! Every slot is one machine word addressed below the saved base pointer: the
//! first slot is `[BP - 1]`, the next `[BP - 2]` and so on. Slots are never
//! reused, so the frame only grows while a function is compiled.

/// Size of a machine word in bytes.
pub const WORD_BYTES: u64 = 8;

/// Hands out frame slots for one function.
#[derive(Debug, Default, Clone)]
pub struct StackAllocator {
    words: u32,
}

impl StackAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue allocating in a frame that already holds `words` slots.
    pub fn with_size(words: u32) -> Self {
        Self { words }
    }

    /// Reserve a slot for a local of `bytes`. Locals wider than a word do not fit.
    pub fn allocate(&mut self, bytes: u64) -> Option<i64> {
        if bytes > WORD_BYTES {
            return None;
        }
        Some(self.allocate_word())
    }

    /// Reserve one word and return its offset from BP.
    pub fn allocate_word(&mut self) -> i64 {
        self.words += 1;
        -(self.words as i64)
    }

    /// Frame size in words.
    pub fn size(&self) -> u32 {
        self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_grow_downwards() {
        let mut stack = StackAllocator::new();
        assert_eq!(stack.allocate(4), Some(-1));
        assert_eq!(stack.allocate(8), Some(-2));
        assert_eq!(stack.allocate_word(), -3);
        assert_eq!(stack.size(), 3);
    }

    #[test]
    fn test_wide_local_rejected() {
        let mut stack = StackAllocator::new();
        assert_eq!(stack.allocate(16), None);
        assert_eq!(stack.size(), 0);
    }

    #[test]
    fn test_continue_existing_frame() {
        let mut stack = StackAllocator::with_size(5);
        assert_eq!(stack.allocate_word(), -6);
    }
}
