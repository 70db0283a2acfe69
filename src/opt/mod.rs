//! Optimizations over the allocated T86 program.

pub mod peephole;

pub use peephole::{default_rules, optimize, PeepholeOptimizer, PeepholeRule, Window};
