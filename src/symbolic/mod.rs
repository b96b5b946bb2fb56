//! Symbolic 256-bit words: concrete values and immutable expression trees.

pub mod eval;
pub mod value;
pub mod word;

pub use self::{eval::*, value::*, word::Word};
