//! Abstract Syntax Tree
//!
//! The tree that the lexer/parser pair hands to the evaluator. Every node
//! carries a [`Position`] so runtime errors can report file/line/column.

pub mod types;

pub use types::*;
