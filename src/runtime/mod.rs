//! Restricted evaluator for the traced target.
//!
//! Source is tokenized by [`lexer`], parsed by [`parser`] into the [`ast`]
//! and run by the [`interpreter`] against the allow-listed primitives in
//! [`builtins`]. Nothing here reaches the filesystem, processes or imports.

pub mod ast;
pub mod builtins;
pub mod format;
pub mod interpreter;
pub mod lexer;
pub mod methods;
pub mod parser;
pub mod security;
pub mod value;
