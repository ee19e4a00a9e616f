//! Execution backends.
//!
//! The dispatcher stays target-agnostic. Each [`Target`](crate::config::types::Target)
//! maps to exactly one [`backend::Backend`]: the in-process traced evaluator,
//! or a [`toolchain`] stage that compiles and runs through external tools.

pub mod backend;
pub mod languages;
pub mod registry;
pub mod toolchain;
