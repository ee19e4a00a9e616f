//! Utilities
//!
//! Bounded output collection for child processes.

pub mod output;
