//! Execution control
//!
//! Subprocess launch, bounded output capture, and wall-clock enforcement for
//! external toolchains.

pub mod runner;
