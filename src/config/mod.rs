//! Configuration and shared types
//!
//! Engine limits, toolchain command templates, and the request/result/error
//! types every other module speaks.

pub mod settings;
pub mod types;
