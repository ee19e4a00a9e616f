//! Execution tracing for the traced target.
//!
//! The [`tracer`] turns every executed statement into a
//! [`TraceStep`](crate::config::types::TraceStep); the [`heap`] builder
//! renders the reachable object graph for each step.

pub mod heap;
pub mod tracer;
