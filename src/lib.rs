//! tutorbox: sandboxed code execution and line-by-line execution tracing
//! for teaching tools
//!
//! # Architecture
//!
//! A request names a target and carries source text. The [`core::dispatcher`]
//! validates it, screens it against the denylist and hands it to one backend:
//!
//! - `traced`: an in-process evaluator for a restricted Python subset that
//!   records the stack, heap graph and output after every statement
//! - `compiled`: a C program built with gcc and run as a subprocess
//! - `hosted`: a JavaScript program run by node
//!
//! Every backend outcome is normalized by [`verdict::aggregator`] into the
//! same [`ExecutionResult`] shape.
//!
//! ## Request Routing ([`core`], [`judge`])
//! - [`core::dispatcher`]: validation, denylist screening, dispatch
//! - [`judge::registry`]: target-to-backend table
//! - [`judge::toolchain`]: compile/run lifecycle for external toolchains
//!
//! ## Traced Evaluation ([`runtime`], [`trace`])
//! - [`runtime::parser`]: source to AST
//! - [`runtime::interpreter`]: restricted evaluation context
//! - [`trace::tracer`]: per-statement step recording and budgets
//! - [`trace::heap`]: reachable object graph with stable identities
//!
//! ## Processes and Workspaces ([`exec`], [`safety`], [`utils`])
//! - [`exec::runner`]: subprocess launch with wall-clock enforcement
//! - [`safety::workspace`]: run-scoped temporary directories
//! - [`utils::output`]: bounded output collection
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: structured audit events
//! - [`observability::metrics`]: Prometheus metrics export

// Configuration and shared types
pub mod config;

// Request routing
pub mod core;
pub mod judge;

// Subprocess execution
pub mod exec;

// Traced evaluator and tracer
pub mod runtime;
pub mod trace;

// Outcome normalization
pub mod verdict;

// Workspaces
pub mod safety;

// Observability
pub mod observability;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the tutorbox binary.
pub mod cli;

pub use crate::config::settings::EngineConfig;
pub use crate::config::types::*;
pub use crate::core::dispatcher::Dispatcher;
