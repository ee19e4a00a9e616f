//! Workspace safety
//!
//! Run-scoped temporary directories and symlink-safe removal.

pub mod removal;
pub mod workspace;
