//! Outcome classification
//!
//! Derives the public result as a pure function of what a backend observed.

pub mod aggregator;
