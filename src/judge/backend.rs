use crate::config::types::{Result, Target};
use crate::exec::runner::{ProcessOutcome, ProcessRunner};
use crate::trace::tracer::TraceOutcome;
use serde::Serialize;

/// Raw result of one backend run, before normalization.
#[derive(Debug, Clone)]
pub enum BackendOutcome {
    /// In-process traced run, finished or stopped early
    Traced(TraceOutcome),
    /// The compile step did not produce a program
    CompileFailed(ProcessOutcome),
    /// The program ran (or was killed) as a subprocess
    Ran(ProcessOutcome),
}

/// Whether a backend can run on this host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub target: Target,
    pub available: bool,
    /// Version line of the toolchain, or why it is missing
    pub detail: String,
}

/// Backend contract: one implementation per [`Target`].
pub trait Backend: Send + Sync {
    fn target(&self) -> Target;

    /// One-line description for the target catalogue.
    fn describe(&self) -> String;

    /// Run `source` to completion. Program failures are reported in the
    /// outcome; `Err` is reserved for host-side failures and missing tools.
    fn execute(&self, source: &str) -> Result<BackendOutcome>;

    fn availability(&self, runner: &ProcessRunner) -> Availability;
}
