use crate::config::settings::EngineConfig;
use crate::config::types::{Result, Target, TutorError};
use crate::exec::runner::ProcessRunner;
use crate::judge::backend::{Availability, Backend, BackendOutcome};
use crate::observability::metrics;
use crate::runtime::builtins::{OutputBuffer, SymbolTable};
use crate::runtime::interpreter::EvalLimits;
use crate::trace::tracer::{trace_run, Interrupt, TraceFault, TraceLimits, TraceOutcome};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// How long past the deadline an evaluator may take to notice it.
const JOIN_GRACE: Duration = Duration::from_secs(1);

/// In-process evaluator with a step per executed statement.
///
/// Each run gets a dedicated thread so the evaluator's native stack size is
/// fixed by configuration instead of by whichever thread called us. The
/// caller waits at most the deadline plus [`JOIN_GRACE`] for it.
#[derive(Debug, Clone)]
pub struct TracedBackend {
    limits: TraceLimits,
    max_output_bytes: usize,
    stack_bytes: usize,
}

impl TracedBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            limits: TraceLimits {
                timeout: Duration::from_secs(config.timeout_secs),
                max_steps: config.max_trace_steps,
                max_bytes: config.max_trace_bytes,
                eval: EvalLimits {
                    max_call_depth: config.max_call_depth,
                    max_heap_objects: config.max_heap_objects,
                    max_collection_len: config.max_collection_len,
                },
            },
            max_output_bytes: config.max_output_bytes,
            stack_bytes: config.evaluator_stack_bytes,
        }
    }

    pub fn limits(&self) -> &TraceLimits {
        &self.limits
    }
}

impl Backend for TracedBackend {
    fn target(&self) -> Target {
        Target::Traced
    }

    fn describe(&self) -> String {
        format!(
            "restricted Python subset, traced in-process (max {} steps)",
            self.limits.max_steps
        )
    }

    fn execute(&self, source: &str) -> Result<BackendOutcome> {
        let source = source.to_string();
        let limits = self.limits.clone();
        let max_output_bytes = self.max_output_bytes;
        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name("tutorbox-eval".to_string())
            .stack_size(self.stack_bytes)
            .spawn(move || {
                let symbols = SymbolTable::restricted(OutputBuffer::new(max_output_bytes));
                let _ = tx.send(trace_run(&source, symbols, &limits));
            })
            .map_err(|e| TutorError::Process(format!("Failed to start evaluator thread: {}", e)))?;
        let outcome = match rx.recv_timeout(self.limits.timeout + JOIN_GRACE) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                log::error!(
                    "Evaluator missed its {:?} deadline; abandoning the run",
                    self.limits.timeout
                );
                TraceOutcome {
                    steps: Vec::new(),
                    fault: Some(TraceFault::Interrupted(Interrupt::Deadline(self.limits.timeout))),
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TutorError::Process("evaluator thread panicked".to_string()));
            }
        };
        metrics::get_metrics()
            .trace_steps_total
            .add(outcome.steps.len() as u64);
        Ok(BackendOutcome::Traced(outcome))
    }

    fn availability(&self, _runner: &ProcessRunner) -> Availability {
        Availability {
            target: Target::Traced,
            available: true,
            detail: "built-in evaluator".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_on_its_own_thread_and_returns_steps() {
        let backend = TracedBackend::new(&EngineConfig::default());
        match backend.execute("x = [1, 2]\nx.append(3)\nprint(x)\n").unwrap() {
            BackendOutcome::Traced(outcome) => {
                assert!(outcome.fault.is_none());
                assert_eq!(outcome.steps.len(), 3);
                assert_eq!(outcome.final_output(), "[1, 2, 3]");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn trace_budgets_come_from_configuration() {
        let config = EngineConfig {
            max_trace_steps: 7,
            max_trace_bytes: 4096,
            ..EngineConfig::default()
        };
        let backend = TracedBackend::new(&config);
        assert_eq!(backend.limits().max_steps, 7);
        assert_eq!(backend.limits().max_bytes, 4096);
    }

    #[test]
    fn deep_recursion_is_a_fault_not_a_crash() {
        let backend = TracedBackend::new(&EngineConfig::default());
        let source = "def f(n):\n    return f(n + 1)\nf(0)\n";
        match backend.execute(source).unwrap() {
            BackendOutcome::Traced(outcome) => match outcome.fault {
                Some(TraceFault::Runtime(fault)) => assert_eq!(fault.kind, "RecursionError"),
                other => panic!("unexpected fault {:?}", other),
            },
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
