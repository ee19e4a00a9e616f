/// Normalization of backend outcomes into the public result shape
use crate::config::types::{ErrorKind, ExecutionResult, TutorError};
use crate::exec::runner::ProcessOutcome;
use crate::judge::backend::BackendOutcome;
use crate::trace::tracer::{TraceFault, TraceOutcome};
use std::time::Duration;

/// Maps backend outcomes onto [`ExecutionResult`]; a pure function of its input.
pub struct ResultAggregator;

impl ResultAggregator {
    /// `timeout` is the per-phase limit the backend ran under.
    pub fn aggregate(outcome: BackendOutcome, timeout: Duration) -> ExecutionResult {
        match outcome {
            BackendOutcome::Traced(trace) => Self::from_trace(trace),
            BackendOutcome::CompileFailed(process) => Self::from_compile_failure(&process, timeout),
            BackendOutcome::Ran(process) => Self::from_run(process, timeout),
        }
    }

    fn from_trace(trace: TraceOutcome) -> ExecutionResult {
        let final_output = trace.final_output().to_string();
        let Some(fault) = trace.fault else {
            return ExecutionResult::succeeded(trace.steps, final_output);
        };
        match fault {
            // Nothing ran: no steps and no output
            TraceFault::Syntax(e) => ExecutionResult::failed(ErrorKind::CompileError, e.to_string()),
            TraceFault::Runtime(fault) => {
                ExecutionResult::failed(ErrorKind::RuntimeFault, fault.to_string())
                    .with_trace(trace.steps)
                    .with_output(final_output)
            }
            // Only the wall clock is a timeout; an exhausted trace budget is
            // reported against the program with the steps recorded so far.
            TraceFault::Interrupted(interrupt) => {
                let kind = if interrupt.is_deadline() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::RuntimeFault
                };
                ExecutionResult::failed(kind, interrupt.to_string())
                    .with_trace(trace.steps)
                    .with_output(final_output)
            }
        }
    }

    fn from_compile_failure(process: &ProcessOutcome, timeout: Duration) -> ExecutionResult {
        if process.timed_out {
            return Self::timeout("compilation", timeout);
        }
        ExecutionResult::failed(ErrorKind::CompileError, diagnostic(process))
    }

    fn from_run(process: ProcessOutcome, timeout: Duration) -> ExecutionResult {
        // A kill by the runner outranks whatever exit status it produced.
        if process.timed_out {
            return Self::timeout("execution", timeout).with_output(process.stdout);
        }
        if process.exit_code == Some(0) {
            return ExecutionResult::succeeded(Vec::new(), process.stdout);
        }
        ExecutionResult::failed(ErrorKind::RuntimeFault, diagnostic(&process))
            .with_output(process.stdout)
    }

    fn timeout(phase: &str, timeout: Duration) -> ExecutionResult {
        let err = TutorError::Timeout(timeout);
        ExecutionResult::failed(err.kind(), format!("{} timed out: {}", phase, err))
    }
}

/// Trimmed stderr, or the termination status when stderr is empty.
fn diagnostic(process: &ProcessOutcome) -> String {
    let stderr = process.stderr.trim_end();
    if stderr.is_empty() {
        process.status_text()
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{HeapSnapshot, TraceStep};
    use crate::runtime::interpreter::Fault;
    use crate::runtime::lexer::SyntaxError;
    use crate::trace::tracer::Interrupt;

    const LIMIT: Duration = Duration::from_secs(10);

    fn step(line: u32, output: &str) -> TraceStep {
        TraceStep {
            line_number: line,
            stack: Vec::new(),
            output_so_far: output.to_string(),
            heap: HeapSnapshot::default(),
            error: None,
        }
    }

    fn process(exit_code: Option<i32>, stdout: &str, stderr: &str) -> ProcessOutcome {
        ProcessOutcome {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
            ..ProcessOutcome::default()
        }
    }

    #[test]
    fn successful_trace_uses_last_step_output() {
        let trace = TraceOutcome {
            steps: vec![step(1, ""), step(2, "1")],
            fault: None,
        };
        let result = ResultAggregator::aggregate(BackendOutcome::Traced(trace), LIMIT);
        assert!(result.success);
        assert_eq!(result.trace.len(), 2);
        assert_eq!(result.final_output, "1");
        assert!(result.error.is_none());
    }

    #[test]
    fn syntax_error_is_compile_error_with_nothing_else() {
        let trace = TraceOutcome {
            steps: Vec::new(),
            fault: Some(TraceFault::Syntax(SyntaxError::new(1, "invalid syntax"))),
        };
        let result = ResultAggregator::aggregate(BackendOutcome::Traced(trace), LIMIT);
        assert_eq!(result.error_kind(), Some(ErrorKind::CompileError));
        assert!(result.trace.is_empty());
        assert_eq!(result.final_output, "");
    }

    #[test]
    fn runtime_fault_keeps_partial_trace() {
        let trace = TraceOutcome {
            steps: vec![step(1, "a"), step(2, "a")],
            fault: Some(TraceFault::Runtime(Fault {
                kind: "ZeroDivisionError".to_string(),
                message: "division by zero".to_string(),
                line: 2,
            })),
        };
        let result = ResultAggregator::aggregate(BackendOutcome::Traced(trace), LIMIT);
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
        assert_eq!(result.trace.len(), 2);
        assert_eq!(result.final_output, "a");
        let message = &result.error.unwrap().message;
        assert_eq!(message, "ZeroDivisionError: division by zero (line 2)");
    }

    #[test]
    fn deadline_interrupt_is_timeout() {
        let trace = TraceOutcome {
            steps: vec![step(1, "")],
            fault: Some(TraceFault::Interrupted(Interrupt::Deadline(LIMIT))),
        };
        let result = ResultAggregator::aggregate(BackendOutcome::Traced(trace), LIMIT);
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.trace.len(), 1);
    }

    #[test]
    fn exhausted_trace_budgets_are_runtime_faults_not_timeouts() {
        for interrupt in [Interrupt::StepBudget(1), Interrupt::TraceBudget(4096)] {
            let trace = TraceOutcome {
                steps: vec![step(1, "x")],
                fault: Some(TraceFault::Interrupted(interrupt.clone())),
            };
            let result = ResultAggregator::aggregate(BackendOutcome::Traced(trace), LIMIT);
            assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
            assert_eq!(result.error.unwrap().message, interrupt.to_string());
            assert_eq!(result.trace.len(), 1);
            assert_eq!(result.final_output, "x");
        }
    }

    #[test]
    fn compile_failure_reports_stderr() {
        let outcome = process(Some(1), "", "source.c:1: error: expected ';'\n");
        let result = ResultAggregator::aggregate(BackendOutcome::CompileFailed(outcome), LIMIT);
        assert_eq!(result.error_kind(), Some(ErrorKind::CompileError));
        assert_eq!(result.error.unwrap().message, "source.c:1: error: expected ';'");
        assert!(result.trace.is_empty());
        assert_eq!(result.final_output, "");
    }

    #[test]
    fn nonzero_exit_is_runtime_fault_with_stdout() {
        let result = ResultAggregator::aggregate(
            BackendOutcome::Ran(process(Some(3), "partial\n", "")),
            LIMIT,
        );
        assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
        assert_eq!(result.final_output, "partial\n");
        assert_eq!(result.error.unwrap().message, "exited with status 3");
    }

    #[test]
    fn timed_out_run_outranks_exit_status() {
        let mut outcome = process(None, "tick\n", "");
        outcome.timed_out = true;
        outcome.signal = Some(9);
        let result = ResultAggregator::aggregate(BackendOutcome::Ran(outcome), LIMIT);
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.final_output, "tick\n");
    }

    #[test]
    fn clean_exit_succeeds_without_trace() {
        let result =
            ResultAggregator::aggregate(BackendOutcome::Ran(process(Some(0), "hi\n", "")), LIMIT);
        assert!(result.success);
        assert!(result.trace.is_empty());
        assert_eq!(result.final_output, "hi\n");
    }
}
