/// Per-run execution tracer for the traced evaluator.
///
/// One [`ExecutionTracer`] is created for every run and lent to the
/// interpreter for the length of that run, so there is no process-wide hook
/// to install or restore.
use crate::config::types::{HeapValue, TraceStep};
use crate::runtime::builtins::SymbolTable;
use crate::runtime::interpreter::{EvalLimits, Fault, FrameState, Interpreter, RunError};
use crate::runtime::lexer::SyntaxError;
use crate::runtime::parser::parse_program;
use crate::runtime::value::Heap;
use crate::trace::heap::HeapGraphBuilder;
use std::fmt;
use std::time::{Duration, Instant};

/// What the evaluator exposes at a statement boundary.
pub struct StateView<'a> {
    pub line: u32,
    /// Outermost frame first
    pub frames: &'a [FrameState],
    pub heap: &'a Heap,
    /// Raw captured output
    pub output: &'a str,
}

/// Reason a tracer stopped the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    Deadline(Duration),
    StepBudget(usize),
    /// Estimated trace size in bytes
    TraceBudget(usize),
}

impl Interrupt {
    /// Whether the wall clock, rather than a trace budget, ended the run.
    pub fn is_deadline(&self) -> bool {
        matches!(self, Interrupt::Deadline(_))
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Deadline(limit) => {
                write!(f, "execution exceeded the {:.1}s time limit", limit.as_secs_f64())
            }
            Interrupt::StepBudget(max) => {
                write!(f, "trace step budget exhausted after {} steps", max)
            }
            Interrupt::TraceBudget(max) => {
                write!(f, "trace size budget of {} bytes exhausted", max)
            }
        }
    }
}

pub trait Tracer {
    /// Called after every executed statement boundary.
    fn on_line(&mut self, view: &StateView<'_>) -> Result<(), Interrupt>;

    /// Called from long-running builtins and loops between statements.
    fn poll(&mut self) -> Result<(), Interrupt>;

    /// Called once when an exception escapes the module.
    fn on_fault(&mut self, view: &StateView<'_>, message: &str);
}

/// Limits of a single traced run.
#[derive(Debug, Clone)]
pub struct TraceLimits {
    pub timeout: Duration,
    pub max_steps: usize,
    pub max_bytes: usize,
    pub eval: EvalLimits,
}

impl Default for TraceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_steps: 10_000,
            max_bytes: 64 * 1024 * 1024,
            eval: EvalLimits::default(),
        }
    }
}

/// Records a [`TraceStep`] per statement and enforces the run's budgets.
pub struct ExecutionTracer {
    started: Instant,
    timeout: Duration,
    max_steps: usize,
    max_bytes: usize,
    recorded_bytes: usize,
    steps: Vec<TraceStep>,
}

impl ExecutionTracer {
    pub fn new(limits: &TraceLimits) -> Self {
        Self {
            started: Instant::now(),
            timeout: limits.timeout,
            max_steps: limits.max_steps,
            max_bytes: limits.max_bytes,
            recorded_bytes: 0,
            steps: Vec::new(),
        }
    }

    /// Estimated size of the steps recorded so far.
    pub fn recorded_bytes(&self) -> usize {
        self.recorded_bytes
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<TraceStep> {
        self.steps
    }

    fn check_deadline(&self) -> Result<(), Interrupt> {
        if self.started.elapsed() >= self.timeout {
            return Err(Interrupt::Deadline(self.timeout));
        }
        Ok(())
    }

    fn capture(view: &StateView<'_>, error: Option<String>) -> TraceStep {
        let (stack, heap) = HeapGraphBuilder::build(view.heap, view.frames);
        TraceStep {
            line_number: view.line,
            stack,
            output_so_far: visible_output(view.output).to_string(),
            heap,
            error,
        }
    }

    fn push(&mut self, step: TraceStep) {
        self.recorded_bytes += step_cost(&step);
        self.steps.push(step);
    }
}

impl Tracer for ExecutionTracer {
    fn on_line(&mut self, view: &StateView<'_>) -> Result<(), Interrupt> {
        if self.steps.len() >= self.max_steps {
            return Err(Interrupt::StepBudget(self.max_steps));
        }
        let step = Self::capture(view, None);
        if self.recorded_bytes.saturating_add(step_cost(&step)) > self.max_bytes {
            return Err(Interrupt::TraceBudget(self.max_bytes));
        }
        self.push(step);
        self.check_deadline()
    }

    fn poll(&mut self) -> Result<(), Interrupt> {
        self.check_deadline()
    }

    fn on_fault(&mut self, view: &StateView<'_>, message: &str) {
        let step = Self::capture(view, Some(message.to_string()));
        self.push(step);
    }
}

/// Rough in-memory size of one recorded step: its output copy plus a slot
/// per binding, heap entry and reference.
fn step_cost(step: &TraceStep) -> usize {
    const SLOT: usize = 32;
    let frames: usize = step
        .stack
        .iter()
        .map(|frame| SLOT + frame.function_name.len() + frame.bindings.len() * SLOT)
        .sum();
    let heap: usize = step
        .heap
        .objects
        .values()
        .map(|object| {
            let entries = match &object.value {
                HeapValue::Scalar(_) => 1,
                HeapValue::Sequence(items) => items.len(),
                HeapValue::Mapping(entries) => 2 * entries.len(),
            };
            SLOT * (2 + entries + object.outgoing_refs.len())
        })
        .sum();
    SLOT + step.output_so_far.len() + frames + heap
}

/// Captured output without the trailing newline of the last print.
pub fn visible_output(raw: &str) -> &str {
    raw.strip_suffix('\n').unwrap_or(raw)
}

/// Why a traced run ended early.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceFault {
    Syntax(SyntaxError),
    Runtime(Fault),
    Interrupted(Interrupt),
}

impl fmt::Display for TraceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceFault::Syntax(e) => write!(f, "{}", e),
            TraceFault::Runtime(fault) => write!(f, "{}", fault),
            TraceFault::Interrupted(interrupt) => write!(f, "{}", interrupt),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraceOutcome {
    pub steps: Vec<TraceStep>,
    pub fault: Option<TraceFault>,
}

impl TraceOutcome {
    /// Output of the last recorded step, or empty when nothing ran.
    pub fn final_output(&self) -> &str {
        self.steps.last().map(|s| s.output_so_far.as_str()).unwrap_or("")
    }
}

/// Parse and run `source`, recording one step per executed statement.
pub fn trace_run(source: &str, symbols: SymbolTable, limits: &TraceLimits) -> TraceOutcome {
    let program = match parse_program(source) {
        Ok(program) => program,
        Err(e) => {
            log::debug!("Traced source rejected by parser: {}", e);
            return TraceOutcome {
                steps: Vec::new(),
                fault: Some(TraceFault::Syntax(e)),
            };
        }
    };

    let mut tracer = ExecutionTracer::new(limits);
    let result = {
        let mut interpreter = Interpreter::new(symbols, limits.eval.clone(), &mut tracer);
        interpreter.run(&program)
    };
    let fault = match result {
        Ok(()) => None,
        Err(RunError::Fault(fault)) => Some(TraceFault::Runtime(fault)),
        Err(RunError::Interrupted(interrupt)) => Some(TraceFault::Interrupted(interrupt)),
    };
    log::debug!(
        "Traced run finished with {} steps (~{} bytes)",
        tracer.steps().len(),
        tracer.recorded_bytes()
    );
    let steps = tracer.into_steps();
    TraceOutcome { steps, fault }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Scalar, ValueRef};
    use crate::runtime::builtins::OutputBuffer;

    fn run(source: &str) -> TraceOutcome {
        run_with(source, TraceLimits::default())
    }

    fn run_with(source: &str, limits: TraceLimits) -> TraceOutcome {
        let symbols = SymbolTable::restricted(OutputBuffer::new(64 * 1024));
        trace_run(source, symbols, &limits)
    }

    #[test]
    fn trailing_newline_is_hidden() {
        assert_eq!(visible_output("1\n"), "1");
        assert_eq!(visible_output("1\n\n"), "1\n");
        assert_eq!(visible_output(""), "");
    }

    #[test]
    fn assignment_chain_produces_three_steps() {
        let outcome = run("x = 1\ny = x\nprint(y)\n");
        assert!(outcome.fault.is_none());
        assert_eq!(outcome.steps.len(), 3);
        let last = outcome.steps.last().unwrap();
        assert_eq!(last.line_number, 3);
        assert!(last.output_so_far.ends_with('1'));
        let globals = &last.stack[0].bindings;
        assert_eq!(globals["x"], ValueRef::Scalar(Scalar::Int(1)));
        assert_eq!(globals["y"], ValueRef::Scalar(Scalar::Int(1)));
        assert_eq!(outcome.final_output(), "1");
    }

    #[test]
    fn semicolons_count_as_separate_steps() {
        let outcome = run("x = 1; y = x; print(y)");
        assert_eq!(outcome.steps.len(), 3);
        assert!(outcome.steps.iter().all(|s| s.line_number == 1));
    }

    #[test]
    fn function_frames_hold_locals_only() {
        let outcome = run("def f(a):\n    b = a + 1\n    return b\nf(2)\n");
        assert!(outcome.fault.is_none());
        let inner = outcome
            .steps
            .iter()
            .find(|s| s.stack.len() == 2)
            .expect("a step inside f");
        assert_eq!(inner.stack[0].function_name, "<module>");
        assert_eq!(inner.stack[1].function_name, "f");
        assert!(inner.stack[1].bindings.contains_key("a"));
        assert!(!inner.stack[1].bindings.contains_key("f"));
    }

    #[test]
    fn runtime_fault_appends_error_step() {
        let outcome = run("print('a')\nx = 1 / 0\n");
        match &outcome.fault {
            Some(TraceFault::Runtime(fault)) => {
                assert_eq!(fault.kind, "ZeroDivisionError");
                assert_eq!(fault.line, 2);
            }
            other => panic!("unexpected fault {:?}", other),
        }
        assert_eq!(outcome.steps.len(), 2);
        let last = outcome.steps.last().unwrap();
        assert_eq!(last.line_number, 2);
        assert!(last.error.as_deref().unwrap().starts_with("ZeroDivisionError"));
        assert_eq!(last.output_so_far, "a");
    }

    #[test]
    fn step_budget_interrupts_infinite_loop() {
        let limits = TraceLimits {
            max_steps: 50,
            ..TraceLimits::default()
        };
        let outcome = run_with("while True:\n    pass\n", limits);
        assert_eq!(outcome.fault, Some(TraceFault::Interrupted(Interrupt::StepBudget(50))));
        assert_eq!(outcome.steps.len(), 50);
    }

    #[test]
    fn trace_size_budget_keeps_a_partial_trace() {
        let limits = TraceLimits {
            max_bytes: 16 * 1024,
            ..TraceLimits::default()
        };
        let outcome = run_with("xs = list(range(200))
while True:
    pass
", limits);
        assert_eq!(
            outcome.fault,
            Some(TraceFault::Interrupted(Interrupt::TraceBudget(16 * 1024)))
        );
        assert!(!outcome.steps.is_empty());
        let recorded: usize = outcome.steps.iter().map(step_cost).sum();
        assert!(recorded <= 16 * 1024, "{} bytes recorded", recorded);
    }

    #[test]
    fn large_collections_cost_more_than_scalars() {
        let outcome = run("xs = list(range(1000))
y = 1
");
        let costs: Vec<usize> = outcome.steps.iter().map(step_cost).collect();
        assert!(costs[0] > 1000 * 32);
        assert!(costs[1] >= costs[0]);
    }

    #[test]
    fn deadline_interrupts_infinite_loop() {
        let limits = TraceLimits {
            timeout: Duration::from_millis(50),
            max_steps: usize::MAX,
            max_bytes: usize::MAX,
            ..TraceLimits::default()
        };
        let outcome = run_with("n = 0\nwhile True:\n    n += 1\n", limits);
        assert!(matches!(
            outcome.fault,
            Some(TraceFault::Interrupted(Interrupt::Deadline(_)))
        ));
    }

    #[test]
    fn syntax_error_yields_no_steps() {
        let outcome = run("x = (1,\n");
        assert!(matches!(outcome.fault, Some(TraceFault::Syntax(_))));
        assert!(outcome.steps.is_empty());
        assert_eq!(outcome.final_output(), "");
    }

    #[test]
    fn output_is_prefix_monotonic() {
        let outcome = run("for i in range(3):\n    print(i)\n");
        let outputs: Vec<&str> = outcome.steps.iter().map(|s| s.output_so_far.as_str()).collect();
        for pair in outputs.windows(2) {
            assert!(pair[1].starts_with(pair[0]), "{:?}", pair);
        }
        assert_eq!(outcome.final_output(), "0\n1\n2");
    }

    #[test]
    fn cyclic_instance_refers_to_itself() {
        let source = "class Node:\n    pass\na = Node()\na.next = a\n";
        let outcome = run(source);
        assert!(outcome.fault.is_none());
        let last = outcome.steps.last().unwrap();
        let id = last.stack[0].bindings["a"].heap_id().unwrap().clone();
        let node = last.heap.get(&id).unwrap();
        assert_eq!(node.type_tag, "Node");
        assert!(node.outgoing_refs.contains(&id));
        let instances = last.heap.objects.values().filter(|o| o.type_tag == "Node").count();
        assert_eq!(instances, 1);
    }
}
