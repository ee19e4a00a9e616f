//! End-to-end behaviour of the traced target through the public dispatcher.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tutorbox::{
    Dispatcher, EngineConfig, ErrorKind, ExecutionRequest, ExecutionResult, HeapId, HeapValue,
    Scalar, Target, TraceStep, ValueRef,
};

fn traced(source: &str) -> ExecutionResult {
    let dispatcher = Dispatcher::new(EngineConfig::default()).unwrap();
    dispatcher.execute(&ExecutionRequest::new(source, Target::Traced))
}

/// Every id mentioned by a step must exist in that step's heap.
fn assert_no_dangling_refs(step: &TraceStep) {
    let known: BTreeSet<&HeapId> = step.heap.objects.keys().collect();
    for frame in &step.stack {
        for (name, value) in &frame.bindings {
            if let Some(id) = value.heap_id() {
                assert!(known.contains(id), "binding {} points at missing {}", name, id);
            }
        }
    }
    for (id, object) in &step.heap.objects {
        for child in &object.outgoing_refs {
            assert!(known.contains(child), "{} points at missing {}", id, child);
        }
    }
}

#[test]
fn assignment_chain_has_three_steps_with_inline_scalars() {
    let result = traced("x = 1; y = x; print(y)");
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.trace.len(), 3);

    let last = result.trace.last().unwrap();
    assert!(last.output_so_far.ends_with('1'));
    let globals = &last.stack[0].bindings;
    assert_eq!(globals["x"], ValueRef::Scalar(Scalar::Int(1)));
    assert_eq!(globals["y"], ValueRef::Scalar(Scalar::Int(1)));
    assert!(last.heap.is_empty());
    assert_eq!(result.final_output, "1");
}

#[test]
fn aliased_bindings_share_a_heap_id() {
    let result = traced("xs = [1, 2]\nys = xs\nys.append(3)\n");
    assert!(result.success, "{:?}", result.error);

    let last = result.trace.last().unwrap();
    let globals = &last.stack[0].bindings;
    let xs = globals["xs"].heap_id().unwrap();
    let ys = globals["ys"].heap_id().unwrap();
    assert_eq!(xs, ys);
    assert_eq!(last.heap.len(), 1);

    match &last.heap.get(xs).unwrap().value {
        HeapValue::Sequence(items) => assert_eq!(items.len(), 3),
        other => panic!("expected a sequence, got {:?}", other),
    }
}

#[test]
fn nested_structures_have_no_dangling_refs() {
    let source = "\
grid = [[0, 1], [2, 3]]
lookup = {'row': grid[0], 'pair': (grid[1], 'x')}
tags = {1, 2}
";
    let result = traced(source);
    assert!(result.success, "{:?}", result.error);
    for step in &result.trace {
        assert_no_dangling_refs(step);
    }

    let last = result.trace.last().unwrap();
    let grid = last.stack[0].bindings["grid"].heap_id().unwrap();
    let grid_object = last.heap.get(grid).unwrap();
    assert_eq!(grid_object.type_tag, "list");
    assert_eq!(grid_object.outgoing_refs.len(), 2);
}

#[test]
fn self_referential_node_is_one_object() {
    let result = traced("class Node:\n    pass\na = Node()\na.next = a\n");
    assert!(result.success, "{:?}", result.error);

    let last = result.trace.last().unwrap();
    let id = last.stack[0].bindings["a"].heap_id().unwrap();
    let node = last.heap.get(id).unwrap();
    assert!(node.outgoing_refs.contains(id));
    let nodes = last
        .heap
        .objects
        .values()
        .filter(|o| o.type_tag == "Node")
        .count();
    assert_eq!(nodes, 1);
}

#[test]
fn self_containing_list_terminates() {
    let result = traced("xs = []\nxs.append(xs)\nprint(len(xs))\n");
    assert!(result.success, "{:?}", result.error);
    let last = result.trace.last().unwrap();
    let id = last.stack[0].bindings["xs"].heap_id().unwrap();
    assert_eq!(last.heap.len(), 1);
    assert!(last.heap.get(id).unwrap().outgoing_refs.contains(id));
    assert_eq!(result.final_output, "1");
}

#[test]
fn recursion_shows_one_frame_per_call() {
    let source = "\
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)
print(fact(4))
";
    let result = traced(source);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_output, "24");

    let deepest = result.trace.iter().map(|s| s.stack.len()).max().unwrap();
    assert_eq!(deepest, 5);
    let step = result.trace.iter().find(|s| s.stack.len() == 5).unwrap();
    assert_eq!(step.stack[0].function_name, "<module>");
    assert!(step.stack[1..].iter().all(|f| f.function_name == "fact"));
    assert_eq!(step.stack[4].bindings["n"], ValueRef::Scalar(Scalar::Int(1)));
}

#[test]
fn builtin_methods_behave_like_the_source_language() {
    let source = "\
words = 'b,a,c'.split(',')
words.sort()
print('-'.join(words))
counts = {}
counts['k'] = counts.get('k', 0) + 1
print(counts)
print('{} {}'.format('x', 2).upper())
";
    let result = traced(source);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_output, "a-b-c\n{'k': 1}\nX 2");
}

#[test]
fn runtime_fault_keeps_partial_trace_and_output() {
    let result = traced("print('before')\nitems = [1]\nprint(items[5])\n");
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert!(result.error.as_ref().unwrap().message.starts_with("IndexError"));
    assert_eq!(result.final_output, "before");

    let last = result.trace.last().unwrap();
    assert_eq!(last.line_number, 3);
    assert!(last.error.is_some());
    assert!(last.stack[0].bindings.contains_key("items"));
}

#[test]
fn syntax_error_is_compile_error_without_trace() {
    let result = traced("def broken(:\n    pass\n");
    assert_eq!(result.error_kind(), Some(ErrorKind::CompileError));
    assert!(result.trace.is_empty());
    assert_eq!(result.final_output, "");
}

fn traced_with(config: EngineConfig, source: &str) -> (ExecutionResult, Duration) {
    let dispatcher = Dispatcher::new(config).unwrap();
    let started = Instant::now();
    let result = dispatcher.execute(&ExecutionRequest::new(source, Target::Traced));
    (result, started.elapsed())
}

#[test]
fn exhausted_step_budget_is_a_runtime_fault_with_partial_trace() {
    let config = EngineConfig {
        max_trace_steps: 200,
        ..EngineConfig::default()
    };
    let (result, _) = traced_with(config, "n = 0\nwhile True:\n    n = n + 1\n");
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert_eq!(
        result.error.unwrap().message,
        "trace step budget exhausted after 200 steps"
    );
    assert_eq!(result.trace.len(), 200);
}

#[test]
fn non_terminating_loop_hits_the_wall_clock_deadline() {
    let config = EngineConfig {
        timeout_secs: 1,
        max_trace_steps: usize::MAX,
        max_trace_bytes: usize::MAX,
        ..EngineConfig::default()
    };
    let (result, elapsed) = traced_with(config, "while True:\n    pass\n");
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    assert!(!result.trace.is_empty());
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
}

#[test]
fn ordinary_loops_fit_the_default_step_budget() {
    let result = traced("total = 0\nfor i in range(600):\n    total += i\nprint(total)\n");
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_output, "179700");
}

#[test]
fn large_sets_and_dicts_build_within_the_deadline() {
    let config = EngineConfig {
        timeout_secs: 1,
        ..EngineConfig::default()
    };
    let source = "\
s = set(range(100000))
d = {i: i for i in range(100000)}
print(len(s), len(d), 99999 in s, d[5])
";
    let (result, elapsed) = traced_with(config, source);
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    match result.error_kind() {
        None => assert_eq!(result.final_output, "100000 100000 True 5"),
        Some(kind) => assert_eq!(kind, ErrorKind::Timeout),
    }
}

#[test]
fn trace_size_budget_bounds_memory_of_long_runs() {
    let source = "x = list(range(20000))\nfor i in range(1000):\n    pass\n";
    let result = traced(source);
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert!(result
        .error
        .as_ref()
        .unwrap()
        .message
        .starts_with("trace size budget"));
    assert!(!result.trace.is_empty());
    assert!(result.trace.len() < 200, "{} steps kept", result.trace.len());

    let bytes = serde_json::to_vec(&result).unwrap().len();
    assert!(bytes < 64 * 1024 * 1024, "{} bytes serialized", bytes);
}

#[test]
fn augmented_assignment_makes_a_name_local() {
    let result = traced("x = 5\ndef g():\n    x += 1\ng()\nprint(x)\n");
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert!(result
        .error
        .unwrap()
        .message
        .starts_with("UnboundLocalError"));

    let result = traced("x = 5\ndef g():\n    global x\n    x += 1\ng()\nprint(x)\n");
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_output, "6");

    let result = traced("x = 5\ndef g():\n    try:\n        x += 1\n    except NameError:\n        print('caught')\ng()\n");
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_output, "caught");
}

#[test]
fn unknown_names_and_imports_are_runtime_faults() {
    let result = traced("print(secret)\n");
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert!(result.error.unwrap().message.starts_with("NameError"));

    let result = traced("import math\n");
    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert!(result.error.unwrap().message.starts_with("ImportError"));
}

#[test]
fn denylisted_source_never_reaches_the_evaluator() {
    let result = traced("x = 1\nf = open('/etc/passwd')\n");
    assert_eq!(result.error_kind(), Some(ErrorKind::DisallowedConstruct));
    assert!(result.error.unwrap().message.contains("open("));
    assert!(result.trace.is_empty());
}

#[test]
fn result_serializes_to_the_wire_shape() {
    let result = traced("xs = [1]\nprint(xs)\n");
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["finalOutput"], "[1]");
    assert!(json["error"].is_null());

    let step = &json["trace"][1];
    assert_eq!(step["line"], 2);
    assert_eq!(step["output"], "[1]");
    assert_eq!(step["stack"][0]["function"], "<module>");
    let id = step["stack"][0]["bindings"]["xs"]["ref"].as_str().unwrap();
    assert_eq!(step["heap"]["objects"][id]["type"], "list");
}
