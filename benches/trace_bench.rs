// Traced-run latency benchmark
// Measures dispatcher latency for in-process traced programs, from request
// to normalized result, including heap snapshots at every step.

use std::time::{Duration, Instant};
use tutorbox::{Dispatcher, EngineConfig, ExecutionRequest, Target};

const ITERATIONS: usize = 200;
const WARMUP_ITERATIONS: usize = 20;

struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();
        let at = |q: f64| samples[((len as f64 * q) as usize).min(len - 1)];
        let sum: Duration = samples.iter().sum();

        Self {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            min: samples[0],
            max: samples[len - 1],
            mean: sum / len as u32,
        }
    }

    fn print(&self) {
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

struct Scenario {
    name: &'static str,
    source: &'static str,
    /// p95 budget
    budget: Duration,
}

fn run_scenario(dispatcher: &Dispatcher, scenario: &Scenario) -> bool {
    let request = ExecutionRequest::new(scenario.source, Target::Traced);

    for _ in 0..WARMUP_ITERATIONS {
        let _ = dispatcher.execute(&request);
    }

    let mut samples = Vec::with_capacity(ITERATIONS);
    let mut steps = 0;
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        let result = dispatcher.execute(&request);
        samples.push(start.elapsed());
        steps = result.trace.len();
    }

    let stats = LatencyStats::from_samples(samples);
    println!("\n=== {} ({} steps) ===", scenario.name, steps);
    stats.print();

    let passed = stats.p95 < scenario.budget;
    if passed {
        println!("PASS");
    } else {
        println!("FAIL: p95={:?} (budget {:?})", stats.p95, scenario.budget);
    }
    passed
}

fn main() {
    println!("=== tutorbox traced-run benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let dispatcher = match Dispatcher::new(EngineConfig::default()) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("failed to build dispatcher: {}", e);
            std::process::exit(1);
        }
    };

    let scenarios = [
        Scenario {
            name: "assignment chain",
            source: "x = 1\ny = x\nprint(y)\n",
            budget: Duration::from_millis(5),
        },
        Scenario {
            name: "loop over a growing list",
            source: "xs = []\nfor i in range(100):\n    xs.append(i * i)\nprint(sum(xs))\n",
            budget: Duration::from_millis(100),
        },
        Scenario {
            name: "linked nodes",
            source: "\
class Node:
    def __init__(self, value, next):
        self.value = value
        self.next = next
head = None
for i in range(30):
    head = Node(i, head)
print(head.value)
",
            budget: Duration::from_millis(100),
        },
    ];

    let passed = scenarios
        .iter()
        .filter(|s| run_scenario(&dispatcher, s))
        .count();

    println!("\n=== Summary ===");
    println!("{}/{} scenarios within budget", passed, scenarios.len());
    if passed != scenarios.len() {
        std::process::exit(1);
    }
}
