// Execution metrics
//
// Counters per target and per outcome, workspace hygiene counters and
// latency histograms, exported in the Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::{ErrorKind, Target};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Level that moves both ways and never drops below zero.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Upper bounds of the latency buckets, in seconds.
pub const LATENCY_BOUNDS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Cumulative latency histogram over [`LATENCY_BOUNDS`].
#[derive(Debug, Default)]
pub struct Histogram {
    cumulative: [AtomicU64; LATENCY_BOUNDS.len()],
    sum_micros: AtomicU64,
    observations: AtomicU64,
}

impl Histogram {
    pub fn new_latency() -> Self {
        Self::default()
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum_micros
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.observations.fetch_add(1, Ordering::Relaxed);
        LATENCY_BOUNDS
            .iter()
            .zip(&self.cumulative)
            .filter(|(le, _)| seconds <= **le)
            .for_each(|(_, slot)| {
                slot.fetch_add(1, Ordering::Relaxed);
            });
    }

    pub fn get_count(&self) -> u64 {
        self.observations.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum_micros.load(Ordering::Relaxed)
    }

    /// Observations at or below `le`, which must be one of [`LATENCY_BOUNDS`].
    pub fn at_or_below(&self, le: f64) -> u64 {
        LATENCY_BOUNDS
            .iter()
            .position(|b| (b - le).abs() < f64::EPSILON)
            .map(|i| self.cumulative[i].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, out: &mut String, name: &str, help: &str) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for (le, slot) in LATENCY_BOUNDS.iter().zip(&self.cumulative) {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                name,
                le,
                slot.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, self.get_count());
        let _ = writeln!(
            out,
            "{}_sum {}",
            name,
            self.get_sum_micros() as f64 / 1_000_000.0
        );
        let _ = writeln!(out, "{}_count {}", name, self.get_count());
    }
}

fn target_index(target: Target) -> usize {
    match target {
        Target::Traced => 0,
        Target::Compiled => 1,
        Target::Hosted => 2,
    }
}

fn kind_index(kind: ErrorKind) -> usize {
    ErrorKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(ErrorKind::ALL.len() - 1)
}

/// Process-wide metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    pub executions_total: Counter,
    pub executions_ok: Counter,
    executions_by_target: [Counter; 3],
    failures_by_kind: [Counter; 8],

    pub denylist_rejections: Counter,
    pub trace_steps_total: Counter,

    pub cleanup_success: Counter,
    pub cleanup_failure: Counter,
    pub workspaces_swept: Counter,

    pub active_executions: Gauge,

    pub execution_duration: Histogram,
    pub compile_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            executions_total: Counter::new(),
            executions_ok: Counter::new(),
            executions_by_target: Default::default(),
            failures_by_kind: Default::default(),
            denylist_rejections: Counter::new(),
            trace_steps_total: Counter::new(),
            cleanup_success: Counter::new(),
            cleanup_failure: Counter::new(),
            workspaces_swept: Counter::new(),
            active_executions: Gauge::new(),
            execution_duration: Histogram::new_latency(),
            compile_duration: Histogram::new_latency(),
        }
    }

    /// Record one finished request
    pub fn record_execution(&self, target: Target, error: Option<ErrorKind>, elapsed: Duration) {
        self.executions_total.inc();
        self.executions_by_target[target_index(target)].inc();
        match error {
            None => self.executions_ok.inc(),
            Some(kind) => self.failures_by_kind[kind_index(kind)].inc(),
        }
        self.execution_duration.observe(elapsed);
    }

    /// Record a request rejected before any backend was chosen
    pub fn record_failure_before_dispatch(&self, kind: ErrorKind) {
        self.executions_total.inc();
        self.failures_by_kind[kind_index(kind)].inc();
    }

    pub fn record_cleanup(&self, success: bool) {
        if success {
            self.cleanup_success.inc();
        } else {
            self.cleanup_failure.inc();
        }
    }

    pub fn executions_for(&self, target: Target) -> u64 {
        self.executions_by_target[target_index(target)].get()
    }

    pub fn failures_of(&self, kind: ErrorKind) -> u64 {
        self.failures_by_kind[kind_index(kind)].get()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP tutorbox_executions_total Total number of executions");
        let _ = writeln!(out, "# TYPE tutorbox_executions_total counter");
        let _ = writeln!(out, "tutorbox_executions_total {}", self.executions_total.get());

        let _ = writeln!(out, "# HELP tutorbox_executions_by_target Executions by target");
        let _ = writeln!(out, "# TYPE tutorbox_executions_by_target counter");
        for target in Target::ALL {
            let _ = writeln!(
                out,
                "tutorbox_executions_by_target{{target=\"{}\"}} {}",
                target,
                self.executions_for(target)
            );
        }

        let _ = writeln!(out, "# HELP tutorbox_executions_by_outcome Executions by outcome");
        let _ = writeln!(out, "# TYPE tutorbox_executions_by_outcome counter");
        let _ = writeln!(
            out,
            "tutorbox_executions_by_outcome{{outcome=\"Success\"}} {}",
            self.executions_ok.get()
        );
        for kind in ErrorKind::ALL {
            let _ = writeln!(
                out,
                "tutorbox_executions_by_outcome{{outcome=\"{}\"}} {}",
                kind,
                self.failures_of(kind)
            );
        }

        let _ = writeln!(out, "# HELP tutorbox_denylist_rejections_total Sources rejected by the denylist");
        let _ = writeln!(out, "# TYPE tutorbox_denylist_rejections_total counter");
        let _ = writeln!(
            out,
            "tutorbox_denylist_rejections_total {}",
            self.denylist_rejections.get()
        );

        let _ = writeln!(out, "# HELP tutorbox_trace_steps_total Trace steps recorded");
        let _ = writeln!(out, "# TYPE tutorbox_trace_steps_total counter");
        let _ = writeln!(out, "tutorbox_trace_steps_total {}", self.trace_steps_total.get());

        let _ = writeln!(out, "# HELP tutorbox_cleanup_total Workspace cleanup outcomes");
        let _ = writeln!(out, "# TYPE tutorbox_cleanup_total counter");
        let _ = writeln!(
            out,
            "tutorbox_cleanup_total{{outcome=\"success\"}} {}",
            self.cleanup_success.get()
        );
        let _ = writeln!(
            out,
            "tutorbox_cleanup_total{{outcome=\"failure\"}} {}",
            self.cleanup_failure.get()
        );
        let _ = writeln!(
            out,
            "tutorbox_cleanup_total{{outcome=\"swept\"}} {}",
            self.workspaces_swept.get()
        );

        let _ = writeln!(out, "# HELP tutorbox_active_executions Currently active executions");
        let _ = writeln!(out, "# TYPE tutorbox_active_executions gauge");
        let _ = writeln!(out, "tutorbox_active_executions {}", self.active_executions.get());

        self.execution_duration.export(
            &mut out,
            "tutorbox_execution_duration_seconds",
            "End to end request latency",
        );
        self.compile_duration.export(
            &mut out,
            "tutorbox_compile_duration_seconds",
            "Compile phase latency",
        );
        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Process-wide registry shared by every dispatcher.
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_gauge_never_underflows() {
        let metrics = MetricsRegistry::new();
        metrics.active_executions.inc();
        metrics.active_executions.dec();
        metrics.active_executions.dec();
        assert_eq!(metrics.active_executions.get(), 0);
    }

    #[test]
    fn latency_buckets_are_cumulative() {
        let metrics = MetricsRegistry::new();
        for ms in [2, 40, 300] {
            metrics.compile_duration.observe(Duration::from_millis(ms));
        }
        let histogram = &metrics.compile_duration;
        assert_eq!(histogram.get_count(), 3);
        assert_eq!(histogram.get_sum_micros(), 342_000);
        assert_eq!(histogram.at_or_below(0.001), 0);
        assert_eq!(histogram.at_or_below(0.005), 1);
        assert_eq!(histogram.at_or_below(0.05), 2);
        assert_eq!(histogram.at_or_below(0.5), 3);
        assert_eq!(histogram.at_or_below(0.3), 0);
    }

    #[test]
    fn executions_are_split_by_target_and_kind() {
        let metrics = MetricsRegistry::new();
        metrics.record_execution(Target::Traced, None, Duration::from_millis(3));
        metrics.record_execution(Target::Traced, Some(ErrorKind::Timeout), Duration::from_secs(1));
        metrics.record_execution(
            Target::Compiled,
            Some(ErrorKind::CompileError),
            Duration::from_millis(200),
        );
        metrics.record_failure_before_dispatch(ErrorKind::UnsupportedTarget);

        assert_eq!(metrics.executions_total.get(), 4);
        assert_eq!(metrics.executions_ok.get(), 1);
        assert_eq!(metrics.executions_for(Target::Traced), 2);
        assert_eq!(metrics.executions_for(Target::Hosted), 0);
        assert_eq!(metrics.failures_of(ErrorKind::Timeout), 1);
        assert_eq!(metrics.failures_of(ErrorKind::UnsupportedTarget), 1);
        assert_eq!(metrics.execution_duration.get_count(), 3);
    }

    #[test]
    fn prometheus_text_names_every_series() {
        let metrics = MetricsRegistry::new();
        metrics.record_execution(Target::Hosted, None, Duration::from_millis(10));
        metrics.record_execution(
            Target::Hosted,
            Some(ErrorKind::RuntimeFault),
            Duration::from_millis(10),
        );
        metrics.record_cleanup(true);
        metrics.denylist_rejections.inc();

        let text = metrics.export_prometheus();
        assert!(text.contains("tutorbox_executions_total 2"));
        assert!(text.contains("tutorbox_executions_by_target{target=\"hosted\"} 2"));
        assert!(text.contains("tutorbox_executions_by_outcome{outcome=\"RuntimeFault\"} 1"));
        assert!(text.contains("tutorbox_cleanup_total{outcome=\"success\"} 1"));
        assert!(text.contains("tutorbox_denylist_rejections_total 1"));
        assert!(text.contains("tutorbox_execution_duration_seconds_bucket{le=\"0.01\"} 2"));
        assert!(text.contains("tutorbox_execution_duration_seconds_count 2"));
    }

    #[test]
    fn registry_is_process_wide() {
        let first = get_metrics();
        let second = get_metrics();
        assert!(Arc::ptr_eq(&first, &second));

        let before = second.workspaces_swept.get();
        first.workspaces_swept.add(2);
        assert!(second.workspaces_swept.get() >= before + 2);
    }
}
