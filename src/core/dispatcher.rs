use crate::config::settings::EngineConfig;
use crate::config::types::{
    ErrorKind, ExecutionRequest, ExecutionResult, Result, Target, TutorError, WireRequest,
};
use crate::exec::runner::ProcessRunner;
use crate::judge::backend::{Availability, Backend};
use crate::judge::registry::BackendRegistry;
use crate::observability::audit::{self, CorrelationIds};
use crate::observability::metrics;
use crate::runtime::security::{denylist, scan_source};
use crate::verdict::aggregator::ResultAggregator;
use serde::Serialize;
use std::time::Instant;

/// Catalogue entry for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetInfo {
    pub target: Target,
    pub aliases: Vec<&'static str>,
    pub description: String,
}

/// Entry point for every execution request.
///
/// Holds no per-request state, so one dispatcher can serve many threads.
pub struct Dispatcher {
    config: EngineConfig,
    registry: BackendRegistry,
    denylist: Vec<String>,
}

impl Dispatcher {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let registry = BackendRegistry::from_config(&config);
        let denylist = denylist::normalize(&config.denylist);
        log::debug!(
            "Dispatcher ready: {} targets, {} denylist tokens",
            registry.targets().len(),
            denylist.len()
        );
        Ok(Self {
            config,
            registry,
            denylist,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn supported_targets(&self) -> Vec<TargetInfo> {
        self.registry
            .iter()
            .map(|backend| TargetInfo {
                target: backend.target(),
                aliases: backend.target().aliases().to_vec(),
                description: backend.describe(),
            })
            .collect()
    }

    /// Check every backend's toolchain.
    pub fn check_dependencies(&self) -> Vec<Availability> {
        let runner = ProcessRunner::default();
        self.registry
            .iter()
            .map(|backend| backend.availability(&runner))
            .collect()
    }

    /// Run a request whose target is still a string.
    pub fn execute_wire(&self, wire: &WireRequest) -> ExecutionResult {
        match wire.target.parse::<Target>() {
            Ok(target) => {
                let mut request = ExecutionRequest::new(wire.source.clone(), target);
                request.caller = wire.caller.clone();
                self.execute(&request)
            }
            Err(e) => {
                log::info!("Rejected request for unknown target '{}'", wire.target);
                metrics::get_metrics()
                    .record_failure_before_dispatch(ErrorKind::UnsupportedTarget);
                ExecutionResult::from(e)
            }
        }
    }

    pub fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let correlation = CorrelationIds::new(&request.source, request.caller.as_deref());
        audit::execution_start(&correlation, request.target, request.source.len());

        let metrics = metrics::get_metrics();
        metrics.active_executions.inc();
        let result = match self.run(request, &correlation) {
            Ok(result) => result,
            Err(e) => {
                if e.kind() == ErrorKind::InternalError {
                    log::error!("Request {} failed on the host: {}", correlation.request_id, e);
                } else {
                    log::debug!("Request {} rejected: {}", correlation.request_id, e);
                }
                ExecutionResult::from(e)
            }
        };
        metrics.active_executions.dec();

        let error_kind = result.error_kind();
        if error_kind == Some(ErrorKind::Timeout) {
            let details = result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            audit::timeout_kill(&correlation, request.target, details);
        }
        let elapsed = started.elapsed();
        audit::execution_end(
            &correlation,
            request.target,
            error_kind,
            elapsed.as_millis() as u64,
        );
        metrics.record_execution(request.target, error_kind, elapsed);
        result
    }

    fn run(&self, request: &ExecutionRequest, correlation: &CorrelationIds) -> Result<ExecutionResult> {
        let size = request.source.len();
        if size > self.config.max_source_bytes {
            return Err(TutorError::InputTooLarge {
                size,
                limit: self.config.max_source_bytes,
            });
        }

        if let Err(hit) = scan_source(&request.source, &self.denylist) {
            audit::denylist_rejection(correlation, request.target, &hit.token);
            metrics::get_metrics().denylist_rejections.inc();
            return Err(hit.into());
        }

        let backend: &dyn Backend = self
            .registry
            .get(request.target)
            .ok_or_else(|| TutorError::UnsupportedTarget(request.target.to_string()))?;
        log::debug!(
            "Request {} routed to {} backend",
            correlation.request_id,
            backend.target()
        );
        let outcome = backend.execute(&request.source)?;
        Ok(ResultAggregator::aggregate(outcome, self.config.timeout()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(EngineConfig::default()).unwrap()
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn dispatcher_is_shareable() {
        assert_send_sync::<Dispatcher>();
    }

    #[test]
    fn oversized_source_is_rejected_first() {
        let source = "x = 1\n".repeat(2_000);
        let result = dispatcher().execute(&ExecutionRequest::new(source, Target::Traced));
        assert_eq!(result.error_kind(), Some(ErrorKind::InputTooLarge));
        assert!(result.trace.is_empty());
    }

    #[test]
    fn denylisted_source_never_runs() {
        let result = dispatcher().execute(&ExecutionRequest::new(
            "print('hi')\nimport os\n",
            Target::Traced,
        ));
        assert_eq!(result.error_kind(), Some(ErrorKind::DisallowedConstruct));
        assert!(result.trace.is_empty());
        assert_eq!(result.final_output, "");
    }

    #[test]
    fn unknown_wire_target_is_unsupported() {
        let wire = WireRequest {
            source: "print(1)".to_string(),
            target: "cobol".to_string(),
            caller: None,
        };
        let result = dispatcher().execute_wire(&wire);
        assert_eq!(result.error_kind(), Some(ErrorKind::UnsupportedTarget));
    }

    #[test]
    fn wire_aliases_resolve() {
        let wire = WireRequest {
            source: "print(6 * 7)".to_string(),
            target: "Python".to_string(),
            caller: Some("student-1".to_string()),
        };
        let result = dispatcher().execute_wire(&wire);
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.final_output, "42");
    }

    #[test]
    fn catalogue_lists_every_target() {
        let targets: Vec<Target> = dispatcher()
            .supported_targets()
            .into_iter()
            .map(|info| info.target)
            .collect();
        assert_eq!(targets, Target::ALL.to_vec());
    }
}
