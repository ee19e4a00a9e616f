use crate::config::settings::EngineConfig;
use crate::config::types::{Result, Target};
use crate::exec::runner::ProcessRunner;
use crate::judge::backend::{Availability, Backend, BackendOutcome};
use crate::judge::toolchain::ToolchainStage;
use crate::utils::output::OutputLimits;

/// Scripts run directly by an external interpreter (node by default).
#[derive(Debug, Clone)]
pub struct HostedBackend {
    stage: ToolchainStage,
}

impl HostedBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            stage: ToolchainStage {
                toolchain: config.hosted.clone(),
                workspace_root: config.workspace_root.clone(),
                runner: ProcessRunner::new(OutputLimits::from(&config.output_limits)),
                timeout: config.timeout(),
            },
        }
    }
}

impl Backend for HostedBackend {
    fn target(&self) -> Target {
        Target::Hosted
    }

    fn describe(&self) -> String {
        let interpreter = self
            .stage
            .toolchain
            .run_command
            .first()
            .map(String::as_str)
            .unwrap_or("none");
        format!("interpreted by {}", interpreter)
    }

    fn execute(&self, source: &str) -> Result<BackendOutcome> {
        self.stage.run(source)
    }

    fn availability(&self, runner: &ProcessRunner) -> Availability {
        self.stage.availability(Target::Hosted, runner)
    }
}
