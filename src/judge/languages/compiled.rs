use crate::config::settings::EngineConfig;
use crate::config::types::{Result, Target};
use crate::exec::runner::ProcessRunner;
use crate::judge::backend::{Availability, Backend, BackendOutcome};
use crate::judge::toolchain::ToolchainStage;
use crate::utils::output::OutputLimits;

/// Ahead-of-time compiled programs (gcc by default).
#[derive(Debug, Clone)]
pub struct CompiledBackend {
    stage: ToolchainStage,
}

impl CompiledBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            stage: ToolchainStage {
                toolchain: config.compiled.clone(),
                workspace_root: config.workspace_root.clone(),
                runner: ProcessRunner::new(OutputLimits::from(&config.output_limits)),
                timeout: config.timeout(),
            },
        }
    }
}

impl Backend for CompiledBackend {
    fn target(&self) -> Target {
        Target::Compiled
    }

    fn describe(&self) -> String {
        let compiler = self
            .stage
            .toolchain
            .compile_command
            .first()
            .map(String::as_str)
            .unwrap_or("none");
        format!("compiled with {}, run as a subprocess", compiler)
    }

    fn execute(&self, source: &str) -> Result<BackendOutcome> {
        self.stage.run(source)
    }

    fn availability(&self, runner: &ProcessRunner) -> Availability {
        self.stage.availability(Target::Compiled, runner)
    }
}
