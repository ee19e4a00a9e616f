/// Workspace-backed execution through an external toolchain.
use crate::config::settings::ToolchainConfig;
use crate::config::types::{Result, Target};
use crate::exec::runner::{CommandSpec, ProcessRunner};
use crate::judge::backend::{Availability, BackendOutcome};
use crate::observability::metrics;
use crate::safety::workspace::TempWorkspace;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Name of the build artifact inside a workspace.
const ARTIFACT_NAME: &str = "program";

/// Everything needed to run one source file through a toolchain.
#[derive(Debug, Clone)]
pub struct ToolchainStage {
    pub toolchain: ToolchainConfig,
    pub workspace_root: PathBuf,
    pub runner: ProcessRunner,
    /// Applied to the compile and run phases separately
    pub timeout: Duration,
}

impl ToolchainStage {
    /// Write `source` to a fresh workspace, compile it when the toolchain
    /// has a compile step, then run it. The workspace is removed on every
    /// path out of this function.
    pub fn run(&self, source: &str) -> Result<BackendOutcome> {
        let mut workspace = TempWorkspace::acquire(
            &self.workspace_root,
            source,
            &self.toolchain.source_extension,
        )?;
        let result = self.run_in(&mut workspace);
        if let Err(e) = workspace.release() {
            log::warn!("Workspace {} left behind: {}", workspace.run_id(), e);
        }
        result
    }

    fn run_in(&self, workspace: &mut TempWorkspace) -> Result<BackendOutcome> {
        let run_dir = fs::canonicalize(workspace.run_dir())?;
        let source = run_dir.join(
            workspace
                .source_file()
                .file_name()
                .unwrap_or_default(),
        );
        let binary = run_dir.join(ARTIFACT_NAME);

        if self.toolchain.needs_compile() {
            workspace.reserve_binary(ARTIFACT_NAME);
            let argv = ToolchainConfig::render(&self.toolchain.compile_command, &source, &binary);
            let spec = CommandSpec::from_argv(&argv)?.current_dir(&run_dir);
            let started = Instant::now();
            let outcome = self.runner.run(&spec, self.timeout)?;
            metrics::get_metrics()
                .compile_duration
                .observe(started.elapsed());
            if !outcome.success() || !binary.exists() {
                log::debug!("Compile step failed: {}", outcome.status_text());
                return Ok(BackendOutcome::CompileFailed(outcome));
            }
        }

        let argv = ToolchainConfig::render(&self.toolchain.run_command, &source, &binary);
        let spec = CommandSpec::from_argv(&argv)?.current_dir(&run_dir);
        let outcome = self.runner.run(&spec, self.timeout)?;
        log::debug!("Program {}", outcome.status_text());
        Ok(BackendOutcome::Ran(outcome))
    }

    /// Run the toolchain's version check.
    pub fn availability(&self, target: Target, runner: &ProcessRunner) -> Availability {
        let argv = if self.toolchain.probe.is_empty() {
            let first = if self.toolchain.needs_compile() {
                &self.toolchain.compile_command
            } else {
                &self.toolchain.run_command
            };
            first
                .first()
                .map(|program| vec![program.clone(), "--version".to_string()])
                .unwrap_or_default()
        } else {
            self.toolchain.probe.clone()
        };
        match runner.probe(&argv) {
            Ok(version) => Availability {
                target,
                available: true,
                detail: version,
            },
            Err(reason) => Availability {
                target,
                available: false,
                detail: reason,
            },
        }
    }
}
