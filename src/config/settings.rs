/// Engine configuration loaded from a JSON file, with defaults for every field
use crate::config::types::{Result, TutorError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tutorbox.json";

/// Placeholder replaced by the absolute source file path in toolchain commands.
pub const SOURCE_PLACEHOLDER: &str = "{source}";
/// Placeholder replaced by the reserved artifact path in toolchain commands.
pub const BINARY_PLACEHOLDER: &str = "{binary}";

/// Source tokens rejected before any execution, matched case-insensitively.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "import os",
    "import sys",
    "import subprocess",
    "import shutil",
    "open(",
    "file(",
    "exec(",
    "eval(",
    "__import__",
    "system(",
    "popen(",
    "fork(",
    "spawn(",
    "delete",
    "remove",
    "unlink",
    "rmdir",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum accepted source size in bytes
    pub max_source_bytes: usize,
    /// Wall-clock limit applied to each phase (trace run, compile, run)
    pub timeout_secs: u64,
    /// Trace steps recorded before the run is interrupted
    pub max_trace_steps: usize,
    /// Estimated bytes the recorded trace may occupy before the run is interrupted
    pub max_trace_bytes: usize,
    /// Nested user function calls allowed in the evaluator
    pub max_call_depth: usize,
    /// Objects the evaluator may allocate in one run
    pub max_heap_objects: usize,
    /// Elements a single collection may hold
    pub max_collection_len: usize,
    /// Bytes of printed output kept by the evaluator
    pub max_output_bytes: usize,
    /// Native stack size of the evaluator thread
    pub evaluator_stack_bytes: usize,
    /// Parent directory of per-request workspaces
    pub workspace_root: PathBuf,
    pub denylist: Vec<String>,
    pub output_limits: OutputLimitsConfig,
    pub compiled: ToolchainConfig,
    pub hosted: ToolchainConfig,
}

/// External toolchain description. Commands are argv templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Extension given to the written source file
    pub source_extension: String,
    /// Compile step; empty when the toolchain runs sources directly
    #[serde(default)]
    pub compile_command: Vec<String>,
    pub run_command: Vec<String>,
    /// Program run by `check-deps` together with its version flag
    #[serde(default)]
    pub probe: Vec<String>,
}

impl ToolchainConfig {
    pub fn gcc() -> Self {
        Self {
            source_extension: "c".to_string(),
            compile_command: vec![
                "gcc".to_string(),
                SOURCE_PLACEHOLDER.to_string(),
                "-o".to_string(),
                BINARY_PLACEHOLDER.to_string(),
            ],
            run_command: vec![BINARY_PLACEHOLDER.to_string()],
            probe: vec!["gcc".to_string(), "--version".to_string()],
        }
    }

    pub fn node() -> Self {
        Self {
            source_extension: "js".to_string(),
            compile_command: Vec::new(),
            run_command: vec!["node".to_string(), SOURCE_PLACEHOLDER.to_string()],
            probe: vec!["node".to_string(), "--version".to_string()],
        }
    }

    pub fn needs_compile(&self) -> bool {
        !self.compile_command.is_empty()
    }

    /// Substitute placeholders in an argv template.
    pub fn render(template: &[String], source: &Path, binary: &Path) -> Vec<String> {
        let source = source.to_string_lossy();
        let binary = binary.to_string_lossy();
        template
            .iter()
            .map(|arg| {
                arg.replace(SOURCE_PLACEHOLDER, &source)
                    .replace(BINARY_PLACEHOLDER, &binary)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputLimitsConfig {
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
}

impl Default for OutputLimitsConfig {
    fn default() -> Self {
        Self {
            stdout_bytes: 1024 * 1024,
            stderr_bytes: 256 * 1024,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: 10_000,
            timeout_secs: 10,
            max_trace_steps: 10_000,
            max_trace_bytes: 64 * 1024 * 1024,
            max_call_depth: 200,
            max_heap_objects: 100_000,
            max_collection_len: 100_000,
            max_output_bytes: 64 * 1024,
            evaluator_stack_bytes: 64 * 1024 * 1024,
            workspace_root: Self::runtime_root_dir(),
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            output_limits: OutputLimitsConfig::default(),
            compiled: ToolchainConfig::gcc(),
            hosted: ToolchainConfig::node(),
        }
    }
}

impl EngineConfig {
    /// Workspace root scoped by effective UID so different users never share it.
    pub fn runtime_root_dir() -> PathBuf {
        let euid = unsafe { libc::geteuid() };
        std::env::temp_dir().join(format!("tutorbox-uid-{}", euid))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TutorError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| TutorError::Config(format!("Failed to parse config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `tutorbox.json` from the working directory, or defaults when absent.
    pub fn load_default() -> Result<Self> {
        let path = std::env::current_dir()
            .map_err(|e| TutorError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        if !path.exists() {
            log::debug!("{} not found, using built-in defaults", path.display());
            return Ok(Self::default());
        }

        log::info!("Loading configuration from {}", path.display());
        Self::load_from_file(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_source_bytes == 0 {
            return Err(TutorError::Config("max_source_bytes must be positive".into()));
        }
        if self.timeout_secs == 0 {
            return Err(TutorError::Config("timeout_secs must be positive".into()));
        }
        if self.max_trace_steps == 0 || self.max_trace_bytes == 0 || self.max_call_depth == 0 {
            return Err(TutorError::Config(
                "max_trace_steps, max_trace_bytes and max_call_depth must be positive".into(),
            ));
        }
        for (name, toolchain) in [("compiled", &self.compiled), ("hosted", &self.hosted)] {
            if toolchain.run_command.is_empty() {
                return Err(TutorError::Config(format!(
                    "{} toolchain has an empty run_command",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.max_source_bytes, 10_000);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.max_trace_steps, 10_000);
        assert_eq!(config.max_trace_bytes, 64 * 1024 * 1024);
        assert!(config.denylist.iter().any(|d| d == "open("));
        assert!(config.compiled.needs_compile());
        assert!(!config.hosted.needs_compile());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tutorbox.json");
        std::fs::write(&path, r#"{"timeout_secs": 3, "max_trace_steps": 50}"#).unwrap();

        let config = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.max_trace_steps, 50);
        assert_eq!(config.max_source_bytes, 10_000);
        assert_eq!(config.hosted, ToolchainConfig::node());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tutorbox.json");
        std::fs::write(&path, r#"{"timeout_secs": 0}"#).unwrap();
        assert!(EngineConfig::load_from_file(&path).is_err());

        std::fs::write(&path, r#"{"max_trace_bytes": 0}"#).unwrap();
        assert!(EngineConfig::load_from_file(&path).is_err());

        std::fs::write(&path, "not json").unwrap();
        assert!(EngineConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn render_substitutes_placeholders() {
        let argv = ToolchainConfig::render(
            &ToolchainConfig::gcc().compile_command,
            Path::new("/w/source.c"),
            Path::new("/w/program"),
        );
        assert_eq!(argv, vec!["gcc", "/w/source.c", "-o", "/w/program"]);
    }
}
