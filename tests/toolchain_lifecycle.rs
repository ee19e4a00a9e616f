//! Compiled and hosted lifecycles, driven by `/bin/sh` stand-in toolchains so
//! they run on any Unix host. Real gcc/node runs are skipped when missing.

use std::path::Path;
use tutorbox::config::settings::ToolchainConfig;
use tutorbox::exec::runner::ProcessRunner;
use tutorbox::{Dispatcher, EngineConfig, ErrorKind, ExecutionRequest, Target};

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// "Compiles" by copying the script into place and marking it executable.
fn copying_compiler() -> ToolchainConfig {
    ToolchainConfig {
        source_extension: "c".to_string(),
        compile_command: argv(&["/bin/sh", "-c", "cp {source} {binary} && chmod +x {binary}"]),
        run_command: argv(&["{binary}"]),
        probe: argv(&["/bin/sh", "-c", "echo stand-in 1.0"]),
    }
}

fn failing_compiler() -> ToolchainConfig {
    ToolchainConfig {
        compile_command: argv(&[
            "/bin/sh",
            "-c",
            "echo 'source.c:1:1: error: expected declaration' >&2; exit 1",
        ]),
        ..copying_compiler()
    }
}

fn shell_host() -> ToolchainConfig {
    ToolchainConfig {
        source_extension: "js".to_string(),
        compile_command: Vec::new(),
        run_command: argv(&["/bin/sh", "{source}"]),
        probe: Vec::new(),
    }
}

fn config_in(root: &Path) -> EngineConfig {
    EngineConfig {
        workspace_root: root.to_path_buf(),
        compiled: copying_compiler(),
        hosted: shell_host(),
        ..EngineConfig::default()
    }
}

fn leftover_entries(root: &Path) -> usize {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[test]
fn compiled_program_runs_after_successful_compile() {
    let root = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(config_in(root.path())).unwrap();
    let result = dispatcher.execute(&ExecutionRequest::new(
        "#!/bin/sh\necho hello from the artifact\n",
        Target::Compiled,
    ));

    assert!(result.success, "{:?}", result.error);
    assert!(result.trace.is_empty());
    assert_eq!(result.final_output, "hello from the artifact\n");
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn compile_fault_is_compile_error_with_nothing_else() {
    let root = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        compiled: failing_compiler(),
        ..config_in(root.path())
    };
    let dispatcher = Dispatcher::new(config).unwrap();
    let result = dispatcher.execute(&ExecutionRequest::new(
        "#!/bin/sh\necho never printed\n",
        Target::Compiled,
    ));

    assert_eq!(result.error_kind(), Some(ErrorKind::CompileError));
    assert_eq!(
        result.error.unwrap().message,
        "source.c:1:1: error: expected declaration"
    );
    assert!(result.trace.is_empty());
    assert_eq!(result.final_output, "");
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn hosted_nonzero_exit_is_runtime_fault_with_stdout() {
    let root = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(config_in(root.path())).unwrap();
    let result = dispatcher.execute(&ExecutionRequest::new(
        "echo partial\necho 'TypeError: x is not a function' >&2\nexit 3\n",
        Target::Hosted,
    ));

    assert_eq!(result.error_kind(), Some(ErrorKind::RuntimeFault));
    assert_eq!(result.error.unwrap().message, "TypeError: x is not a function");
    assert_eq!(result.final_output, "partial\n");
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn non_terminating_program_times_out_and_leaves_no_files() {
    let root = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        timeout_secs: 1,
        ..config_in(root.path())
    };
    let dispatcher = Dispatcher::new(config).unwrap();
    let result = dispatcher.execute(&ExecutionRequest::new(
        "echo started\nwhile true; do sleep 1; done\n",
        Target::Hosted,
    ));

    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(result.final_output, "started\n");
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn missing_toolchain_is_reported_as_unavailable() {
    let root = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        hosted: ToolchainConfig {
            run_command: argv(&["/nonexistent/tutorbox-node", "{source}"]),
            ..shell_host()
        },
        ..config_in(root.path())
    };
    let dispatcher = Dispatcher::new(config).unwrap();
    let result = dispatcher.execute(&ExecutionRequest::new("echo hi\n", Target::Hosted));

    assert_eq!(result.error_kind(), Some(ErrorKind::ToolchainUnavailable));
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn denylist_applies_to_every_target() {
    let root = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(config_in(root.path())).unwrap();
    let result = dispatcher.execute(&ExecutionRequest::new(
        "int main() { system(\"ls\"); }\n",
        Target::Compiled,
    ));

    assert_eq!(result.error_kind(), Some(ErrorKind::DisallowedConstruct));
    // Rejected before a workspace was created.
    assert!(!root.path().exists() || leftover_entries(root.path()) == 0);
}

#[test]
fn dependency_check_reports_each_target() {
    let root = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(config_in(root.path())).unwrap();
    let report = dispatcher.check_dependencies();

    assert_eq!(report.len(), 3);
    let compiled = report.iter().find(|a| a.target == Target::Compiled).unwrap();
    assert!(compiled.available);
    assert_eq!(compiled.detail, "stand-in 1.0");
    let traced = report.iter().find(|a| a.target == Target::Traced).unwrap();
    assert!(traced.available);
}

fn tool_available(program: &str) -> bool {
    ProcessRunner::default()
        .probe(&argv(&[program, "--version"]))
        .is_ok()
}

#[test]
fn real_gcc_compiles_and_runs() {
    if !tool_available("gcc") {
        eprintln!("skipping: gcc not available");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        workspace_root: root.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let dispatcher = Dispatcher::new(config).unwrap();

    let ok = dispatcher.execute(&ExecutionRequest::new(
        "#include <stdio.h>\nint main(void) { printf(\"%d\\n\", 6 * 7); return 0; }\n",
        Target::Compiled,
    ));
    assert!(ok.success, "{:?}", ok.error);
    assert_eq!(ok.final_output, "42\n");

    let broken = dispatcher.execute(&ExecutionRequest::new("int main( {", Target::Compiled));
    assert_eq!(broken.error_kind(), Some(ErrorKind::CompileError));
    assert_eq!(broken.final_output, "");
    assert_eq!(leftover_entries(root.path()), 0);
}

#[test]
fn real_node_runs_scripts() {
    if !tool_available("node") {
        eprintln!("skipping: node not available");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        workspace_root: root.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let dispatcher = Dispatcher::new(config).unwrap();

    let result = dispatcher.execute(&ExecutionRequest::new(
        "console.log([1, 2, 3].map(x => x * 2).join(','));\n",
        Target::Hosted,
    ));
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_output, "2,4,6\n");
    assert_eq!(leftover_entries(root.path()), 0);
}
