use crate::config::settings::EngineConfig;
use crate::config::types::{ErrorKind, ExecutionRequest, ExecutionResult, Target, WireRequest};
use crate::core::dispatcher::Dispatcher;
use crate::observability::metrics;
use crate::safety::workspace::WorkspaceManager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (JSON); defaults to ./tutorbox.json when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one program and print the result as JSON
    Execute {
        /// Target name or alias (traced, compiled, hosted, python, c, js, ...)
        #[arg(long)]
        target: String,
        /// Source code as string
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,
        /// Read the source from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Caller identity recorded in audit events
        #[arg(long)]
        caller: Option<String>,
        /// Per-phase wall-clock limit in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Pretty-print the JSON result
        #[arg(long)]
        pretty: bool,
    },
    /// Read one JSON request per line from stdin and answer with one JSON result per line
    ServeStdin {
        /// Write the metrics of the session to stderr in Prometheus text format at EOF
        #[arg(long)]
        metrics: bool,
    },
    /// List supported targets
    Languages,
    /// Check that the external toolchains are installed
    CheckDeps {
        /// Show toolchain version lines
        #[arg(long)]
        verbose: bool,
    },
    /// Remove workspaces left behind by crashed processes
    Sweep {
        /// Minimum age of a workspace before it is removed
        #[arg(long, default_value_t = 3600)]
        max_age_secs: u64,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::load_default()?,
    };
    Ok(config)
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Execute {
            target,
            code,
            file,
            caller,
            timeout,
            pretty,
        } => {
            if let Some(secs) = timeout {
                config.timeout_secs = secs;
            }
            let target: Target = target.parse()?;
            let source = match (code, file) {
                (Some(code), _) => code,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("either --code or --file is required"),
            };

            let dispatcher = Dispatcher::new(config)?;
            let mut request = ExecutionRequest::new(source, target);
            request.caller = caller;
            let result = dispatcher.execute(&request);

            let json = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{}", json);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::ServeStdin {
            metrics: report_metrics,
        } => {
            let dispatcher = Dispatcher::new(config)?;
            serve_lines(&dispatcher, std::io::stdin().lock(), std::io::stdout().lock())?;
            if report_metrics {
                eprint!("{}", metrics::get_metrics().export_prometheus());
            }
        }
        Commands::Languages => {
            let dispatcher = Dispatcher::new(config)?;
            for info in dispatcher.supported_targets() {
                println!("{:<10} {}", info.target, info.description);
                println!("{:<10} aliases: {}", "", info.aliases.join(", "));
            }
        }
        Commands::CheckDeps { verbose } => {
            let dispatcher = Dispatcher::new(config)?;
            check_dependencies(&dispatcher, verbose);
        }
        Commands::Sweep { max_age_secs } => {
            let manager = WorkspaceManager::new(config.workspace_root.clone());
            let removed = manager.sweep_stale(Duration::from_secs(max_age_secs))?;
            println!(
                "Removed {} stale workspace(s) under {}",
                removed,
                manager.root().display()
            );
        }
    }

    Ok(())
}

/// Answer JSON-lines requests until EOF. A malformed line is answered with an
/// `InternalError` result and does not stop the loop.
pub fn serve_lines<R: BufRead, W: Write>(
    dispatcher: &Dispatcher,
    input: R,
    mut output: W,
) -> Result<()> {
    for line in input.lines() {
        let line = line.context("failed to read request line")?;
        if line.trim().is_empty() {
            continue;
        }
        let result = match serde_json::from_str::<WireRequest>(&line) {
            Ok(wire) => dispatcher.execute_wire(&wire),
            Err(e) => {
                log::warn!("Malformed request line: {}", e);
                metrics::get_metrics().record_failure_before_dispatch(ErrorKind::InternalError);
                ExecutionResult::failed(ErrorKind::InternalError, format!("malformed request: {}", e))
            }
        };
        writeln!(output, "{}", serde_json::to_string(&result)?)?;
        output.flush()?;
    }
    Ok(())
}

fn check_dependencies(dispatcher: &Dispatcher, verbose: bool) {
    println!("Checking toolchains...");
    println!();

    let mut missing = Vec::new();
    for availability in dispatcher.check_dependencies() {
        if availability.available {
            println!("OK       {}", availability.target);
        } else {
            println!("MISSING  {}", availability.target);
            missing.push(availability.target);
        }
        if verbose || !availability.available {
            println!("         {}", availability.detail);
        }
    }

    println!();
    if missing.is_empty() {
        println!("All targets are ready");
        return;
    }

    let names: Vec<String> = missing.iter().map(|t| t.to_string()).collect();
    println!("Missing toolchains for: {}", names.join(", "));
    for target in &missing {
        match target {
            Target::Compiled => println!("  compiled: sudo apt install gcc"),
            Target::Hosted => println!("  hosted: sudo apt install nodejs"),
            Target::Traced => {}
        }
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_lines_answers_each_request() {
        let dispatcher = Dispatcher::new(EngineConfig::default()).unwrap();
        let input = concat!(
            r#"{"source": "print(1 + 1)", "target": "traced"}"#,
            "\n\n",
            "not json\n",
            r#"{"source": "x", "target": "fortran"}"#,
            "\n"
        );
        let mut out = Vec::new();
        serve_lines(&dispatcher, input.as_bytes(), &mut out).unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["success"], true);
        assert_eq!(lines[0]["finalOutput"], "2");
        assert_eq!(lines[1]["success"], false);
        assert_eq!(lines[1]["error"]["kind"], "InternalError");
        assert_eq!(lines[2]["error"]["kind"], "UnsupportedTarget");
    }

    #[test]
    fn malformed_lines_get_the_regular_result_shape() {
        let dispatcher = Dispatcher::new(EngineConfig::default()).unwrap();
        let input = "not json\n{\"source\": 1}\n";
        let mut out = Vec::new();
        serve_lines(&dispatcher, input.as_bytes(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let results: Vec<ExecutionResult> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(results.len(), 2);
        for result in results {
            assert!(!result.success);
            assert!(result.trace.is_empty());
            assert_eq!(result.final_output, "");
            let error = result.error.unwrap();
            assert_eq!(error.kind, ErrorKind::InternalError);
            assert!(error.message.starts_with("malformed request"));
        }
    }

    #[test]
    fn metrics_are_reported_by_the_serving_session() {
        assert!(Cli::try_parse_from(["tutorbox", "metrics"]).is_err());
        let cli = Cli::try_parse_from(["tutorbox", "serve-stdin", "--metrics"]).unwrap();
        assert!(matches!(cli.command, Commands::ServeStdin { metrics: true }));
    }

    #[test]
    fn execute_requires_code_or_file() {
        assert!(Cli::try_parse_from(["tutorbox", "execute", "--target", "traced"]).is_err());
        assert!(Cli::try_parse_from([
            "tutorbox", "execute", "--target", "traced", "--code", "x=1"
        ])
        .is_ok());
    }
}
