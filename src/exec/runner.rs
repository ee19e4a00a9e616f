/// Subprocess execution with a hard wall-clock limit.
///
/// Children run in their own process group with a scrubbed environment and
/// closed stdin. On timeout the whole group is killed, so anything the
/// program forked dies with it.
use crate::config::types::{Result, TutorError};
use crate::utils::output::{CapturedOutput, OutputCollector, OutputLimits};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// PATH handed to every child; nothing else is inherited from the host.
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// One subprocess invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Build from an argv vector; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TutorError::Config("empty command template".to_string()))?;
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// What happened to one subprocess.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub stdout: String,
    pub stderr: String,
    /// Exit code of a normal exit
    pub exit_code: Option<i32>,
    /// Terminating signal, when the child was signalled
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub wall_time: Duration,
    pub output: CapturedOutput,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Human readable termination status for error messages.
    pub fn status_text(&self) -> String {
        match (self.exit_code, self.signal) {
            _ if self.timed_out => format!("killed after {:?}", self.wall_time),
            (Some(code), _) => format!("exited with status {}", code),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(signal) => format!("terminated by {}", signal),
                Err(_) => format!("terminated by signal {}", sig),
            },
            (None, None) => "terminated".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    limits: OutputLimits,
}

impl ProcessRunner {
    pub fn new(limits: OutputLimits) -> Self {
        Self { limits }
    }

    /// Run `spec` to completion or until `timeout` elapses.
    ///
    /// A program that cannot be found maps to `ToolchainUnavailable`. Non-zero
    /// exit is not an error here; callers classify the outcome.
    pub fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<ProcessOutcome> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .env_clear()
            .env("PATH", DEFAULT_PATH)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TutorError::ToolchainUnavailable(spec.program.clone()),
            std::io::ErrorKind::PermissionDenied => TutorError::ToolchainUnavailable(format!(
                "{} (permission denied)",
                spec.program
            )),
            _ => TutorError::Process(format!("Failed to start {}: {}", spec.program, e)),
        })?;

        let pgid = Pid::from_raw(child.id() as i32);
        log::debug!("Started {} as process group {}", spec.program, pgid);

        let collector =
            OutputCollector::start(child.stdout.take(), child.stderr.take(), &self.limits);

        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() >= timeout {
                        log::warn!(
                            "{} exceeded wall limit {:?}, killing process group {}",
                            spec.program,
                            timeout,
                            pgid
                        );
                        kill_group(pgid);
                        timed_out = true;
                        break child.wait()?;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    kill_group(pgid);
                    let _ = child.wait();
                    return Err(TutorError::Process(format!(
                        "Failed to wait for {}: {}",
                        spec.program, e
                    )));
                }
            }
        };
        let wall_time = start.elapsed();

        // Background descendants may still hold the pipes open.
        kill_group(pgid);
        let output = collector.finish();

        Ok(ProcessOutcome {
            stdout: output.stdout.text(),
            stderr: output.stderr.text(),
            exit_code: status.code(),
            signal: status.signal(),
            timed_out,
            wall_time,
            output,
        })
    }

    /// Whether `argv[0]` can be started at all, with the first line it prints.
    pub fn probe(&self, argv: &[String]) -> std::result::Result<String, String> {
        let spec = CommandSpec::from_argv(argv).map_err(|e| e.to_string())?;
        match self.run(&spec, Duration::from_secs(5)) {
            Ok(outcome) if outcome.success() => {
                let text = if outcome.stdout.trim().is_empty() {
                    &outcome.stderr
                } else {
                    &outcome.stdout
                };
                Ok(text.lines().next().unwrap_or("").trim().to_string())
            }
            Ok(outcome) => Err(outcome.status_text()),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn kill_group(pgid: Pid) {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => log::warn!("killpg({}) failed: {}", pgid, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh").arg("-c").arg(script)
    }

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let runner = ProcessRunner::default();
        let outcome = runner
            .run(&sh("echo out; echo err >&2; exit 3"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.timed_out);
        assert!(!outcome.success());
        assert_eq!(outcome.status_text(), "exited with status 3");
    }

    #[test]
    fn environment_is_scrubbed() {
        std::env::set_var("TUTORBOX_LEAK_CHECK", "leaked");
        let runner = ProcessRunner::default();
        let outcome = runner
            .run(
                &sh("echo \"${TUTORBOX_LEAK_CHECK:-clean} $PATH\"").env("EXTRA", "1"),
                Duration::from_secs(5),
            )
            .unwrap();
        assert_eq!(outcome.stdout.trim(), format!("clean {}", DEFAULT_PATH));
    }

    #[test]
    fn timeout_kills_the_process_group() {
        let runner = ProcessRunner::default();
        let start = Instant::now();
        let outcome = runner
            .run(&sh("sleep 30 & sleep 30; echo never"), Duration::from_millis(200))
            .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success());
        assert!(outcome.stdout.is_empty());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_toolchain_unavailable() {
        let runner = ProcessRunner::default();
        let err = runner
            .run(
                &CommandSpec::new("tutorbox-definitely-not-installed"),
                Duration::from_secs(1),
            )
            .unwrap_err();
        assert!(matches!(err, TutorError::ToolchainUnavailable(_)));
    }

    #[test]
    fn runs_in_requested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::default();
        let outcome = runner
            .run(&sh("pwd").current_dir(dir.path()), Duration::from_secs(5))
            .unwrap();
        let reported = std::fs::canonicalize(outcome.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn probe_reports_missing_and_present_programs() {
        let runner = ProcessRunner::default();
        assert!(runner
            .probe(&["tutorbox-definitely-not-installed".to_string()])
            .is_err());
        let first_line = runner
            .probe(&["/bin/sh".to_string(), "-c".to_string(), "echo v1.2; echo more".to_string()])
            .unwrap();
        assert_eq!(first_line, "v1.2");
    }

    #[test]
    fn from_argv_rejects_empty_templates() {
        assert!(CommandSpec::from_argv(&[]).is_err());
        let spec = CommandSpec::from_argv(&["gcc".to_string(), "-v".to_string()]).unwrap();
        assert_eq!(spec.program, "gcc");
        assert_eq!(spec.args, vec!["-v"]);
    }
}
