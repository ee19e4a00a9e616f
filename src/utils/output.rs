/// Bounded stdout/stderr collection for child processes.
///
/// Each stream is drained by its own thread so a chatty program can never
/// block on a full pipe. Bytes beyond the per-stream limit are read and
/// discarded, which keeps the child from stalling while bounding memory.
use crate::config::settings::OutputLimitsConfig;
use crate::config::types::OutputIntegrity;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::Read;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OutputLimits {
    pub stdout_limit: usize,
    pub stderr_limit: usize,
    /// Grace period for the readers after the process has exited
    pub drain_timeout: Duration,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self::from(&OutputLimitsConfig::default())
    }
}

impl From<&OutputLimitsConfig> for OutputLimits {
    fn from(config: &OutputLimitsConfig) -> Self {
        Self {
            stdout_limit: config.stdout_bytes,
            stderr_limit: config.stderr_bytes,
            drain_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapturedStream {
    pub bytes: Vec<u8>,
    pub integrity: OutputIntegrity,
}

impl CapturedStream {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

impl CapturedOutput {
    pub fn integrity(&self) -> OutputIntegrity {
        match (self.stdout.integrity, self.stderr.integrity) {
            (OutputIntegrity::ReadError, _) | (_, OutputIntegrity::ReadError) => {
                OutputIntegrity::ReadError
            }
            (OutputIntegrity::TruncatedByLimit, _) | (_, OutputIntegrity::TruncatedByLimit) => {
                OutputIntegrity::TruncatedByLimit
            }
            _ => OutputIntegrity::Complete,
        }
    }
}

/// Reader threads attached to a running child.
pub struct OutputCollector {
    stdout: Option<Receiver<CapturedStream>>,
    stderr: Option<Receiver<CapturedStream>>,
    drain_timeout: Duration,
}

impl OutputCollector {
    pub fn start<O, E>(stdout: Option<O>, stderr: Option<E>, limits: &OutputLimits) -> Self
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        Self {
            stdout: stdout.map(|s| spawn_reader(s, limits.stdout_limit)),
            stderr: stderr.map(|s| spawn_reader(s, limits.stderr_limit)),
            drain_timeout: limits.drain_timeout,
        }
    }

    /// Wait for both readers to reach EOF. A reader that does not finish within
    /// the drain timeout (a descendant still holds the pipe) is reported as
    /// empty, truncated output.
    pub fn finish(self) -> CapturedOutput {
        let drain_timeout = self.drain_timeout;
        let wait = |rx: Option<Receiver<CapturedStream>>| match rx {
            None => CapturedStream::default(),
            Some(rx) => match rx.recv_timeout(drain_timeout) {
                Ok(stream) => stream,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("Output reader did not finish within {:?}", drain_timeout);
                    CapturedStream {
                        bytes: Vec::new(),
                        integrity: OutputIntegrity::TruncatedByLimit,
                    }
                }
                Err(RecvTimeoutError::Disconnected) => CapturedStream {
                    bytes: Vec::new(),
                    integrity: OutputIntegrity::ReadError,
                },
            },
        };

        CapturedOutput {
            stdout: wait(self.stdout),
            stderr: wait(self.stderr),
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, limit: usize) -> Receiver<CapturedStream> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let _ = tx.send(read_bounded(stream, limit));
    });
    rx
}

fn read_bounded<R: Read>(mut stream: R, limit: usize) -> CapturedStream {
    let mut bytes = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut integrity = OutputIntegrity::Complete;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(bytes.len());
                if n > room {
                    bytes.extend_from_slice(&chunk[..room]);
                    integrity = OutputIntegrity::TruncatedByLimit;
                } else {
                    bytes.extend_from_slice(&chunk[..n]);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => {
                integrity = OutputIntegrity::ReadError;
                break;
            }
        }
    }

    CapturedStream { bytes, integrity }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn limits(stdout_limit: usize, stderr_limit: usize) -> OutputLimits {
        OutputLimits {
            stdout_limit,
            stderr_limit,
            drain_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn collects_complete_streams() {
        let collector = OutputCollector::start(
            Some(Cursor::new(b"hello\n".to_vec())),
            Some(Cursor::new(b"warn".to_vec())),
            &limits(64, 64),
        );
        let out = collector.finish();
        assert_eq!(out.stdout.text(), "hello\n");
        assert_eq!(out.stderr.text(), "warn");
        assert_eq!(out.integrity(), OutputIntegrity::Complete);
    }

    #[test]
    fn truncates_at_limit_but_keeps_draining() {
        let big = vec![b'x'; 10_000];
        let collector = OutputCollector::start(
            Some(Cursor::new(big)),
            None::<Cursor<Vec<u8>>>,
            &limits(100, 10),
        );
        let out = collector.finish();
        assert_eq!(out.stdout.bytes.len(), 100);
        assert_eq!(out.stdout.integrity, OutputIntegrity::TruncatedByLimit);
        assert!(out.stderr.bytes.is_empty());
        assert_eq!(out.integrity(), OutputIntegrity::TruncatedByLimit);
    }

    #[test]
    fn absent_streams_are_empty_and_complete() {
        let out = OutputCollector::start(
            None::<Cursor<Vec<u8>>>,
            None::<Cursor<Vec<u8>>>,
            &OutputLimits::default(),
        )
        .finish();
        assert!(out.stdout.bytes.is_empty());
        assert_eq!(out.integrity(), OutputIntegrity::Complete);
    }

    #[test]
    fn integrity_display() {
        assert_eq!(OutputIntegrity::Complete.to_string(), "complete");
        assert_eq!(OutputIntegrity::TruncatedByLimit.to_string(), "truncated_by_limit");
        assert_eq!(OutputIntegrity::ReadError.to_string(), "read_error");
    }
}
