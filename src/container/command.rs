//! Running external commands with a deadline.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::RuntimeError;

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Bounded buffer of the most recent output lines.
#[derive(Debug, Clone, Default)]
pub struct LogTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The last `n` lines joined with newlines.
    pub fn tail(&self, n: usize) -> String {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Spawn a thread that forwards each line of `stream` to the debug log and
/// into `tail`.
pub fn spawn_line_reader<R: Read + Send + 'static>(
    stream: R,
    label: String,
    tail: LogTail,
) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut collected = String::new();
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(l) => {
                    log::debug!("[{}] {}", label, l);
                    collected.push_str(&l);
                    collected.push('\n');
                    tail.push(l);
                }
                Err(_) => break,
            }
        }
        collected
    })
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run `cmd` to completion, killing it if it outlives `timeout`.
///
/// Output lines are logged at debug level under `label` as they arrive.
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<CommandOutput, RuntimeError> {
    let description = describe(&cmd);
    let program = cmd.get_program().to_string_lossy().into_owned();

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::NotFound(program.clone())
            } else {
                RuntimeError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

    let stdout_thread = child
        .stdout
        .take()
        .map(|s| spawn_line_reader(s, label.to_string(), LogTail::new(64)));
    let stderr_thread = child
        .stderr
        .take()
        .map(|s| spawn_line_reader(s, label.to_string(), LogTail::new(64)));

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RuntimeError::TimedOut {
                        command: description,
                        timeout,
                    });
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return Err(RuntimeError::Spawn {
                    program,
                    source: e,
                })
            }
        }
    };

    let stdout = stdout_thread
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_thread
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

/// Like [`run_with_timeout`] but a non-zero exit becomes [`RuntimeError::Failed`].
pub fn run_checked(
    cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<CommandOutput, RuntimeError> {
    let description = describe(&cmd);
    let output = run_with_timeout(cmd, timeout, label)?;
    if !output.success() {
        return Err(RuntimeError::Failed {
            command: description,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}
