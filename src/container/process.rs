//! Local-process runtime: runs `depthgate serve` directly on the host.
//!
//! Used when no container runtime is wanted (development, tests, hosts where
//! the sensor SDK is installed natively). Images are not used.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::command::{spawn_line_reader, LogTail};
use super::launch::LaunchSpec;
use super::{ContainerRuntime, RuntimeError};

/// Lines of output kept per child for diagnostics.
const LOG_TAIL_LINES: usize = 200;

struct ManagedChild {
    child: Child,
    log: LogTail,
    readers: Vec<JoinHandle<String>>,
}

impl ManagedChild {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the child to exit, then kill it once `grace` runs out.
    fn shutdown(&mut self, grace: Duration) -> Result<(), RuntimeError> {
        if self.is_running() {
            #[cfg(unix)]
            {
                // SAFETY: signalling our own child by pid
                unsafe {
                    libc::kill(self.child.id() as i32, libc::SIGTERM);
                }
            }

            #[cfg(not(unix))]
            {
                let _ = self.child.kill();
            }

            let start = Instant::now();
            loop {
                match self.child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) => {
                        if start.elapsed() > grace {
                            log::warn!("Environment pid {} ignored SIGTERM, killing", self.child.id());
                            let _ = self.child.kill();
                            let _ = self.child.wait();
                            break;
                        }
                        thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => {
                        return Err(RuntimeError::Spawn {
                            program: "environment".to_string(),
                            source: e,
                        })
                    }
                }
            }
        }

        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
        Ok(())
    }
}

/// Runtime that launches the server binary as a child process.
pub struct ProcessRuntime {
    program: PathBuf,
    children: Mutex<HashMap<String, ManagedChild>>,
}

impl std::fmt::Debug for ProcessRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRuntime")
            .field("program", &self.program)
            .field("live", &self.live_count())
            .finish()
    }
}

impl ProcessRuntime {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Runtime that re-launches the currently running executable.
    pub fn from_current_exe() -> Result<Self, RuntimeError> {
        let exe = std::env::current_exe().map_err(|e| RuntimeError::Spawn {
            program: "current executable".to_string(),
            source: e,
        })?;
        Ok(Self::new(exe))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Number of children still running.
    pub fn live_count(&self) -> usize {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        children
            .values_mut()
            .map(|c| c.is_running())
            .filter(|running| *running)
            .count()
    }
}

impl ContainerRuntime for ProcessRuntime {
    fn name(&self) -> &str {
        "process"
    }

    fn is_available(&self) -> bool {
        self.program.is_file()
    }

    fn reports_acceleration(&self) -> Result<bool, RuntimeError> {
        Ok(false)
    }

    fn image_exists(&self, _image: &str) -> Result<bool, RuntimeError> {
        Ok(true)
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        let program = self.program.display().to_string();
        let mut cmd = Command::new(&self.program);
        cmd.args(spec.server_args("127.0.0.1"))
            .envs(spec.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(workdir) = &spec.workdir {
            cmd.current_dir(workdir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::NotFound(program.clone())
            } else {
                RuntimeError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        let id = format!("pid-{}", child.id());
        let log = LogTail::new(LOG_TAIL_LINES);
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, id.clone(), log.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, id.clone(), log.clone()));
        }

        log::debug!("Launched {} {}", program, spec.server_args("127.0.0.1").join(" "));
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), ManagedChild { child, log, readers });
        Ok(id)
    }

    fn is_running(&self, id: &str) -> bool {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        children.get_mut(id).is_some_and(|c| c.is_running())
    }

    fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let child = self
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match child {
            Some(mut child) => child.shutdown(grace),
            None => Err(RuntimeError::UnknownEnvironment(id.to_string())),
        }
    }

    fn logs(&self, id: &str, tail: usize) -> String {
        let children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        children
            .get(id)
            .map(|c| c.log.tail(tail))
            .unwrap_or_default()
    }
}

impl Drop for ProcessRuntime {
    fn drop(&mut self) {
        let children = self.children.get_mut().unwrap_or_else(|e| e.into_inner());
        for (id, mut child) in children.drain() {
            log::debug!("Reaping leftover environment {}", id);
            let _ = child.shutdown(Duration::from_secs(2));
        }
    }
}
