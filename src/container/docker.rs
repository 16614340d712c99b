//! Docker CLI runtime.

use std::process::Command;
use std::time::Duration;

use super::command::{run_checked, run_with_timeout};
use super::launch::LaunchSpec;
use super::{ContainerRuntime, RuntimeError};

/// Timeout for quick queries (`version`, `images`, `inspect`).
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for `docker run -d`, which may pull layers.
const RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time granted to `docker stop` beyond the container's grace period.
const STOP_SLACK: Duration = Duration::from_secs(10);

/// Runtime that shells out to the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd
    }
}

/// Whether `docker info` runtime output names a GPU runtime.
///
/// Accepts the JSON map printed by `--format '{{json .Runtimes}}'` and falls
/// back to a substring search for other output.
pub fn runtimes_include_nvidia(output: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(output.trim()) {
        Ok(serde_json::Value::Object(map)) => map.keys().any(|k| k.to_lowercase().contains("nvidia")),
        _ => output.to_lowercase().contains("nvidia"),
    }
}

impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    fn is_available(&self) -> bool {
        let cmd = self.command(["version", "--format", "{{.Server.Version}}"]);
        match run_with_timeout(cmd, QUERY_TIMEOUT, "docker") {
            Ok(output) => output.success(),
            Err(e) => {
                log::debug!("docker not available: {}", e);
                false
            }
        }
    }

    fn reports_acceleration(&self) -> Result<bool, RuntimeError> {
        let cmd = self.command(["info", "--format", "{{json .Runtimes}}"]);
        let output = run_checked(cmd, QUERY_TIMEOUT, "docker")?;
        Ok(runtimes_include_nvidia(&output.stdout))
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let cmd = self.command(["images", "-q", image]);
        let output = run_checked(cmd, QUERY_TIMEOUT, "docker")?;
        Ok(!output.stdout.trim().is_empty())
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<String, RuntimeError> {
        let args = spec.docker_args();
        log::debug!("docker {}", args.join(" "));
        let output = run_checked(self.command(&args), RUN_TIMEOUT, "docker")?;
        let id = output.stdout.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Failed {
                command: "docker run".to_string(),
                stderr: "no container id printed".to_string(),
            });
        }
        Ok(id)
    }

    fn is_running(&self, id: &str) -> bool {
        let cmd = self.command(["inspect", "-f", "{{.State.Running}}", id]);
        run_with_timeout(cmd, QUERY_TIMEOUT, "docker")
            .map(|o| o.success() && o.stdout.trim() == "true")
            .unwrap_or(false)
    }

    fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let secs = grace.as_secs().max(1).to_string();
        let cmd = self.command(["stop", "-t", secs.as_str(), id]);
        let stopped = match run_checked(cmd, grace + STOP_SLACK, "docker") {
            Ok(_) => Ok(()),
            Err(e) => {
                log::warn!("docker stop {} failed ({}), killing", short_id(id), e);
                let cmd = self.command(["kill", id]);
                run_checked(cmd, QUERY_TIMEOUT, "docker").map(|_| ())
            }
        };
        if let Err(e) = &stopped {
            log::debug!("docker kill {}: {}", short_id(id), e);
        }

        // containers run without --rm so startup logs survive an early exit
        let cmd = self.command(["rm", "-f", id]);
        run_checked(cmd, QUERY_TIMEOUT, "docker").map(|_| ())
    }

    fn logs(&self, id: &str, tail: usize) -> String {
        let tail = tail.to_string();
        let cmd = self.command(["logs", "--tail", tail.as_str(), id]);
        match run_with_timeout(cmd, QUERY_TIMEOUT, "docker") {
            Ok(output) => format!("{}{}", output.stdout, output.stderr).trim().to_string(),
            Err(e) => format!("(logs unavailable: {})", e),
        }
    }
}

/// First 12 characters, the form `docker ps` shows.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
