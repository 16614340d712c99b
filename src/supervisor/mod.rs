//! Environment supervision.
//!
//! The supervisor owns at most one running environment at a time. It picks a
//! port, exposes only the sensor's USB nodes, launches the image through a
//! [`ContainerRuntime`], and pings the RPC server until it answers. The
//! returned [`EnvironmentHandle`] stops the environment when dropped, so every
//! exit path tears it down.

mod backoff;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;

use crate::container::{
    allocate_port, find_devices, short_id, ContainerRuntime, LaunchSpec, RuntimeError, UsbFilter,
};
use crate::detect::RuntimeFlavor;
use crate::images::RuntimeImageRef;
use crate::rpc::{ClientError, RpcClient};

pub use backoff::{calculate_backoff, READY_BACKOFF_BASE, READY_BACKOFF_MAX};

/// Default readiness deadline.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time an environment gets to exit before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Per-ping timeout while waiting for readiness.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Log lines attached to startup failures.
const STARTUP_LOG_LINES: usize = 40;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no free port on {host}{}", .hint.map(|p| format!(" from {}", p)).unwrap_or_default())]
    PortUnavailable { host: String, hint: Option<u16> },

    #[error("failed to launch environment: {0}")]
    Launch(#[source] RuntimeError),

    #[error("environment on port {port} not ready after {}s", .timeout.as_secs())]
    StartupTimeout { port: u16, timeout: Duration },

    #[error("environment {id} exited during startup:\n{logs}")]
    ExitedDuringStartup { id: String, logs: String },

    #[error("an environment is already running ({0})")]
    AlreadyRunning(String),

    #[error("failed to create RPC client: {0}")]
    Client(#[from] ClientError),
}

/// Launch settings that do not change between starts.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Host the gateway reaches the environment on
    pub host: String,
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    pub display: Option<String>,
    pub workdir: Option<PathBuf>,
    /// Skip USB discovery (used by the process runtime)
    pub pass_devices: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            display: None,
            workdir: None,
            pass_devices: true,
        }
    }
}

/// A running environment. Dropping it stops the environment.
pub struct EnvironmentHandle {
    id: String,
    host: String,
    port: u16,
    flavor: RuntimeFlavor,
    image: String,
    started_at: SystemTime,
    runtime: Arc<dyn ContainerRuntime>,
    stop_grace: Duration,
    live: Arc<AtomicBool>,
    released: bool,
}

impl std::fmt::Debug for EnvironmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentHandle")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("flavor", &self.flavor)
            .field("image", &self.image)
            .field("runtime", &self.runtime.name())
            .finish()
    }
}

impl EnvironmentHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn flavor(&self) -> RuntimeFlavor {
        self.flavor
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Stop the environment now. Blocks for up to the stop grace period.
    pub fn shutdown(mut self) -> Result<(), RuntimeError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), RuntimeError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.live.store(false, Ordering::SeqCst);
        log::info!("Stopping environment {}", short_id(&self.id));
        self.runtime.stop(&self.id, self.stop_grace)
    }
}

impl Drop for EnvironmentHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::debug!("Environment {} cleanup: {}", short_id(&self.id), e);
        }
    }
}

/// Starts and watches environments on one runtime.
pub struct EnvironmentSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    settings: SupervisorSettings,
    live: Arc<AtomicBool>,
}

impl EnvironmentSupervisor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: SupervisorSettings) -> Self {
        Self {
            runtime,
            settings,
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Whether a handle from this supervisor is still alive.
    pub fn has_live_environment(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Launch `image` and wait until its RPC server answers.
    pub async fn start(
        &self,
        image: &RuntimeImageRef,
        filter: &UsbFilter,
        port_hint: Option<u16>,
    ) -> Result<EnvironmentHandle, SupervisorError> {
        if self.live.swap(true, Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyRunning(image.image_name.clone()));
        }

        match self.launch(image, filter, port_hint).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.live.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        image: &RuntimeImageRef,
        filter: &UsbFilter,
        port_hint: Option<u16>,
    ) -> Result<EnvironmentHandle, SupervisorError> {
        let host = self.settings.host.clone();
        let port = allocate_port(&host, port_hint).ok_or_else(|| SupervisorError::PortUnavailable {
            host: host.clone(),
            hint: port_hint,
        })?;

        let mut spec = LaunchSpec::new(image.image_name.clone(), image.flavor, port);
        spec.display = self.settings.display.clone();
        spec.workdir = self.settings.workdir.clone();
        if self.settings.pass_devices {
            spec.devices = find_devices(filter).into_iter().map(|d| d.node).collect();
            if spec.devices.is_empty() {
                log::warn!(
                    "No USB devices match vendor {}; starting without device nodes",
                    filter.vendor_id
                );
            }
        }

        log::info!(
            "Starting {} environment from {} on port {}",
            image.flavor,
            image.image_name,
            port
        );

        let runtime = Arc::clone(&self.runtime);
        let id = tokio::task::spawn_blocking(move || runtime.launch(&spec))
            .await
            .map_err(|e| {
                SupervisorError::Launch(RuntimeError::Failed {
                    command: "launch".to_string(),
                    stderr: e.to_string(),
                })
            })?
            .map_err(SupervisorError::Launch)?;

        let handle = EnvironmentHandle {
            id,
            host,
            port,
            flavor: image.flavor,
            image: image.image_name.clone(),
            started_at: SystemTime::now(),
            runtime: Arc::clone(&self.runtime),
            stop_grace: self.settings.stop_grace,
            live: Arc::clone(&self.live),
            released: false,
        };

        self.wait_ready(&handle).await?;
        log::info!("Environment {} ready at {}", short_id(&handle.id), handle.base_url());
        Ok(handle)
    }

    /// Ping with exponential backoff until the server answers, the
    /// environment exits, or the startup timeout passes.
    async fn wait_ready(&self, handle: &EnvironmentHandle) -> Result<(), SupervisorError> {
        let client = RpcClient::with_timeout(handle.base_url(), PING_TIMEOUT)?;
        let timeout = self.settings.startup_timeout;
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            if !self.is_running(&handle.id).await {
                let runtime = Arc::clone(&self.runtime);
                let id = handle.id.clone();
                let logs = tokio::task::spawn_blocking(move || runtime.logs(&id, STARTUP_LOG_LINES))
                    .await
                    .unwrap_or_default();
                return Err(SupervisorError::ExitedDuringStartup {
                    id: handle.id.clone(),
                    logs,
                });
            }

            match client.ping().await {
                Ok(_) => return Ok(()),
                Err(e) => log::debug!("Readiness ping {} failed: {}", attempt + 1, e),
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(SupervisorError::StartupTimeout {
                    port: handle.port,
                    timeout,
                });
            }
            let delay = calculate_backoff(attempt, READY_BACKOFF_BASE, READY_BACKOFF_MAX)
                .min(timeout - elapsed);
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    async fn is_running(&self, id: &str) -> bool {
        let runtime = Arc::clone(&self.runtime);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || runtime.is_running(&id))
            .await
            .unwrap_or(false)
    }

    /// Stop `handle`, killing it after the grace period.
    pub async fn stop(&self, handle: EnvironmentHandle) -> Result<(), SupervisorError> {
        tokio::task::spawn_blocking(move || handle.shutdown())
            .await
            .map_err(|e| {
                SupervisorError::Launch(RuntimeError::Failed {
                    command: "stop".to_string(),
                    stderr: e.to_string(),
                })
            })?
            .map_err(SupervisorError::Launch)
    }

    /// Running and answering pings. Never restarts anything.
    pub async fn is_healthy(&self, handle: &EnvironmentHandle) -> bool {
        if !self.is_running(&handle.id).await {
            return false;
        }
        match RpcClient::with_timeout(handle.base_url(), PING_TIMEOUT) {
            Ok(client) => client.ping().await.is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{FakeRuntime, InProcessRuntime};

    fn image() -> RuntimeImageRef {
        RuntimeImageRef {
            flavor: RuntimeFlavor::SoftwareFallback,
            image_name: "depthgate-fallback".to_string(),
            built: false,
        }
    }

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            startup_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_millis(100),
            pass_devices: false,
            ..SupervisorSettings::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_and_stop() {
        let runtime = Arc::new(InProcessRuntime::new());
        let supervisor = EnvironmentSupervisor::new(runtime.clone(), settings());

        let handle = supervisor
            .start(&image(), &UsbFilter::default(), None)
            .await
            .unwrap();
        assert!(supervisor.has_live_environment());
        assert!(supervisor.is_healthy(&handle).await);
        assert_eq!(handle.flavor(), RuntimeFlavor::SoftwareFallback);

        supervisor.stop(handle).await.unwrap();
        assert!(!supervisor.has_live_environment());
        assert_eq!(runtime.live_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_start_rejected() {
        let runtime = Arc::new(InProcessRuntime::new());
        let supervisor = EnvironmentSupervisor::new(runtime, settings());
        let _handle = supervisor
            .start(&image(), &UsbFilter::default(), None)
            .await
            .unwrap();

        let err = supervisor
            .start(&image(), &UsbFilter::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drop_stops_environment() {
        let runtime = Arc::new(InProcessRuntime::new());
        let supervisor = EnvironmentSupervisor::new(runtime.clone(), settings());
        {
            let _handle = supervisor
                .start(&image(), &UsbFilter::default(), None)
                .await
                .unwrap();
            assert_eq!(runtime.live_count(), 1);
        }
        assert_eq!(runtime.live_count(), 0);
        assert!(!supervisor.has_live_environment());
    }

    #[tokio::test]
    async fn test_exit_during_startup_carries_logs() {
        let runtime = Arc::new(FakeRuntime::new().exiting_on_launch());
        let supervisor = EnvironmentSupervisor::new(runtime.clone(), settings());
        let err = supervisor
            .start(&image(), &UsbFilter::default(), None)
            .await
            .unwrap_err();
        match err {
            SupervisorError::ExitedDuringStartup { logs, .. } => {
                assert!(logs.contains("sensor not found"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!supervisor.has_live_environment());
        assert_eq!(runtime.stopped().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_times_out() {
        let runtime = Arc::new(FakeRuntime::new());
        let supervisor = EnvironmentSupervisor::new(
            runtime.clone(),
            SupervisorSettings {
                startup_timeout: Duration::from_millis(600),
                ..settings()
            },
        );
        let start = Instant::now();
        let err = supervisor
            .start(&image(), &UsbFilter::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::StartupTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(runtime.live_count(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let runtime = Arc::new(FakeRuntime::new().failing_launch("no such image"));
        let supervisor = EnvironmentSupervisor::new(runtime, settings());
        let err = supervisor
            .start(&image(), &UsbFilter::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Launch(_)));
        assert!(!supervisor.has_live_environment());
    }

    #[tokio::test]
    async fn test_launch_spec_wiring() {
        let runtime = Arc::new(FakeRuntime::new().exiting_on_launch());
        let supervisor = EnvironmentSupervisor::new(
            runtime.clone(),
            SupervisorSettings {
                display: Some(":1".to_string()),
                ..settings()
            },
        );
        let _ = supervisor.start(&image(), &UsbFilter::default(), None).await;
        let launched = runtime.launched();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].image, "depthgate-fallback");
        assert_eq!(launched[0].display.as_deref(), Some(":1"));
        assert!(launched[0].devices.is_empty());
        assert!(launched[0].port > 0);
    }
}
