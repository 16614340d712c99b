//! Caller-facing gateway.
//!
//! [`Gateway::open`] resolves the flavor, makes sure the image exists, starts
//! the environment and connects an [`RpcClient`] to it. The gateway derefs to
//! the client, so every RPC method is available on it directly. Dropping or
//! closing the gateway stops the environment.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::{Config, RuntimeKind};
use crate::container::{
    short_id, ContainerRuntime, DockerRuntime, ProcessRuntime, RuntimeError, UsbFilter, DEFAULT_PORT,
};
use crate::detect::{CapabilityDetector, CapabilityProfile, RuntimeFlavor};
use crate::images::{FlavorRequest, ImageBuilder, ImageError, ImageSelector, RuntimeImageRef};
use crate::rpc::{ClientError, RpcClient, DEFAULT_TIMEOUT};
use crate::supervisor::{
    EnvironmentHandle, EnvironmentSupervisor, SupervisorError, SupervisorSettings,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("gateway does not manage an environment")]
    NotManaged,

    #[error("background task failed: {0}")]
    Task(String),
}

/// Everything needed to open a gateway.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub host: String,
    /// First port tried; with `auto_start` off, the port connected to
    pub port: Option<u16>,
    pub startup_timeout: Duration,
    pub rpc_timeout: Duration,
    pub flavor: FlavorRequest,
    pub image: Option<String>,
    pub auto_start: bool,
    pub auto_build: bool,
    pub force_rebuild: bool,
    pub runtime: RuntimeKind,
    pub build_dirs: Vec<PathBuf>,
    pub usb_filter: UsbFilter,
    pub display: Option<String>,
    pub workdir: Option<PathBuf>,
    pub stop_grace: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl GatewayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.gateway.host.clone(),
            port: config.gateway.port,
            startup_timeout: Duration::from_secs(config.gateway.timeout_secs),
            rpc_timeout: DEFAULT_TIMEOUT,
            flavor: config.gateway.flavor,
            image: config.gateway.image.clone(),
            auto_start: true,
            auto_build: config.gateway.auto_build,
            force_rebuild: false,
            runtime: config.gateway.runtime,
            build_dirs: config.supervisor.build_dirs.clone(),
            usb_filter: config.device.usb_filter(),
            display: config
                .supervisor
                .display
                .clone()
                .or_else(|| std::env::var("DISPLAY").ok()),
            workdir: config.supervisor.workdir.clone(),
            stop_grace: Duration::from_secs(config.supervisor.stop_grace_secs),
        }
    }

    fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            host: self.host.clone(),
            startup_timeout: self.startup_timeout,
            stop_grace: self.stop_grace,
            display: self.display.clone(),
            workdir: self.workdir.clone(),
            pass_devices: self.runtime == RuntimeKind::Docker,
        }
    }

    /// Build the runtime named by [`runtime`](Self::runtime).
    pub fn build_runtime(&self) -> Result<Arc<dyn ContainerRuntime>, GatewayError> {
        Ok(match self.runtime {
            RuntimeKind::Docker => Arc::new(DockerRuntime::default()),
            RuntimeKind::Process => Arc::new(ProcessRuntime::from_current_exe()?),
        })
    }
}

/// Diagnostics about the gateway and its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayInfo {
    pub acceleration_available: bool,
    pub environment_id: Option<String>,
    pub flavor: Option<RuntimeFlavor>,
    pub image: Option<String>,
    pub host: String,
    pub port: u16,
    pub runtime: String,
}

/// Detect capabilities and resolve the image without starting anything.
pub async fn resolve_image(
    options: &GatewayOptions,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<(CapabilityProfile, RuntimeImageRef), GatewayError> {
    resolve_image_with(options, runtime, CapabilityDetector::new()).await
}

async fn resolve_image_with(
    options: &GatewayOptions,
    runtime: Arc<dyn ContainerRuntime>,
    detector: CapabilityDetector,
) -> Result<(CapabilityProfile, RuntimeImageRef), GatewayError> {
    let selector = ImageSelector::new(runtime, ImageBuilder::new(options.build_dirs.clone()))
        .with_detector(detector)
        .with_image_override(options.image.clone())
        .with_auto_build(options.auto_build)
        .with_force_rebuild(options.force_rebuild);
    let flavor = options.flavor;

    let (profile, image) = tokio::task::spawn_blocking(move || {
        let profile = selector.detect();
        log::info!(
            "Acceleration {} ({})",
            if profile.acceleration_available { "available" } else { "unavailable" },
            profile.evidence
        );
        let image = selector.resolve_with(flavor, &profile);
        (profile, image)
    })
    .await
    .map_err(|e| GatewayError::Task(e.to_string()))?;

    Ok((profile, image?))
}

/// A connected gateway. Owns at most one environment.
pub struct Gateway {
    options: GatewayOptions,
    runtime: Arc<dyn ContainerRuntime>,
    profile: CapabilityProfile,
    image: Option<RuntimeImageRef>,
    supervisor: EnvironmentSupervisor,
    handle: Option<EnvironmentHandle>,
    client: RpcClient,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("runtime", &self.runtime.name())
            .field("handle", &self.handle)
            .field("base_url", &self.client.base_url())
            .finish()
    }
}

impl Gateway {
    /// Open a gateway on the runtime named in `options`.
    pub async fn open(options: GatewayOptions) -> Result<Self, GatewayError> {
        let runtime = options.build_runtime()?;
        Self::open_with(options, runtime).await
    }

    /// Open a gateway on an explicit runtime.
    pub async fn open_with(
        options: GatewayOptions,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, GatewayError> {
        Self::open_with_detector(options, runtime, CapabilityDetector::new()).await
    }

    async fn open_with_detector(
        options: GatewayOptions,
        runtime: Arc<dyn ContainerRuntime>,
        detector: CapabilityDetector,
    ) -> Result<Self, GatewayError> {
        let supervisor =
            EnvironmentSupervisor::new(Arc::clone(&runtime), options.supervisor_settings());

        if !options.auto_start {
            let port = options.port.unwrap_or(DEFAULT_PORT);
            log::info!("Connecting to existing server at {}:{}", options.host, port);
            let client = RpcClient::with_timeout(
                format!("http://{}:{}", options.host, port),
                options.rpc_timeout,
            )?;
            let probe_runtime = Arc::clone(&runtime);
            let profile = tokio::task::spawn_blocking(move || detector.detect(probe_runtime.as_ref()))
                .await
                .map_err(|e| GatewayError::Task(e.to_string()))?;
            return Ok(Self {
                options,
                runtime,
                profile,
                image: None,
                supervisor,
                handle: None,
                client,
            });
        }

        let (profile, image) = resolve_image_with(&options, Arc::clone(&runtime), detector).await?;
        let handle = supervisor
            .start(&image, &options.usb_filter, options.port)
            .await?;
        let client = RpcClient::with_timeout(handle.base_url(), options.rpc_timeout)?;

        Ok(Self {
            options,
            runtime,
            profile,
            image: Some(image),
            supervisor,
            handle: Some(handle),
            client,
        })
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn capability(&self) -> &CapabilityProfile {
        &self.profile
    }

    pub fn environment(&self) -> Option<&EnvironmentHandle> {
        self.handle.as_ref()
    }

    /// Whether this gateway still holds a live environment.
    pub fn has_live_environment(&self) -> bool {
        self.supervisor.has_live_environment()
    }

    pub fn info(&self) -> GatewayInfo {
        let (host, port) = match &self.handle {
            Some(h) => (h.host().to_string(), h.port()),
            None => (
                self.options.host.clone(),
                self.options.port.unwrap_or(DEFAULT_PORT),
            ),
        };
        GatewayInfo {
            acceleration_available: self.profile.acceleration_available,
            environment_id: self.handle.as_ref().map(|h| h.id().to_string()),
            flavor: self.image.as_ref().map(|i| i.flavor),
            image: self.image.as_ref().map(|i| i.image_name.clone()),
            host,
            port,
            runtime: self.runtime.name().to_string(),
        }
    }

    /// Running and answering pings. Reports only; never restarts.
    pub async fn is_healthy(&self) -> bool {
        match &self.handle {
            Some(handle) => self.supervisor.is_healthy(handle).await,
            None => self.client.ping().await.is_ok(),
        }
    }

    /// Stop the environment and start a fresh one from the same image.
    pub async fn restart(&mut self) -> Result<(), GatewayError> {
        let image = self.image.clone().ok_or(GatewayError::NotManaged)?;
        let handle = self.handle.take().ok_or(GatewayError::NotManaged)?;
        let port_hint = Some(handle.port());
        log::info!("Restarting environment {}", short_id(handle.id()));
        self.supervisor.stop(handle).await?;

        let handle = self
            .supervisor
            .start(&image, &self.options.usb_filter, port_hint)
            .await?;
        self.client = RpcClient::with_timeout(handle.base_url(), self.options.rpc_timeout)?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the environment. Dropping the gateway does the same.
    pub async fn close(mut self) -> Result<(), GatewayError> {
        if let Some(handle) = self.handle.take() {
            self.supervisor.stop(handle).await?;
        }
        Ok(())
    }
}

impl Deref for Gateway {
    type Target = RpcClient;

    fn deref(&self) -> &RpcClient {
        &self.client
    }
}
