//! Runtimes that host an environment.
//!
//! An environment is either a container started through the `docker` CLI or a
//! plain child process running `depthgate serve`. Both sit behind
//! [`ContainerRuntime`] so the supervisor does not care which one it drives.

mod command;
mod docker;
mod launch;
mod port;
mod process;
mod usb;

use std::time::Duration;

use thiserror::Error;

pub use command::{run_checked, run_with_timeout, spawn_line_reader, CommandOutput, LogTail};
pub use docker::{runtimes_include_nvidia, short_id, DockerRuntime};
pub use launch::{LaunchSpec, CONTAINER_WORKDIR, MANAGED_LABEL};
pub use port::{allocate_port, DEFAULT_PORT, PORT_SEARCH_SPAN};
pub use process::ProcessRuntime;
pub use usb::{
    find_devices, find_devices_in, UsbDevice, UsbFilter, DEFAULT_PRODUCT_IDS, DEFAULT_VENDOR_ID,
    SYSFS_USB_DEVICES,
};

/// Failures talking to a runtime or running one of its commands.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {}s", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },

    #[error("{command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("unknown environment {0}")]
    UnknownEnvironment(String),
}

/// Operations the supervisor and image selector need from a runtime.
pub trait ContainerRuntime: Send + Sync {
    /// Short name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Whether the runtime can be used at all.
    fn is_available(&self) -> bool;

    /// Whether the runtime itself advertises GPU support.
    fn reports_acceleration(&self) -> Result<bool, RuntimeError>;

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Start an environment and return its id.
    fn launch(&self, spec: &LaunchSpec) -> Result<String, RuntimeError>;

    fn is_running(&self, id: &str) -> bool;

    /// Stop and remove the environment, forcing it after `grace`.
    fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Last `tail` lines of output, best effort.
    fn logs(&self, id: &str, tail: usize) -> String;
}
