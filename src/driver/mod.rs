//! Sensor driver boundary.
//!
//! The physical depth/color sensor is driven by an external SDK. The session
//! only talks to it through the two traits here:
//! - [`SensorDriver`] opens the device with a validated profile
//! - [`SensorDevice`] starts/stops the cameras and hands out captures
//!
//! [`SimulatedDriver`] is the built-in implementation used when no hardware
//! SDK is linked in, and by the test suite.

mod simulated;
mod types;

use std::time::Duration;

use crate::session::ConfigurationProfile;

pub use simulated::SimulatedDriver;
pub use types::{Capture, CaptureSummary, ColorFrame, Mono16Frame};

/// Errors surfaced by a driver implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// No capture arrived within the requested time
    #[error("timed out waiting for a capture")]
    Timeout,
    /// The device is missing, unplugged, or held by another process
    #[error("device unavailable: {0}")]
    Unavailable(String),
    /// Any other driver failure
    #[error("driver failure: {0}")]
    Failed(String),
}

/// Factory for the single physical device.
pub trait SensorDriver: Send + Sync {
    /// Short name reported in device info.
    fn name(&self) -> &str;

    /// True when frames are synthesized rather than read from hardware.
    fn is_simulated(&self) -> bool;

    /// Open the device with the given profile. Cameras stay idle until
    /// [`SensorDevice::start`].
    fn open(&self, profile: &ConfigurationProfile) -> Result<Box<dyn SensorDevice>, DriverError>;
}

/// An opened device. Dropping it releases the hardware.
pub trait SensorDevice: Send {
    fn serial(&self) -> String;

    fn start(&mut self) -> Result<(), DriverError>;

    fn stop(&mut self) -> Result<(), DriverError>;

    /// Block for up to `timeout` waiting for the next synchronized capture.
    fn get_capture(&mut self, timeout: Duration) -> Result<Capture, DriverError>;
}
