//! The device session state machine.
//!
//! `Idle -> Connected -> Streaming -> Connected -> Idle`. The opened device
//! and its profile live inside the `Connected`/`Streaming` states, so a
//! profile can only be attached while the session is connected.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::SessionError;
use super::profile::{AvailableModes, ConfigurationProfile};
use crate::autocapture::AutoCaptureStatus;
use crate::driver::{Capture, DriverError, SensorDevice, SensorDriver};

/// Externally visible session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Connected,
    Streaming,
}

struct OpenDevice {
    device: Box<dyn SensorDevice>,
    profile: ConfigurationProfile,
    serial: String,
}

enum SessionState {
    Idle,
    Connected(OpenDevice),
    Streaming(OpenDevice),
}

/// Result of a successful `device_connect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub serial: String,
    pub config: ConfigurationProfile,
}

/// Snapshot returned by `get_device_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub connected: bool,
    pub started: bool,
    pub state: SessionPhase,
    pub serial: Option<String>,
    pub active_config: Option<ConfigurationProfile>,
    pub available_modes: AvailableModes,
    pub driver: String,
    pub simulation_mode: bool,
    #[serde(default)]
    pub auto_capture: Option<AutoCaptureStatus>,
}

/// Server-side wrapper around the one physical device.
pub struct DeviceSession {
    driver: Arc<dyn SensorDriver>,
    state: SessionState,
    current: Option<Arc<Capture>>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("driver", &self.driver.name())
            .field("phase", &self.phase())
            .field("has_current", &self.current.is_some())
            .finish()
    }
}

impl DeviceSession {
    pub fn new(driver: Arc<dyn SensorDriver>) -> Self {
        Self {
            driver,
            state: SessionState::Idle,
            current: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Connected(_) => SessionPhase::Connected,
            SessionState::Streaming(_) => SessionPhase::Streaming,
        }
    }

    fn open_device(&self) -> Option<&OpenDevice> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Connected(dev) | SessionState::Streaming(dev) => Some(dev),
        }
    }

    /// Profile applied to the open device, `None` while idle.
    pub fn active_profile(&self) -> Option<&ConfigurationProfile> {
        self.open_device().map(|d| &d.profile)
    }

    pub fn serial(&self) -> Option<&str> {
        self.open_device().map(|d| d.serial.as_str())
    }

    /// Validate `config` and open the device.
    ///
    /// # Errors
    /// * `AlreadyConnected` - the session is not idle; the existing profile is kept
    /// * `InvalidConfig` - a field or field combination is not supported
    /// * `DeviceUnavailable` - the driver could not open the sensor
    pub fn connect_value(&mut self, config: serde_json::Value) -> Result<ConnectInfo, SessionError> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(SessionError::AlreadyConnected);
        }
        let profile = ConfigurationProfile::from_value(config)
            .map_err(|e| SessionError::InvalidConfig(e.0))?;
        self.connect(profile)
    }

    /// Open the device with an already-validated profile.
    pub fn connect(&mut self, profile: ConfigurationProfile) -> Result<ConnectInfo, SessionError> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(SessionError::AlreadyConnected);
        }
        profile
            .validate()
            .map_err(|e| SessionError::InvalidConfig(e.0))?;

        let device = self.driver.open(&profile)?;
        let serial = device.serial();
        log::info!("Device {} connected ({})", serial, profile);

        self.state = SessionState::Connected(OpenDevice {
            device,
            profile,
            serial: serial.clone(),
        });
        Ok(ConnectInfo {
            serial,
            config: profile,
        })
    }

    /// Start the cameras.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Connected(mut dev) => match dev.device.start() {
                Ok(()) => {
                    log::info!("Device {} streaming", dev.serial);
                    self.state = SessionState::Streaming(dev);
                    Ok(())
                }
                Err(DriverError::Unavailable(msg)) => {
                    self.release(dev, "start failed");
                    Err(SessionError::DeviceUnavailable(msg))
                }
                Err(e) => {
                    self.state = SessionState::Connected(dev);
                    Err(e.into())
                }
            },
            SessionState::Streaming(dev) => {
                self.state = SessionState::Streaming(dev);
                Err(SessionError::AlreadyStreaming)
            }
            SessionState::Idle => Err(SessionError::NotConnected),
        }
    }

    /// Stop the cameras, keeping the device open.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Streaming(mut dev) => {
                if let Err(e) = dev.device.stop() {
                    log::warn!("Device {} did not stop cleanly: {}", dev.serial, e);
                }
                log::info!("Device {} stopped", dev.serial);
                self.state = SessionState::Connected(dev);
                Ok(())
            }
            SessionState::Connected(dev) => {
                self.state = SessionState::Connected(dev);
                Err(SessionError::NotStreaming)
            }
            SessionState::Idle => Err(SessionError::NotConnected),
        }
    }

    /// Release the device. Stops the cameras first when streaming.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Streaming(mut dev) => {
                if let Err(e) = dev.device.stop() {
                    log::warn!("Device {} did not stop cleanly: {}", dev.serial, e);
                }
                self.release(dev, "disconnected");
                Ok(())
            }
            SessionState::Connected(dev) => {
                self.release(dev, "disconnected");
                Ok(())
            }
            SessionState::Idle => Err(SessionError::NotConnected),
        }
    }

    fn release(&mut self, dev: OpenDevice, reason: &str) {
        log::info!("Device {} released: {}", dev.serial, reason);
        drop(dev);
        self.state = SessionState::Idle;
        self.current = None;
    }

    /// Wait up to `timeout` for a synchronized capture and make it current.
    ///
    /// Never blocks unless the session is streaming.
    pub fn get_capture(&mut self, timeout: Duration) -> Result<Arc<Capture>, SessionError> {
        let dev = match &mut self.state {
            SessionState::Streaming(dev) => dev,
            SessionState::Connected(_) => return Err(SessionError::NotStreaming),
            SessionState::Idle => return Err(SessionError::NotConnected),
        };

        match dev.device.get_capture(timeout) {
            Ok(capture) => {
                let capture = Arc::new(capture);
                self.current = Some(Arc::clone(&capture));
                Ok(capture)
            }
            Err(DriverError::Timeout) => Err(SessionError::CaptureTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(DriverError::Unavailable(msg)) => {
                if let SessionState::Streaming(dev) | SessionState::Connected(dev) =
                    std::mem::replace(&mut self.state, SessionState::Idle)
                {
                    self.release(dev, "device lost");
                }
                Err(SessionError::DeviceUnavailable(msg))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The capture from the last successful `get_capture`.
    pub fn current_capture(&self) -> Result<Arc<Capture>, SessionError> {
        self.current.clone().ok_or(SessionError::NoCurrentCapture)
    }

    pub fn info(&self) -> DeviceInfo {
        let phase = self.phase();
        DeviceInfo {
            connected: phase != SessionPhase::Idle,
            started: phase == SessionPhase::Streaming,
            state: phase,
            serial: self.serial().map(str::to_string),
            active_config: self.active_profile().copied(),
            available_modes: AvailableModes::all(),
            driver: self.driver.name().to_string(),
            simulation_mode: self.driver.is_simulated(),
            auto_capture: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedDriver;
    use crate::session::{ColorResolution, DepthMode, FrameRate};
    use serde_json::json;

    fn session() -> (DeviceSession, SimulatedDriver) {
        let driver = SimulatedDriver::default();
        (DeviceSession::new(Arc::new(driver.clone())), driver)
    }

    fn small() -> serde_json::Value {
        json!({ "depth_mode": "NFOV_2X2BINNED" })
    }

    #[test]
    fn test_new_session_is_idle() {
        let (session, _) = session();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.active_profile().is_none());
    }

    #[test]
    fn test_full_lifecycle() {
        let (mut session, driver) = session();
        let info = session.connect_value(small()).unwrap();
        assert_eq!(info.serial, "SIM000001");
        assert_eq!(session.phase(), SessionPhase::Connected);

        session.start().unwrap();
        assert_eq!(session.phase(), SessionPhase::Streaming);

        let capture = session.get_capture(Duration::from_millis(500)).unwrap();
        assert_eq!(session.current_capture().unwrap().sequence, capture.sequence);

        session.stop().unwrap();
        assert_eq!(session.phase(), SessionPhase::Connected);

        session.disconnect().unwrap();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.active_profile().is_none());
        assert!(!driver.is_in_use());
    }

    #[test]
    fn test_connect_then_disconnect_leaves_no_profile() {
        for color in [ColorResolution::Res720p, ColorResolution::Res1080p] {
            for depth in [DepthMode::NfovUnbinned, DepthMode::Nfov2x2Binned] {
                for fps in FrameRate::ALL {
                    let (mut session, driver) = session();
                    session
                        .connect(ConfigurationProfile {
                            color_resolution: color,
                            depth_mode: depth,
                            camera_fps: fps,
                            synchronized_images_only: true,
                        })
                        .unwrap();
                    session.disconnect().unwrap();
                    assert_eq!(session.phase(), SessionPhase::Idle);
                    assert!(session.active_profile().is_none());
                    assert!(session.serial().is_none());
                    assert!(!driver.is_in_use());
                }
            }
        }
    }

    #[test]
    fn test_double_connect_keeps_first_profile() {
        let (mut session, _) = session();
        session.connect_value(small()).unwrap();
        let err = session
            .connect_value(json!({ "color_resolution": "1080P" }))
            .unwrap_err();
        assert_eq!(err, SessionError::AlreadyConnected);
        assert_eq!(
            session.active_profile().unwrap().depth_mode,
            DepthMode::Nfov2x2Binned
        );
        assert_eq!(
            session.active_profile().unwrap().color_resolution,
            ColorResolution::Res720p
        );
    }

    #[test]
    fn test_invalid_config_leaves_session_idle() {
        let (mut session, _) = session();
        let err = session
            .connect_value(json!({ "depth_mode": "ULTRA" }))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_start_from_idle_is_not_connected() {
        let (mut session, _) = session();
        assert_eq!(session.start().unwrap_err(), SessionError::NotConnected);
    }

    #[test]
    fn test_start_twice_is_already_streaming() {
        let (mut session, _) = session();
        session.connect_value(small()).unwrap();
        session.start().unwrap();
        assert_eq!(session.start().unwrap_err(), SessionError::AlreadyStreaming);
        assert_eq!(session.phase(), SessionPhase::Streaming);
    }

    #[test]
    fn test_get_capture_outside_streaming_fails_fast() {
        let (mut session, _) = session();
        let started = std::time::Instant::now();
        assert_eq!(
            session.get_capture(Duration::from_secs(5)).unwrap_err(),
            SessionError::NotConnected
        );
        session.connect_value(small()).unwrap();
        assert_eq!(
            session.get_capture(Duration::from_secs(5)).unwrap_err(),
            SessionError::NotStreaming
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_current_capture_before_any_capture() {
        let (mut session, _) = session();
        session.connect_value(small()).unwrap();
        session.start().unwrap();
        assert_eq!(
            session.current_capture().unwrap_err(),
            SessionError::NoCurrentCapture
        );
    }

    #[test]
    fn test_capture_timeout_keeps_streaming() {
        let (mut session, _) = session();
        session
            .connect_value(json!({ "depth_mode": "NFOV_2X2BINNED", "camera_fps": 5 }))
            .unwrap();
        session.start().unwrap();
        session.get_capture(Duration::from_millis(500)).unwrap();
        let err = session.get_capture(Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, SessionError::CaptureTimeout { timeout_ms: 5 });
        assert_eq!(session.phase(), SessionPhase::Streaming);
        assert!(session.current_capture().is_ok());
    }

    #[test]
    fn test_stop_from_connected_is_not_streaming() {
        let (mut session, _) = session();
        session.connect_value(small()).unwrap();
        assert_eq!(session.stop().unwrap_err(), SessionError::NotStreaming);
        assert_eq!(session.phase(), SessionPhase::Connected);
    }

    #[test]
    fn test_disconnect_from_streaming_stops_first() {
        let (mut session, driver) = session();
        session.connect_value(small()).unwrap();
        session.start().unwrap();
        session.get_capture(Duration::from_millis(500)).unwrap();
        session.disconnect().unwrap();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(
            session.current_capture().unwrap_err(),
            SessionError::NoCurrentCapture
        );
        assert!(!driver.is_in_use());
    }

    #[test]
    fn test_disconnect_when_idle_is_not_connected() {
        let (mut session, _) = session();
        assert_eq!(session.disconnect().unwrap_err(), SessionError::NotConnected);
    }

    #[test]
    fn test_lost_device_returns_session_to_idle() {
        let (mut session, driver) = session();
        session.connect_value(small()).unwrap();
        session.start().unwrap();
        driver.set_attached(false);
        let err = session.get_capture(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(!driver.is_in_use());

        driver.set_attached(true);
        assert!(session.connect_value(small()).is_ok());
    }

    #[test]
    fn test_connect_with_detached_sensor() {
        let (mut session, driver) = session();
        driver.set_attached(false);
        let err = session.connect_value(small()).unwrap_err();
        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_info_reflects_state() {
        let (mut session, _) = session();
        let info = session.info();
        assert!(!info.connected);
        assert!(info.simulation_mode);
        assert_eq!(info.driver, "simulated");

        session.connect_value(small()).unwrap();
        session.start().unwrap();
        let info = session.info();
        assert!(info.connected);
        assert!(info.started);
        assert_eq!(info.state, SessionPhase::Streaming);
        assert_eq!(info.serial.as_deref(), Some("SIM000001"));
        assert!(info.active_config.is_some());
    }
}
