//! Deterministic simulated sensor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use super::types::{Capture, ColorFrame, Mono16Frame};
use super::{DriverError, SensorDevice, SensorDriver};
use crate::session::ConfigurationProfile;

/// Depth value written to the right-most column, beyond the usual 4 m range.
pub const SIM_FAR_DEPTH_MM: u16 = 5000;

/// Synthesizes gradient frames at the profile's resolution and frame rate.
///
/// Only one device can be open at a time, mirroring exclusive hardware
/// access. [`SimulatedDriver::set_attached`] emulates unplugging the sensor.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    serial: String,
    in_use: Arc<AtomicBool>,
    attached: Arc<AtomicBool>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new("SIM000001")
    }
}

impl SimulatedDriver {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            in_use: Arc::new(AtomicBool::new(false)),
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Plug or unplug the simulated sensor.
    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }
}

impl SensorDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn open(&self, profile: &ConfigurationProfile) -> Result<Box<dyn SensorDevice>, DriverError> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(DriverError::Unavailable("no sensor attached".to_string()));
        }
        if self
            .in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DriverError::Unavailable(
                "sensor is already opened by another session".to_string(),
            ));
        }

        log::debug!("Simulated sensor {} opened ({})", self.serial, profile);
        Ok(Box::new(SimulatedDevice {
            serial: self.serial.clone(),
            profile: *profile,
            in_use: Arc::clone(&self.in_use),
            attached: Arc::clone(&self.attached),
            running: false,
            sequence: 0,
            next_due: Instant::now(),
        }))
    }
}

struct SimulatedDevice {
    serial: String,
    profile: ConfigurationProfile,
    in_use: Arc<AtomicBool>,
    attached: Arc<AtomicBool>,
    running: bool,
    sequence: u64,
    next_due: Instant,
}

impl SimulatedDevice {
    fn frame_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.profile.camera_fps.as_u32()))
    }

    fn synthesize(&self) -> Capture {
        let seq = self.sequence;

        let color = self.profile.color_resolution.dimensions().and_then(|(w, h)| {
            let mut data = Vec::with_capacity(w as usize * h as usize * 4);
            let red = ((seq * 8) % 256) as u8;
            for y in 0..h {
                let green = (y * 255 / h.max(1)) as u8;
                for x in 0..w {
                    let blue = (x * 255 / w.max(1)) as u8;
                    data.extend_from_slice(&[blue, green, red, 255]);
                }
            }
            ColorFrame::new(data, w, h)
        });

        let mode = self.profile.depth_mode;
        let depth = if mode.produces_depth() {
            mode.dimensions().and_then(|(w, h)| {
                let wobble = (seq % 100) as u32;
                let mut data = Vec::with_capacity(w as usize * h as usize);
                for _y in 0..h {
                    for x in 0..w {
                        let value = if x == 0 {
                            // invalid reading
                            0
                        } else if x == w - 1 {
                            SIM_FAR_DEPTH_MM
                        } else {
                            (500 + x * 3500 / w + wobble) as u16
                        };
                        data.push(value);
                    }
                }
                Mono16Frame::new(data, w, h)
            })
        } else {
            None
        };

        let ir = mode.dimensions().and_then(|(w, h)| {
            let mut data = Vec::with_capacity(w as usize * h as usize);
            for y in 0..h {
                for x in 0..w {
                    data.push(((x + y) % 1024) as u16 * 4);
                }
            }
            Mono16Frame::new(data, w, h)
        });

        Capture {
            color,
            depth,
            ir,
            sequence: seq,
            device_timestamp_usec: seq * self.frame_period().as_micros() as u64,
            received_at: Instant::now(),
            received_wall: SystemTime::now(),
        }
    }
}

impl SensorDevice for SimulatedDevice {
    fn serial(&self) -> String {
        self.serial.clone()
    }

    fn start(&mut self) -> Result<(), DriverError> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(DriverError::Unavailable("sensor detached".to_string()));
        }
        self.running = true;
        self.next_due = Instant::now();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.running = false;
        Ok(())
    }

    fn get_capture(&mut self, timeout: Duration) -> Result<Capture, DriverError> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(DriverError::Unavailable("sensor detached".to_string()));
        }
        if !self.running {
            return Err(DriverError::Failed("cameras are not running".to_string()));
        }

        let now = Instant::now();
        let wait = self.next_due.saturating_duration_since(now);
        if wait > timeout {
            thread::sleep(timeout);
            return Err(DriverError::Timeout);
        }
        thread::sleep(wait);

        self.sequence += 1;
        // Pace from the later of the schedule and now, so a slow consumer
        // does not get a burst of back-to-back frames.
        self.next_due = self.next_due.max(Instant::now()) + self.frame_period();
        Ok(self.synthesize())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}
