//! Frame and capture types produced by sensor drivers.

use std::fmt;
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};

/// An 8-bit BGRA color image.
#[derive(Debug, Clone)]
pub struct ColorFrame {
    /// Interleaved B, G, R, A bytes
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ColorFrame {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Returns `None` when `data` does not match `width * height * 4`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        if data.len() != width as usize * height as usize * Self::BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
        })
    }

    pub fn shape(&self) -> [u32; 3] {
        [self.height, self.width, Self::BYTES_PER_PIXEL as u32]
    }
}

/// A single-channel 16-bit image (depth in millimetres, or IR intensity).
#[derive(Debug, Clone)]
pub struct Mono16Frame {
    pub data: Vec<u16>,
    pub width: u32,
    pub height: u32,
}

impl Mono16Frame {
    /// Returns `None` when `data` does not match `width * height`.
    pub fn new(data: Vec<u16>, width: u32, height: u32) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
        })
    }

    pub fn shape(&self) -> [u32; 2] {
        [self.height, self.width]
    }
}

/// One synchronized capture from the sensor.
#[derive(Debug, Clone)]
pub struct Capture {
    pub color: Option<ColorFrame>,
    pub depth: Option<Mono16Frame>,
    pub ir: Option<Mono16Frame>,
    /// Driver-assigned, strictly increasing per device
    pub sequence: u64,
    /// Device clock in microseconds
    pub device_timestamp_usec: u64,
    /// Host time the capture was handed to us
    pub received_at: Instant,
    /// Wall-clock time matching `received_at`
    pub received_wall: SystemTime,
}

impl Capture {
    /// Shape summary sent back to RPC callers.
    pub fn summary(&self) -> CaptureSummary {
        let captured_at_ms = self
            .received_wall
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        CaptureSummary {
            sequence: self.sequence,
            device_timestamp_usec: self.device_timestamp_usec,
            captured_at_ms,
            color_shape: self.color.as_ref().map(|c| c.shape().to_vec()),
            depth_shape: self.depth.as_ref().map(|d| d.shape().to_vec()),
            ir_shape: self.ir.as_ref().map(|i| i.shape().to_vec()),
            age_ms: None,
        }
    }
}

/// What `get_capture` and `get_latest_capture` return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub sequence: u64,
    pub device_timestamp_usec: u64,
    /// Unix epoch milliseconds
    pub captured_at_ms: u64,
    pub color_shape: Option<Vec<u32>>,
    pub depth_shape: Option<Vec<u32>>,
    pub ir_shape: Option<Vec<u32>>,
    /// Time since the frame was cached; only set by `get_latest_capture`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_ms: Option<u64>,
}

impl fmt::Display for CaptureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.sequence)?;
        if let Some(ref s) = self.color_shape {
            write!(f, " color={:?}", s)?;
        }
        if let Some(ref s) = self.depth_shape {
            write!(f, " depth={:?}", s)?;
        }
        if let Some(ref s) = self.ir_shape {
            write!(f, " ir={:?}", s)?;
        }
        Ok(())
    }
}
