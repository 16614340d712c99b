//! Sensor configuration profile and its validation.
//!
//! A [`ConfigurationProfile`] is the strongly-typed replacement for the loose
//! key/value map callers send with `device_connect`. Every field is an enum of
//! the values the sensor actually supports, and cross-field constraints are
//! checked once, eagerly, before the device is opened.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Color camera resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorResolution {
    #[serde(rename = "OFF")]
    Off,
    #[serde(rename = "720P")]
    Res720p,
    #[serde(rename = "1080P")]
    Res1080p,
    #[serde(rename = "1440P")]
    Res1440p,
    #[serde(rename = "1536P")]
    Res1536p,
    #[serde(rename = "2160P")]
    Res2160p,
    #[serde(rename = "3072P")]
    Res3072p,
}

impl ColorResolution {
    pub const ALL: [ColorResolution; 7] = [
        ColorResolution::Off,
        ColorResolution::Res720p,
        ColorResolution::Res1080p,
        ColorResolution::Res1440p,
        ColorResolution::Res1536p,
        ColorResolution::Res2160p,
        ColorResolution::Res3072p,
    ];

    /// Wire token, e.g. `"1080P"`.
    pub fn token(self) -> &'static str {
        match self {
            ColorResolution::Off => "OFF",
            ColorResolution::Res720p => "720P",
            ColorResolution::Res1080p => "1080P",
            ColorResolution::Res1440p => "1440P",
            ColorResolution::Res1536p => "1536P",
            ColorResolution::Res2160p => "2160P",
            ColorResolution::Res3072p => "3072P",
        }
    }

    /// Frame dimensions as `(width, height)`, `None` when the camera is off.
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            ColorResolution::Off => None,
            ColorResolution::Res720p => Some((1280, 720)),
            ColorResolution::Res1080p => Some((1920, 1080)),
            ColorResolution::Res1440p => Some((2560, 1440)),
            ColorResolution::Res1536p => Some((2048, 1536)),
            ColorResolution::Res2160p => Some((3840, 2160)),
            ColorResolution::Res3072p => Some((4096, 3072)),
        }
    }
}

/// Depth camera operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepthMode {
    Off,
    #[serde(rename = "NFOV_2X2BINNED")]
    Nfov2x2Binned,
    NfovUnbinned,
    #[serde(rename = "WFOV_2X2BINNED")]
    Wfov2x2Binned,
    WfovUnbinned,
    PassiveIr,
}

impl DepthMode {
    pub const ALL: [DepthMode; 6] = [
        DepthMode::Off,
        DepthMode::Nfov2x2Binned,
        DepthMode::NfovUnbinned,
        DepthMode::Wfov2x2Binned,
        DepthMode::WfovUnbinned,
        DepthMode::PassiveIr,
    ];

    pub fn token(self) -> &'static str {
        match self {
            DepthMode::Off => "OFF",
            DepthMode::Nfov2x2Binned => "NFOV_2X2BINNED",
            DepthMode::NfovUnbinned => "NFOV_UNBINNED",
            DepthMode::Wfov2x2Binned => "WFOV_2X2BINNED",
            DepthMode::WfovUnbinned => "WFOV_UNBINNED",
            DepthMode::PassiveIr => "PASSIVE_IR",
        }
    }

    /// Depth/IR frame dimensions as `(width, height)`.
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            DepthMode::Off => None,
            DepthMode::Nfov2x2Binned => Some((320, 288)),
            DepthMode::NfovUnbinned => Some((640, 576)),
            DepthMode::Wfov2x2Binned => Some((512, 512)),
            DepthMode::WfovUnbinned => Some((1024, 1024)),
            DepthMode::PassiveIr => Some((1024, 1024)),
        }
    }

    /// Whether this mode produces a depth image (passive IR only produces IR).
    pub fn produces_depth(self) -> bool {
        !matches!(self, DepthMode::Off | DepthMode::PassiveIr)
    }
}

/// Camera frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameRate {
    Fps5,
    Fps15,
    Fps30,
}

impl FrameRate {
    pub const ALL: [FrameRate; 3] = [FrameRate::Fps5, FrameRate::Fps15, FrameRate::Fps30];

    pub fn as_u32(self) -> u32 {
        match self {
            FrameRate::Fps5 => 5,
            FrameRate::Fps15 => 15,
            FrameRate::Fps30 => 30,
        }
    }

    pub fn from_u32(fps: u32) -> Option<Self> {
        match fps {
            5 => Some(FrameRate::Fps5),
            15 => Some(FrameRate::Fps15),
            30 => Some(FrameRate::Fps30),
            _ => None,
        }
    }
}

impl Serialize for FrameRate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.as_u32())
    }
}

impl<'de> Deserialize<'de> for FrameRate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fps = u32::deserialize(deserializer)?;
        FrameRate::from_u32(fps).ok_or_else(|| {
            serde::de::Error::custom(format!("unsupported camera_fps {}, expected 5, 15 or 30", fps))
        })
    }
}

/// A validated sensor configuration.
///
/// Immutable once applied to a session; changing it requires a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationProfile {
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub camera_fps: FrameRate,
    pub synchronized_images_only: bool,
}

impl Default for ConfigurationProfile {
    fn default() -> Self {
        Self {
            color_resolution: ColorResolution::Res720p,
            depth_mode: DepthMode::NfovUnbinned,
            camera_fps: FrameRate::Fps30,
            synchronized_images_only: true,
        }
    }
}

impl fmt::Display for ConfigurationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "color={} depth={} fps={} sync={}",
            self.color_resolution.token(),
            self.depth_mode.token(),
            self.camera_fps.as_u32(),
            self.synchronized_images_only
        )
    }
}

/// Loose request form: every field optional, unknown keys rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileRequest {
    color_resolution: Option<ColorResolution>,
    depth_mode: Option<DepthMode>,
    camera_fps: Option<FrameRate>,
    synchronized_images_only: Option<bool>,
}

/// Reason a configuration was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProfileError(pub String);

impl ConfigurationProfile {
    /// Build and validate a profile from the map sent over the wire.
    ///
    /// `null` or an empty map yields the default profile. Missing keys take
    /// their default values.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProfileError> {
        let request: ProfileRequest = if value.is_null() {
            ProfileRequest::default()
        } else {
            serde_json::from_value(value).map_err(|e| ProfileError(e.to_string()))?
        };

        let defaults = ConfigurationProfile::default();
        let profile = ConfigurationProfile {
            color_resolution: request.color_resolution.unwrap_or(defaults.color_resolution),
            depth_mode: request.depth_mode.unwrap_or(defaults.depth_mode),
            camera_fps: request.camera_fps.unwrap_or(defaults.camera_fps),
            synchronized_images_only: request
                .synchronized_images_only
                .unwrap_or(defaults.synchronized_images_only),
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Check cross-field constraints the sensor enforces.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.color_resolution == ColorResolution::Off && self.depth_mode == DepthMode::Off {
            return Err(ProfileError(
                "color_resolution and depth_mode cannot both be OFF".to_string(),
            ));
        }
        if self.camera_fps == FrameRate::Fps30 {
            if self.color_resolution == ColorResolution::Res3072p {
                return Err(ProfileError(
                    "color_resolution 3072P does not support 30 fps".to_string(),
                ));
            }
            if self.depth_mode == DepthMode::WfovUnbinned {
                return Err(ProfileError(
                    "depth_mode WFOV_UNBINNED does not support 30 fps".to_string(),
                ));
            }
        }
        if self.synchronized_images_only
            && (self.color_resolution == ColorResolution::Off || !self.depth_mode.produces_depth())
        {
            return Err(ProfileError(
                "synchronized_images_only requires both color and depth to be enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Legal values for every profile field, reported by `get_device_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableModes {
    pub color_resolutions: Vec<String>,
    pub depth_modes: Vec<String>,
    pub frame_rates: Vec<u32>,
}

impl AvailableModes {
    pub fn all() -> Self {
        Self {
            color_resolutions: ColorResolution::ALL.iter().map(|c| c.token().to_string()).collect(),
            depth_modes: DepthMode::ALL.iter().map(|d| d.token().to_string()).collect(),
            frame_rates: FrameRate::ALL.iter().map(|f| f.as_u32()).collect(),
        }
    }
}
