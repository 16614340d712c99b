//! Wire types shared by the RPC server and client.
//!
//! Every call is a `POST /rpc` with a JSON body `{"method": ..., "params": {...}}`
//! and every reply is an [`RpcEnvelope`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::autocapture::DEFAULT_INTERVAL_MS;
use crate::imaging::{DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DEPTH, DEFAULT_MIN_DEPTH};
use crate::session::ErrorKind;

/// Path the server mounts the RPC endpoint on.
pub const RPC_PATH: &str = "/rpc";

/// Default frame wait for `get_capture`.
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 1000;

/// The fixed method surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Ping,
    DeviceConnect,
    DeviceStart,
    DeviceStop,
    DeviceDisconnect,
    GetDeviceInfo,
    GetCapture,
    GetColorImage,
    GetDepthImage,
    GetIrImage,
    StartAutoCapture,
    StopAutoCapture,
    GetLatestCapture,
}

impl Method {
    pub const ALL: [Method; 13] = [
        Method::Ping,
        Method::DeviceConnect,
        Method::DeviceStart,
        Method::DeviceStop,
        Method::DeviceDisconnect,
        Method::GetDeviceInfo,
        Method::GetCapture,
        Method::GetColorImage,
        Method::GetDepthImage,
        Method::GetIrImage,
        Method::StartAutoCapture,
        Method::StopAutoCapture,
        Method::GetLatestCapture,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Ping => "ping",
            Method::DeviceConnect => "device_connect",
            Method::DeviceStart => "device_start",
            Method::DeviceStop => "device_stop",
            Method::DeviceDisconnect => "device_disconnect",
            Method::GetDeviceInfo => "get_device_info",
            Method::GetCapture => "get_capture",
            Method::GetColorImage => "get_color_image",
            Method::GetDepthImage => "get_depth_image",
            Method::GetIrImage => "get_ir_image",
            Method::StartAutoCapture => "start_auto_capture",
            Method::StopAutoCapture => "stop_auto_capture",
            Method::GetLatestCapture => "get_latest_capture",
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown method '{}'", s))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: Method, params: Value) -> Self {
        Self {
            method: method.as_str().to_string(),
            params,
        }
    }
}

/// Uniform reply wrapper. `payload` is `None` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub payload: Option<T>,
}

impl<T> RpcEnvelope<T> {
    pub fn ok(message: impl Into<String>, payload: Option<T>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            payload,
        }
    }

    pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(kind),
            payload: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingReply {
    pub pong: bool,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectParams {
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureParams {
    pub timeout_ms: u64,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorImageParams {
    pub format: String,
    pub quality: i64,
}

impl Default for ColorImageParams {
    fn default() -> Self {
        Self {
            format: "BGR".to_string(),
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthImageParams {
    pub format: String,
    pub min_depth: u16,
    pub max_depth: u16,
}

impl Default for DepthImageParams {
    fn default() -> Self {
        Self {
            format: "RAW".to_string(),
            min_depth: DEFAULT_MIN_DEPTH,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IrImageParams {
    pub format: String,
}

impl Default for IrImageParams {
    fn default() -> Self {
        Self {
            format: "RAW".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCaptureParams {
    pub interval_ms: u64,
}

impl Default for AutoCaptureParams {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}
