//! RpcClient - typed access to a running RPC server.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::protocol::{Method, PingReply, RpcEnvelope, RpcRequest, RPC_PATH};
use crate::autocapture::AutoCaptureStatus;
use crate::driver::CaptureSummary;
use crate::imaging::{ImagePayload, PayloadError};
use crate::session::{ConfigurationProfile, ConnectInfo, DeviceInfo, ErrorKind};

/// Default timeout for RPC requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Added to a capture's frame wait to cover the server's lock wait and the
/// round trip.
const CAPTURE_REPLY_SLACK: Duration = Duration::from_secs(15);

/// Errors returned by [`RpcClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a failed envelope
    #[error("{message}")]
    Remote {
        kind: Option<ErrorKind>,
        message: String,
    },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl ClientError {
    /// Error code from a failed envelope, if this is a remote error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Remote { kind, .. } => *kind,
            _ => None,
        }
    }
}

/// An image fetched and verified against its length and digest.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub dtype: String,
    pub sequence: u64,
    pub depth_range: Option<[u16; 2]>,
    pub bytes: Vec<u8>,
}

impl TryFrom<ImagePayload> for DecodedImage {
    type Error = PayloadError;

    fn try_from(payload: ImagePayload) -> Result<Self, Self::Error> {
        let bytes = payload.decode()?;
        Ok(Self {
            format: payload.format,
            width: payload.width,
            height: payload.height,
            channels: payload.channels,
            dtype: payload.dtype,
            sequence: payload.sequence,
            depth_range: payload.depth_range,
            bytes,
        })
    }
}

/// Client for the device RPC surface.
#[derive(Debug, Clone)]
pub struct RpcClient {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl RpcClient {
    /// Client for a server at `host:port`.
    pub fn new(host: &str, port: u16) -> Result<Self, ClientError> {
        Self::with_base_url(format!("http://{}:{}", host, port))
    }

    pub fn with_base_url(base_url: String) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request timeout for calls without a wait of their own.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request timeout for `get_capture(timeout_ms)`: never shorter than the
    /// frame wait plus [`CAPTURE_REPLY_SLACK`].
    pub fn capture_timeout(&self, timeout_ms: u64) -> Duration {
        self.timeout
            .max(Duration::from_millis(timeout_ms).saturating_add(CAPTURE_REPLY_SLACK))
    }

    /// Send one request and return the envelope as-is, failed or not.
    pub async fn call_raw(
        &self,
        method: Method,
        params: Value,
    ) -> Result<RpcEnvelope<Value>, ClientError> {
        self.send(method, params, self.timeout).await
    }

    async fn send(
        &self,
        method: Method,
        params: Value,
        timeout: Duration,
    ) -> Result<RpcEnvelope<Value>, ClientError> {
        let url = format!("{}{}", self.base_url, RPC_PATH);
        let response = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .json(&RpcRequest::new(method, params))
            .send()
            .await?
            .error_for_status()?;

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ClientError::MalformedResponse(format!("{} reply is not an envelope: {}", method, e))
        })
    }

    /// Send a request and turn a failed envelope into [`ClientError::Remote`].
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        params: Value,
        timeout: Duration,
    ) -> Result<(String, Option<T>), ClientError> {
        let envelope = self.send(method, params, timeout).await?;
        if !envelope.success {
            return Err(ClientError::Remote {
                kind: envelope.error,
                message: envelope.message,
            });
        }
        let payload = match envelope.payload {
            None | Some(Value::Null) => None,
            Some(value) => Some(serde_json::from_value(value).map_err(|e| {
                ClientError::MalformedResponse(format!("unexpected {} payload: {}", method, e))
            })?),
        };
        Ok((envelope.message, payload))
    }

    async fn call_payload<T: DeserializeOwned>(
        &self,
        method: Method,
        params: Value,
    ) -> Result<T, ClientError> {
        self.call_payload_within(method, params, self.timeout).await
    }

    async fn call_payload_within<T: DeserializeOwned>(
        &self,
        method: Method,
        params: Value,
        timeout: Duration,
    ) -> Result<T, ClientError> {
        let (_, payload) = self.call(method, params, timeout).await?;
        payload.ok_or_else(|| ClientError::MalformedResponse(format!("{} reply has no payload", method)))
    }

    async fn call_message(&self, method: Method) -> Result<String, ClientError> {
        let (message, _) = self.call::<Value>(method, Value::Null, self.timeout).await?;
        Ok(message)
    }

    /// No-op call used as a health check.
    pub async fn ping(&self) -> Result<PingReply, ClientError> {
        self.call_payload(Method::Ping, Value::Null).await
    }

    /// Connect with a loose configuration map (missing keys take defaults).
    pub async fn device_connect(&self, config: Value) -> Result<ConnectInfo, ClientError> {
        self.call_payload(Method::DeviceConnect, json!({ "config": config }))
            .await
    }

    pub async fn device_connect_profile(
        &self,
        profile: &ConfigurationProfile,
    ) -> Result<ConnectInfo, ClientError> {
        let config = serde_json::to_value(profile)
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
        self.device_connect(config).await
    }

    pub async fn device_start(&self) -> Result<String, ClientError> {
        self.call_message(Method::DeviceStart).await
    }

    pub async fn device_stop(&self) -> Result<String, ClientError> {
        self.call_message(Method::DeviceStop).await
    }

    pub async fn device_disconnect(&self) -> Result<String, ClientError> {
        self.call_message(Method::DeviceDisconnect).await
    }

    pub async fn get_device_info(&self) -> Result<DeviceInfo, ClientError> {
        self.call_payload(Method::GetDeviceInfo, Value::Null).await
    }

    /// Capture one frame. The HTTP request is allowed to outlast `timeout_ms`
    /// (see [`capture_timeout`](Self::capture_timeout)).
    pub async fn get_capture(&self, timeout_ms: u64) -> Result<CaptureSummary, ClientError> {
        self.call_payload_within(
            Method::GetCapture,
            json!({ "timeout_ms": timeout_ms }),
            self.capture_timeout(timeout_ms),
        )
        .await
    }

    pub async fn get_color_image(
        &self,
        format: &str,
        quality: i64,
    ) -> Result<DecodedImage, ClientError> {
        let payload: ImagePayload = self
            .call_payload(
                Method::GetColorImage,
                json!({ "format": format, "quality": quality }),
            )
            .await?;
        Ok(DecodedImage::try_from(payload)?)
    }

    pub async fn get_depth_image(
        &self,
        format: &str,
        min_depth: u16,
        max_depth: u16,
    ) -> Result<DecodedImage, ClientError> {
        let payload: ImagePayload = self
            .call_payload(
                Method::GetDepthImage,
                json!({ "format": format, "min_depth": min_depth, "max_depth": max_depth }),
            )
            .await?;
        Ok(DecodedImage::try_from(payload)?)
    }

    pub async fn get_ir_image(&self, format: &str) -> Result<DecodedImage, ClientError> {
        let payload: ImagePayload = self
            .call_payload(Method::GetIrImage, json!({ "format": format }))
            .await?;
        Ok(DecodedImage::try_from(payload)?)
    }

    pub async fn start_auto_capture(
        &self,
        interval_ms: u64,
    ) -> Result<AutoCaptureStatus, ClientError> {
        self.call_payload(Method::StartAutoCapture, json!({ "interval_ms": interval_ms }))
            .await
    }

    pub async fn stop_auto_capture(&self) -> Result<AutoCaptureStatus, ClientError> {
        self.call_payload(Method::StopAutoCapture, Value::Null).await
    }

    pub async fn get_latest_capture(&self) -> Result<CaptureSummary, ClientError> {
        self.call_payload(Method::GetLatestCapture, Value::Null).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_builds_base_url() {
        let client = RpcClient::new("127.0.0.1", 8123).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8123");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = RpcClient::with_base_url("http://host:1/".to_string()).unwrap();
        assert_eq!(client.base_url(), "http://host:1");
    }

    #[test]
    fn test_capture_timeout_covers_frame_wait() {
        let client =
            RpcClient::with_timeout("http://host:1".to_string(), Duration::from_secs(30)).unwrap();
        assert_eq!(client.capture_timeout(1000), Duration::from_secs(30));
        assert_eq!(client.capture_timeout(60_000), Duration::from_secs(75));
    }

    #[test]
    fn test_remote_error_kind() {
        let err = ClientError::Remote {
            kind: Some(ErrorKind::AlreadyConnected),
            message: "Device already connected".to_string(),
        };
        assert_eq!(err.kind(), Some(ErrorKind::AlreadyConnected));
        assert_eq!(err.to_string(), "Device already connected");
    }
}
