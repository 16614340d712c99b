//! Session-protocol errors.
//!
//! These are always recovered into a failed envelope by the RPC layer; none
//! of them take the server down.

use serde::{Deserialize, Serialize};

use crate::driver::DriverError;
use crate::imaging::ImagingError;

/// Errors returned by [`DeviceSession`](super::DeviceSession) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Device already connected")]
    AlreadyConnected,
    #[error("Device not connected")]
    NotConnected,
    #[error("Device not started")]
    NotStreaming,
    #[error("Device already started")]
    AlreadyStreaming,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("No capture within {timeout_ms} ms")]
    CaptureTimeout { timeout_ms: u64 },
    #[error("No capture available, call get_capture first")]
    NoCurrentCapture,
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Session busy, lock not acquired within {waited_ms} ms")]
    SessionBusy { waited_ms: u64 },
    #[error("Driver error: {0}")]
    Driver(String),
}

/// Machine-readable error code carried in a failed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    AlreadyConnected,
    NotConnected,
    NotStreaming,
    AlreadyStreaming,
    InvalidConfig,
    CaptureTimeout,
    NoCurrentCapture,
    UnsupportedFormat,
    InvalidArgument,
    DeviceUnavailable,
    SessionBusy,
    NoFrameYet,
    InvalidRequest,
    Internal,
    /// A code this build does not know, sent by a newer server
    #[serde(other)]
    Unknown,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::AlreadyConnected => ErrorKind::AlreadyConnected,
            SessionError::NotConnected => ErrorKind::NotConnected,
            SessionError::NotStreaming => ErrorKind::NotStreaming,
            SessionError::AlreadyStreaming => ErrorKind::AlreadyStreaming,
            SessionError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            SessionError::CaptureTimeout { .. } => ErrorKind::CaptureTimeout,
            SessionError::NoCurrentCapture => ErrorKind::NoCurrentCapture,
            SessionError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            SessionError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SessionError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            SessionError::SessionBusy { .. } => ErrorKind::SessionBusy,
            SessionError::Driver(_) => ErrorKind::Internal,
        }
    }
}

impl From<DriverError> for SessionError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::Unavailable(msg) => SessionError::DeviceUnavailable(msg),
            other => SessionError::Driver(other.to_string()),
        }
    }
}

impl From<ImagingError> for SessionError {
    fn from(e: ImagingError) -> Self {
        match e {
            ImagingError::UnsupportedFormat(token) => SessionError::UnsupportedFormat(token),
            ImagingError::InvalidRange { min, max } => SessionError::InvalidArgument(format!(
                "min_depth {} is greater than max_depth {}",
                min, max
            )),
            ImagingError::MissingStream(stream) => SessionError::InvalidArgument(format!(
                "current capture has no {} image",
                stream
            )),
            other => SessionError::Driver(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_driver_error_maps_to_device_unavailable() {
        let err: SessionError = DriverError::Unavailable("unplugged".to_string()).into();
        assert_eq!(err, SessionError::DeviceUnavailable("unplugged".to_string()));
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    }

    #[test]
    fn test_other_driver_errors_are_internal() {
        let err: SessionError = DriverError::Failed("usb reset".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("usb reset"));
    }

    #[test]
    fn test_imaging_errors_map_to_protocol_errors() {
        let err: SessionError = ImagingError::UnsupportedFormat("TIFF".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

        let err: SessionError = ImagingError::InvalidRange { min: 10, max: 5 }.into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_error_kind_serializes_as_name() {
        let value = serde_json::to_value(ErrorKind::CaptureTimeout).unwrap();
        assert_eq!(value, "CaptureTimeout");
    }

    #[test]
    fn test_capture_timeout_message() {
        let err = SessionError::CaptureTimeout { timeout_ms: 250 };
        assert_eq!(err.to_string(), "No capture within 250 ms");
    }
}
