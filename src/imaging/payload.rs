//! Wire form of an encoded image.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::EncodedImage;

/// Base64 image bytes tagged with the format and shape they were encoded with.
///
/// `byte_length` and `sha256` describe the decoded bytes so the receiver can
/// detect truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub dtype: String,
    pub byte_length: usize,
    pub sha256: String,
    pub data: String,
    /// Sequence number of the capture this was extracted from
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_range: Option<[u16; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid base64 image data: {0}")]
    Base64(String),
    #[error("image length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("image digest mismatch")]
    DigestMismatch,
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl ImagePayload {
    pub fn new(image: EncodedImage, sequence: u64) -> Self {
        Self {
            format: image.format.to_string(),
            width: image.width,
            height: image.height,
            channels: image.channels,
            dtype: image.dtype.to_string(),
            byte_length: image.bytes.len(),
            sha256: sha256_hex(&image.bytes),
            data: STANDARD.encode(&image.bytes),
            sequence,
            depth_range: image.depth_range.map(|(lo, hi)| [lo, hi]),
        }
    }

    /// Decode the image bytes, verifying length and digest.
    pub fn decode(&self) -> Result<Vec<u8>, PayloadError> {
        let bytes = STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| PayloadError::Base64(e.to_string()))?;
        if bytes.len() != self.byte_length {
            return Err(PayloadError::LengthMismatch {
                expected: self.byte_length,
                actual: bytes.len(),
            });
        }
        if !sha256_hex(&bytes).eq_ignore_ascii_case(&self.sha256) {
            return Err(PayloadError::DigestMismatch);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(bytes: Vec<u8>) -> ImagePayload {
        EncodedImage {
            format: "RAW",
            bytes,
            width: 2,
            height: 1,
            channels: 1,
            dtype: "uint16",
            depth_range: Some((0, 9)),
        }
        .into_payload(7)
    }

    #[test]
    fn test_decode_returns_original_bytes() {
        let p = payload(vec![1, 2, 3, 4]);
        assert_eq!(p.byte_length, 4);
        assert_eq!(p.decode().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(p.depth_range, Some([0, 9]));
    }

    #[test]
    fn test_truncated_data_detected() {
        let mut p = payload(vec![1, 2, 3, 4, 5, 6]);
        p.data = STANDARD.encode([1, 2, 3]);
        assert_eq!(
            p.decode().unwrap_err(),
            PayloadError::LengthMismatch {
                expected: 6,
                actual: 3
            }
        );
    }

    #[test]
    fn test_tampered_data_detected() {
        let mut p = payload(vec![1, 2, 3, 4]);
        p.data = STANDARD.encode([4, 3, 2, 1]);
        assert_eq!(p.decode().unwrap_err(), PayloadError::DigestMismatch);
    }

    #[test]
    fn test_bad_base64() {
        let mut p = payload(vec![1]);
        p.data = "***".to_string();
        assert!(matches!(p.decode(), Err(PayloadError::Base64(_))));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
