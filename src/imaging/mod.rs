//! Per-format image extraction from a capture.
//!
//! This module provides:
//! - Format tokens via [`ColorFormat`], [`DepthFormat`], [`IrFormat`]
//! - Encoders for color, depth and IR frames
//! - The wire representation via [`ImagePayload`]

mod color;
mod colormap;
mod depth;
mod payload;

use std::fmt;
use std::str::FromStr;

use crate::driver::Capture;

pub use color::encode_color;
pub use colormap::jet;
pub use depth::{encode_depth, encode_ir};
pub use payload::{ImagePayload, PayloadError};

/// Default JPEG quality when the caller does not pass one.
pub const DEFAULT_JPEG_QUALITY: i64 = 95;
/// Default depth clipping range in millimetres.
pub const DEFAULT_MIN_DEPTH: u16 = 0;
pub const DEFAULT_MAX_DEPTH: u16 = 4000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImagingError {
    #[error("unsupported format '{0}'")]
    UnsupportedFormat(String),
    #[error("invalid depth range: min {min} > max {max}")]
    InvalidRange { min: u16, max: u16 },
    #[error("capture has no {0} image")]
    MissingStream(&'static str),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Encoded bytes plus the shape metadata sent alongside them.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub format: &'static str,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub dtype: &'static str,
    /// Min and max of the clipped depth values
    pub depth_range: Option<(u16, u16)>,
}

impl EncodedImage {
    pub fn into_payload(self, sequence: u64) -> ImagePayload {
        ImagePayload::new(self, sequence)
    }
}

macro_rules! format_enum {
    ($name:ident { $($variant:ident => $token:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn token(self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ImagingError;

            /// Case-insensitive.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($token => Ok($name::$variant),)+
                    _ => Err(ImagingError::UnsupportedFormat(s.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.token())
            }
        }
    };
}

format_enum!(ColorFormat {
    Jpeg => "JPEG",
    Png => "PNG",
    Bgr => "BGR",
    Rgb => "RGB",
    Bgra => "BGRA",
});

format_enum!(DepthFormat {
    Raw => "RAW",
    Normalized => "NORMALIZED",
    Colormap => "COLORMAP",
});

format_enum!(IrFormat {
    Raw => "RAW",
    Normalized => "NORMALIZED",
});

/// Encode the color image of `capture`.
///
/// The format token is checked before the stream, so an unknown token is
/// reported even when the capture has no color image.
pub fn color_payload(
    capture: &Capture,
    format: &str,
    quality: i64,
) -> Result<ImagePayload, ImagingError> {
    let format: ColorFormat = format.parse()?;
    let frame = capture
        .color
        .as_ref()
        .ok_or(ImagingError::MissingStream("color"))?;
    Ok(encode_color(frame, format, quality)?.into_payload(capture.sequence))
}

/// Encode the depth image of `capture`, clipped to `[min, max]` millimetres.
pub fn depth_payload(
    capture: &Capture,
    format: &str,
    min: u16,
    max: u16,
) -> Result<ImagePayload, ImagingError> {
    let format: DepthFormat = format.parse()?;
    if min > max {
        return Err(ImagingError::InvalidRange { min, max });
    }
    let frame = capture
        .depth
        .as_ref()
        .ok_or(ImagingError::MissingStream("depth"))?;
    Ok(encode_depth(frame, format, min, max)?.into_payload(capture.sequence))
}

pub fn ir_payload(capture: &Capture, format: &str) -> Result<ImagePayload, ImagingError> {
    let format: IrFormat = format.parse()?;
    let frame = capture.ir.as_ref().ok_or(ImagingError::MissingStream("ir"))?;
    Ok(encode_ir(frame, format)?.into_payload(capture.sequence))
}
