//! Depth and IR (16-bit mono) frame encoding.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use super::colormap::jet;
use super::{DepthFormat, EncodedImage, ImagingError, IrFormat};
use crate::driver::Mono16Frame;

fn to_le_bytes(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Linear map of `[lo, hi]` onto `0..=255`. A flat range maps to 0.
fn scale_to_u8(values: &[u16], lo: u16, hi: u16) -> Vec<u8> {
    let span = u32::from(hi.saturating_sub(lo));
    values
        .iter()
        .map(|&v| {
            if span == 0 {
                0
            } else {
                let offset = u32::from(v.clamp(lo, hi) - lo);
                ((offset * 255 + span / 2) / span) as u8
            }
        })
        .collect()
}

fn png(bytes: &[u8], width: u32, height: u32, color: ExtendedColorType) -> Result<Vec<u8>, ImagingError> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(bytes, width, height, color)
        .map_err(|e| ImagingError::Encode(format!("PNG encode failed: {}", e)))?;
    Ok(buffer)
}

/// Encode a depth frame after clipping every value into `[min, max]`.
///
/// Out-of-range readings are clamped, never wrapped: with `max = 4000` a raw
/// 5000 encodes exactly like 4000.
pub fn encode_depth(
    frame: &Mono16Frame,
    format: DepthFormat,
    min: u16,
    max: u16,
) -> Result<EncodedImage, ImagingError> {
    if min > max {
        return Err(ImagingError::InvalidRange { min, max });
    }

    let clipped: Vec<u16> = frame.data.iter().map(|v| (*v).clamp(min, max)).collect();
    let observed = clipped
        .iter()
        .fold(None, |acc: Option<(u16, u16)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        });

    let (bytes, channels, dtype) = match format {
        DepthFormat::Raw => (to_le_bytes(&clipped), 1, "uint16"),
        DepthFormat::Normalized => {
            let gray = scale_to_u8(&clipped, min, max);
            (png(&gray, frame.width, frame.height, ExtendedColorType::L8)?, 1, "uint8")
        }
        DepthFormat::Colormap => {
            let rgb: Vec<u8> = scale_to_u8(&clipped, min, max)
                .into_iter()
                .flat_map(jet)
                .collect();
            (png(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)?, 3, "uint8")
        }
    };

    Ok(EncodedImage {
        format: format.token(),
        bytes,
        width: frame.width,
        height: frame.height,
        channels,
        dtype,
        depth_range: observed,
    })
}

/// Encode an IR frame. `NORMALIZED` stretches the frame's own min..max.
pub fn encode_ir(frame: &Mono16Frame, format: IrFormat) -> Result<EncodedImage, ImagingError> {
    let (bytes, dtype) = match format {
        IrFormat::Raw => (to_le_bytes(&frame.data), "uint16"),
        IrFormat::Normalized => {
            let lo = frame.data.iter().copied().min().unwrap_or(0);
            let hi = frame.data.iter().copied().max().unwrap_or(0);
            let gray = scale_to_u8(&frame.data, lo, hi);
            (png(&gray, frame.width, frame.height, ExtendedColorType::L8)?, "uint8")
        }
    };

    Ok(EncodedImage {
        format: format.token(),
        bytes,
        width: frame.width,
        height: frame.height,
        channels: 1,
        dtype,
        depth_range: None,
    })
}
