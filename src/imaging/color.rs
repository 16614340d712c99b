//! Color frame encoding.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, Rgb};

use super::{ColorFormat, EncodedImage, ImagingError};
use crate::driver::ColorFrame;

/// Reorder BGRA pixels, dropping alpha.
fn bgra_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 4 * 3);
    for px in data.chunks_exact(4) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    out
}

fn bgra_to_bgr(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 4 * 3);
    for px in data.chunks_exact(4) {
        out.extend_from_slice(&px[..3]);
    }
    out
}

/// Encode a color frame.
///
/// `quality` only applies to JPEG and is clamped to `1..=100`.
pub fn encode_color(
    frame: &ColorFrame,
    format: ColorFormat,
    quality: i64,
) -> Result<EncodedImage, ImagingError> {
    let (width, height) = (frame.width, frame.height);
    let (bytes, channels) = match format {
        ColorFormat::Bgra => (frame.data.clone(), 4),
        ColorFormat::Bgr => (bgra_to_bgr(&frame.data), 3),
        ColorFormat::Rgb => (bgra_to_rgb(&frame.data), 3),
        ColorFormat::Jpeg => {
            let rgb: ImageBuffer<Rgb<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, bgra_to_rgb(&frame.data))
                    .ok_or_else(|| ImagingError::Encode("frame size mismatch".to_string()))?;
            let mut buffer = Vec::new();
            let quality = quality.clamp(1, 100) as u8;
            JpegEncoder::new_with_quality(&mut buffer, quality)
                .encode_image(&rgb)
                .map_err(|e| ImagingError::Encode(format!("JPEG encode failed: {}", e)))?;
            (buffer, 3)
        }
        ColorFormat::Png => {
            let rgb = bgra_to_rgb(&frame.data);
            let mut buffer = Vec::new();
            PngEncoder::new(&mut buffer)
                .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(|e| ImagingError::Encode(format!("PNG encode failed: {}", e)))?;
            (buffer, 3)
        }
    };

    Ok(EncodedImage {
        format: format.token(),
        bytes,
        width,
        height,
        channels,
        dtype: "uint8",
        depth_range: None,
    })
}
