//! Encoded images decode with a stock image library.

use depthgate::driver::{ColorFrame, Mono16Frame};
use depthgate::imaging::{
    encode_color, encode_depth, encode_ir, ColorFormat, DepthFormat, ImagePayload, IrFormat,
};
use image::{ColorType, GenericImageView, ImageFormat};

/// 4x2 frame, top row pure red, bottom row pure blue (stored as BGRA).
fn color_frame() -> ColorFrame {
    let mut data = Vec::new();
    for _ in 0..4 {
        data.extend_from_slice(&[0, 0, 255, 255]);
    }
    for _ in 0..4 {
        data.extend_from_slice(&[255, 0, 0, 255]);
    }
    ColorFrame::new(data, 4, 2).unwrap()
}

fn depth_frame() -> Mono16Frame {
    Mono16Frame::new(vec![0, 500, 1000, 2000, 3000, 4000, 5000, 65535], 4, 2).unwrap()
}

#[test]
fn test_png_color_keeps_channel_order() {
    let encoded = encode_color(&color_frame(), ColorFormat::Png, 95).unwrap();
    let decoded = image::load_from_memory_with_format(&encoded.bytes, ImageFormat::Png).unwrap();
    assert_eq!(decoded.dimensions(), (4, 2));
    assert_eq!(decoded.color(), ColorType::Rgb8);

    let rgb = decoded.to_rgb8();
    assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 0]);
    assert_eq!(rgb.get_pixel(3, 1).0, [0, 0, 255]);
}

#[test]
fn test_jpeg_color_decodes() {
    let encoded = encode_color(&color_frame(), ColorFormat::Jpeg, 95).unwrap();
    assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory_with_format(&encoded.bytes, ImageFormat::Jpeg).unwrap();
    assert_eq!(decoded.dimensions(), (4, 2));
    assert_eq!(encoded.channels, 3);
}

#[test]
fn test_normalized_depth_is_gray_png() {
    let encoded = encode_depth(&depth_frame(), DepthFormat::Normalized, 0, 4000).unwrap();
    let decoded = image::load_from_memory_with_format(&encoded.bytes, ImageFormat::Png).unwrap();
    assert_eq!(decoded.color(), ColorType::L8);

    let gray = decoded.to_luma8();
    assert_eq!(gray.get_pixel(0, 0).0, [0]);
    assert_eq!(gray.get_pixel(1, 1).0, [255]);
    // 5000 and 65535 clip to the ceiling
    assert_eq!(gray.get_pixel(2, 1).0, [255]);
    assert_eq!(gray.get_pixel(3, 1).0, [255]);
    assert_eq!(encoded.depth_range, Some((0, 4000)));
}

#[test]
fn test_colormap_depth_is_rgb_png() {
    let encoded = encode_depth(&depth_frame(), DepthFormat::Colormap, 500, 3000).unwrap();
    let decoded = image::load_from_memory_with_format(&encoded.bytes, ImageFormat::Png).unwrap();
    assert_eq!(decoded.dimensions(), (4, 2));
    assert_eq!(decoded.color(), ColorType::Rgb8);

    let rgb = decoded.to_rgb8();
    // clipped values share the ends of the map
    assert_eq!(rgb.get_pixel(0, 0), rgb.get_pixel(1, 0));
    assert_eq!(rgb.get_pixel(0, 1), rgb.get_pixel(3, 1));
    assert_ne!(rgb.get_pixel(0, 0), rgb.get_pixel(3, 1));
}

#[test]
fn test_normalized_ir_stretches_own_range() {
    let frame = Mono16Frame::new(vec![100, 200, 300, 400], 2, 2).unwrap();
    let encoded = encode_ir(&frame, IrFormat::Normalized).unwrap();
    let decoded = image::load_from_memory_with_format(&encoded.bytes, ImageFormat::Png)
        .unwrap()
        .to_luma8();
    assert_eq!(decoded.get_pixel(0, 0).0, [0]);
    assert_eq!(decoded.get_pixel(1, 1).0, [255]);
}

#[test]
fn test_payload_survives_json() {
    let encoded = encode_depth(&depth_frame(), DepthFormat::Raw, 0, 4000).unwrap();
    let payload = ImagePayload::new(encoded, 42);
    let json = serde_json::to_string(&payload).unwrap();
    let back: ImagePayload = serde_json::from_str(&json).unwrap();

    let bytes = back.decode().unwrap();
    assert_eq!(bytes.len(), 8 * 2);
    assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]), 4000);
    assert_eq!(back.depth_range, Some([0, 4000]));
    assert_eq!(back.sequence, 42);
}
