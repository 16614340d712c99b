//! JET false-color map for depth visualization.

/// Map an 8-bit intensity to JET RGB (blue for near, red for far).
pub fn jet(value: u8) -> [u8; 3] {
    let x = f32::from(value) / 255.0;
    let channel = |center: f32| -> u8 {
        let v = (1.5 - (4.0 * x - center).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}
