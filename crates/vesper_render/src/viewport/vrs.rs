//! Variable-rate shading images.
//!
//! A VRS source texture paints the desired shading rate per screen area:
//! the red channel selects the horizontal rate and green the vertical one
//! (0 → 1 pixel, 0.5 → 2 pixels, 1 → 4 pixels). The device consumes one
//! rate per `TILE_SIZE`² tile, encoded as `log2(x) << 2 | log2(y)`.

use glam::UVec2;
use vesper_core::Color;
use vesper_resources::Image;

pub const TILE_SIZE: u32 = 16;

#[must_use]
fn axis_rate_log2(v: f32) -> u8 {
    if v < 0.25 {
        0
    } else if v < 0.75 {
        1
    } else {
        2
    }
}

#[must_use]
pub fn encode_rate(color: Color) -> u8 {
    (axis_rate_log2(color.r) << 2) | axis_rate_log2(color.g)
}

/// Pixel size of a shading-rate image covering `target`.
#[must_use]
pub fn rate_image_size(target: UVec2) -> UVec2 {
    UVec2::new(target.x.div_ceil(TILE_SIZE), target.y.div_ceil(TILE_SIZE))
}

/// Builds the shading-rate image for `target` by sampling `source` at
/// every tile center. Without a source the whole image is full rate.
#[must_use]
pub fn build_rate_image(source: Option<&Image>, target: UVec2) -> Vec<u8> {
    let size = rate_image_size(target);
    let mut out = Vec::with_capacity((size.x * size.y) as usize);
    for ty in 0..size.y {
        for tx in 0..size.x {
            let rate = source.filter(|img| img.width() > 0 && img.height() > 0).map_or(0, |img| {
                let u = (tx as f32 + 0.5) / size.x as f32;
                let v = (ty as f32 + 0.5) / size.y as f32;
                let x = ((u * img.width() as f32) as u32).min(img.width() - 1);
                let y = ((v * img.height() as f32) as u32).min(img.height() - 1);
                encode_rate(img.get_pixel(x, y))
            });
            out.push(rate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_resources::ImageFormat;

    #[test]
    fn rates_are_encoded_per_axis() {
        assert_eq!(encode_rate(Color::BLACK), 0);
        assert_eq!(encode_rate(Color::rgb(0.5, 0.0, 0.0)), 0b0100);
        assert_eq!(encode_rate(Color::rgb(1.0, 1.0, 0.0)), 0b1010);
    }

    #[test]
    fn image_covers_every_tile() {
        assert_eq!(rate_image_size(UVec2::new(33, 16)), UVec2::new(3, 1));
        let src = Image::filled(4, 4, ImageFormat::Rgba8, Color::rgb(1.0, 0.5, 0.0));
        let img = build_rate_image(Some(&src), UVec2::new(32, 32));
        assert_eq!(img, vec![0b1001; 4]);
        assert_eq!(build_rate_image(None, UVec2::new(16, 16)), vec![0]);
    }
}
